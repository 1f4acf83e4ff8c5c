use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::utils::{ApiResponse, error_codes};

/// 核心错误分类：客户端输入错误（400/429）、依赖服务故障（503）、其他（500）。
///
/// 对端推送失败不在此列——推送是尽力而为，只记录日志，永远不会返回给调用方。
#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    InvalidCoordinates,
    RateLimited,
    ServiceTimeout,
    ServiceUnavailable,
    InternalServerError,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::InvalidCoordinates => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceTimeout | AppError::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::Unauthorized => error_codes::AUTH_FAILED,
            AppError::InvalidCoordinates => error_codes::VALIDATION_ERROR,
            AppError::RateLimited => error_codes::RATE_LIMIT,
            AppError::ServiceTimeout => error_codes::SERVICE_TIMEOUT,
            AppError::ServiceUnavailable => error_codes::SERVICE_UNAVAILABLE,
            AppError::InternalServerError => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized => "未授权访问".to_string(),
            AppError::InvalidCoordinates => "无效的经纬度坐标".to_string(),
            AppError::RateLimited => "位置上报过于频繁，请稍后重试".to_string(),
            AppError::ServiceTimeout => "存储服务响应超时".to_string(),
            AppError::ServiceUnavailable => "存储服务暂时不可用".to_string(),
            AppError::InternalServerError => "内部服务器错误".to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ApiResponse::<()> {
            code: self.code(),
            msg: self.message(),
            resp_data: None,
        });

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::InvalidCoordinates.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::ServiceTimeout.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::InternalServerError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
