use axum::{
    Extension,
    extract::{Json, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

use super::model::{LocationUpdateRequest, LocationUpdateResponse, NearbyUsersResponse};

/// 请求体缺少必填字段或不是合法 JSON 时，与坐标越界同样按校验错误处理
fn parse_update_body(
    payload: Result<Json<LocationUpdateRequest>, JsonRejection>,
) -> Result<LocationUpdateRequest, AppError> {
    match payload {
        Ok(Json(req)) => Ok(req),
        Err(e) => {
            tracing::debug!("Malformed location payload: {}", e);
            Err(AppError::InvalidCoordinates)
        }
    }
}

/// 更新自己的位置：校验 + 入库，受限流约束，返回接受的时间戳
#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<LocationUpdateRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match parse_update_body(payload) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };

    match state.engine.update_position(&claims.sub, req).await {
        Ok((_, timestamp)) => (
            StatusCode::OK,
            success_to_api_response(LocationUpdateResponse { timestamp }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// 上报并立即向附近用户推送。推送是尽力而为，
/// 响应只反映本次上报自身的结果。
#[axum::debug_handler]
pub async fn broadcast_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<LocationUpdateRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match parse_update_body(payload) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };

    match state.engine.broadcast_position(&claims.sub, req).await {
        Ok(timestamp) => (
            StatusCode::OK,
            success_to_api_response(LocationUpdateResponse { timestamp }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// 列出附近的用户及总数
#[axum::debug_handler]
pub async fn find_nearby_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    match state.engine.nearby_users(&claims.sub).await {
        Ok(users) => (
            StatusCode::OK,
            success_to_api_response(NearbyUsersResponse {
                total_count: users.len(),
                users,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Nearby query failed for {}: {}", claims.sub, e);
            e.into_response()
        }
    }
}

/// 用户资料变更后刷新缓存和位置记录中的资料快照
#[axum::debug_handler]
pub async fn refresh_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    match state.engine.refresh_profile(&claims.sub).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "success": true
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
