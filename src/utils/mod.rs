use axum::Json;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // 用户ID
    pub exp: i64,      // 过期时间
    pub iat: i64,      // 签发时间
    pub is_temp: bool, // 临时标识
}

/// 校验外部签发的访问令牌。本服务只消费令牌，不签发。
pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub mod error_codes {
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const AUTH_FAILED: i32 = 1002;
    pub const RATE_LIMIT: i32 = 1005;
    pub const SERVICE_TIMEOUT: i32 = 1006;
    pub const SERVICE_UNAVAILABLE: i32 = 1007;
    pub const INTERNAL_ERROR: i32 = 5000;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/unused".to_string(),
            redis_url: "redis://localhost/".to_string(),
            jwt_secret: "test-secret".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            nearby_radius_km: 1.0,
            location_min_interval_ms: 300,
            rate_limit_expire_secs: 30,
            inactive_timeout_secs: 900,
            cleanup_interval_secs: 300,
            store_timeout_secs: 2,
            profile_cache_ttl_secs: 300,
            ws_idle_probe_secs: 30,
        }
    }

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("sign token")
    }

    #[test]
    fn test_verify_accepts_externally_signed_token() {
        let config = test_config();
        let claims = Claims {
            sub: "user-1".to_string(),
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
            is_temp: false,
        };

        let token = sign(&claims, &config.jwt_secret);
        let verified = verify_token(&token, &config).expect("valid token");
        assert_eq!(verified.sub, "user-1");
        assert!(!verified.is_temp);
    }

    #[test]
    fn test_verify_rejects_wrong_secret_and_garbage() {
        let config = test_config();
        let claims = Claims {
            sub: "user-1".to_string(),
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
            is_temp: false,
        };

        let token = sign(&claims, "other-secret");
        assert!(verify_token(&token, &config).is_err());
        assert!(verify_token("not-a-token", &config).is_err());
    }

    #[test]
    fn test_success_envelope_shape() {
        let Json(body) = success_to_api_response(serde_json::json!({"ok": true}));
        assert_eq!(body.code, 0);
        assert_eq!(body.msg, "success");
        assert!(body.resp_data.is_some());
    }
}
