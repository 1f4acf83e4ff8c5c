use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    /// 附近用户的搜索半径（公里）
    pub nearby_radius_km: f64,
    /// 位置上报的最小间隔（毫秒）
    pub location_min_interval_ms: u64,
    /// 限流记录的过期时间（秒）
    pub rate_limit_expire_secs: u64,
    /// 用户多久没有活动被视为离线（秒）
    pub inactive_timeout_secs: u64,
    /// 后台清理任务的执行间隔（秒）
    pub cleanup_interval_secs: u64,
    /// 访问 Redis / 数据库的超时时间（秒）
    pub store_timeout_secs: u64,
    /// 用户资料缓存的过期时间（秒）
    pub profile_cache_ttl_secs: u64,
    /// WebSocket 空闲多久后发送心跳探测（秒）
    pub ws_idle_probe_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            nearby_radius_km: env::var("NEARBY_RADIUS_KM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            location_min_interval_ms: env::var("LOCATION_MIN_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            rate_limit_expire_secs: env::var("RATE_LIMIT_EXPIRE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            inactive_timeout_secs: env::var("INACTIVE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(900),
            cleanup_interval_secs: env::var("CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            store_timeout_secs: env::var("STORE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            profile_cache_ttl_secs: env::var("PROFILE_CACHE_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            ws_idle_probe_secs: env::var("WS_IDLE_PROBE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }

    pub fn location_min_interval(&self) -> Duration {
        Duration::from_millis(self.location_min_interval_ms)
    }

    pub fn inactive_timeout(&self) -> Duration {
        Duration::from_secs(self.inactive_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn profile_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_cache_ttl_secs)
    }

    pub fn ws_idle_probe(&self) -> Duration {
        Duration::from_secs(self.ws_idle_probe_secs)
    }
}
