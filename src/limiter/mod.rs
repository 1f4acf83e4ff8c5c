use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::{AsyncCommands, Client as RedisClient};

use crate::error::AppError;

const RATE_LIMIT_KEY_PREFIX: &str = "ratelimit:location:";

/// 判定逻辑本身是纯函数：距上次接受的提交不足最小间隔则拒绝
pub fn allow_at(last_accepted_ms: Option<i64>, now_ms: i64, min_interval: Duration) -> bool {
    match last_accepted_ms {
        Some(last) => now_ms - last >= min_interval.as_millis() as i64,
        None => true,
    }
}

/// 位置上报限流器：按用户记录最近一次被接受的提交时间。
///
/// 记录有独立的过期时间（30秒），与强制的最小间隔（0.3秒）无关。
/// 访问 Redis 失败或超时是独立的错误，必须让请求失败，不能静默放行。
#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<RedisClient>,
    min_interval: Duration,
    expire: Duration,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        redis: Arc<RedisClient>,
        min_interval: Duration,
        expire: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            redis,
            min_interval,
            expire,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!("Rate limiter redis error: {}", e);
                Err(AppError::ServiceUnavailable)
            }
            Err(_) => {
                tracing::error!("Rate limiter redis timeout after {:?}", self.timeout);
                Err(AppError::ServiceTimeout)
            }
        }
    }

    /// 检查该用户是否允许提交；允许时记录新的时间戳。
    /// 返回 false 时调用方必须以限流错误拒绝本次提交。
    pub async fn allow(&self, user_id: &str) -> Result<bool, AppError> {
        let key = format!("{}{}", RATE_LIMIT_KEY_PREFIX, user_id);
        let now_ms = Utc::now().timestamp_millis();

        let mut conn = self
            .bounded(self.redis.get_multiplexed_async_connection())
            .await?;

        let last_accepted: Option<i64> = self.bounded(conn.get(&key)).await?;

        if !allow_at(last_accepted, now_ms, self.min_interval) {
            return Ok(false);
        }

        let _: () = self
            .bounded(conn.set_ex(&key, now_ms, self.expire.as_secs()))
            .await?;
        Ok(true)
    }
}
