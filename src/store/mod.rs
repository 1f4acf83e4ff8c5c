use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};

use crate::error::AppError;
use crate::profile::Profile;
use crate::routes::location::model::{LocationRecord, LocationUpdateRequest, Position};

// 每个用户一条JSON记录
const LOCATION_KEY_PREFIX: &str = "location:";

/// 位置存储适配器：对持久化的每用户位置/状态记录的类型化访问。
///
/// 所有 Redis 调用都带有界超时，超时是独立于"限流"的错误，
/// 必须单独上报（请求失败），不能静默放行。
#[derive(Clone)]
pub struct LocationStore {
    redis: Arc<RedisClient>,
    timeout: Duration,
}

impl LocationStore {
    pub fn new(redis: Arc<RedisClient>, timeout: Duration) -> Self {
        Self { redis, timeout }
    }

    fn key(user_id: &str) -> String {
        format!("{}{}", LOCATION_KEY_PREFIX, user_id)
    }

    /// 给单条 Redis 操作加上有界超时
    async fn bounded<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!("Redis operation failed: {}", e);
                Err(AppError::ServiceUnavailable)
            }
            Err(_) => {
                tracing::error!("Redis operation timed out after {:?}", self.timeout);
                Err(AppError::ServiceTimeout)
            }
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        self.bounded(self.redis.get_multiplexed_async_connection())
            .await
    }

    async fn read_record(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        user_id: &str,
    ) -> Result<Option<LocationRecord>, AppError> {
        let raw: Option<String> = self.bounded(conn.get(Self::key(user_id))).await?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    tracing::warn!("Corrupt location record for user {}: {}", user_id, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn write_record(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        user_id: &str,
        record: &LocationRecord,
    ) -> Result<(), AppError> {
        let json = serde_json::to_string(record).map_err(|e| {
            tracing::error!("Failed to serialize location record: {}", e);
            AppError::InternalServerError
        })?;
        let _: () = self.bounded(conn.set(Self::key(user_id), json)).await?;
        Ok(())
    }

    pub async fn read(&self, user_id: &str) -> Result<Option<LocationRecord>, AppError> {
        let mut conn = self.connection().await?;
        self.read_record(&mut conn, user_id).await
    }

    /// 校验并写入位置样本，刷新活跃时间并置为在线，返回本次使用的时间戳。
    /// 校验失败时不产生任何存储变更。
    pub async fn write_position(
        &self,
        user_id: &str,
        update: LocationUpdateRequest,
    ) -> Result<(Position, DateTime<Utc>), AppError> {
        update.validate()?;

        let now = Utc::now();
        let position = update.into_position(now);

        let mut conn = self.connection().await?;
        let mut record = self
            .read_record(&mut conn, user_id)
            .await?
            .unwrap_or_else(|| LocationRecord::new_connected(Profile::default(), now));

        record.position = Some(position.clone());
        record.status.online = true;
        record.status.last_seen = now;
        record.device_info.last_activity = now;

        self.write_record(&mut conn, user_id, &record).await?;
        Ok((position, now))
    }

    /// 连接建立时刷新记录：在线状态、connected_at 和资料快照，保留已有位置
    pub async fn mark_connected(&self, user_id: &str, info: Profile) -> Result<(), AppError> {
        let now = Utc::now();
        let mut conn = self.connection().await?;
        let mut record = self
            .read_record(&mut conn, user_id)
            .await?
            .unwrap_or_else(|| LocationRecord::new_connected(info.clone(), now));

        record.info = info;
        record.status.online = true;
        record.status.last_seen = now;
        record.status.connected_at = Some(now);
        record.status.disconnected_at = None;
        record.device_info.last_activity = now;

        self.write_record(&mut conn, user_id, &record).await
    }

    /// 只更新状态为离线，保留最后已知位置。
    /// 对已离线的记录重复调用收敛到同一终态，不报错。
    pub async fn set_offline(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let Some(mut record) = self.read_record(&mut conn, user_id).await? else {
            return Ok(());
        };

        record.status.online = false;
        record.status.disconnected_at = Some(at);

        self.write_record(&mut conn, user_id, &record).await
    }

    /// 用户资料变更后重写记录中的资料快照
    pub async fn update_profile(&self, user_id: &str, info: Profile) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let Some(mut record) = self.read_record(&mut conn, user_id).await? else {
            return Ok(());
        };

        record.info = info;
        self.write_record(&mut conn, user_id, &record).await
    }

    /// 读取全量记录快照用于匹配。快照相对真实状态允许轻微滞后，
    /// 匹配只是建议性的，接受最终一致。
    pub async fn read_all(&self) -> Result<HashMap<String, LocationRecord>, AppError> {
        let mut conn = self.connection().await?;

        let pattern = format!("{}*", LOCATION_KEY_PREFIX);
        let keys: Vec<String> = self
            .bounded(redis::cmd("KEYS").arg(&pattern).query_async(&mut conn))
            .await?;

        let mut records = HashMap::new();
        if keys.is_empty() {
            return Ok(records);
        }

        let values: Vec<Option<String>> = self
            .bounded(redis::cmd("MGET").arg(&keys).query_async(&mut conn))
            .await?;

        for (key, value) in keys.iter().zip(values) {
            let Some(json) = value else { continue };
            let Some(user_id) = key.strip_prefix(LOCATION_KEY_PREFIX) else {
                continue;
            };
            match serde_json::from_str::<LocationRecord>(&json) {
                Ok(record) => {
                    records.insert(user_id.to_string(), record);
                }
                Err(e) => {
                    // 单条损坏的记录不影响整个快照
                    tracing::warn!("Skipping corrupt record {}: {}", key, e);
                }
            }
        }

        Ok(records)
    }
}
