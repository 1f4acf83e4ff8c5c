use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::limiter::RateLimiter;
use crate::profile::ProfileCache;
use crate::registry::ConnectionRegistry;
use crate::routes::location::model::{LocationUpdateRequest, NearbyUser, Position};
use crate::routes::ws::model::ServerMessage;
use crate::store::LocationStore;

/// 广播引擎：上报 → 匹配 → 推送的中心编排。
///
/// 自身不持有可变状态，所有共享状态都在注册表、限流器和存储里，
/// 进程启动时构造一次，通过 Arc 传递。
pub struct BroadcastEngine {
    store: LocationStore,
    limiter: RateLimiter,
    registry: Arc<ConnectionRegistry>,
    profiles: Arc<ProfileCache>,
    radius_km: f64,
    inactive_timeout: Duration,
}

impl BroadcastEngine {
    pub fn new(
        store: LocationStore,
        limiter: RateLimiter,
        registry: Arc<ConnectionRegistry>,
        profiles: Arc<ProfileCache>,
        radius_km: f64,
        inactive_timeout: Duration,
    ) -> Self {
        Self {
            store,
            limiter,
            registry,
            profiles,
            radius_km,
            inactive_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 连接建立：写入带资料快照的在线状态
    pub async fn connect(&self, user_id: &str) -> Result<(), AppError> {
        let info = self.profiles.get(user_id).await;
        self.store.mark_connected(user_id, info).await?;
        tracing::info!("User {} connected", user_id);
        Ok(())
    }

    /// 断开连接：状态置为离线，保留最后位置。重复调用收敛到同一终态。
    pub async fn disconnect(&self, user_id: &str) -> Result<(), AppError> {
        self.store.set_offline(user_id, Utc::now()).await?;
        tracing::info!("User {} disconnected", user_id);
        Ok(())
    }

    /// 接受一条位置上报：限流 → 校验并入库，返回接受的时间戳。
    /// 限流拒绝和坐标校验失败都发生在任何存储变更之前。
    pub async fn update_position(
        &self,
        user_id: &str,
        update: LocationUpdateRequest,
    ) -> Result<(Position, DateTime<Utc>), AppError> {
        update.validate()?;

        if !self.limiter.allow(user_id).await? {
            return Err(AppError::RateLimited);
        }

        self.store.write_position(user_id, update).await
    }

    /// 上报并立即向附近的用户做双向推送。
    /// 推送阶段的任何失败只记录日志，不影响本次上报的结果——
    /// 调用方自己的位置已经更新成功。
    pub async fn broadcast_position(
        &self,
        user_id: &str,
        update: LocationUpdateRequest,
    ) -> Result<DateTime<Utc>, AppError> {
        let (position, timestamp) = self.update_position(user_id, update).await?;

        if let Err(e) = self.notify_nearby(user_id, &position).await {
            tracing::warn!("Failed to notify nearby users of {}: {}", user_id, e);
        }

        Ok(timestamp)
    }

    /// 双向推送：把上报者的新位置推给每个附近的在线用户，
    /// 同时把对方的已知状态回推给上报者。单个对端的投递失败
    /// 不影响其他对端，没有活跃连接的对端直接跳过。
    async fn notify_nearby(&self, user_id: &str, position: &Position) -> Result<(), AppError> {
        let records = self.store.read_all().await?;
        let matches = NearbyUser::from_snapshot(
            user_id,
            position.latitude,
            position.longitude,
            &records,
            self.radius_km,
            self.inactive_timeout,
            Utc::now(),
        );

        if matches.is_empty() {
            return Ok(());
        }

        let origin_info = self.profiles.get(user_id).await;

        for nearby in &matches {
            let outbound = ServerMessage::peer_update(
                user_id,
                origin_info.clone(),
                position,
                nearby.distance,
            );
            match outbound.to_ws_message() {
                Ok(message) => {
                    // 对端不在线是常态，不是错误
                    if !self.registry.send(&nearby.user_id, message).await {
                        tracing::debug!("Peer {} not connected, push skipped", nearby.user_id);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to encode push for {}: {}", nearby.user_id, e);
                }
            }

            // 镜像推送：让上报者也知道对方的存在
            match ServerMessage::mirrored_update(nearby).to_ws_message() {
                Ok(message) => {
                    self.registry.send(user_id, message).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to encode mirrored push: {}", e);
                }
            }
        }

        tracing::debug!("Notified {} nearby users of {}", matches.len(), user_id);
        Ok(())
    }

    /// 列出调用者附近的用户。调用者还没有位置记录时返回空列表。
    pub async fn nearby_users(&self, user_id: &str) -> Result<Vec<NearbyUser>, AppError> {
        let Some(record) = self.store.read(user_id).await? else {
            return Ok(Vec::new());
        };
        let Some(position) = record.position else {
            return Ok(Vec::new());
        };

        let records = self.store.read_all().await?;
        Ok(NearbyUser::from_snapshot(
            user_id,
            position.latitude,
            position.longitude,
            &records,
            self.radius_km,
            self.inactive_timeout,
            Utc::now(),
        ))
    }

    /// 用户资料变更后：失效缓存，重新查询并回写位置记录中的快照
    pub async fn refresh_profile(&self, user_id: &str) -> Result<(), AppError> {
        self.profiles.invalidate(user_id).await;
        let info = self.profiles.get(user_id).await;
        self.store.update_profile(user_id, info).await
    }
}
