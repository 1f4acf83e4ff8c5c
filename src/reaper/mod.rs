use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::routes::location::model::LocationRecord;
use crate::store::LocationStore;

/// 纯函数：从快照中挑出仍标记在线但活跃时间已超时的用户
pub fn stale_user_ids(
    records: &HashMap<String, LocationRecord>,
    now: DateTime<Utc>,
    inactive_timeout: Duration,
) -> Vec<String> {
    let mut stale: Vec<String> = records
        .iter()
        .filter(|(_, record)| record.status.online && record.is_stale(now, inactive_timeout))
        .map(|(user_id, _)| user_id.clone())
        .collect();
    stale.sort();
    stale
}

/// 启动后台清理任务：按固定间隔扫描位置存储，
/// 把超过不活跃超时的在线会话翻转为离线。
///
/// 进程关闭时通过 watch 通道取消：睡眠阶段立即退出，
/// 扫描进行中允许跑完当前一轮。
pub fn spawn(
    store: LocationStore,
    interval: Duration,
    inactive_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // interval 的首个 tick 立即触发，先消费掉
        ticker.tick().await;

        tracing::info!(
            "Cleanup task started, interval {:?}, inactive timeout {:?}",
            interval,
            inactive_timeout
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&store, inactive_timeout).await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("Cleanup task shutting down");
                    break;
                }
            }
        }
    })
}

/// 单轮扫描。存储完全不可用时只记录日志，下一轮重试；
/// 单条记录的处理失败同样不中断剩余的扫描。
async fn sweep(store: &LocationStore, inactive_timeout: Duration) {
    let records = match store.read_all().await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Cleanup scan skipped, store unavailable: {}", e);
            return;
        }
    };

    let now = Utc::now();
    let stale = stale_user_ids(&records, now, inactive_timeout);
    if stale.is_empty() {
        return;
    }

    let mut flipped = 0usize;
    for user_id in &stale {
        match store.set_offline(user_id, now).await {
            Ok(()) => flipped += 1,
            Err(e) => {
                tracing::warn!("Failed to mark {} offline: {}", user_id, e);
            }
        }
    }

    tracing::info!("Cleanup flipped {}/{} stale users offline", flipped, stale.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use crate::routes::location::model::{DeviceInfo, SessionStatus};

    fn record(online: bool, last_activity: DateTime<Utc>) -> LocationRecord {
        LocationRecord {
            info: Profile::default(),
            position: None,
            status: SessionStatus {
                online,
                last_seen: last_activity,
                connected_at: None,
                disconnected_at: None,
            },
            device_info: DeviceInfo {
                platform: "mobile".to_string(),
                last_activity,
            },
        }
    }

    #[test]
    fn test_only_stale_online_records_selected() {
        let now = Utc::now();
        let timeout = Duration::from_secs(900);
        let mut records = HashMap::new();
        records.insert("fresh".to_string(), record(true, now));
        records.insert(
            "stale_online".to_string(),
            record(true, now - chrono::Duration::seconds(901)),
        );
        records.insert(
            "stale_offline".to_string(),
            record(false, now - chrono::Duration::seconds(5000)),
        );

        let stale = stale_user_ids(&records, now, timeout);
        assert_eq!(stale, vec!["stale_online".to_string()]);
    }

    #[test]
    fn test_boundary_not_selected() {
        let now = Utc::now();
        let mut records = HashMap::new();
        records.insert(
            "exactly_at_timeout".to_string(),
            record(true, now - chrono::Duration::seconds(900)),
        );

        let stale = stale_user_ids(&records, now, Duration::from_secs(900));
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_sleep_is_prompt() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let redis = std::sync::Arc::new(redis::Client::open(url).expect("redis client"));
        let store = LocationStore::new(redis, Duration::from_secs(2));

        let (tx, rx) = watch::channel(false);
        let handle = spawn(
            store,
            Duration::from_secs(3600),
            Duration::from_secs(900),
            rx,
        );

        tx.send(true).expect("send shutdown");
        // 睡眠阶段的取消必须立刻生效
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper exited promptly")
            .expect("reaper task join");
    }
}
