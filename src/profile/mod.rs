use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;

/// 用户目录中的资料快照，随位置记录一起下发给附近的用户
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: String,
}

struct CacheEntry {
    profile: Profile,
    cached_at: Instant,
}

/// 用户资料缓存：带固定过期时间的用户目录查询缓存。
///
/// 目录查询失败时返回空资料而不是报错——邻近功能不能被资料查询阻塞。
pub struct ProfileCache {
    pool: PgPool,
    ttl: Duration,
    lookup_timeout: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ProfileCache {
    pub fn new(pool: PgPool, ttl: Duration, lookup_timeout: Duration) -> Self {
        Self {
            pool,
            ttl,
            lookup_timeout,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 获取用户资料：优先读缓存，未命中或已过期时查询用户目录并回填缓存
    pub async fn get(&self, user_id: &str) -> Profile {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(user_id) {
                if entry.cached_at.elapsed() <= self.ttl {
                    return entry.profile.clone();
                }
            }
        }

        match tokio::time::timeout(self.lookup_timeout, self.lookup(user_id)).await {
            Ok(Ok(Some(profile))) => {
                let mut entries = self.entries.write().await;
                entries.insert(
                    user_id.to_string(),
                    CacheEntry {
                        profile: profile.clone(),
                        cached_at: Instant::now(),
                    },
                );
                profile
            }
            Ok(Ok(None)) => {
                tracing::debug!("No directory entry for user {}", user_id);
                Profile::default()
            }
            Ok(Err(e)) => {
                tracing::warn!("Directory lookup failed for user {}: {}", user_id, e);
                Profile::default()
            }
            Err(_) => {
                tracing::warn!("Directory lookup timed out for user {}", user_id);
                Profile::default()
            }
        }
    }

    /// 用户资料变更后主动失效，下一次 get 会绕过缓存重新查询
    pub async fn invalidate(&self, user_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(user_id);
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            SELECT
                u.nickname AS display_name,
                up.avatar,
                COALESCE(u.email, '') AS email
            FROM users u
            LEFT JOIN user_profiles up ON u.user_id = up.user_id
            WHERE u.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    #[cfg(test)]
    async fn seed(&self, user_id: &str, profile: Profile, cached_at: Instant) {
        let mut entries = self.entries.write().await;
        entries.insert(
            user_id.to_string(),
            CacheEntry { profile, cached_at },
        );
    }
}
