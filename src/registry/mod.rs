use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// 单个活跃连接的句柄：写端由专门的发送任务持有，
/// 这里只保留一个无界通道的发送器。
struct ConnectionHandle {
    connection_id: Uuid,
    sender: mpsc::UnboundedSender<Message>,
}

/// 连接注册表：用户ID到活跃连接的唯一映射。
///
/// 注册表是该映射的独占持有者；同一用户新连接会替换旧映射，
/// 旧连接视为被取代。所有操作在并发的注册/注销/发送下都是安全的。
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// 注册连接，替换该用户已有的映射。返回本次连接的标识，
    /// 注销时凭它区分"自己的连接"和"已被新连接取代"。
    pub async fn register(&self, user_id: &str, sender: mpsc::UnboundedSender<Message>) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut connections = self.connections.write().await;
        if let Some(old) = connections.insert(
            user_id.to_string(),
            ConnectionHandle {
                connection_id,
                sender,
            },
        ) {
            tracing::info!(
                "Connection {} for user {} superseded by {}",
                old.connection_id,
                user_id,
                connection_id
            );
        }
        connection_id
    }

    /// 注销连接。只有 connection_id 匹配时才移除——
    /// 被取代的旧会话结束时不能误删新连接的映射。
    pub async fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(handle) if handle.connection_id == connection_id => {
                connections.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// 尽力投递：用户没有活跃连接或通道已关闭时返回 false，绝不报错
    pub async fn send(&self, user_id: &str, message: Message) -> bool {
        let connections = self.connections.read().await;
        match connections.get(user_id) {
            Some(handle) => handle.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_send() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("u1", tx).await;

        assert!(registry.send("u1", Message::Text("hello".into())).await);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_send_to_unknown_user_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send("nobody", Message::Text("hi".into())).await);
    }

    #[tokio::test]
    async fn test_send_to_closed_channel_returns_false() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("u1", tx).await;
        drop(rx);

        assert!(!registry.send("u1", Message::Text("hi".into())).await);
    }

    #[tokio::test]
    async fn test_new_connection_replaces_old() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let id1 = registry.register("u1", tx1).await;
        let _id2 = registry.register("u1", tx2).await;
        assert_eq!(registry.connection_count().await, 1);

        assert!(registry.send("u1", Message::Text("msg".into())).await);
        assert!(rx2.recv().await.is_some());
        assert!(rx1.try_recv().is_err());

        // 被取代的旧会话注销时不能移除新连接
        assert!(!registry.unregister("u1", id1).await);
        assert!(registry.is_connected("u1").await);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register("u1", tx).await;

        assert!(registry.unregister("u1", id).await);
        assert!(!registry.unregister("u1", id).await);
        assert!(!registry.is_connected("u1").await);
    }
}
