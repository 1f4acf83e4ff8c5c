use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::AppState;
use crate::error::AppError;
use crate::utils::verify_token;

use super::model::{ClientMessage, ServerMessage};

/// 位置追踪的 WebSocket 入口。token 作为路径参数携带，
/// 验证失败时直接拒绝升级，不下发任何数据。
#[axum::debug_handler]
pub async fn location_ws(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match verify_token(&token, &state.config) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("WebSocket auth failed: {}", e);
            return AppError::Unauthorized.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, claims.sub))
}

async fn handle_socket(state: AppState, socket: WebSocket, user_id: String) {
    let engine = state.engine.clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    // 注册后 tx 归注册表所有，心跳和错误帧走这个克隆直发本连接，
    // 不经过注册表——本连接被新连接取代后也不能把帧发错地方
    let direct = tx.clone();
    let connection_id = engine.registry().register(&user_id, tx).await;

    // 在线状态写入失败不中断连接，位置上报时会重新置为在线
    if let Err(e) = engine.connect(&user_id).await {
        tracing::warn!("Failed to mark {} connected: {}", user_id, e);
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // 专门的发送任务：同一连接上的所有下行帧在这里串行化
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let idle_probe = state.config.ws_idle_probe();

    loop {
        let inbound = tokio::select! {
            inbound = tokio::time::timeout(idle_probe, ws_rx.next()) => inbound,
            _ = &mut send_task => break,
        };

        match inbound {
            // 空闲超时：发送心跳探测，等客户端的应用层应答
            Err(_) => {
                let Ok(ping) = ServerMessage::Ping.to_ws_message() else {
                    continue;
                };
                if direct.send(ping).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!("WebSocket read error for {}: {}", user_id, e);
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_text(&engine, &user_id, text.as_str(), &direct).await;
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            // 协议层的 ping/pong 由底层处理
            Ok(Some(Ok(_))) => {}
        }
    }

    // 只有仍持有映射时才标记离线——被新连接取代的会话
    // 不能把接替者刚写入的在线状态翻掉
    if engine.registry().unregister(&user_id, connection_id).await {
        if let Err(e) = engine.disconnect(&user_id).await {
            tracing::warn!("Failed to mark {} offline: {}", user_id, e);
        }
    }
    send_task.abort();
}

/// 处理一条入站文本帧。格式错误或业务失败都只在本连接上
/// 回一个错误帧，连接保持打开。
async fn handle_text(
    engine: &crate::engine::BroadcastEngine,
    user_id: &str,
    text: &str,
    direct: &mpsc::UnboundedSender<Message>,
) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Control(_)) => {
            // 心跳应答，无需处理
        }
        Ok(ClientMessage::Update(update)) => {
            if let Err(e) = engine.broadcast_position(user_id, update).await {
                tracing::debug!("Location update rejected for {}: {}", user_id, e);
                send_error(direct, e.message());
            }
        }
        Err(e) => {
            tracing::debug!("Malformed frame from {}: {}", user_id, e);
            send_error(direct, "无法解析的消息格式".to_string());
        }
    }
}

fn send_error(direct: &mpsc::UnboundedSender<Message>, message: String) {
    if let Ok(frame) = ServerMessage::error(message).to_ws_message() {
        let _ = direct.send(frame);
    }
}
