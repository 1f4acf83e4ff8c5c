use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::Profile;
use crate::routes::location::model::{
    LocationUpdateRequest, NearbyUser, Position, SessionStatus,
};

/// 推送帧中的位置字段。来自实时上报时各字段齐全，
/// 来自镜像推送（把对方的已知状态回推给上报者）时只有坐标可用。
#[derive(Debug, Clone, Serialize)]
pub struct WireLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl From<&Position> for WireLocation {
    fn from(position: &Position) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            timestamp: Some(position.timestamp),
            accuracy: Some(position.accuracy),
            heading: Some(position.heading),
            speed: Some(position.speed),
        }
    }
}

/// 服务端下发的帧
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LocationUpdate {
        id: String,
        info: Profile,
        location: WireLocation,
        distance: f64,
        status: SessionStatus,
    },
    Error {
        message: String,
    },
    Ping,
}

impl ServerMessage {
    /// 对方上报了新位置，推送给附近的用户
    pub fn peer_update(
        origin_id: &str,
        info: Profile,
        position: &Position,
        distance: f64,
    ) -> Self {
        ServerMessage::LocationUpdate {
            id: origin_id.to_string(),
            info,
            location: WireLocation::from(position),
            distance,
            status: SessionStatus {
                online: true,
                last_seen: position.timestamp,
                connected_at: None,
                disconnected_at: None,
            },
        }
    }

    /// 镜像推送：把附近用户的已知状态回推给上报者
    pub fn mirrored_update(nearby: &NearbyUser) -> Self {
        ServerMessage::LocationUpdate {
            id: nearby.user_id.clone(),
            info: nearby.info.clone(),
            location: WireLocation {
                latitude: nearby.location.latitude,
                longitude: nearby.location.longitude,
                timestamp: nearby.last_updated,
                accuracy: None,
                heading: None,
                speed: None,
            },
            distance: nearby.distance,
            status: nearby.status.clone(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_ws_message(&self) -> Result<Message, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Message::Text(json.into()))
    }
}

/// 客户端发来的帧：要么是心跳应答，要么是一条位置样本
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Control(ControlMessage),
    Update(LocationUpdateRequest),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Pong,
}
