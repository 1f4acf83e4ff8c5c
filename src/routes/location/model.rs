use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::profile::Profile;

/// 用户的最近一次位置样本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub heading: f64,
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
}

/// 会话状态，每个已知用户有且仅有一份，是在线判定的权威来源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    pub last_activity: DateTime<Utc>,
}

/// 位置存储中每个用户对应的一条记录。
/// 首次连接或首次上报时创建，之后只更新不删除；
/// 长期不回来的用户保持离线状态留在存储里，匹配时会被排除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(default)]
    pub info: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    pub status: SessionStatus,
    pub device_info: DeviceInfo,
}

impl LocationRecord {
    /// 新连接建立时的初始记录
    pub fn new_connected(info: Profile, now: DateTime<Utc>) -> Self {
        Self {
            info,
            position: None,
            status: SessionStatus {
                online: true,
                last_seen: now,
                connected_at: Some(now),
                disconnected_at: None,
            },
            device_info: DeviceInfo {
                platform: "mobile".to_string(),
                last_activity: now,
            },
        }
    }

    /// 判断记录是否已超过不活跃超时
    pub fn is_stale(&self, now: DateTime<Utc>, inactive_timeout: Duration) -> bool {
        let elapsed = now.signed_duration_since(self.device_info.last_activity);
        elapsed.num_milliseconds() > inactive_timeout.as_millis() as i64
    }
}

/// 客户端上报的位置样本（HTTP 和 WebSocket 共用同一格式）
#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdateRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

impl LocationUpdateRequest {
    /// 坐标必须在有效范围内，否则拒绝，绝不入库
    pub fn validate(&self) -> Result<(), AppError> {
        if !(-90.0..=90.0).contains(&self.latitude)
            || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(AppError::InvalidCoordinates);
        }
        if self.accuracy.is_some_and(|a| a < 0.0) {
            return Err(AppError::InvalidCoordinates);
        }
        Ok(())
    }

    pub fn into_position(self, timestamp: DateTime<Utc>) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy.unwrap_or(0.0),
            heading: self.heading.unwrap_or(0.0),
            speed: self.speed.unwrap_or(0.0),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// 一次邻近查询的单条结果，临时数据，不落库，每次查询重新计算
#[derive(Debug, Clone, Serialize)]
pub struct NearbyUser {
    pub user_id: String,
    pub info: Profile,
    pub location: NearbyLocation,
    /// 距离（公里，保留两位小数）
    pub distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct NearbyUsersResponse {
    pub users: Vec<NearbyUser>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct LocationUpdateResponse {
    pub timestamp: DateTime<Utc>,
}

// 计算球面距离的函数（基于经纬度）
pub fn calculate_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // 使用Haversine公式计算距离
    let r = 6371.0; // 地球半径（公里）
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    r * c
}

fn round_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl NearbyUser {
    /// 纯函数：在给定的记录快照中查找距离原点不超过 radius_km 的其他用户。
    ///
    /// 不做任何 I/O。候选记录在比较距离前会按 last_activity 重新判定在线状态，
    /// 超过不活跃超时的记录即使还没被后台任务处理，展示时也视为离线。
    /// 结果按距离升序排列，距离相同时按用户ID排序以保证确定性。
    pub fn from_snapshot(
        origin_id: &str,
        latitude: f64,
        longitude: f64,
        records: &HashMap<String, LocationRecord>,
        radius_km: f64,
        inactive_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<NearbyUser> {
        let mut nearby_users = Vec::new();

        for (other_id, record) in records {
            if other_id == origin_id {
                continue;
            }
            let Some(position) = &record.position else {
                continue;
            };

            let distance = calculate_distance_km(
                latitude,
                longitude,
                position.latitude,
                position.longitude,
            );
            if distance > radius_km {
                continue;
            }

            // 展示层面的在线状态修正
            let mut status = record.status.clone();
            if status.online && record.is_stale(now, inactive_timeout) {
                status.online = false;
                status.last_seen = record.device_info.last_activity;
            }

            nearby_users.push(NearbyUser {
                user_id: other_id.clone(),
                info: record.info.clone(),
                location: NearbyLocation {
                    latitude: position.latitude,
                    longitude: position.longitude,
                },
                distance: round_two_decimals(distance),
                last_updated: Some(position.timestamp),
                status,
            });
        }

        nearby_users.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        nearby_users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(latitude: f64, longitude: f64) -> LocationUpdateRequest {
        LocationUpdateRequest {
            latitude,
            longitude,
            accuracy: None,
            heading: None,
            speed: None,
        }
    }

    fn record_at(
        latitude: f64,
        longitude: f64,
        last_activity: DateTime<Utc>,
    ) -> LocationRecord {
        LocationRecord {
            info: Profile::default(),
            position: Some(Position {
                latitude,
                longitude,
                accuracy: 0.0,
                heading: 0.0,
                speed: 0.0,
                timestamp: last_activity,
            }),
            status: SessionStatus {
                online: true,
                last_seen: last_activity,
                connected_at: Some(last_activity),
                disconnected_at: None,
            },
            device_info: DeviceInfo {
                platform: "mobile".to_string(),
                last_activity,
            },
        }
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(sample_request(0.0, 0.0).validate().is_ok());
        assert!(sample_request(90.0, 180.0).validate().is_ok());
        assert!(sample_request(-90.0, -180.0).validate().is_ok());
        assert!(sample_request(90.1, 0.0).validate().is_err());
        assert!(sample_request(-90.1, 0.0).validate().is_err());
        assert!(sample_request(0.0, 180.1).validate().is_err());
        assert!(sample_request(0.0, -180.1).validate().is_err());

        let mut req = sample_request(0.0, 0.0);
        req.accuracy = Some(-1.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_distance_symmetry() {
        let d1 = calculate_distance_km(10.0, 106.0, 10.5, 106.5);
        let d2 = calculate_distance_km(10.5, 106.5, 10.0, 106.0);
        assert!((d1 - d2).abs() < 1e-9);
        assert!(calculate_distance_km(21.03, 105.85, 21.03, 105.85).abs() < 1e-9);
    }

    #[test]
    fn test_radius_inclusion_and_exclusion() {
        let now = Utc::now();
        let mut records = HashMap::new();
        // 约0.5公里（纬度偏移0.0044966度）
        records.insert("near".to_string(), record_at(0.0044966, 0.0, now));
        // 约1.5公里
        records.insert("far".to_string(), record_at(0.0134898, 0.0, now));

        let matches = NearbyUser::from_snapshot(
            "origin",
            0.0,
            0.0,
            &records,
            1.0,
            Duration::from_secs(900),
            now,
        );

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].user_id, "near");
        assert!((matches[0].distance - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_origin_excluded_from_results() {
        let now = Utc::now();
        let mut records = HashMap::new();
        records.insert("origin".to_string(), record_at(0.0, 0.0, now));
        records.insert("other".to_string(), record_at(0.0001, 0.0, now));

        let matches = NearbyUser::from_snapshot(
            "origin",
            0.0,
            0.0,
            &records,
            1.0,
            Duration::from_secs(900),
            now,
        );

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].user_id, "other");
    }

    #[test]
    fn test_stale_record_demoted_to_offline() {
        let now = Utc::now();
        let stale_time = now - chrono::Duration::seconds(901);
        let mut records = HashMap::new();
        records.insert("stale".to_string(), record_at(0.0001, 0.0, stale_time));

        let matches = NearbyUser::from_snapshot(
            "origin",
            0.0,
            0.0,
            &records,
            1.0,
            Duration::from_secs(900),
            now,
        );

        // 位置记录仍然存在并参与匹配，但展示为离线
        assert_eq!(matches.len(), 1);
        assert!(!matches[0].status.online);
        assert_eq!(matches[0].status.last_seen, stale_time);
    }

    #[test]
    fn test_sorted_by_distance_with_id_tiebreak() {
        let now = Utc::now();
        let mut records = HashMap::new();
        records.insert("b_user".to_string(), record_at(0.002, 0.0, now));
        records.insert("a_user".to_string(), record_at(-0.002, 0.0, now));
        records.insert("closest".to_string(), record_at(0.001, 0.0, now));

        let matches = NearbyUser::from_snapshot(
            "origin",
            0.0,
            0.0,
            &records,
            1.0,
            Duration::from_secs(900),
            now,
        );

        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].user_id, "closest");
        // 对称偏移导致距离相同，按用户ID排序
        assert_eq!(matches[1].user_id, "a_user");
        assert_eq!(matches[2].user_id, "b_user");
    }

    #[test]
    fn test_close_pair_scenario() {
        let now = Utc::now();
        let mut records = HashMap::new();
        records.insert("user_b".to_string(), record_at(10.0, 10.0001, now));

        let matches = NearbyUser::from_snapshot(
            "user_a",
            10.0,
            10.0,
            &records,
            1.0,
            Duration::from_secs(900),
            now,
        );

        assert_eq!(matches.len(), 1);
        assert!((matches[0].distance - 0.01).abs() < 0.005);
        assert!(matches[0].status.online);
    }

    #[test]
    fn test_record_without_position_skipped() {
        let now = Utc::now();
        let mut records = HashMap::new();
        records.insert(
            "no_position".to_string(),
            LocationRecord::new_connected(Profile::default(), now),
        );

        let matches = NearbyUser::from_snapshot(
            "origin",
            0.0,
            0.0,
            &records,
            1.0,
            Duration::from_secs(900),
            now,
        );

        assert!(matches.is_empty());
    }

    #[test]
    fn test_is_stale_boundary() {
        let now = Utc::now();
        let record = record_at(0.0, 0.0, now - chrono::Duration::seconds(900));
        assert!(!record.is_stale(now, Duration::from_secs(900)));

        let record = record_at(0.0, 0.0, now - chrono::Duration::seconds(901));
        assert!(record.is_stale(now, Duration::from_secs(900)));
    }
}
