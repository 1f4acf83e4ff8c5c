use std::sync::Arc;

use config::Config;
use engine::BroadcastEngine;

pub mod config;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod profile;
pub mod reaper;
pub mod registry;
pub mod routes;
pub mod store;
pub mod utils;

/// 路由层共享的状态。数据库和 Redis 的句柄在组装各组件时
/// 就已分发下去，这里只保留路由和中间件直接用到的部分。
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<BroadcastEngine>,
}
