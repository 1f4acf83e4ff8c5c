use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use geotrack_backend::{
    AppState,
    config::Config,
    engine::BroadcastEngine,
    limiter::RateLimiter,
    middleware::{auth_middleware, log_errors},
    profile::ProfileCache,
    reaper,
    registry::ConnectionRegistry,
    routes,
    store::LocationStore,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 用户目录所在的数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'geotrack_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client);

    // 组装核心组件：所有共享状态在这里构造一次，按句柄传递
    let store = LocationStore::new(redis_arc.clone(), config.store_timeout());
    let limiter = RateLimiter::new(
        redis_arc,
        config.location_min_interval(),
        std::time::Duration::from_secs(config.rate_limit_expire_secs),
        config.store_timeout(),
    );
    let registry = Arc::new(ConnectionRegistry::new());
    let profiles = Arc::new(ProfileCache::new(
        pool,
        config.profile_cache_ttl(),
        config.store_timeout(),
    ));
    let engine = Arc::new(BroadcastEngine::new(
        store.clone(),
        limiter,
        registry,
        profiles,
        config.nearby_radius_km,
        config.inactive_timeout(),
    ));

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        engine,
    };

    // 启动后台清理任务
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_handle = reaper::spawn(
        store,
        config.cleanup_interval(),
        config.inactive_timeout(),
        shutdown_rx,
    );

    // 需要认证的位置路由
    let protected_routes = Router::new()
        .route("/location/update", post(routes::location::update_location))
        .route(
            "/location/broadcast",
            post(routes::location::broadcast_location),
        )
        .route(
            "/location/nearby-users",
            get(routes::location::find_nearby_users),
        )
        .route(
            "/location/refresh-profile",
            post(routes::location::refresh_profile),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // WebSocket 路由自带 token，在升级前单独校验
    let ws_routes = Router::new().route("/ws/location/{token}", get(routes::ws::location_ws));

    let router = Router::new()
        .nest("/api", protected_routes)
        .merge(ws_routes)
        .layer(axum::middleware::from_fn(log_errors));

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        let cors = tower_http::cors::CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app,
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // 先取消后台任务再退出
    let _ = shutdown_tx.send(true);
    let _ = reaper_handle.await;
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
