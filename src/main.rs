use std::net::{IpAddr, SocketAddr};

use cryptodrops::{
    AppState, config::Config, middleware::RateLimiters, router::create_router, routes::auth::User,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received, draining connections");
}

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

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'cryptodrops';").await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    if let Err(e) = User::ensure_admin(&pool, &config).await {
        tracing::error!("Failed to seed default admin: {}", e);
    }

    let state = AppState::new(pool, config.clone());
    state.cache.start_sweeper(config.cache_check_period());
    if !state.email.is_enabled() {
        tracing::warn!("RESEND_API_KEY not set, emails will not be sent");
    }

    // 设置限流器
    let limiters = RateLimiters::from_config(&config);
    limiters.start_sweepers();

    let app = create_router(state.clone(), &limiters);

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    limiters.teardown();
    state.cache.teardown();
    tracing::info!("Server stopped");
}
