use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use sticker_gif_backend::api;
use sticker_gif_backend::config::AppConfig;
use sticker_gif_backend::services::sticker::StickerService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::load_from_env()?;
    tokio::fs::create_dir_all(&config.server.download_dir).await?;

    if config.douyin.cookie.is_empty() {
        tracing::warn!("未配置抖音 cookie，上游请求可能被拒绝");
    }

    // Initialize sticker pipeline
    let service = Arc::new(StickerService::new(&config)?);

    // Build our application with routes
    let app = Router::new()
        .route("/", get(|| async { "Sticker GIF Backend API v1.0" }))
        .route("/api/health", get(api::health::health_check))
        .route("/api/emoticon", get(api::emoticon::get_emoticons))
        // 缓存产物按 <base-url>/downloads/<bucket>/<name>.gif 对外提供
        .nest_service("/downloads", ServeDir::new(&config.server.download_dir))
        .layer(CorsLayer::permissive())
        .with_state(api::AppState { service });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("🚀 Server listening on {}", addr);
    tracing::info!("📦 Download root: {:?}", config.server.download_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
