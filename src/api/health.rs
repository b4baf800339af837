// 健康检查接口

use axum::Json;
use serde_json::{json, Value};

/// GET /api/health
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "sticker_gif_backend",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
