// API 路由模块

use std::sync::Arc;

use crate::services::sticker::StickerService;

pub mod emoticon;
pub mod health;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StickerService>,
}
