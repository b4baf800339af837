// 表情包后端库
//
// 本库提供抖音表情包抓取转换的核心功能，包括：
// - API 路由
// - 配置加载
// - 抓取/下载/转换流水线

pub mod api;
pub mod config;
pub mod services;
