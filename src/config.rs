// 应用配置数据结构
//
// 配置按 douyin / server / performance / image 四段组织，
// 从 JSON 配置文件加载（路径取 CONFIG_PATH 环境变量），
// 缺失的字段全部落到内置默认值

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 应用配置（存储在 config.json）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// 抖音表情包接口配置
    #[serde(default)]
    pub douyin: DouyinConfig,

    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 性能配置
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// 图片处理配置
    #[serde(default)]
    pub image: ImageConfig,
}

/// 抖音 API 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DouyinConfig {
    /// 表情包搜索接口地址
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// 请求使用的浏览器 User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Referer 头
    #[serde(default = "default_referer")]
    pub referer: String,

    /// 登录态 cookie（不透明凭证，由部署方提供）
    #[serde(default)]
    pub cookie: String,

    /// msToken，不设置时每次请求生成随机值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms_token: Option<String>,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// 对外的基础 URL，拼接缓存产物的访问地址
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// 表情包下载保存根目录
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// 允许访问的 wxid 列表
    #[serde(default)]
    pub allowed_wxids: Vec<String>,
}

/// 性能配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceConfig {
    /// 并发下载数量
    #[serde(default = "default_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// 并发转换数量
    #[serde(default = "default_concurrent_conversions")]
    pub max_concurrent_conversions: usize,

    /// 单次下载的墙钟上限（秒），约束每个下载档位的执行
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// 整个 process 调用的超时（秒）
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,

    /// 下载重试延迟（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// 图片处理配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    /// 最大图片尺寸（长边像素），超出按比例缩放
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u32,

    /// 输出 GIF 帧率
    #[serde(default = "default_gif_fps")]
    pub gif_fps: u32,
}

fn default_api_url() -> String {
    "https://www.douyin.com/aweme/v1/web/im/resource/emoticon/search".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36".to_string()
}

fn default_referer() -> String {
    "https://www.douyin.com/".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_concurrent_downloads() -> usize {
    1
}

fn default_concurrent_conversions() -> usize {
    3
}

fn default_download_timeout() -> u64 {
    70
}

fn default_process_timeout() -> u64 {
    300
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_image_size() -> u32 {
    900
}

fn default_gif_fps() -> u32 {
    15
}

impl Default for DouyinConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user_agent: default_user_agent(),
            referer: default_referer(),
            cookie: String::new(),
            ms_token: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            download_dir: default_download_dir(),
            allowed_wxids: Vec::new(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_concurrent_downloads(),
            max_concurrent_conversions: default_concurrent_conversions(),
            download_timeout_secs: default_download_timeout(),
            process_timeout_secs: default_process_timeout(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_image_size: default_max_image_size(),
            gif_fps: default_gif_fps(),
        }
    }
}

impl AppConfig {
    /// 从 JSON 文件加载配置
    ///
    /// 文件不存在时返回默认配置，存在但无法解析时返回错误
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("配置文件 {:?} 不存在，使用默认配置", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 按 CONFIG_PATH 环境变量加载配置，默认 config.json
    pub fn load_from_env() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
        Self::load(Path::new(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.performance.max_concurrent_downloads, 1);
        assert_eq!(config.performance.max_concurrent_conversions, 3);
        assert_eq!(config.performance.max_retries, 2);
        assert_eq!(config.performance.retry_delay_ms, 500);
        assert_eq!(config.image.max_image_size, 900);
        assert_eq!(config.image.gif_fps, 15);
        assert_eq!(config.server.port, 8000);
        assert!(config.server.allowed_wxids.is_empty());
        assert!(config.douyin.api_url.contains("emoticon/search"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "server": {
                "base_url": "http://10.0.0.2:8000",
                "allowed_wxids": ["wxid_888888"]
            },
            "image": { "gif_fps": 10 }
        }"#;

        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.base_url, "http://10.0.0.2:8000");
        assert_eq!(config.server.allowed_wxids, vec!["wxid_888888"]);
        assert_eq!(config.image.gif_fps, 10);
        // 未出现的字段落到默认值
        assert_eq!(config.image.max_image_size, 900);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.performance.max_retries, 2);
    }

    #[test]
    fn test_config_round_trip() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = AppConfig::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
