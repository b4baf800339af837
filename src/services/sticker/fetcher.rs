// 图片下载器 - 分档位降级下载
//
// 每次下载尝试按顺序走一条"下载档位"链：
// 标准档（浏览器 UA、较短超时）→ 降级档（通用客户端 UA、更长
// 超时、额外低层重试）→ 最简档（无自定义头、最长超时）。
// 任一档位传输完成、状态码成功且响应体非空即算成功。
// 档位链是数据，新增档位不需要改控制流。
//
// 下载产物是移交给调用方的临时文件句柄，drop 即删除，
// 不是缓存条目。

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tempfile::TempPath;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PerformanceConfig;
use crate::services::sticker::error::DownloadError;

/// 单个下载档位的请求配置
#[derive(Debug, Clone)]
pub struct FetchProfile {
    pub name: &'static str,
    pub user_agent: Option<&'static str>,
    pub accept: Option<&'static str>,
    pub accept_language: Option<&'static str>,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    /// 档位内部的额外重试次数
    pub extra_retries: u32,
    pub extra_retry_delay: Duration,
}

impl FetchProfile {
    /// 默认档位链，按顺序尝试
    pub fn default_chain() -> Vec<FetchProfile> {
        vec![
            FetchProfile {
                name: "standard",
                user_agent: Some(
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
                ),
                accept: Some("*/*"),
                accept_language: Some("zh-CN,zh;q=0.9,en;q=0.8"),
                connect_timeout: Duration::from_secs(10),
                total_timeout: Duration::from_secs(30),
                extra_retries: 0,
                extra_retry_delay: Duration::ZERO,
            },
            FetchProfile {
                name: "degraded",
                user_agent: Some("curl/7.68.0"),
                accept: Some("*/*"),
                accept_language: None,
                connect_timeout: Duration::from_secs(15),
                total_timeout: Duration::from_secs(45),
                extra_retries: 2,
                extra_retry_delay: Duration::from_secs(1),
            },
            FetchProfile {
                name: "minimal",
                user_agent: None,
                accept: None,
                accept_language: None,
                connect_timeout: Duration::from_secs(20),
                total_timeout: Duration::from_secs(60),
                extra_retries: 0,
                extra_retry_delay: Duration::ZERO,
            },
        ]
    }
}

/// 图片下载接口
///
/// 返回下载内容的临时文件路径句柄，所有权移交调用方，
/// 句柄 drop 时文件被删除
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<TempPath, DownloadError>;
}

/// 分档位降级下载器
pub struct TieredFetcher {
    profiles: Vec<(FetchProfile, Client)>,
    max_retries: u32,
    retry_delay: Duration,
    /// 每个档位执行的墙钟上限，不论档位自身超时设置
    profile_ceiling: Duration,
}

impl TieredFetcher {
    pub fn new(
        profiles: Vec<FetchProfile>,
        performance: &PerformanceConfig,
    ) -> Result<Self, DownloadError> {
        let mut built = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let client = Client::builder()
                .connect_timeout(profile.connect_timeout)
                .timeout(profile.total_timeout)
                .build()
                .map_err(|e| DownloadError::NetworkError(format!("创建 HTTP 客户端失败: {}", e)))?;
            built.push((profile, client));
        }

        Ok(Self {
            profiles: built,
            max_retries: performance.max_retries.max(1),
            retry_delay: Duration::from_millis(performance.retry_delay_ms),
            profile_ceiling: Duration::from_secs(performance.download_timeout_secs),
        })
    }

    /// 使用默认档位链构建
    pub fn with_default_profiles(performance: &PerformanceConfig) -> Result<Self, DownloadError> {
        Self::new(FetchProfile::default_chain(), performance)
    }

    /// 一次完整尝试：顺序走完档位链
    async fn try_profiles(&self, url: &str) -> Result<TempPath, DownloadError> {
        let mut last_error = DownloadError::NetworkError("没有可用的下载档位".to_string());

        for (profile, client) in &self.profiles {
            match timeout(self.profile_ceiling, self.try_profile(profile, client, url)).await {
                Ok(Ok(path)) => {
                    info!("{} 档位下载成功: {}", profile.name, url);
                    return Ok(path);
                }
                Ok(Err(e)) => {
                    warn!("{} 档位下载失败: {} - {}", profile.name, url, e);
                    last_error = e;
                }
                Err(_) => {
                    warn!("{} 档位执行超过墙钟上限: {}", profile.name, url);
                    last_error = DownloadError::Timeout;
                }
            }
        }

        Err(DownloadError::AllProfilesFailed(last_error.to_string()))
    }

    /// 执行单个档位，含档位内部的低层重试
    async fn try_profile(
        &self,
        profile: &FetchProfile,
        client: &Client,
        url: &str,
    ) -> Result<TempPath, DownloadError> {
        let tries = 1 + profile.extra_retries;
        let mut last_error = None;

        for attempt in 1..=tries {
            if attempt > 1 {
                tokio::time::sleep(profile.extra_retry_delay).await;
            }

            match self.request_once(profile, client, url).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    debug!(
                        "{} 档位第 {}/{} 次请求失败: {}",
                        profile.name, attempt, tries, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(DownloadError::EmptyBody))
    }

    async fn request_once(
        &self,
        profile: &FetchProfile,
        client: &Client,
        url: &str,
    ) -> Result<TempPath, DownloadError> {
        let mut request = client.get(url);
        if let Some(ua) = profile.user_agent {
            request = request.header("User-Agent", ua);
        }
        if let Some(accept) = profile.accept {
            request = request.header("Accept", accept);
        }
        if let Some(lang) = profile.accept_language {
            request = request.header("Accept-Language", lang);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpError(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(DownloadError::EmptyBody);
        }

        let temp = tempfile::NamedTempFile::new()?.into_temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        Ok(temp)
    }
}

#[async_trait]
impl ImageFetcher for TieredFetcher {
    /// 下载单张图片
    ///
    /// 最多 `max_retries` 次尝试，每次尝试间隔 `retry_delay`；
    /// 每次尝试内部按顺序走完整的档位链
    async fn fetch(&self, url: &str) -> Result<TempPath, DownloadError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.try_profiles(url).await {
                Ok(path) => {
                    debug!("下载成功 (尝试 {}/{}): {}", attempt, self.max_retries, url);
                    return Ok(path);
                }
                Err(e) => {
                    warn!("下载失败 (尝试 {}/{}): {} - {}", attempt, self.max_retries, url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DownloadError::NetworkError("未知错误".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_performance() -> PerformanceConfig {
        PerformanceConfig {
            max_retries: 1,
            retry_delay_ms: 10,
            download_timeout_secs: 10,
            ..PerformanceConfig::default()
        }
    }

    /// 档位链中去掉内部重试延迟，加快测试
    fn quick_chain() -> Vec<FetchProfile> {
        FetchProfile::default_chain()
            .into_iter()
            .map(|mut p| {
                p.extra_retries = 0;
                p.extra_retry_delay = Duration::ZERO;
                p
            })
            .collect()
    }

    #[test]
    fn test_default_chain_shape() {
        let chain = FetchProfile::default_chain();
        assert_eq!(chain.len(), 3);

        assert_eq!(chain[0].name, "standard");
        assert!(chain[0].user_agent.unwrap().starts_with("Mozilla/5.0"));
        assert_eq!(chain[0].connect_timeout, Duration::from_secs(10));
        assert_eq!(chain[0].total_timeout, Duration::from_secs(30));

        assert_eq!(chain[1].name, "degraded");
        assert_eq!(chain[1].user_agent, Some("curl/7.68.0"));
        assert_eq!(chain[1].extra_retries, 2);
        assert_eq!(chain[1].extra_retry_delay, Duration::from_secs(1));

        assert_eq!(chain[2].name, "minimal");
        assert!(chain[2].user_agent.is_none());
        assert!(chain[2].accept.is_none());
        assert_eq!(chain[2].total_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_first_profile_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.webp"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"IMAGEDATA".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = TieredFetcher::new(quick_chain(), &quick_performance()).unwrap();
        let temp = fetcher.fetch(&format!("{}/img.webp", server.uri())).await.unwrap();

        let data = std::fs::read(&temp).unwrap();
        assert_eq!(data, b"IMAGEDATA");
    }

    #[tokio::test]
    async fn test_second_profile_used_when_first_fails() {
        let server = MockServer::start().await;

        // 标准档（浏览器 UA）永远失败
        Mock::given(method("GET"))
            .and(path("/img.webp"))
            .and(header(
                "User-Agent",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
            ))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        // 降级档（curl UA）成功
        Mock::given(method("GET"))
            .and(path("/img.webp"))
            .and(header("User-Agent", "curl/7.68.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"TIER2".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = TieredFetcher::new(quick_chain(), &quick_performance()).unwrap();
        let temp = fetcher.fetch(&format!("{}/img.webp", server.uri())).await.unwrap();

        let data = std::fs::read(&temp).unwrap();
        assert_eq!(data, b"TIER2");

        // 最简档不应被调用：总请求数恰好等于前两档各一次
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let fetcher = TieredFetcher::new(quick_chain(), &quick_performance()).unwrap();
        let result = fetcher.fetch(&format!("{}/empty", server.uri())).await;

        assert!(matches!(result, Err(DownloadError::AllProfilesFailed(_))));
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"X".to_vec()))
            .mount(&server)
            .await;

        let fetcher = TieredFetcher::new(quick_chain(), &quick_performance()).unwrap();
        let temp = fetcher.fetch(&format!("{}/img", server.uri())).await.unwrap();
        let path = temp.to_path_buf();
        assert!(path.exists());

        drop(temp);
        assert!(!path.exists());
    }
}
