// 流水线编排
//
// 串起 列表 → 逐项 缓存检查/下载/转换 → 汇总响应。
// 逐项工作在有界并发下 fan-out（下载、转换各一个信号量），
// 结果按输入顺序收集。单项失败只记录并进入 failed 列表，
// 绝不让整批请求失败。
//
// 缓存命中信号就是目标文件存在。存在性检查在各项任务内进行，
// 两个并发请求可能对同一未缓存项重复下载，低流量下按
// 尽力而为接受，不加按键互斥。

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::services::sticker::converter::{GifConverter, StrategyConverter};
use crate::services::sticker::cursor::CursorTracker;
use crate::services::sticker::fetcher::{ImageFetcher, TieredFetcher};
use crate::services::sticker::filename::sanitize_filename;
use crate::services::sticker::lister::{EmoticonClient, StickerEntry};

/// 无关键词时的默认缓存桶
const DEFAULT_BUCKET: &str = "home";

/// 进入核心流水线的请求
#[derive(Debug, Clone)]
pub struct ListingRequest {
    /// 操作类型，"list" 或 "search"
    pub ac: String,
    /// 调用方身份
    pub wxid: String,
    /// 分页起点
    pub start: u32,
    /// 每页数量
    pub limit: u32,
    /// 搜索关键词
    pub keyword: String,
}

/// 成功产出的条目
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConvertedItem {
    pub url: String,
}

/// 单项失败记录，随成功条目一起返回
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    /// 来源 URL
    pub url: String,
    /// 失败阶段："download" 或 "convert"
    pub stage: &'static str,
    pub reason: String,
}

/// 流水线响应
#[derive(Debug, Serialize)]
pub struct ProcessReply {
    pub msg: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ConvertedItem>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<ItemFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_time: Option<String>,
}

impl ProcessReply {
    fn failure(code: u16, msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            code,
            items: None,
            failed: Vec::new(),
            format: None,
            original_count: None,
            process_time: None,
        }
    }
}

/// 身份准入检查
///
/// 允许名单的维护在核心之外，这里只消费一个布尔判定
pub trait IdentityGate: Send + Sync {
    fn is_allowed(&self, wxid: &str) -> bool;
}

/// 基于配置允许名单的准入实现
pub struct AllowList {
    ids: Vec<String>,
}

impl AllowList {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }
}

impl IdentityGate for AllowList {
    fn is_allowed(&self, wxid: &str) -> bool {
        self.ids.iter().any(|id| id == wxid)
    }
}

enum ItemOutcome {
    Done { url: String },
    Failed(ItemFailure),
}

/// 表情包处理服务
pub struct StickerService {
    base_url: String,
    download_root: PathBuf,
    process_timeout: Duration,
    lister: EmoticonClient,
    fetcher: Arc<dyn ImageFetcher>,
    converter: Arc<dyn GifConverter>,
    gate: Arc<dyn IdentityGate>,
    cursors: CursorTracker,
    download_permits: Arc<Semaphore>,
    convert_permits: Arc<Semaphore>,
}

impl StickerService {
    /// 按配置装配真实组件
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let lister = EmoticonClient::new(config.douyin.clone())?;
        let fetcher = TieredFetcher::with_default_profiles(&config.performance)?;
        let converter = StrategyConverter::new((&config.image).into());
        let gate = AllowList::new(config.server.allowed_wxids.clone());

        Ok(Self::with_parts(
            config,
            lister,
            Arc::new(fetcher),
            Arc::new(converter),
            Arc::new(gate),
        ))
    }

    /// 注入组件装配，测试替身从这里进来
    pub fn with_parts(
        config: &AppConfig,
        lister: EmoticonClient,
        fetcher: Arc<dyn ImageFetcher>,
        converter: Arc<dyn GifConverter>,
        gate: Arc<dyn IdentityGate>,
    ) -> Self {
        Self {
            base_url: config.server.base_url.trim_end_matches('/').to_string(),
            download_root: config.server.download_dir.clone(),
            process_timeout: Duration::from_secs(config.performance.process_timeout_secs),
            lister,
            fetcher,
            converter,
            gate,
            cursors: CursorTracker::new(),
            download_permits: Arc::new(Semaphore::new(
                config.performance.max_concurrent_downloads.max(1),
            )),
            convert_permits: Arc::new(Semaphore::new(
                config.performance.max_concurrent_conversions.max(1),
            )),
        }
    }

    /// 处理一次列表/搜索请求
    ///
    /// 永远返回结构化响应，错误不以异常形式穿出
    pub async fn process(&self, request: ListingRequest) -> ProcessReply {
        if request.ac.is_empty() || request.wxid.is_empty() {
            return ProcessReply::failure(400, "缺少必要参数");
        }

        if !self.gate.is_allowed(&request.wxid) {
            warn!("拒绝访问: wxid={}", request.wxid);
            return ProcessReply::failure(403, "wxid不在允许列表中");
        }

        let limit = request.limit.max(1);
        let entries = match self
            .lister
            .fetch_page(&request.ac, &request.keyword, request.start, limit, &self.cursors)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!("上游列表请求失败: {}", e);
                return ProcessReply::failure(500, "上游请求失败");
            }
        };

        // 上游正常但没有条目，与上游失败区分开
        if entries.is_empty() {
            return ProcessReply {
                msg: "无匹配结果".to_string(),
                code: 200,
                items: Some(Vec::new()),
                failed: Vec::new(),
                format: Some("gif"),
                original_count: Some(0),
                process_time: Some("0.00s".to_string()),
            };
        }

        let started = Instant::now();
        let original_count = entries.len();
        let bucket = if request.keyword.is_empty() {
            DEFAULT_BUCKET.to_string()
        } else {
            sanitize_filename(&request.keyword)
        };

        let mut handles: Vec<JoinHandle<ItemOutcome>> = Vec::with_capacity(entries.len());
        for entry in entries {
            let dest = self
                .download_root
                .join(&bucket)
                .join(format!("{}.gif", entry.stable_id));
            let public_url = format!(
                "{}/downloads/{}/{}.gif",
                self.base_url, bucket, entry.stable_id
            );
            let fetcher = Arc::clone(&self.fetcher);
            let converter = Arc::clone(&self.converter);
            let download_permits = Arc::clone(&self.download_permits);
            let convert_permits = Arc::clone(&self.convert_permits);

            handles.push(tokio::spawn(process_entry(
                entry,
                dest,
                public_url,
                fetcher,
                converter,
                download_permits,
                convert_permits,
            )));
        }

        let collect = async {
            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles.iter_mut() {
                match handle.await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => outcomes.push(ItemOutcome::Failed(ItemFailure {
                        url: String::new(),
                        stage: "convert",
                        reason: format!("任务执行失败: {}", e),
                    })),
                }
            }
            outcomes
        };
        let collected = timeout(self.process_timeout, collect).await;

        let outcomes = match collected {
            Ok(outcomes) => outcomes,
            Err(_) => {
                // 超时：终止在途任务，临时文件随任务 drop 被删除
                for handle in &handles {
                    handle.abort();
                }
                error!("处理超时，已终止在途任务");
                return ProcessReply::failure(500, "处理超时");
            }
        };

        let mut items = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Done { url } => items.push(ConvertedItem { url }),
                ItemOutcome::Failed(failure) => {
                    warn!(
                        "处理表情包失败: {} 阶段={} 原因={}",
                        failure.url, failure.stage, failure.reason
                    );
                    failed.push(failure);
                }
            }
        }

        let elapsed = started.elapsed();
        info!(
            "处理完成: 成功 {} 失败 {} 耗时 {:.2}s",
            items.len(),
            failed.len(),
            elapsed.as_secs_f64()
        );

        ProcessReply {
            msg: "请求成功".to_string(),
            code: 200,
            items: Some(items),
            failed,
            format: Some("gif"),
            original_count: Some(original_count),
            process_time: Some(format!("{:.2}s", elapsed.as_secs_f64())),
        }
    }
}

/// 处理单个条目：缓存检查 → 下载 → 转换
///
/// 下载产物是临时文件句柄，任何退出路径（成功、转换失败、
/// 任务被终止）都会随 drop 删除
async fn process_entry(
    entry: StickerEntry,
    dest: PathBuf,
    public_url: String,
    fetcher: Arc<dyn ImageFetcher>,
    converter: Arc<dyn GifConverter>,
    download_permits: Arc<Semaphore>,
    convert_permits: Arc<Semaphore>,
) -> ItemOutcome {
    let source = entry.primary_url().to_string();

    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        tracing::debug!("缓存命中: {:?}", dest);
        return ItemOutcome::Done { url: public_url };
    }

    let temp = {
        let _permit = match download_permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return ItemOutcome::Failed(ItemFailure {
                    url: source,
                    stage: "download",
                    reason: format!("获取下载许可失败: {}", e),
                })
            }
        };
        match fetcher.fetch(&source).await {
            Ok(temp) => temp,
            Err(e) => {
                return ItemOutcome::Failed(ItemFailure {
                    url: source,
                    stage: "download",
                    reason: e.to_string(),
                })
            }
        }
    };

    let result = {
        let _permit = match convert_permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return ItemOutcome::Failed(ItemFailure {
                    url: source,
                    stage: "convert",
                    reason: format!("获取转换许可失败: {}", e),
                })
            }
        };
        converter.convert(&temp, &dest).await
    };

    drop(temp);

    match result {
        Ok(()) => ItemOutcome::Done { url: public_url },
        Err(e) => ItemOutcome::Failed(ItemFailure {
            url: source,
            stage: "convert",
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn service_with_gate(allowed: Vec<String>) -> StickerService {
        let mut config = AppConfig::default();
        config.server.allowed_wxids = allowed;
        StickerService::new(&config).unwrap()
    }

    #[test]
    fn test_allow_list() {
        let gate = AllowList::new(vec!["wxid_888888".to_string()]);
        assert!(gate.is_allowed("wxid_888888"));
        assert!(!gate.is_allowed("wxid_other"));
        assert!(!gate.is_allowed(""));
    }

    #[tokio::test]
    async fn test_missing_fields_rejected() {
        let service = service_with_gate(vec!["wxid_888888".to_string()]);

        let reply = service
            .process(ListingRequest {
                ac: String::new(),
                wxid: "wxid_888888".to_string(),
                start: 0,
                limit: 40,
                keyword: String::new(),
            })
            .await;
        assert_eq!(reply.code, 400);

        let reply = service
            .process(ListingRequest {
                ac: "list".to_string(),
                wxid: String::new(),
                start: 0,
                limit: 40,
                keyword: String::new(),
            })
            .await;
        assert_eq!(reply.code, 400);
        assert!(reply.items.is_none());
    }

    #[tokio::test]
    async fn test_unknown_identity_rejected() {
        let service = service_with_gate(vec!["wxid_888888".to_string()]);

        let reply = service
            .process(ListingRequest {
                ac: "search".to_string(),
                wxid: "unknown-id".to_string(),
                start: 0,
                limit: 40,
                keyword: "cat".to_string(),
            })
            .await;

        assert_eq!(reply.code, 403);
        assert!(reply.items.is_none());
    }

    #[test]
    fn test_failure_reply_shape() {
        let reply = ProcessReply::failure(500, "上游请求失败");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["code"], 500);
        assert_eq!(json["msg"], "上游请求失败");
        // 失败响应不携带条目和统计字段
        assert!(json.get("items").is_none());
        assert!(json.get("original_count").is_none());
        assert!(json.get("failed").is_none());
    }
}
