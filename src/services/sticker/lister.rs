// 抖音表情包列表客户端
//
// 负责调用上游搜索接口并解析表情包集合。
// 解析失败、字段缺失、列表为空都按空集合处理，
// 只有传输失败和非成功状态码才算错误；
// 成功拉取一页后把 next_cursor 记录进 CursorTracker

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::config::DouyinConfig;
use crate::services::sticker::cursor::CursorTracker;
use crate::services::sticker::error::ListError;
use crate::services::sticker::filename::derive_filename;

/// 列表请求的整体超时（秒）
const LIST_TIMEOUT_SECS: u64 = 30;

/// 单个表情包条目
///
/// 上游返回后不再变化
#[derive(Debug, Clone)]
pub struct StickerEntry {
    /// 候选来源 URL 列表，第一个为主来源
    pub origin_urls: Vec<String>,
    /// 由第一个 URL 派生的稳定标识
    pub stable_id: String,
}

impl StickerEntry {
    /// 主来源 URL
    pub fn primary_url(&self) -> &str {
        &self.origin_urls[0]
    }
}

/// 抖音表情包列表客户端
#[derive(Clone)]
pub struct EmoticonClient {
    client: Client,
    config: DouyinConfig,
}

impl EmoticonClient {
    pub fn new(config: DouyinConfig) -> Result<Self, ListError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LIST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ListError::NetworkError(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { client, config })
    }

    /// 拉取一页表情包列表
    ///
    /// cursor 由 `CursorTracker` 解析（见 cursor 模块），
    /// 只有 `ac == "search"` 时才把 keyword 传给上游。
    /// 页面报告 has_more 且携带 next_cursor 时更新跟踪器。
    ///
    /// # 返回
    /// - `Ok(Vec<StickerEntry>)`: 表情包集合，可能为空
    /// - `Err(ListError)`: 传输失败或非成功状态码
    pub async fn fetch_page(
        &self,
        ac: &str,
        keyword: &str,
        start: u32,
        limit: u32,
        cursors: &CursorTracker,
    ) -> Result<Vec<StickerEntry>, ListError> {
        let cursor = cursors.resolve(keyword, start);
        let upstream_keyword = if ac == "search" { keyword } else { "" };

        tracing::info!(
            "调用抖音API: start={} limit={} cursor={} keyword={}",
            start,
            limit,
            cursor,
            upstream_keyword
        );

        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("device_platform", "webapp"),
                ("aid", "1128"),
                ("keyword", upstream_keyword),
                ("cursor", cursor.as_str()),
                ("msToken", self.ms_token().as_str()),
            ])
            .header("User-Agent", &self.config.user_agent)
            .header("Accept", "application/json, text/plain, */*")
            .header("Referer", &self.config.referer)
            .header("Cookie", &self.config.cookie)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("抖音API请求失败: 状态码 {}", status);
            return Err(ListError::HttpError(status.as_u16()));
        }

        let body = response.text().await?;
        let data: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("抖音API响应不是合法 JSON: {}", e);
                return Ok(Vec::new());
            }
        };

        let Some(emoticon_data) = data.get("emoticon_data") else {
            tracing::warn!("响应中未找到 emoticon_data 字段");
            return Ok(Vec::new());
        };

        let stickers = Self::parse_sticker_list(emoticon_data);
        if stickers.is_empty() {
            tracing::warn!("表情包列表为空");
            return Ok(stickers);
        }

        let has_more = emoticon_data
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let next_cursor = emoticon_data.get("next_cursor").map(Self::cursor_to_string);

        if has_more {
            if let Some(next_cursor) = next_cursor.filter(|c| !c.is_empty()) {
                cursors.record(keyword, start, limit, &next_cursor);
            }
        }

        tracing::info!("成功获取 {} 个表情包, 还有更多: {}", stickers.len(), has_more);
        Ok(stickers)
    }

    /// 从 emoticon_data 中提取表情包条目
    fn parse_sticker_list(emoticon_data: &Value) -> Vec<StickerEntry> {
        let Some(list) = emoticon_data.get("sticker_list").and_then(Value::as_array) else {
            return Vec::new();
        };

        list.iter()
            .filter_map(|item| {
                let urls: Vec<String> = item
                    .get("origin")?
                    .get("url_list")?
                    .as_array()?
                    .iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect();

                if urls.is_empty() {
                    return None;
                }

                let stable_id = derive_filename(&urls[0]);
                Some(StickerEntry {
                    origin_urls: urls,
                    stable_id,
                })
            })
            .collect()
    }

    // 上游把 cursor 当数字或字符串下发都有可能
    fn cursor_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// 获取 msToken，优先使用配置值，否则生成 64 位随机字符串
    fn ms_token(&self) -> String {
        if let Some(token) = &self.config.ms_token {
            if !token.is_empty() {
                return token.clone();
            }
        }

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect()
    }
}
