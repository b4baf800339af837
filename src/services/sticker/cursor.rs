// 分页 cursor 管理
//
// 上游接口的分页不是简单偏移量，而是每页响应里携带的
// 不透明 cursor。本模块维护 keyword -> (start -> cursor) 的
// 映射，随页面拉取增量构建。由服务实例持有，不做全局状态；
// 进程重启后任何 keyword 的分页都会回到第一页。

use std::collections::HashMap;
use std::sync::Mutex;

/// 首页固定使用的 cursor 哨兵值
const INITIAL_CURSOR: &str = "0";

/// 分页 cursor 跟踪器
///
/// 并发安全：fan-out 时多个列表调用可能同时更新同一 keyword
#[derive(Debug, Default)]
pub struct CursorTracker {
    // keyword -> (下一页 start -> cursor)
    inner: Mutex<HashMap<String, HashMap<u32, String>>>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析 (keyword, start) 对应的 cursor
    ///
    /// - `start == 0`：固定返回首页哨兵
    /// - 有缓存记录：返回上游下发的 cursor
    /// - 无缓存记录：退化为原始偏移量字符串。
    ///   已知限制：上游未必接受偏移量作为 cursor，这是尽力而为的行为
    pub fn resolve(&self, keyword: &str, start: u32) -> String {
        if start == 0 {
            return INITIAL_CURSOR.to_string();
        }

        let map = self.inner.lock().expect("cursor lock poisoned");
        if let Some(cached) = map.get(keyword).and_then(|pages| pages.get(&start)) {
            tracing::debug!("使用缓存的分页 cursor: keyword={} start={} cursor={}", keyword, start, cached);
            return cached.clone();
        }

        start.to_string()
    }

    /// 记录一页成功拉取后的下一页 cursor
    ///
    /// 下一页起点按 `(start / limit + 2) * limit` 计算
    pub fn record(&self, keyword: &str, start: u32, limit: u32, next_cursor: &str) {
        let limit = limit.max(1);
        let next_start = (start / limit + 2) * limit;

        let mut map = self.inner.lock().expect("cursor lock poisoned");
        map.entry(keyword.to_string())
            .or_default()
            .insert(next_start, next_cursor.to_string());

        tracing::debug!(
            "缓存分页信息: keyword={} 下一页 start={} cursor={}",
            keyword,
            next_start,
            next_cursor
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_zero_always_initial() {
        let tracker = CursorTracker::new();
        assert_eq!(tracker.resolve("cat", 0), "0");

        // 即使记录了数据，首页也始终用哨兵
        tracker.record("cat", 0, 40, "XYZ");
        assert_eq!(tracker.resolve("cat", 0), "0");
    }

    #[test]
    fn test_recorded_cursor_is_substituted() {
        let tracker = CursorTracker::new();
        // start=0, limit=40 的页面报告 next_cursor="XYZ"，
        // 记录到 next_start = (0/40 + 2) * 40 = 80
        tracker.record("cat", 0, 40, "XYZ");

        // start=80 的请求必须使用 "XYZ" 而不是 "80"
        assert_eq!(tracker.resolve("cat", 80), "XYZ");
    }

    #[test]
    fn test_unknown_offset_degrades_to_raw_offset() {
        let tracker = CursorTracker::new();
        assert_eq!(tracker.resolve("dog", 80), "80");
    }

    #[test]
    fn test_keywords_are_isolated() {
        let tracker = CursorTracker::new();
        tracker.record("cat", 0, 40, "CAT-2");
        assert_eq!(tracker.resolve("cat", 80), "CAT-2");
        assert_eq!(tracker.resolve("dog", 80), "80");
    }

    #[test]
    fn test_next_start_arithmetic() {
        let tracker = CursorTracker::new();
        // 第二页 (start=40, limit=40) 的 next_start 是 (40/40 + 2) * 40 = 120
        tracker.record("cat", 40, 40, "P3");
        assert_eq!(tracker.resolve("cat", 120), "P3");
        // start=80 没有记录
        assert_eq!(tracker.resolve("cat", 80), "80");
    }

    #[test]
    fn test_zero_limit_does_not_panic() {
        let tracker = CursorTracker::new();
        tracker.record("cat", 0, 0, "X");
        // limit 被钳到 1，next_start = 2
        assert_eq!(tracker.resolve("cat", 2), "X");
    }
}
