// 文件名派生
//
// 将来源 URL 映射为稳定、文件系统安全的标识符，
// 缓存命中检测依赖同一 URL 永远得到同一文件名

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// 文件名中不允许出现的字符
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// 文件名最大长度（字符数）
const MAX_FILENAME_LEN: usize = 100;

/// 从 URL 派生文件名
///
/// 取 URL 路径部分的主干（不含扩展名），清理非法字符并截断。
/// URL 无法解析或路径没有可用主干时，退化为基于时间的合成名。
///
/// # 示例
/// ```
/// use sticker_gif_backend::services::sticker::filename::derive_filename;
///
/// let name = derive_filename("https://example.com/stickers/cat_01.webp?x=1");
/// assert_eq!(name, "cat_01");
/// ```
pub fn derive_filename(url: &str) -> String {
    let stem = Url::parse(url).ok().and_then(|parsed| {
        Path::new(parsed.path())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
    });

    match stem {
        Some(stem) => sanitize_filename(&stem),
        None => fallback_filename(),
    }
}

/// 清理文件名，确保安全
///
/// 将 `<>:"/\|?*` 替换为 `_`，并截断到 100 个字符以内
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .take(MAX_FILENAME_LEN)
        .collect()
}

/// 基于时间的合成文件名
fn fallback_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("emoji_{}", secs)
}
