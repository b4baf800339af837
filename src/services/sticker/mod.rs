// 表情包模块 - 抓取/下载/转换流水线
//
// 本模块实现核心流水线，包括：
// - 文件名派生
// - 分页 cursor 管理
// - 上游列表拉取
// - 分档位降级下载
// - 动图/静图 GIF 转换
// - 流水线编排与磁盘缓存

pub mod converter;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod filename;
pub mod lister;
pub mod pipeline;

pub use converter::{ConvertOptions, ConvertStrategy, GifConverter, StrategyConverter};
pub use cursor::CursorTracker;
pub use error::{ConversionError, DownloadError, ListError};
pub use fetcher::{FetchProfile, ImageFetcher, TieredFetcher};
pub use filename::{derive_filename, sanitize_filename};
pub use lister::{EmoticonClient, StickerEntry};
pub use pipeline::{
    AllowList, ConvertedItem, IdentityGate, ItemFailure, ListingRequest, ProcessReply,
    StickerService,
};
