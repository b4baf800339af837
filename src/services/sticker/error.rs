// 表情包模块错误类型定义
//
// 定义了获取、下载、转换流程中可能出现的各种错误类型

use thiserror::Error;

/// 上游列表接口相关错误
///
/// 仅传输失败和非成功状态码会产生错误，
/// 响应缺字段或无法解析按空结果处理（见 lister 模块）
#[derive(Debug, Error)]
pub enum ListError {
    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("请求超时")]
    Timeout,

    #[error("HTTP 错误: 状态码 {0}")]
    HttpError(u16),
}

/// 下载相关错误
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("下载超时")]
    Timeout,

    #[error("HTTP 错误: 状态码 {0}")]
    HttpError(u16),

    #[error("响应体为空")]
    EmptyBody,

    #[error("所有下载档位都失败: {0}")]
    AllProfilesFailed(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 图片转换相关错误
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("不支持的图片格式: {0}")]
    UnsupportedFormat(String),

    #[error("图片解码失败: {0}")]
    DecodeFailed(String),

    #[error("图片编码失败: {0}")]
    EncodeFailed(String),

    #[error("所有转换方案都失败: {0}")]
    AllStrategiesFailed(String),

    #[error("转换任务执行失败: {0}")]
    TaskFailed(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

// 实现从 reqwest::Error 到 DownloadError 的转换
impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else if err.is_status() {
            if let Some(status) = err.status() {
                DownloadError::HttpError(status.as_u16())
            } else {
                DownloadError::NetworkError(err.to_string())
            }
        } else {
            DownloadError::NetworkError(err.to_string())
        }
    }
}

// 实现从 reqwest::Error 到 ListError 的转换
impl From<reqwest::Error> for ListError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ListError::Timeout
        } else if err.is_status() {
            if let Some(status) = err.status() {
                ListError::HttpError(status.as_u16())
            } else {
                ListError::NetworkError(err.to_string())
            }
        } else {
            ListError::NetworkError(err.to_string())
        }
    }
}
