//! 错误分类
//!
//! 远端错误、存储损坏、参数校验与附件下载错误分别建模，
//! 由能够重试的组件自行吸收瞬时错误，其余错误以会话为单位上报。

use thiserror::Error;

/// VK 接口限流错误码（Too many requests per second）
pub const RATE_LIMIT_ERROR_CODE: i64 = 6;

/// 传输层失败（无法建立连接、响应无法解析等）使用的伪错误码
pub const TRANSPORT_ERROR_CODE: i64 = -1;

/// 远端接口错误
#[derive(Debug, Clone, Error)]
#[error("远端接口错误 {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    /// 只有限流错误允许自动重试
    pub retryable: bool,
}

impl RemoteError {
    /// 根据 VK 返回的错误码构造
    pub fn from_api(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code == RATE_LIMIT_ERROR_CODE,
        }
    }

    /// 传输层错误，不自动重试
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: TRANSPORT_ERROR_CODE,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == RATE_LIMIT_ERROR_CODE
    }
}

/// 以会话为单位上报的错误
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// 远端致命错误：中止当前会话同步并回滚
    #[error("会话 {peer_id} 同步失败: {source}")]
    Remote {
        peer_id: i64,
        #[source]
        source: RemoteError,
    },

    /// 本地存储不可读或不完整：跳过该会话
    #[error("会话 {peer_id} 本地存储损坏: {reason}")]
    StorageCorrupt { peer_id: i64, reason: String },

    /// 参数不合法，在任何 I/O 之前报告
    #[error("参数校验失败: {0}")]
    Validation(String),

    /// 其它存储/文件系统错误
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ArchiveError {
    pub fn corrupt(peer_id: i64, reason: impl Into<String>) -> Self {
        Self::StorageCorrupt {
            peer_id,
            reason: reason.into(),
        }
    }
}

/// 单个附件的下载错误
#[derive(Debug, Error)]
pub enum DownloadError {
    /// 5xx 或连接失败，可重试
    #[error("临时错误: {0}")]
    Transient(String),

    /// 4xx，不重试
    #[error("HTTP {status}: {url}")]
    Permanent { status: u16, url: String },

    /// 本地写文件失败
    #[error("写入文件失败: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
