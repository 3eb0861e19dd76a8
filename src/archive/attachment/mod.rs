//! 附件模块：类型解析与并发下载

pub mod downloader;
pub mod types;

pub use downloader::{collect_jobs, AttachmentDownloader, DownloadJob, DownloadReport, DownloaderConfig};
pub use types::{Attachment, AttachmentKind, DownloadTarget};
