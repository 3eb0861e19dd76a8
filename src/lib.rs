pub mod archive;

// 重新导出常用类型和函数，方便外部使用
pub use archive::{
    attachment::{Attachment, AttachmentKind},
    client::{Archiver, ArchiverConfig, ConversationOutcome, RunReport},
    error::{ArchiveError, DownloadError, RemoteError},
    listener::{ArchiveListener, EmptyArchiveListener, Phase},
    utils::parse_peer_ids,
};
