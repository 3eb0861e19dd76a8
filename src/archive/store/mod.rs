//! 本地存储模块
//!
//! 每个会话一个 SQLite 文件，同步只追加不改写

pub mod dao;
pub mod export;
pub mod models;

pub use dao::{ConversationStore, SyncHandle};
pub use models::{MessageCursor, ParticipantIds, StoredMessage, StoredParticipant, StoredPeer};
