//! 会话同步模块

pub mod fetcher;
pub mod service;

pub use fetcher::{FetcherConfig, HistoryFetcher};
pub use service::{ConversationSyncer, SyncMode, SyncStats, SyncerConfig};
