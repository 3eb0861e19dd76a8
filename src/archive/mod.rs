//! VK 会话归档
//!
//! 增量拉取会话历史到本地存储，再从存储重建消息森林，生成聊天记录并下载附件。

pub mod attachment;
pub mod client;
pub mod error;
pub mod listener;
pub mod message;
pub mod participant;
pub mod remote;
pub mod render;
pub mod serialization;
pub mod store;
pub mod sync;
pub mod types;
pub mod utils;
