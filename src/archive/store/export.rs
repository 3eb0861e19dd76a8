//! 导出为 JSON Lines
//!
//! 文件格式：
//! ```text
//! PEER
//! {"id":..,"account":{..},"info":{..}}
//! MESSAGES
//! {消息 JSON}
//! ...
//! USERS
//! {参与者 JSON}
//! ...
//! ```

use crate::archive::error::ArchiveError;
use crate::archive::serialization::JsonLinesWriter;
use crate::archive::store::dao::ConversationStore;
use crate::archive::store::models::MessageCursor;
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// 每次从存储读取的消息条数
const EXPORT_PAGE_SIZE: u32 = 1000;

/// 导出结果
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub messages: u64,
    pub participants: u64,
}

/// 导出文件路径：`<dir>/<peer_id>.jsonl[.gz]`
pub fn export_path(dir: &Path, peer_id: i64, gzip: bool) -> PathBuf {
    let ext = if gzip { "jsonl.gz" } else { "jsonl" };
    dir.join(format!("{}.{}", peer_id, ext))
}

/// 将一个会话的存储完整导出到 `dir`
pub async fn export_conversation(
    store: &ConversationStore,
    dir: &Path,
    gzip: bool,
) -> Result<ExportSummary, ArchiveError> {
    let peer = store.load_peer().await?;
    let participants = store.load_participants().await?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("创建导出目录失败: {}", dir.display()))?;
    let path = export_path(dir, store.peer_id(), gzip);
    let mut writer = JsonLinesWriter::create(&path, gzip)
        .with_context(|| format!("创建导出文件失败: {}", path.display()))?;

    writer.write_marker("PEER").context("写入导出文件失败")?;
    writer
        .write_value(&json!({"id": peer.id, "account": peer.account, "info": peer.info}))
        .context("写入导出文件失败")?;

    writer.write_marker("MESSAGES").context("写入导出文件失败")?;
    let mut cursor = MessageCursor::start();
    let mut messages = 0u64;
    loop {
        let page = store.load_messages_page(cursor, EXPORT_PAGE_SIZE).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = last.cursor();
        for msg in &page {
            writer.write_value(&msg.json).context("写入导出文件失败")?;
        }
        messages += page.len() as u64;
    }

    writer.write_marker("USERS").context("写入导出文件失败")?;
    for p in &participants {
        writer.write_value(&p.json).context("写入导出文件失败")?;
    }
    writer.finish().context("关闭导出文件失败")?;

    info!(
        "[Export] 📦 会话 {} 已导出: {} 条消息, {} 个参与者 -> {}",
        store.peer_id(),
        messages,
        participants.len(),
        path.display()
    );

    Ok(ExportSummary {
        path,
        messages,
        participants: participants.len() as u64,
    })
}
