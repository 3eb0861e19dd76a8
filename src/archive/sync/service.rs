//! 会话同步服务层
//!
//! 单个会话的一次同步：拉取消息、补齐参与者资料，全部写入在同一事务中完成

use crate::archive::error::{ArchiveError, RemoteError};
use crate::archive::participant::{collect_ids, collect_peer, fetch_participants};
use crate::archive::remote::{with_rate_limit_retry, RemoteClient};
use crate::archive::store::dao::{ConversationStore, SyncHandle};
use crate::archive::store::models::{ParticipantIds, StoredMessage};
use crate::archive::sync::fetcher::{FetcherConfig, HistoryFetcher};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 同步器配置
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// 输出根目录，存储位于 `<root>/dumps/`
    pub root: PathBuf,
    /// 每个会话最多拉取的消息数，`None` 表示不限
    pub max_messages: Option<u64>,
    pub fetcher: FetcherConfig,
}

impl SyncerConfig {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            max_messages: Some(75_000),
            fetcher: FetcherConfig::new(),
        }
    }
}

/// 实际执行的同步模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Append { resume_after: i64 },
}

/// 单个会话的同步结果
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub peer_id: i64,
    pub mode: SyncMode,
    /// 从远端拉取的消息数
    pub fetched: u64,
    /// 实际新写入的消息数
    pub inserted: u64,
    /// 新写入的参与者数
    pub participants: u64,
}

/// 会话同步器
pub struct ConversationSyncer {
    config: SyncerConfig,
    remote: Arc<dyn RemoteClient>,
}

impl ConversationSyncer {
    pub fn new(config: SyncerConfig, remote: Arc<dyn RemoteClient>) -> Self {
        Self { config, remote }
    }

    /// 同步一个会话；失败时回滚本次全部写入
    pub async fn sync(&self, peer_id: i64, append: bool) -> Result<SyncStats, ArchiveError> {
        self.config.fetcher.validate()?;

        let path = ConversationStore::db_path(&self.config.root, peer_id);
        let store = match ConversationStore::open_or_create(&path, peer_id).await {
            Ok(store) => store,
            // 全量同步会替换全部内容，打不开的旧文件直接移走重建
            Err(e) if !append && path.is_file() => {
                warn!("[Sync] ⚠️ 会话 {} 的旧存储无法打开，重建: {:#}", peer_id, e);
                ConversationStore::recreate(&path, peer_id).await?
            }
            Err(e) => return Err(e.into()),
        };
        let mut handle = store.begin().await?;

        let result = self.sync_in_tx(&mut handle, peer_id, append).await;
        let result = match result {
            Ok(stats) => match handle.commit().await {
                Ok(()) => Ok(stats),
                Err(e) => Err(ArchiveError::Storage(e)),
            },
            Err(e) => {
                error!("[Sync] ❌ 会话 {} 同步失败，回滚: {}", peer_id, e);
                if let Err(rb) = handle.rollback().await {
                    warn!("[Sync] 会话 {} 回滚失败: {:#}", peer_id, rb);
                }
                Err(e)
            }
        };

        store.close().await;
        result
    }

    async fn sync_in_tx(
        &self,
        handle: &mut SyncHandle,
        peer_id: i64,
        append: bool,
    ) -> Result<SyncStats, ArchiveError> {
        let remote_err = move |source: RemoteError| ArchiveError::Remote { peer_id, source };
        let policy = self.config.fetcher.rate_limit;

        // 增量模式需要已有的会话信息和消息，否则退化为全量
        let resume = if append && handle.peer_exists().await? {
            handle.highest_stored_message_id().await?
        } else {
            None
        };
        if append && resume.is_none() {
            info!("[Sync] 会话 {} 本地没有可续传的数据，执行全量同步", peer_id);
        }

        let mode = match resume {
            Some(resume_after) => SyncMode::Append { resume_after },
            None => SyncMode::Full,
        };

        let known = match mode {
            SyncMode::Full => {
                handle.clear().await?;
                let info = with_rate_limit_retry(policy, "messages.getConversationsById", || {
                    self.remote.fetch_conversation(peer_id)
                })
                .await
                .map_err(remote_err)?;
                let account = with_rate_limit_retry(policy, "users.get", || {
                    self.remote.fetch_users(&[])
                })
                .await
                .map_err(remote_err)?
                .into_iter()
                .next()
                .unwrap_or_else(|| json!({}));
                handle.write_peer_metadata(&account, &info).await?;
                ParticipantIds::default()
            }
            SyncMode::Append { .. } => handle.stored_participant_ids().await?,
        };

        let mut fetcher = HistoryFetcher::start(
            self.remote.as_ref(),
            peer_id,
            self.config.max_messages,
            resume,
            self.config.fetcher,
        )
        .await
        .map_err(remote_err)?;

        let mut ids = ParticipantIds::default();
        collect_peer(peer_id, &mut ids);

        let mut fetched = 0u64;
        let mut inserted = 0u64;
        while let Some(batch) = fetcher.next_batch().await.map_err(remote_err)? {
            collect_ids(&batch, &mut ids);
            fetched += batch.len() as u64;
            let stored: Vec<StoredMessage> = batch
                .into_iter()
                .filter_map(StoredMessage::from_json)
                .collect();
            inserted += handle.append_messages(&stored).await?;
            debug!(
                "[Sync] 会话 {} 进度 {}/{}",
                peer_id,
                fetcher.processed(),
                fetcher.total()
            );
        }

        let missing = ids.without(&known);
        let participants = if missing.is_empty() {
            0
        } else {
            let fetched_participants = fetch_participants(self.remote.as_ref(), &missing, policy)
                .await
                .map_err(remote_err)?;
            handle.append_participants(&fetched_participants).await?
        };

        info!(
            "[Sync] ✅ 会话 {} 同步完成（{:?}），拉取 {} 条，新增 {} 条，新增参与者 {} 个",
            peer_id, mode, fetched, inserted, participants
        );

        Ok(SyncStats {
            peer_id,
            mode,
            fetched,
            inserted,
            participants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::remote::mock::{message, FakeRemote};

    fn syncer(root: &std::path::Path, remote: Arc<FakeRemote>) -> ConversationSyncer {
        ConversationSyncer::new(SyncerConfig::new(root.to_path_buf()), remote)
    }

    async fn stored_ids(root: &std::path::Path, peer_id: i64) -> Vec<i64> {
        let store = ConversationStore::open_existing(&ConversationStore::db_path(root, peer_id), peer_id)
            .await
            .unwrap();
        let ids = store.message_ids().await.unwrap();
        store.close().await;
        ids
    }

    #[tokio::test]
    async fn append_keeps_existing_and_adds_newer() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(
            FakeRemote::with_sequential(5, 1000)
                .with_user(1, "A", "One")
                .with_user(2, "B", "Two")
                .with_user(3, "C", "Three")
                .with_user(5, "Peer", "Five"),
        );
        let s = syncer(dir.path(), remote.clone());

        let first = s.sync(5, false).await.unwrap();
        assert_eq!(first.mode, SyncMode::Full);
        assert_eq!(first.inserted, 1000);
        let before = stored_ids(dir.path(), 5).await;

        remote.push_messages(
            5,
            (1001..=1050)
                .map(|id| message(id, 3, 1_700_000_000 + id, "new"))
                .collect(),
        );
        let second = s.sync(5, true).await.unwrap();
        assert_eq!(second.mode, SyncMode::Append { resume_after: 1000 });
        assert_eq!(second.inserted, 50);

        let after = stored_ids(dir.path(), 5).await;
        assert!(before.iter().all(|id| after.contains(id)));
        assert_eq!(after.len(), 1050);
        // 只为新出现的参与者请求资料
        assert_eq!(remote.user_requests.lock().unwrap().last().unwrap(), &vec![3]);
    }

    #[tokio::test]
    async fn failed_full_resync_leaves_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::with_sequential(5, 10));
        syncer(dir.path(), remote).sync(5, false).await.unwrap();

        let mut failing = FakeRemote::with_sequential(5, 20);
        failing.fail_history_at = Some(1);
        let err = syncer(dir.path(), Arc::new(failing))
            .sync(5, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Remote { peer_id: 5, .. }));

        assert_eq!(stored_ids(dir.path(), 5).await, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn full_resync_replaces_unreadable_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConversationStore::db_path(dir.path(), 5);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not a sqlite file ".repeat(100)).unwrap();

        let remote = Arc::new(FakeRemote::with_sequential(5, 10));
        let stats = syncer(dir.path(), remote).sync(5, false).await.unwrap();

        assert_eq!(stats.mode, SyncMode::Full);
        assert_eq!(stats.inserted, 10);
        assert_eq!(stored_ids(dir.path(), 5).await, (1..=10).collect::<Vec<_>>());
        assert!(path.with_extension("db.broken").is_file());
    }

    #[tokio::test]
    async fn append_does_not_discard_unreadable_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConversationStore::db_path(dir.path(), 5);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not a sqlite file ".repeat(100)).unwrap();

        let remote = Arc::new(FakeRemote::with_sequential(5, 10));
        assert!(syncer(dir.path(), remote).sync(5, true).await.is_err());
        assert!(!path.with_extension("db.broken").exists());
    }

    #[tokio::test]
    async fn append_without_store_falls_back_to_full() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::with_sequential(2_000_000_003, 5));
        let stats = syncer(dir.path(), remote).sync(2_000_000_003, true).await.unwrap();
        assert_eq!(stats.mode, SyncMode::Full);
        assert_eq!(stats.inserted, 5);
    }

    #[tokio::test]
    async fn user_and_group_with_same_number_are_both_stored() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FakeRemote::default()
            .with_user(7, "Ivan", "Petrov")
            .with_group(7, "Club");
        remote.push_messages(
            2_000_000_001,
            vec![message(1, 7, 1_600_000_000, "hi"), message(2, -7, 1_600_000_060, "news")],
        );
        syncer(dir.path(), Arc::new(remote))
            .sync(2_000_000_001, false)
            .await
            .unwrap();

        let path = ConversationStore::db_path(dir.path(), 2_000_000_001);
        let store = ConversationStore::open_existing(&path, 2_000_000_001).await.unwrap();
        let ids: Vec<i64> = store
            .load_participants()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![-7, 7]);
    }

    #[tokio::test]
    async fn empty_conversation_syncs_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::default());
        let stats = syncer(dir.path(), remote).sync(9, false).await.unwrap();
        assert_eq!(stats.fetched, 0);
        assert!(stored_ids(dir.path(), 9).await.is_empty());
    }
}
