//! 会话存储数据访问层（DAO）
//!
//! 每个会话一个 SQLite 文件，包含 peer / messages / participants 三张表。
//! 一次同步中的所有写入都在同一个事务（[`SyncHandle`]）里完成，失败时整体回滚。

use crate::archive::error::ArchiveError;
use crate::archive::store::models::{
    MessageCursor, ParticipantIds, StoredMessage, StoredParticipant, StoredPeer,
};
use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 会话存储
pub struct ConversationStore {
    pool: Pool<Sqlite>,
    peer_id: i64,
}

impl ConversationStore {
    /// 会话存储文件路径：`<root>/dumps/<peer_id>.db`
    pub fn db_path(root: &Path, peer_id: i64) -> PathBuf {
        root.join("dumps").join(format!("{}.db", peer_id))
    }

    async fn connect(path: &Path, create: bool) -> Result<Pool<Sqlite>> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Delete);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("连接SQLite数据库失败: {}", path.display()))?;
        Ok(pool)
    }

    /// 打开或创建会话存储，并确保表结构存在
    pub async fn open_or_create(path: &Path, peer_id: i64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }

        let pool = Self::connect(path, true).await?;
        let store = Self { pool, peer_id };
        store.init_db().await?;
        Ok(store)
    }

    /// 把无法打开的旧存储改名为 `<peer_id>.db.broken`，再创建一个空存储
    ///
    /// 只用于全量同步：旧数据反正会被整体替换
    pub async fn recreate(path: &Path, peer_id: i64) -> Result<Self> {
        let broken = path.with_extension("db.broken");
        tokio::fs::rename(path, &broken)
            .await
            .with_context(|| format!("移走损坏的存储失败: {}", path.display()))?;
        warn!(
            "[StoreDAO] ⚠️ 会话 {} 的旧存储已移至 {}",
            peer_id,
            broken.display()
        );
        Self::open_or_create(path, peer_id).await
    }

    /// 打开已有的会话存储（只用于读取），文件缺失或结构不完整视为损坏
    pub async fn open_existing(path: &Path, peer_id: i64) -> Result<Self, ArchiveError> {
        if !path.is_file() {
            return Err(ArchiveError::corrupt(
                peer_id,
                format!("存储文件不存在: {}", path.display()),
            ));
        }

        let pool = Self::connect(path, false)
            .await
            .map_err(|e| ArchiveError::corrupt(peer_id, format!("{:#}", e)))?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS cnt FROM sqlite_master
            WHERE type = 'table' AND name IN ('peer', 'messages', 'participants')
            "#,
        )
        .fetch_one(&pool)
        .await
        .map_err(|e| ArchiveError::corrupt(peer_id, e.to_string()))?;

        let tables: i64 = row.get("cnt");
        if tables != 3 {
            return Err(ArchiveError::corrupt(
                peer_id,
                format!("缺少数据表，仅找到 {} 张", tables),
            ));
        }

        Ok(Self { pool, peer_id })
    }

    /// 初始化数据库表结构
    async fn init_db(&self) -> Result<()> {
        debug!("[StoreDAO/DB] 初始化会话 {} 的表结构", self.peer_id);

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS peer (
                id      INTEGER PRIMARY KEY,
                account TEXT NOT NULL,
                info    TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id   INTEGER PRIMARY KEY,
                json TEXT NOT NULL,
                date INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date, id)",
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                id   INTEGER PRIMARY KEY,
                json TEXT NOT NULL
            )
            "#,
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .context("创建会话存储表失败")?;
        }
        Ok(())
    }

    pub fn peer_id(&self) -> i64 {
        self.peer_id
    }

    /// 开启一次同步事务
    pub async fn begin(&self) -> Result<SyncHandle> {
        let tx = self.pool.begin().await.context("开启事务失败")?;
        Ok(SyncHandle {
            tx,
            peer_id: self.peer_id,
        })
    }

    fn parse_json(&self, raw: &str, what: &str) -> Result<Value, ArchiveError> {
        serde_json::from_str(raw)
            .map_err(|e| ArchiveError::corrupt(self.peer_id, format!("{} JSON 无法解析: {}", what, e)))
    }

    /// 读取会话元信息
    pub async fn load_peer(&self) -> Result<StoredPeer, ArchiveError> {
        let row = sqlx::query("SELECT id, account, info FROM peer LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ArchiveError::corrupt(self.peer_id, e.to_string()))?
            .ok_or_else(|| ArchiveError::corrupt(self.peer_id, "peer 表为空"))?;

        let account: String = row.get("account");
        let info: String = row.get("info");
        Ok(StoredPeer {
            id: row.get("id"),
            account: self.parse_json(&account, "account")?,
            info: self.parse_json(&info, "info")?,
        })
    }

    /// 读取全部参与者
    pub async fn load_participants(&self) -> Result<Vec<StoredParticipant>, ArchiveError> {
        let rows = sqlx::query("SELECT id, json FROM participants ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ArchiveError::corrupt(self.peer_id, e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let json: String = row.get("json");
                Ok(StoredParticipant {
                    id: row.get("id"),
                    json: self.parse_json(&json, "participant")?,
                })
            })
            .collect()
    }

    /// 按 (date, id) 顺序分页读取消息，返回 `after` 之后的最多 `limit` 条
    pub async fn load_messages_page(
        &self,
        after: MessageCursor,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ArchiveError> {
        let rows = sqlx::query(
            r#"
            SELECT id, json, date FROM messages
            WHERE date > ? OR (date = ? AND id > ?)
            ORDER BY date, id
            LIMIT ?
            "#,
        )
        .bind(after.date)
        .bind(after.date)
        .bind(after.id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ArchiveError::corrupt(self.peer_id, e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let json: String = row.get("json");
                Ok(StoredMessage {
                    id: row.get("id"),
                    json: self.parse_json(&json, "message")?,
                    date: row.get("date"),
                })
            })
            .collect()
    }

    /// 全部消息 ID（升序）
    pub async fn message_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM messages ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("查询消息ID列表失败")?;
        Ok(rows.into_iter().map(|row| row.get::<i64, _>("id")).collect())
    }

    /// 关闭连接池
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// 一次同步的写入句柄（单个事务）
pub struct SyncHandle {
    tx: Transaction<'static, Sqlite>,
    peer_id: i64,
}

impl SyncHandle {
    /// 清空会话的全部数据（全量同步）
    pub async fn clear(&mut self) -> Result<()> {
        for table in ["peer", "messages", "participants"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *self.tx)
                .await
                .with_context(|| format!("清空 {} 表失败", table))?;
        }
        info!("[StoreDAO] 🗑️ 会话 {} 的旧数据已清空（提交前可回滚）", self.peer_id);
        Ok(())
    }

    /// 写入会话元信息（仅全量同步调用）
    pub async fn write_peer_metadata(&mut self, account: &Value, info: &Value) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO peer (id, account, info) VALUES (?, ?, ?)")
            .bind(self.peer_id)
            .bind(serde_json::to_string(account)?)
            .bind(serde_json::to_string(info)?)
            .execute(&mut *self.tx)
            .await
            .context("写入会话信息失败")?;
        Ok(())
    }

    /// 追加消息，已存在的 ID 不会被覆盖；返回实际插入条数
    pub async fn append_messages(&mut self, batch: &[StoredMessage]) -> Result<u64> {
        let mut inserted = 0;
        for msg in batch {
            let res = sqlx::query("INSERT OR IGNORE INTO messages (id, json, date) VALUES (?, ?, ?)")
                .bind(msg.id)
                .bind(serde_json::to_string(&msg.json)?)
                .bind(msg.date)
                .execute(&mut *self.tx)
                .await
                .with_context(|| format!("写入消息 {} 失败", msg.id))?;
            inserted += res.rows_affected();
        }
        if inserted < batch.len() as u64 {
            warn!(
                "[StoreDAO] 会话 {} 有 {} 条消息已存在，已跳过",
                self.peer_id,
                batch.len() as u64 - inserted
            );
        }
        debug!("[StoreDAO] 会话 {} 追加消息 {} 条", self.peer_id, inserted);
        Ok(inserted)
    }

    /// 追加参与者，已存在的不更新
    pub async fn append_participants(&mut self, batch: &[StoredParticipant]) -> Result<u64> {
        let mut inserted = 0;
        for p in batch {
            let res = sqlx::query("INSERT OR IGNORE INTO participants (id, json) VALUES (?, ?)")
                .bind(p.id)
                .bind(serde_json::to_string(&p.json)?)
                .execute(&mut *self.tx)
                .await
                .with_context(|| format!("写入参与者 {} 失败", p.id))?;
            inserted += res.rows_affected();
        }
        Ok(inserted)
    }

    /// 是否已有会话元信息
    pub async fn peer_exists(&mut self) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM peer")
            .fetch_one(&mut *self.tx)
            .await
            .context("查询会话信息失败")?;
        Ok(row.get::<i64, _>("cnt") > 0)
    }

    /// 已存储的最大消息 ID，作为增量同步的起点
    pub async fn highest_stored_message_id(&mut self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT MAX(id) AS max_id FROM messages")
            .fetch_one(&mut *self.tx)
            .await
            .context("查询最大消息ID失败")?;
        Ok(row.try_get::<Option<i64>, _>("max_id")?)
    }

    /// 已存储的参与者 ID（按符号拆分）
    pub async fn stored_participant_ids(&mut self) -> Result<ParticipantIds> {
        let rows = sqlx::query("SELECT id FROM participants")
            .fetch_all(&mut *self.tx)
            .await
            .context("查询参与者ID失败")?;

        let mut ids = ParticipantIds::default();
        for row in rows {
            ids.insert_signed(row.get::<i64, _>("id"));
        }
        Ok(ids)
    }

    /// 提交
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("提交事务失败")?;
        info!("[StoreDAO] ✅ 会话 {} 已提交", self.peer_id);
        Ok(())
    }

    /// 回滚本次同步的全部写入
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context("回滚事务失败")?;
        warn!("[StoreDAO] ↩️ 会话 {} 已回滚", self.peer_id);
        Ok(())
    }
}
