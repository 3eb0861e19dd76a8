//! 归档客户端
//!
//! 按阶段（dump / parse / atch / export）处理一组会话。每个阶段用固定数量的 worker
//! 从有界通道领取会话，单个会话失败只记录在报告中，不影响其它会话。

use crate::archive::attachment::downloader::{
    collect_jobs, AttachmentDownloader, DownloadJob, DownloaderConfig,
};
use crate::archive::attachment::types::AttachmentKind;
use crate::archive::error::ArchiveError;
use crate::archive::listener::{ArchiveListener, EmptyArchiveListener, Phase};
use crate::archive::message::graph::MessageGraph;
use crate::archive::participant::ParticipantDirectory;
use crate::archive::remote::api::{VkApi, DEFAULT_API_BASE_URL, DEFAULT_API_VERSION};
use crate::archive::remote::{with_rate_limit_retry, RemoteClient};
use crate::archive::render::{RenderState, TranscriptRenderer};
use crate::archive::store::dao::ConversationStore;
use crate::archive::store::export::export_conversation;
use crate::archive::store::models::{MessageCursor, StoredPeer};
use crate::archive::sync::fetcher::FetcherConfig;
use crate::archive::sync::service::{ConversationSyncer, SyncerConfig};
use crate::archive::utils::sanitize_filename;
use anyhow::Context;
use chrono::FixedOffset;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// 读取存储时的分页大小
const READ_PAGE_SIZE: u32 = 1000;

/// messages.getConversations 每页数量
const CONVERSATIONS_PAGE_SIZE: u32 = 200;

/// 归档配置
#[derive(Clone, Debug)]
pub struct ArchiverConfig {
    /// VK access token
    pub token: String,
    /// API 地址
    pub api_base_url: String,
    /// API 版本
    pub api_version: String,
    /// 输出根目录
    pub out_dir: PathBuf,
    /// 并发处理的会话数
    pub threads: usize,
    /// 附件下载并发数
    pub attachment_threads: usize,
    /// 每个会话最多拉取的消息数，`None` 表示不限
    pub max_messages: Option<u64>,
    /// 增量模式
    pub append: bool,
    /// 只下载这些类型的附件，`None` 表示全部
    pub attachment_types: Option<BTreeSet<AttachmentKind>>,
    /// 只处理这些会话，`None` 表示全部
    pub include: Option<BTreeSet<i64>>,
    /// 跳过这些会话
    pub exclude: BTreeSet<i64>,
    /// 导出时使用 gzip
    pub gzip: bool,
    /// 聊天记录使用的时区
    pub tz: FixedOffset,
    pub fetcher: FetcherConfig,
    /// HTTP 请求超时
    pub http_timeout: Duration,
}

impl ArchiverConfig {
    /// 创建默认配置
    pub fn new(token: String, out_dir: PathBuf) -> Self {
        Self {
            token,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            out_dir,
            threads: 2,
            attachment_threads: 8,
            max_messages: Some(75_000),
            append: false,
            attachment_types: None,
            include: None,
            exclude: BTreeSet::new(),
            gzip: false,
            tz: *chrono::Local::now().offset(),
            fetcher: FetcherConfig::new(),
            http_timeout: Duration::from_secs(60),
        }
    }

    /// 在任何 I/O 之前校验参数
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.threads == 0 {
            return Err(ArchiveError::Validation("会话并发数不能为 0".to_string()));
        }
        if self.max_messages == Some(0) {
            return Err(ArchiveError::Validation("最大消息数不能为 0".to_string()));
        }
        self.fetcher.validate()?;
        self.downloader_config().validate()
    }

    fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            concurrency: self.attachment_threads,
            ..DownloaderConfig::new()
        }
    }
}

/// 单个会话在某个阶段的处理结果
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub peer_id: i64,
    /// 成功时的摘要
    pub summary: Option<String>,
    /// 失败原因
    pub error: Option<String>,
}

impl ConversationOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 一个阶段的运行报告
#[derive(Debug, Clone)]
pub struct RunReport {
    pub phase: Phase,
    pub outcomes: Vec<ConversationOutcome>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.len() - self.failed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// 归档客户端
#[derive(Clone)]
pub struct Archiver {
    config: Arc<ArchiverConfig>,
    remote: Arc<dyn RemoteClient>,
    http: reqwest::Client,
    listener: Arc<dyn ArchiveListener>,
}

impl Archiver {
    /// 使用 VK HTTP API 创建客户端
    pub fn new(config: ArchiverConfig) -> Result<Self, ArchiveError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("创建 HTTP 客户端失败")?;
        let remote = Arc::new(VkApi::new(
            http.clone(),
            config.api_base_url.clone(),
            config.token.clone(),
            config.api_version.clone(),
        ));
        Ok(Self::with_remote(config, remote, http))
    }

    /// 使用自定义远端客户端创建
    pub fn with_remote(
        config: ArchiverConfig,
        remote: Arc<dyn RemoteClient>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config: Arc::new(config),
            remote,
            http,
            listener: Arc::new(EmptyArchiveListener),
        }
    }

    /// 注册进度监听器
    pub fn set_listener(&mut self, listener: Arc<dyn ArchiveListener>) {
        self.listener = listener;
    }

    /// 拉取会话到本地存储
    pub async fn dump(&self) -> Result<RunReport, ArchiveError> {
        self.run(Phase::Dump, self.config.threads).await
    }

    /// 生成文本聊天记录
    pub async fn parse(&self) -> Result<RunReport, ArchiveError> {
        self.run(Phase::Parse, self.config.threads).await
    }

    /// 下载附件（会话逐个处理，每个会话内部并发下载）
    pub async fn attachments(&self) -> Result<RunReport, ArchiveError> {
        self.run(Phase::Attachments, 1).await
    }

    /// 导出为 JSON Lines
    pub async fn export(&self) -> Result<RunReport, ArchiveError> {
        self.run(Phase::Export, self.config.threads).await
    }

    /// 确定本阶段要处理的会话
    pub async fn resolve_peers(&self, phase: Phase) -> Result<Vec<i64>, ArchiveError> {
        let peers: BTreeSet<i64> = match &self.config.include {
            Some(include) => include.clone(),
            None if phase == Phase::Dump => self.list_remote_peers().await?,
            None => self.list_stored_peers().await?,
        };
        Ok(peers
            .into_iter()
            .filter(|id| !self.config.exclude.contains(id))
            .collect())
    }

    async fn list_remote_peers(&self) -> Result<BTreeSet<i64>, ArchiveError> {
        let mut peers = BTreeSet::new();
        let mut offset = 0u64;
        loop {
            let page = with_rate_limit_retry(
                self.config.fetcher.rate_limit,
                "messages.getConversations",
                || self.remote.list_conversations(offset, CONVERSATIONS_PAGE_SIZE),
            )
            .await
            .map_err(|source| ArchiveError::Remote { peer_id: 0, source })?;

            if page.items.is_empty() {
                break;
            }
            offset += page.items.len() as u64;
            peers.extend(page.items.iter().filter_map(|item| item.peer_id()));
            if offset >= page.count {
                break;
            }
        }
        info!("[Archiver] 远端共有 {} 个会话", peers.len());
        Ok(peers)
    }

    async fn list_stored_peers(&self) -> Result<BTreeSet<i64>, ArchiveError> {
        let dir = self.config.out_dir.join("dumps");
        let mut peers = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("[Archiver] 存储目录不存在: {}", dir.display());
                return Ok(peers);
            }
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("读取存储目录失败: {}", dir.display()))
                    .into())
            }
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("读取存储目录失败")?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i64>().ok())
            {
                peers.insert(id);
            }
        }
        Ok(peers)
    }

    /// 用 worker 池处理一个阶段
    async fn run(&self, phase: Phase, threads: usize) -> Result<RunReport, ArchiveError> {
        self.config.validate()?;
        let peers = self.resolve_peers(phase).await?;
        let total = peers.len();

        info!(
            "[Archiver] 🚀 阶段 {} 开始，会话 {} 个，并发 {}",
            phase.as_str(),
            total,
            threads
        );
        self.listener.on_phase_start(phase, total).await;

        let (tx, rx) = mpsc::channel::<i64>(threads.max(1) * 2);
        let rx = Arc::new(Mutex::new(rx));
        let done = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let archiver = self.clone();
            let rx = rx.clone();
            let done = done.clone();
            workers.push(tokio::spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    let peer_id = { rx.lock().await.recv().await };
                    let Some(peer_id) = peer_id else {
                        break;
                    };
                    let outcome = match archiver.process(phase, peer_id).await {
                        Ok(summary) => ConversationOutcome {
                            peer_id,
                            summary: Some(summary),
                            error: None,
                        },
                        Err(e) => {
                            error!("[Archiver] ❌ 会话 {} 在阶段 {} 失败: {}", peer_id, phase.as_str(), e);
                            archiver
                                .listener
                                .on_conversation_failed(phase, peer_id, e.to_string())
                                .await;
                            ConversationOutcome {
                                peer_id,
                                summary: None,
                                error: Some(e.to_string()),
                            }
                        }
                    };
                    outcomes.push(outcome);

                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let progress = (finished * 100 / total.max(1)) as i32;
                    archiver.listener.on_progress(phase, peer_id, progress).await;
                }
                outcomes
            }));
        }

        for peer_id in peers {
            if tx.send(peer_id).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        for handle in workers {
            match handle.await {
                Ok(mut o) => outcomes.append(&mut o),
                Err(e) => error!("[Archiver] worker 异常退出: {}", e),
            }
        }
        outcomes.sort_by_key(|o| o.peer_id);

        let report = RunReport { phase, outcomes };
        info!(
            "[Archiver] 阶段 {} 结束：成功 {}，失败 {}",
            phase.as_str(),
            report.succeeded(),
            report.failed()
        );
        self.listener.on_phase_finish(phase, report.failed()).await;
        Ok(report)
    }

    async fn process(&self, phase: Phase, peer_id: i64) -> Result<String, ArchiveError> {
        match phase {
            Phase::Dump => self.dump_one(peer_id).await,
            Phase::Parse => self.parse_one(peer_id).await,
            Phase::Attachments => self.attachments_one(peer_id).await,
            Phase::Export => self.export_one(peer_id).await,
        }
    }

    async fn dump_one(&self, peer_id: i64) -> Result<String, ArchiveError> {
        let syncer = ConversationSyncer::new(
            SyncerConfig {
                root: self.config.out_dir.clone(),
                max_messages: self.config.max_messages,
                fetcher: self.config.fetcher,
            },
            self.remote.clone(),
        );
        let stats = syncer.sync(peer_id, self.config.append).await?;
        Ok(format!(
            "拉取 {} 条，新增 {} 条，新增参与者 {} 个",
            stats.fetched, stats.inserted, stats.participants
        ))
    }

    async fn open_store(&self, peer_id: i64) -> Result<ConversationStore, ArchiveError> {
        let path = ConversationStore::db_path(&self.config.out_dir, peer_id);
        ConversationStore::open_existing(&path, peer_id).await
    }

    async fn parse_one(&self, peer_id: i64) -> Result<String, ArchiveError> {
        let store = self.open_store(peer_id).await?;
        let peer = store.load_peer().await?;
        let names = ParticipantDirectory::from_stored(&store.load_participants().await?);

        let title = conversation_title(&peer, &names);
        let renderer = TranscriptRenderer::new(peer.account_id(), self.config.tz);

        let dir = self.config.out_dir.join("dialogs").join("txt");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建目录失败: {}", dir.display()))?;
        let path = dir.join(format!("{}_{}.txt", sanitize_filename(&title), peer_id));
        let file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("创建文件失败: {}", path.display()))?;
        let mut out = tokio::io::BufWriter::new(file);

        out.write_all(renderer.title(&title, &account_name(&peer.account)).as_bytes())
            .await
            .context("写入聊天记录失败")?;

        let mut graph = MessageGraph::new(&names);
        let mut state = RenderState::default();
        let mut cursor = MessageCursor::start();
        let mut rendered = 0u64;
        loop {
            let page = store.load_messages_page(cursor, READ_PAGE_SIZE).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.cursor();

            let mut chunk = String::new();
            for msg in graph.build(page.into_iter().map(|m| m.json)) {
                chunk.push_str(&renderer.render(&msg, &mut state));
                rendered += 1;
            }
            out.write_all(chunk.as_bytes())
                .await
                .context("写入聊天记录失败")?;
        }
        out.flush().await.context("写入聊天记录失败")?;
        store.close().await;

        debug!("[Render] 会话 {} 构建节点 {} 个", peer_id, graph.built());
        info!(
            "[Render] 📝 会话 {} 已生成聊天记录: {} 条消息 -> {}",
            peer_id,
            rendered,
            path.display()
        );
        Ok(format!("{} 条消息 -> {}", rendered, path.display()))
    }

    async fn attachments_one(&self, peer_id: i64) -> Result<String, ArchiveError> {
        let store = self.open_store(peer_id).await?;
        let names = ParticipantDirectory::from_stored(&store.load_participants().await?);

        let mut graph = MessageGraph::new(&names);
        let mut cursor = MessageCursor::start();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut jobs: Vec<DownloadJob> = Vec::new();
        loop {
            let page = store.load_messages_page(cursor, READ_PAGE_SIZE).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.cursor();

            let roots: Vec<_> = graph.build(page.into_iter().map(|m| m.json)).collect();
            for job in collect_jobs(
                &roots,
                &self.config.out_dir,
                self.config.attachment_types.as_ref(),
            ) {
                if seen.insert(job.path.clone()) {
                    jobs.push(job);
                }
            }
        }
        store.close().await;

        let downloader = AttachmentDownloader::new(self.http.clone(), self.config.downloader_config());
        let report = downloader.download_all(jobs).await?;
        Ok(format!(
            "保存 {}，跳过 {}，失败 {}",
            report.saved, report.skipped, report.failed
        ))
    }

    async fn export_one(&self, peer_id: i64) -> Result<String, ArchiveError> {
        let store = self.open_store(peer_id).await?;
        let dir = self.config.out_dir.join("export");
        let summary = export_conversation(&store, &dir, self.config.gzip).await?;
        store.close().await;
        Ok(format!(
            "{} 条消息，{} 个参与者 -> {}",
            summary.messages,
            summary.participants,
            summary.path.display()
        ))
    }
}

/// 会话标题：群聊用群名，私聊用对方名称
fn conversation_title(peer: &StoredPeer, names: &ParticipantDirectory) -> String {
    match peer.chat_title() {
        Some(title) if peer.peer_type() == "chat" => title.to_string(),
        _ => names.name(peer.id),
    }
}

fn account_name(account: &Value) -> String {
    let field = |key: &str| account.get(key).and_then(Value::as_str).unwrap_or_default();
    format!("{} {}", field("first_name"), field("last_name"))
        .trim()
        .to_string()
}
