//! 附件并发下载
//!
//! 广度优先遍历消息森林收集下载任务（按目标路径去重），通过有界通道分发给固定数量的 worker。
//! 每个附件最多尝试 3 次：5xx 与连接失败重试，4xx 直接放弃。单个附件失败不影响其它附件。

use crate::archive::attachment::types::AttachmentKind;
use crate::archive::error::{ArchiveError, DownloadError};
use crate::archive::message::models::Message;
use futures_util::StreamExt;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// 下载配置
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// worker 数量
    pub concurrency: usize,
    /// 每个附件的最大尝试次数
    pub max_attempts: u32,
    /// 两次尝试之间的间隔
    pub retry_delay: Duration,
    /// 任务通道容量
    pub queue_capacity: usize,
}

impl DownloaderConfig {
    pub fn new() -> Self {
        Self {
            concurrency: 8,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            queue_capacity: 256,
        }
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.concurrency == 0 {
            return Err(ArchiveError::Validation("下载并发数不能为 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ArchiveError::Validation("下载尝试次数不能为 0".to_string()));
        }
        Ok(())
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 一个下载任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub kind: AttachmentKind,
    pub url: String,
    pub path: PathBuf,
}

/// 下载统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub saved: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl DownloadReport {
    pub fn merge(&mut self, other: DownloadReport) {
        self.saved += other.saved;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum Outcome {
    Saved,
    Skipped,
    Failed,
}

/// 收集下载任务：`<root>/attachments/<类型目录>/<文件名>`
///
/// `filter` 为 `None` 时下载全部可下载类型
pub fn collect_jobs(
    roots: &[Arc<Message>],
    out_root: &Path,
    filter: Option<&BTreeSet<AttachmentKind>>,
) -> Vec<DownloadJob> {
    let base = out_root.join("attachments");
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut jobs = Vec::new();

    let mut queue: VecDeque<&Message> = roots.iter().map(|m| m.as_ref()).collect();
    while let Some(msg) = queue.pop_front() {
        for atch in &msg.attachments {
            let Some(target) = atch.download_target() else {
                continue;
            };
            if filter.is_some_and(|f| !f.contains(&target.kind)) {
                continue;
            }
            let Some(dir) = target.kind.dir() else {
                continue;
            };
            let path = base.join(dir).join(&target.filename);
            if seen.insert(path.clone()) {
                jobs.push(DownloadJob {
                    kind: target.kind,
                    url: target.url,
                    path,
                });
            }
        }
        queue.extend(msg.forwards.iter().map(|m| m.as_ref()));
        if let Some(reply) = &msg.reply {
            queue.push_back(reply.as_ref());
        }
    }

    jobs
}

/// 附件下载器
#[derive(Clone)]
pub struct AttachmentDownloader {
    client: reqwest::Client,
    config: DownloaderConfig,
}

impl AttachmentDownloader {
    pub fn new(client: reqwest::Client, config: DownloaderConfig) -> Self {
        Self { client, config }
    }

    /// 并发下载全部任务，等待所有 worker 结束后返回统计
    pub async fn download_all(&self, jobs: Vec<DownloadJob>) -> Result<DownloadReport, ArchiveError> {
        self.config.validate()?;
        if jobs.is_empty() {
            return Ok(DownloadReport::default());
        }

        let total = jobs.len();
        info!(
            "[Download] 📥 开始下载附件 {} 个，并发 {}",
            total, self.config.concurrency
        );

        let (tx, rx) = mpsc::channel::<DownloadJob>(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.concurrency);
        for worker_id in 0..self.config.concurrency {
            let downloader = self.clone();
            let rx = rx.clone();
            workers.push(tokio::spawn(async move {
                let mut report = DownloadReport::default();
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    match downloader.download_one(&job).await {
                        Outcome::Saved => report.saved += 1,
                        Outcome::Skipped => report.skipped += 1,
                        Outcome::Failed => report.failed += 1,
                    }
                }
                debug!("[Download] worker {} 结束: {:?}", worker_id, report);
                report
            }));
        }

        for job in jobs {
            if tx.send(job).await.is_err() {
                warn!("[Download] 任务通道已关闭，停止分发");
                break;
            }
        }
        drop(tx);

        let mut report = DownloadReport::default();
        for handle in workers {
            match handle.await {
                Ok(r) => report.merge(r),
                Err(e) => error!("[Download] worker 异常退出: {}", e),
            }
        }

        info!(
            "[Download] ✅ 附件下载结束，共 {} 个：保存 {}，跳过 {}，失败 {}",
            total, report.saved, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn download_one(&self, job: &DownloadJob) -> Outcome {
        if tokio::fs::try_exists(&job.path).await.unwrap_or(false) {
            debug!("[Download] 已存在，跳过: {}", job.path.display());
            return Outcome::Skipped;
        }

        let mut attempt = 1;
        loop {
            match self.fetch(job).await {
                Ok(()) => {
                    debug!("[Download] 已保存: {}", job.path.display());
                    return Outcome::Saved;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(
                        "[Download] ⏳ {} 第 {} 次下载失败，稍后重试: {}",
                        job.url, attempt, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        "[Download] ❌ 附件下载失败（{}，已尝试 {} 次）: {} -> {}",
                        job.kind,
                        attempt,
                        job.url,
                        e
                    );
                    return Outcome::Failed;
                }
            }
        }
    }

    /// 单次下载：流式写入 `.part` 临时文件，完成后改名
    async fn fetch(&self, job: &DownloadJob) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(&job.url)
            .send()
            .await
            .map_err(|e| DownloadError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DownloadError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(DownloadError::Permanent {
                status: status.as_u16(),
                url: job.url.clone(),
            });
        }

        if let Some(parent) = job.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = part_path(&job.path);
        let result = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| DownloadError::Transient(e.to_string()))?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<(), DownloadError>(())
        }
        .await;

        match result {
            Ok(()) => {
                tokio::fs::rename(&part, &job.path).await?;
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::message::graph::MessageGraph;
    use crate::archive::participant::ParticipantDirectory;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> AttachmentDownloader {
        AttachmentDownloader::new(
            reqwest::Client::new(),
            DownloaderConfig {
                concurrency: 2,
                retry_delay: Duration::from_millis(1),
                ..DownloaderConfig::new()
            },
        )
    }

    fn job(dir: &Path, url: String) -> DownloadJob {
        DownloadJob {
            kind: AttachmentKind::Photo,
            url,
            path: dir.join("attachments/photos/1_2.jpg"),
        }
    }

    #[tokio::test]
    async fn retries_server_errors_then_saves() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p.jpg"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let j = job(dir.path(), format!("{}/p.jpg", server.uri()));
        let report = fast().download_all(vec![j.clone()]).await.unwrap();

        assert_eq!(report.saved, 1);
        assert_eq!(std::fs::read(&j.path).unwrap(), b"jpeg");
        assert!(!part_path(&j.path).exists());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let j = job(dir.path(), format!("{}/gone.jpg", server.uri()));
        let report = fast().download_all(vec![j.clone()]).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(!j.path.exists());
    }

    #[tokio::test]
    async fn gives_up_after_three_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let j = job(dir.path(), format!("{}/p.jpg", server.uri()));
        let report = fast().download_all(vec![j.clone()]).await.unwrap();

        assert_eq!(report, DownloadReport { saved: 0, skipped: 0, failed: 1 });
        assert!(!j.path.exists());
        assert!(!part_path(&j.path).exists());
    }

    #[tokio::test]
    async fn connection_failures_are_retried() {
        let delay = Duration::from_millis(50);
        let downloader = AttachmentDownloader::new(
            reqwest::Client::new(),
            DownloaderConfig {
                concurrency: 1,
                retry_delay: delay,
                ..DownloaderConfig::new()
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let j = job(dir.path(), "http://127.0.0.1:1/p.jpg".to_string());

        let started = std::time::Instant::now();
        let report = downloader.download_all(vec![j]).await.unwrap();

        assert_eq!(report.failed, 1);
        // 三次尝试之间各等待一次
        assert!(started.elapsed() >= delay * 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_other_jobs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad.jpg"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let at = |name: &str, url: String| DownloadJob {
            kind: AttachmentKind::Photo,
            url,
            path: dir.path().join("attachments/photos").join(name),
        };
        let jobs = vec![
            at("1_1.jpg", format!("{}/bad.jpg", server.uri())),
            at("1_2.jpg", format!("{}/ok.jpg", server.uri())),
            at("1_3.jpg", "http://127.0.0.1:1/down.jpg".to_string()),
        ];
        let report = fast().download_all(jobs).await.unwrap();

        assert_eq!(report, DownloadReport { saved: 1, skipped: 0, failed: 2 });
        assert_eq!(
            std::fs::read(dir.path().join("attachments/photos/1_2.jpg")).unwrap(),
            b"ok"
        );
    }

    #[tokio::test]
    async fn second_run_skips_existing_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let j = job(dir.path(), format!("{}/p.jpg", server.uri()));
        let d = fast();
        assert_eq!(d.download_all(vec![j.clone()]).await.unwrap().saved, 1);
        assert_eq!(d.download_all(vec![j]).await.unwrap().skipped, 1);
    }

    #[test]
    fn jobs_are_collected_breadth_first_and_deduplicated() {
        let photo = |id: i64| {
            json!({"type": "photo", "photo": {"owner_id": 1, "id": id,
                "sizes": [{"width": 10, "height": 10, "url": format!("https://cdn/{}.jpg", id)}]}})
        };
        let records = vec![
            json!({"id": 1, "from_id": 1, "date": 1, "attachments": [photo(5)],
                   "fwd_messages": [{"from_id": 2, "date": 0, "attachments": [photo(6), photo(5)],
                                     "fwd_messages": [{"from_id": 3, "date": 0, "attachments": [photo(7)]}]}]}),
            json!({"id": 2, "from_id": 1, "date": 2, "attachments": [
                {"type": "video", "video": {"owner_id": 1, "id": 1}},
                {"type": "doc", "doc": {"owner_id": 1, "id": 8, "ext": "pdf", "url": "https://cdn/d"}}]}),
        ];
        let names = ParticipantDirectory::default();
        let roots: Vec<_> = MessageGraph::new(&names).build(records).collect();
        let root = Path::new("/out");

        let all = collect_jobs(&roots, root, None);
        let names: Vec<String> = all
            .iter()
            .map(|j| j.path.strip_prefix("/out/attachments").unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["photos/1_5.jpg", "docs/1_8.pdf", "photos/1_6.jpg", "photos/1_7.jpg"]);

        let only_docs: BTreeSet<_> = [AttachmentKind::Document].into_iter().collect();
        assert_eq!(collect_jobs(&roots, root, Some(&only_docs)).len(), 1);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let d = AttachmentDownloader::new(
            reqwest::Client::new(),
            DownloaderConfig {
                concurrency: 0,
                ..DownloaderConfig::new()
            },
        );
        assert!(matches!(
            d.download_all(Vec::new()).await,
            Err(ArchiveError::Validation(_))
        ));
    }
}
