//! 分页拉取会话历史
//!
//! 全量模式从最旧的目标消息开始按正序拉取；增量模式以已存储的最大消息 ID 为起点，
//! 用负偏移向更新的方向翻页，每页在本地反转为正序。两种模式的输出都按时间正序排列。

use crate::archive::error::{ArchiveError, RemoteError};
use crate::archive::remote::{with_rate_limit_retry, HistoryRequest, RateLimitPolicy, RemoteClient};
use serde_json::Value;
use tracing::{debug, info};

/// 单次 getHistory 的上限
pub const MAX_PAGE_SIZE: u32 = 200;

/// 单批最多交给调用方的消息数
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// 拉取配置
#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
    pub page_size: u32,
    pub batch_size: usize,
    pub rate_limit: RateLimitPolicy,
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit: RateLimitPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ArchiveError::Validation(format!(
                "分页大小必须在 1..={} 之间，当前为 {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.batch_size == 0 {
            return Err(ArchiveError::Validation("批大小不能为 0".to_string()));
        }
        Ok(())
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话历史拉取器
///
/// 通过 [`HistoryFetcher::next_batch`] 逐批拉取，返回 `None` 表示结束
pub struct HistoryFetcher<'a> {
    remote: &'a dyn RemoteClient,
    peer_id: i64,
    config: FetcherConfig,
    /// 会话消息总数（探测结果）
    total: u64,
    /// 本次最多拉取的条数
    target: u64,
    processed: u64,
    resume_after: Option<i64>,
    finished: bool,
}

impl<'a> HistoryFetcher<'a> {
    /// 探测消息总数并创建拉取器
    ///
    /// `max_messages` 为 `None` 表示不限；`resume_after` 为 `Some` 时进入增量模式
    pub async fn start(
        remote: &'a dyn RemoteClient,
        peer_id: i64,
        max_messages: Option<u64>,
        resume_after: Option<i64>,
        config: FetcherConfig,
    ) -> Result<HistoryFetcher<'a>, RemoteError> {
        let probe = HistoryRequest::probe(peer_id);
        let page = with_rate_limit_retry(config.rate_limit, "messages.getHistory", || {
            remote.fetch_history(&probe)
        })
        .await?;

        let total = page.count;
        let target = max_messages.map_or(total, |max| max.min(total));

        info!(
            "[Fetcher] 📊 会话 {} 共有 {} 条消息，本次目标 {} 条，模式: {}",
            peer_id,
            total,
            target,
            match resume_after {
                Some(id) => format!("增量（起点 {}）", id),
                None => "全量".to_string(),
            }
        );

        Ok(Self {
            remote,
            peer_id,
            config,
            total,
            target,
            processed: 0,
            resume_after,
            finished: target == 0,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// 拉取下一批（按时间正序），没有更多消息时返回 `None`
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, RemoteError> {
        let mut batch: Vec<Value> = Vec::new();

        while !self.finished && batch.len() < self.config.batch_size {
            let remaining = self.target - self.processed;
            let space = (self.config.batch_size - batch.len()) as u64;
            let count = (self.config.page_size as u64).min(remaining).min(space) as u32;

            let req = self.page_request(count);
            let page = with_rate_limit_retry(self.config.rate_limit, "messages.getHistory", || {
                self.remote.fetch_history(&req)
            })
            .await?;

            if page.items.is_empty() {
                debug!("[Fetcher] 会话 {} 返回空页，结束", self.peer_id);
                self.finished = true;
                break;
            }

            let items = match self.resume_after {
                None => page.items,
                Some(resume) => {
                    // 增量模式每页新到旧，反转并丢弃不比起点新的消息
                    let mut items: Vec<Value> = page
                        .items
                        .into_iter()
                        .filter(|m| m.get("id").and_then(Value::as_i64).is_some_and(|id| id > resume))
                        .collect();
                    items.reverse();
                    items
                }
            };

            if items.is_empty() {
                self.finished = true;
                break;
            }

            // 服务端在拉取过程中可能收到新消息，不超过目标条数
            let take = (items.len() as u64).min(remaining) as usize;
            self.processed += take as u64;
            batch.extend(items.into_iter().take(take));

            if self.processed >= self.target {
                self.finished = true;
            }
        }

        if batch.is_empty() {
            return Ok(None);
        }

        debug!(
            "[Fetcher] 会话 {} 交付一批 {} 条，累计 {}/{}",
            self.peer_id,
            batch.len(),
            self.processed,
            self.target
        );
        Ok(Some(batch))
    }

    fn page_request(&self, count: u32) -> HistoryRequest {
        match self.resume_after {
            None => HistoryRequest {
                peer_id: self.peer_id,
                offset: (self.total - self.target + self.processed) as i64,
                count,
                rev: true,
                start_message_id: None,
            },
            Some(resume) => HistoryRequest {
                peer_id: self.peer_id,
                offset: -((self.processed + count as u64) as i64),
                count,
                rev: false,
                start_message_id: Some(resume),
            },
        }
    }
}
