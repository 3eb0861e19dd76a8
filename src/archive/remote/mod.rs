//! 远端客户端模块
//!
//! 抽象出同步所需的 VK 接口，便于在测试中替换为内存实现

pub mod api;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use api::VkApi;
pub use types::{ConversationItem, ConversationsPage, HistoryPage, HistoryRequest};

use crate::archive::error::RemoteError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 远端客户端接口
///
/// 每个方法返回原始 JSON，失败时返回 [`RemoteError`]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// messages.getHistory
    async fn fetch_history(&self, req: &HistoryRequest) -> Result<HistoryPage, RemoteError>;

    /// messages.getConversationsById，返回单个会话的信息
    async fn fetch_conversation(&self, peer_id: i64) -> Result<Value, RemoteError>;

    /// messages.getConversations 分页
    async fn list_conversations(
        &self,
        offset: u64,
        count: u32,
    ) -> Result<ConversationsPage, RemoteError>;

    /// users.get（不带 ID 时返回当前账号）
    async fn fetch_users(&self, ids: &[i64]) -> Result<Vec<Value>, RemoteError>;

    /// groups.getById，ids 为正数
    async fn fetch_groups(&self, ids: &[i64]) -> Result<Vec<Value>, RemoteError>;
}

/// 限流重试策略
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub backoff: Duration,
    pub max_retries: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            max_retries: 10,
        }
    }
}

/// 执行远端调用，仅对限流错误做固定间隔重试
pub async fn with_rate_limit_retry<T, F, Fut>(
    policy: RateLimitPolicy,
    operation_name: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Err(e) if e.retryable && retries < policy.max_retries => {
                retries += 1;
                warn!(
                    "[Remote] ⏳ {}被限流，{:?} 后重试（第 {} 次）",
                    operation_name, policy.backoff, retries
                );
                tokio::time::sleep(policy.backoff).await;
            }
            other => return other,
        }
    }
}
