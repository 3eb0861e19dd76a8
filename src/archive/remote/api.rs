//! VK HTTP API 客户端
//!
//! 负责所有 VK 方法的 HTTP 请求，实现 [`RemoteClient`]

use crate::archive::error::RemoteError;
use crate::archive::remote::types::{ConversationsPage, HistoryPage, HistoryRequest, ItemsResp};
use crate::archive::remote::RemoteClient;
use crate::archive::types::handle_http_response;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

/// 默认 API 地址
pub const DEFAULT_API_BASE_URL: &str = "https://api.vk.com";

/// 默认 API 版本
pub const DEFAULT_API_VERSION: &str = "5.131";

/// VK 相关的 HTTP API 客户端
pub struct VkApi {
    client: reqwest::Client,
    api_base_url: String,
    token: String,
    version: String,
}

impl VkApi {
    /// 创建新的 API 客户端
    pub fn new(client: reqwest::Client, api_base_url: String, token: String, version: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            token,
            version,
        }
    }

    /// 调用 VK 方法，参数以表单形式提交
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/method/{}", self.api_base_url, method);

        debug!(
            "[VkAPI] 📡 请求 {}，操作ID: {}, 参数: {:?}",
            method, operation_id, params
        );

        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("access_token", self.token.clone()));
        form.push(("v", self.version.clone()));

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RemoteError::transport(format!("请求失败: {}", e)))?;

        handle_http_response::<T>(response, method).await
    }

    fn join_ids(ids: &[i64]) -> String {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[async_trait]
impl RemoteClient for VkApi {
    async fn fetch_history(&self, req: &HistoryRequest) -> Result<HistoryPage, RemoteError> {
        let mut params = vec![
            ("peer_id", req.peer_id.to_string()),
            ("offset", req.offset.to_string()),
            ("count", req.count.to_string()),
            ("rev", if req.rev { "1" } else { "0" }.to_string()),
        ];
        if let Some(start) = req.start_message_id {
            params.push(("start_message_id", start.to_string()));
        }
        self.call("messages.getHistory", &params).await
    }

    async fn fetch_conversation(&self, peer_id: i64) -> Result<Value, RemoteError> {
        let resp: ItemsResp = self
            .call(
                "messages.getConversationsById",
                &[("peer_ids", peer_id.to_string())],
            )
            .await?;
        resp.items
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::from_api(0, format!("会话 {} 不存在或无权访问", peer_id)))
    }

    async fn list_conversations(
        &self,
        offset: u64,
        count: u32,
    ) -> Result<ConversationsPage, RemoteError> {
        let page: ConversationsPage = self
            .call(
                "messages.getConversations",
                &[("offset", offset.to_string()), ("count", count.to_string())],
            )
            .await?;
        info!(
            "[VkAPI] ✅ 会话列表响应，offset={}, 本页 {} 个，共 {} 个",
            offset,
            page.items.len(),
            page.count
        );
        Ok(page)
    }

    async fn fetch_users(&self, ids: &[i64]) -> Result<Vec<Value>, RemoteError> {
        let mut params = Vec::new();
        if !ids.is_empty() {
            params.push(("user_ids", Self::join_ids(ids)));
        }
        self.call("users.get", &params).await
    }

    async fn fetch_groups(&self, ids: &[i64]) -> Result<Vec<Value>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.call("groups.getById", &[("group_ids", Self::join_ids(ids))])
            .await
    }
}
