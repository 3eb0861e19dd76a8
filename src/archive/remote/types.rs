//! 远端接口 DTO（请求和响应结构体）

use serde::Deserialize;
use serde_json::Value;

/// messages.getHistory 请求参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub peer_id: i64,
    /// 偏移量；指定 start_message_id 时可以为负数（向更新的消息方向偏移）
    pub offset: i64,
    pub count: u32,
    /// true 表示按时间正序返回
    pub rev: bool,
    pub start_message_id: Option<i64>,
}

impl HistoryRequest {
    /// 探测请求：只取 1 条消息，用于获取总数
    pub fn probe(peer_id: i64) -> Self {
        Self {
            peer_id,
            offset: 0,
            count: 1,
            rev: false,
            start_message_id: None,
        }
    }
}

/// messages.getHistory 响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryPage {
    /// 会话中的消息总数
    pub count: u64,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// messages.getConversations 响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationsPage {
    pub count: u64,
    #[serde(default)]
    pub items: Vec<ConversationItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationItem {
    pub conversation: Value,
}

impl ConversationItem {
    /// 会话 peer_id（conversation.peer.id）
    pub fn peer_id(&self) -> Option<i64> {
        self.conversation
            .get("peer")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_i64)
    }
}

/// 带 items 的通用列表响应（getConversationsById 等）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemsResp {
    #[serde(default)]
    pub items: Vec<Value>,
}
