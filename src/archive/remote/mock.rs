//! 测试用的内存远端实现

use crate::archive::error::RemoteError;
use crate::archive::remote::types::{ConversationItem, ConversationsPage, HistoryPage, HistoryRequest};
use crate::archive::remote::RemoteClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// 内存中的会话，消息按时间正序存放
#[derive(Default)]
pub struct FakeRemote {
    pub messages: Mutex<HashMap<i64, Vec<Value>>>,
    pub users: HashMap<i64, Value>,
    pub groups: HashMap<i64, Value>,
    /// 接下来若干次 getHistory 返回限流错误
    pub rate_limited_calls: Mutex<u32>,
    /// 第 N 次 getHistory（从 0 计）返回致命错误
    pub fail_history_at: Option<usize>,
    /// getHistory 报告的 count 比实际多出的条数
    pub overstated_count: u64,
    pub history_requests: Mutex<Vec<HistoryRequest>>,
    pub user_requests: Mutex<Vec<Vec<i64>>>,
    pub group_requests: Mutex<Vec<Vec<i64>>>,
}

/// 构造一条简单消息
pub fn message(id: i64, from_id: i64, date: i64, text: &str) -> Value {
    json!({
        "id": id,
        "from_id": from_id,
        "date": date,
        "text": text,
        "attachments": [],
        "fwd_messages": [],
        "conversation_message_id": id,
    })
}

impl FakeRemote {
    /// ID 为 1..=n 的会话，发送者交替为 1 和 2
    pub fn with_sequential(peer_id: i64, n: i64) -> Self {
        let remote = Self::default();
        let items = (1..=n)
            .map(|id| message(id, 1 + id % 2, 1_600_000_000 + id * 60, &format!("msg {}", id)))
            .collect();
        remote.messages.lock().unwrap().insert(peer_id, items);
        remote
    }

    pub fn push_messages(&self, peer_id: i64, items: Vec<Value>) {
        self.messages
            .lock()
            .unwrap()
            .entry(peer_id)
            .or_default()
            .extend(items);
    }

    pub fn with_user(mut self, id: i64, first: &str, last: &str) -> Self {
        self.users.insert(
            id,
            json!({"id": id, "first_name": first, "last_name": last}),
        );
        self
    }

    pub fn with_group(mut self, id: i64, name: &str) -> Self {
        self.groups.insert(id, json!({"id": id, "name": name}));
        self
    }

    fn window(items: &[Value], req: &HistoryRequest) -> Vec<Value> {
        let len = items.len() as i64;
        let count = req.count as i64;
        match req.start_message_id {
            None => {
                // rev=1 从最旧开始计偏移；rev=0 从最新开始计偏移并倒序返回
                let start = req.offset.clamp(0, len);
                let end = (start + count).min(len);
                if req.rev {
                    items[start as usize..end as usize].to_vec()
                } else {
                    let mut desc: Vec<Value> = items.iter().rev().cloned().collect();
                    desc.drain(start as usize..end as usize).collect()
                }
            }
            Some(start_id) => {
                let pos = items
                    .iter()
                    .position(|m| m["id"].as_i64() == Some(start_id))
                    .map(|p| p as i64)
                    .unwrap_or(len - 1);
                // 负偏移：窗口为 start 之后的 [pos-offset-count+1, pos-offset]，新到旧返回
                let last = pos - req.offset;
                let first = last - count + 1;
                let lo = first.max(0).min(len);
                let hi = (last + 1).max(0).min(len);
                if lo >= hi {
                    return Vec::new();
                }
                items[lo as usize..hi as usize].iter().rev().cloned().collect()
            }
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn fetch_history(&self, req: &HistoryRequest) -> Result<HistoryPage, RemoteError> {
        let call_index = {
            let mut reqs = self.history_requests.lock().unwrap();
            reqs.push(req.clone());
            reqs.len() - 1
        };
        {
            let mut limited = self.rate_limited_calls.lock().unwrap();
            if *limited > 0 {
                *limited -= 1;
                return Err(RemoteError::from_api(6, "Too many requests per second"));
            }
        }
        if self.fail_history_at == Some(call_index) {
            return Err(RemoteError::from_api(10, "Internal server error"));
        }
        let messages = self.messages.lock().unwrap();
        let items = messages.get(&req.peer_id).cloned().unwrap_or_default();
        Ok(HistoryPage {
            count: items.len() as u64 + self.overstated_count,
            items: Self::window(&items, req),
        })
    }

    async fn fetch_conversation(&self, peer_id: i64) -> Result<Value, RemoteError> {
        let kind = if peer_id > 2_000_000_000 { "chat" } else { "user" };
        Ok(json!({
            "peer": {"id": peer_id, "type": kind},
            "chat_settings": {"title": format!("Chat {}", peer_id)},
        }))
    }

    async fn list_conversations(
        &self,
        offset: u64,
        count: u32,
    ) -> Result<ConversationsPage, RemoteError> {
        let mut ids: Vec<i64> = self.messages.lock().unwrap().keys().copied().collect();
        ids.sort();
        let items = ids
            .iter()
            .skip(offset as usize)
            .take(count as usize)
            .map(|id| ConversationItem {
                conversation: json!({"peer": {"id": id}}),
            })
            .collect();
        Ok(ConversationsPage {
            count: ids.len() as u64,
            items,
        })
    }

    async fn fetch_users(&self, ids: &[i64]) -> Result<Vec<Value>, RemoteError> {
        if ids.is_empty() {
            return Ok(vec![json!({"id": 1, "first_name": "Owner", "last_name": "Account"})]);
        }
        self.user_requests.lock().unwrap().push(ids.to_vec());
        Ok(ids.iter().filter_map(|id| self.users.get(id).cloned()).collect())
    }

    async fn fetch_groups(&self, ids: &[i64]) -> Result<Vec<Value>, RemoteError> {
        self.group_requests.lock().unwrap().push(ids.to_vec());
        Ok(ids.iter().filter_map(|id| self.groups.get(id).cloned()).collect())
    }
}
