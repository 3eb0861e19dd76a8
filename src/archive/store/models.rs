//! 本地存储模型定义

use serde_json::Value;
use std::collections::BTreeSet;

/// 会话元信息（peer 表，一行）
#[derive(Debug, Clone)]
pub struct StoredPeer {
    pub id: i64,
    /// 同步时账号信息快照（users.get 的结果）
    pub account: Value,
    /// messages.getConversationsById 返回的会话信息
    pub info: Value,
}

impl StoredPeer {
    /// 账号 ID
    pub fn account_id(&self) -> i64 {
        self.account.get("id").and_then(Value::as_i64).unwrap_or(0)
    }

    /// 会话类型（user / chat / group / email）
    pub fn peer_type(&self) -> &str {
        self.info
            .get("peer")
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("user")
    }

    /// 群聊标题，只有 chat 类型才有
    pub fn chat_title(&self) -> Option<&str> {
        self.info
            .get("chat_settings")
            .and_then(|s| s.get("title"))
            .and_then(Value::as_str)
    }
}

/// 消息记录（messages 表）
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub json: Value,
    pub date: i64,
}

impl StoredMessage {
    /// 从接口返回的消息 JSON 构造，缺少 id 或 date 时返回 None
    pub fn from_json(json: Value) -> Option<Self> {
        let id = json.get("id").and_then(Value::as_i64)?;
        let date = json.get("date").and_then(Value::as_i64)?;
        Some(Self { id, json, date })
    }

    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            date: self.date,
            id: self.id,
        }
    }
}

/// 参与者记录（participants 表）
///
/// 用户以原生正数 ID 存储，社区以取反后的 ID 存储，两者共用一个键空间
#[derive(Debug, Clone)]
pub struct StoredParticipant {
    pub id: i64,
    pub json: Value,
}

impl StoredParticipant {
    /// users.get / groups.getById 的结果都可以直接传入：带 `name` 字段的视为社区
    pub fn from_json(json: Value) -> Option<Self> {
        let native = json.get("id").and_then(Value::as_i64)?;
        let id = if json.get("name").is_some() {
            -native.abs()
        } else {
            native
        };
        Some(Self { id, json })
    }

    pub fn is_group(&self) -> bool {
        self.id < 0
    }
}

/// 已存储的参与者 ID，按符号拆分为用户和社区（社区为正数原生 ID）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantIds {
    pub users: BTreeSet<i64>,
    pub groups: BTreeSet<i64>,
}

impl ParticipantIds {
    /// 按带符号 ID 归类
    pub fn insert_signed(&mut self, id: i64) {
        if id < 0 {
            self.groups.insert(-id);
        } else if id > 0 {
            self.users.insert(id);
        }
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }

    /// 去掉 `known` 中已经存在的 ID
    pub fn without(&self, known: &ParticipantIds) -> ParticipantIds {
        ParticipantIds {
            users: self.users.difference(&known.users).copied().collect(),
            groups: self.groups.difference(&known.groups).copied().collect(),
        }
    }
}

/// 消息分页游标，按 (date, id) 排序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageCursor {
    pub date: i64,
    pub id: i64,
}

impl MessageCursor {
    /// 比任何消息都小的起始游标
    pub fn start() -> Self {
        Self {
            date: i64::MIN,
            id: i64::MIN,
        }
    }
}
