//! 消息森林构建
//!
//! 把存储中的扁平消息记录转换为带回复/转发边的节点树。
//! 内嵌快照先于所在消息构建（深度优先），没有原生 ID 的快照按构建顺序分配合成 ID。
//! 已构建的节点放在有界缓存里，重复出现的快照直接复用。

use crate::archive::attachment::types::Attachment;
use crate::archive::message::actions::ServiceAction;
use crate::archive::message::cache::{BoundedCache, DEFAULT_CAPACITY, DEFAULT_EVICT_COUNT};
use crate::archive::message::models::{GeoPoint, Message};
use crate::archive::participant::ParticipantDirectory;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    /// 原生消息 ID
    Native(i64),
    /// 没有原生 ID 的快照：(date, from_id, conversation_message_id)
    Structural(i64, i64, i64),
}

impl CacheKey {
    fn of(raw: &Value) -> Option<Self> {
        if let Some(id) = native_id(raw) {
            return Some(CacheKey::Native(id));
        }
        let cmid = raw.get("conversation_message_id").and_then(Value::as_i64)?;
        Some(CacheKey::Structural(
            raw.get("date").and_then(Value::as_i64).unwrap_or_default(),
            raw.get("from_id").and_then(Value::as_i64).unwrap_or_default(),
            cmid,
        ))
    }
}

fn native_id(raw: &Value) -> Option<i64> {
    raw.get("id").and_then(Value::as_i64).filter(|id| *id > 0)
}

/// 一次构建的状态：合成 ID 计数器与节点缓存
///
/// 状态只属于这一个实例；重新构建需要新建实例，合成 ID 会从 -1 重新开始
pub struct MessageGraph<'a> {
    names: &'a ParticipantDirectory,
    cache: BoundedCache<CacheKey, Arc<Message>>,
    next_synthetic: i64,
    built: u64,
}

impl<'a> MessageGraph<'a> {
    pub fn new(names: &'a ParticipantDirectory) -> Self {
        Self::with_cache(names, DEFAULT_CAPACITY, DEFAULT_EVICT_COUNT)
    }

    pub fn with_cache(names: &'a ParticipantDirectory, capacity: usize, evict_count: usize) -> Self {
        Self {
            names,
            cache: BoundedCache::new(capacity, evict_count),
            next_synthetic: -1,
            built: 0,
        }
    }

    /// 按存储顺序惰性地构建顶层消息
    ///
    /// 可以对同一个实例多次调用（例如逐页读取存储），合成 ID 与缓存在调用之间延续
    pub fn build<'g, I>(&'g mut self, records: I) -> Roots<'g, 'a, I::IntoIter>
    where
        I: IntoIterator<Item = Value>,
    {
        Roots {
            graph: self,
            records: records.into_iter(),
        }
    }

    /// 实际构建过的节点数（不含缓存命中）
    pub fn built(&self) -> u64 {
        self.built
    }

    /// 构建或复用一个节点
    pub fn node(&mut self, raw: &Value) -> Arc<Message> {
        let key = CacheKey::of(raw);
        if let Some(hit) = key.as_ref().and_then(|k| self.cache.get(k)) {
            return hit.clone();
        }

        // 先构建内嵌快照
        let reply = raw
            .get("reply_message")
            .filter(|r| r.is_object())
            .map(|r| self.node(r));
        let forwards: Vec<Arc<Message>> = raw
            .get("fwd_messages")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(|f| self.node(f)).collect())
            .unwrap_or_default();

        let id = match native_id(raw) {
            Some(id) => id,
            None => {
                let id = self.next_synthetic;
                self.next_synthetic -= 1;
                id
            }
        };

        let sender_id = raw
            .get("from_id")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let action = raw
            .get("action")
            .filter(|a| a.is_object())
            .map(|a| ServiceAction::decode(a, sender_id, self.names));
        let attachments = raw
            .get("attachments")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Attachment::decode).collect())
            .unwrap_or_default();

        let node = Arc::new(Message {
            id,
            sender_id,
            sender_name: self.names.name(sender_id),
            date: raw.get("date").and_then(Value::as_i64).unwrap_or_default(),
            text: raw
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            action,
            reply,
            forwards,
            attachments,
            edited: raw.get("update_time").is_some_and(|v| !v.is_null()),
            expired: raw
                .get("is_expired")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            geo: geo(raw),
        });
        self.built += 1;

        if let Some(key) = key {
            self.cache.insert(key, node.clone());
        }
        if self.built % 10_000 == 0 {
            debug!("[Graph] 已构建 {} 个节点，缓存 {} 个", self.built, self.cache.len());
        }
        node
    }
}

/// [`MessageGraph::build`] 返回的惰性迭代器
pub struct Roots<'g, 'a, I> {
    graph: &'g mut MessageGraph<'a>,
    records: I,
}

impl<I: Iterator<Item = Value>> Iterator for Roots<'_, '_, I> {
    type Item = Arc<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.records.next()?;
        Some(self.graph.node(&raw))
    }
}

fn geo(raw: &Value) -> Option<GeoPoint> {
    let coords = raw.get("geo")?.get("coordinates")?;
    Some(GeoPoint {
        latitude: coords.get("latitude")?.as_f64()?,
        longitude: coords.get("longitude")?.as_f64()?,
    })
}
