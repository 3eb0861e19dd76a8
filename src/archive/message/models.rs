//! 消息节点

use crate::archive::attachment::types::Attachment;
use crate::archive::message::actions::ServiceAction;
use std::sync::Arc;

/// 地理位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// 消息森林中的一个节点
///
/// 回复和转发是内嵌快照，与顶层消息分别构建；同一快照出现在多处时共享同一个节点
#[derive(Debug, Clone)]
pub struct Message {
    /// 原生 ID；没有原生 ID 的内嵌快照为负数的合成 ID
    pub id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    /// Unix 时间戳（秒）
    pub date: i64,
    pub text: String,
    pub action: Option<ServiceAction>,
    pub reply: Option<Arc<Message>>,
    pub forwards: Vec<Arc<Message>>,
    pub attachments: Vec<Attachment>,
    pub edited: bool,
    pub expired: bool,
    pub geo: Option<GeoPoint>,
}
