//! 归档进度监听器回调接口

use async_trait::async_trait;

/// 归档阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dump,
    Parse,
    Attachments,
    Export,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Dump => "dump",
            Phase::Parse => "parse",
            Phase::Attachments => "atch",
            Phase::Export => "export",
        }
    }
}

/// 归档监听器回调接口
#[async_trait]
pub trait ArchiveListener: Send + Sync {
    /// 阶段开始，`total` 为待处理会话数
    async fn on_phase_start(&self, phase: Phase, total: usize);

    /// 一个会话处理完成（成功或失败），`progress` 为百分比
    async fn on_progress(&self, phase: Phase, peer_id: i64, progress: i32);

    /// 会话处理失败
    async fn on_conversation_failed(&self, phase: Phase, peer_id: i64, error: String);

    /// 阶段结束
    async fn on_phase_finish(&self, phase: Phase, failed: usize);
}

/// 空实现（默认监听器）
pub struct EmptyArchiveListener;

#[async_trait]
impl ArchiveListener for EmptyArchiveListener {
    async fn on_phase_start(&self, _phase: Phase, _total: usize) {}
    async fn on_progress(&self, _phase: Phase, _peer_id: i64, _progress: i32) {}
    async fn on_conversation_failed(&self, _phase: Phase, _peer_id: i64, _error: String) {}
    async fn on_phase_finish(&self, _phase: Phase, _failed: usize) {}
}
