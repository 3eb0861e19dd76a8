//! 消息模块：节点模型、服务消息与森林构建

pub mod actions;
pub mod cache;
pub mod graph;
pub mod models;

pub use actions::{ActionKind, ServiceAction};
pub use graph::MessageGraph;
pub use models::{GeoPoint, Message};
