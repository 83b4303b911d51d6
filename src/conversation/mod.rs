//! 对话记录
//!
//! - **store**: `ConversationStore` trait 及 SQLite / 内存实现（只追加，按时间戳读取）
//! - **service**: `ConversationService`，读写失败只记日志不中断对话，并提供历史格式化与汇总查询

pub mod service;
pub mod store;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use service::{format_history, ConversationService, ConversationSummary};
pub use store::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};

/// 用户消息的 sender
pub const USER_SENDER: &str = "user";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// 一条对话消息；sender 为 `user` 或智能体名
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
