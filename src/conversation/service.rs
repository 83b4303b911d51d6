//! 对话服务：对 `ConversationStore` 的宽容封装
//!
//! 写失败记录日志后丢弃该消息，读失败返回空列表；对话本身不因持久化问题中断。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ConversationStore, StoreError, StoredMessage};

/// 无历史时的占位文本
pub const NO_PREVIOUS_MESSAGES: &str = "No previous messages.";

/// 会话汇总：id、最新时间戳、全部消息（正序）
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub latest_timestamp: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
}

/// 每行 `sender: content`；空列表返回占位文本
pub fn format_history(messages: &[StoredMessage]) -> String {
    if messages.is_empty() {
        return NO_PREVIOUS_MESSAGES.to_string();
    }
    messages
        .iter()
        .map(|m| format!("{}: {}", m.sender, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// 底层存储（需要观察 StoreError 的调用方使用）
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn add_message(&self, conversation_id: &str, sender: &str, content: &str) -> Option<StoredMessage> {
        match self.store.append(conversation_id, sender, content) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::error!(conversation_id, sender, "failed to store message: {}", e);
                None
            }
        }
    }

    pub fn last_n(&self, conversation_id: &str, n: usize) -> Vec<StoredMessage> {
        self.read_or_empty("last_n", self.store.last_n(conversation_id, n))
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.read_or_empty("messages", self.store.messages(conversation_id))
    }

    /// 最近活跃的 limit 个会话，按最新时间倒序
    pub fn recent_conversations(&self, limit: usize) -> Vec<ConversationSummary> {
        self.read_or_empty("recent_conversations", self.store.recent_conversation_ids(limit))
            .into_iter()
            .map(|(conversation_id, latest_timestamp)| ConversationSummary {
                messages: self.messages(&conversation_id),
                conversation_id,
                latest_timestamp,
            })
            .collect()
    }

    /// 最近一次活跃的完整会话
    pub fn latest_conversation(&self) -> Option<ConversationSummary> {
        self.recent_conversations(1).into_iter().next()
    }

    pub fn filter_by_sender(&self, sender: Option<&str>, limit: usize) -> Vec<StoredMessage> {
        self.read_or_empty("filter_by_sender", self.store.filter_by_sender(sender, limit))
    }

    /// 删除失败向上返回，由调用方区分“未找到”与存储错误
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let deleted = self.store.delete_conversation(conversation_id)?;
        tracing::info!(conversation_id, deleted, "conversation deleted");
        Ok(deleted)
    }

    fn read_or_empty<T>(&self, op: &str, result: Result<Vec<T>, StoreError>) -> Vec<T> {
        result.unwrap_or_else(|e| {
            tracing::error!(op, "conversation read failed: {}", e);
            Vec::new()
        })
    }
}
