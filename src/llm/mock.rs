//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 回显最后一条 User 消息；可配置为固定失败，并统计调用次数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{GenerationOptions, LlmClient, LlmError, Message, Role};

/// Mock 客户端：回显用户最后一条消息，记录最近一次请求
#[derive(Debug, Default)]
pub struct MockLlmClient {
    calls: AtomicUsize,
    fail_with: Option<String>,
    last_request: Mutex<Option<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用都返回 ProviderError
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 最近一次请求的消息列表
    pub fn last_request(&self) -> Option<Vec<Message>> {
        self.last_request.lock().ok().and_then(|g| g.clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(messages.to_vec());
        }
        if let Some(reason) = &self.fail_with {
            return Err(LlmError::ProviderError(reason.clone()));
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
