//! 对话编排：一轮对话 = 历史 -> 策略检索 -> 智能体分派 -> 落库
//!
//! `SupportService` 不持有全局单例，所有依赖以 `Arc` 注入；`build_service` 按配置装配 SQLite 与 LLM 后端。

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::agents::{AgentKind, AgentReply, AgentRequest, DispatchError, Dispatcher};
use crate::config::AppConfig;
use crate::conversation::{
    format_history, ConversationService, SqliteConversationStore, StoredMessage, USER_SENDER,
};
use crate::llm::{create_embedder_from_config, create_llm_from_config, CompletionProvider, GenerationOptions, PromptTemplates};
use crate::retrieval::{PolicyLookup, PolicyRetriever, SqliteVectorIndex};

/// 向量索引数据库文件名（位于 data_dir 下）
pub const POLICY_DB_FILE: &str = "policies.db";
/// 对话记录数据库文件名（位于 data_dir 下）
pub const CONVERSATION_DB_FILE: &str = "conversations.db";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("User input cannot be empty.")]
    EmptyInput,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// 每轮编排参数
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub history_turns: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_threshold: 0.8,
            history_turns: 5,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            top_k: cfg.retrieval.top_k,
            similarity_threshold: cfg.retrieval.similarity_threshold,
            history_turns: cfg.conversation.history_turns,
        }
    }
}

/// 一轮对话的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub agent: AgentKind,
    pub reply: AgentReply,
    /// 命中的策略文本，或单元素哨兵
    pub retrieved_policies: Vec<String>,
    /// 写入本轮后的最近历史
    pub history: Vec<StoredMessage>,
}

pub struct SupportService {
    retriever: Arc<PolicyRetriever>,
    dispatcher: Arc<Dispatcher>,
    conversations: ConversationService,
    settings: ServiceSettings,
}

impl SupportService {
    pub fn new(
        retriever: Arc<PolicyRetriever>,
        dispatcher: Arc<Dispatcher>,
        conversations: ConversationService,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            retriever,
            dispatcher,
            conversations,
            settings,
        }
    }

    pub fn retriever(&self) -> &Arc<PolicyRetriever> {
        &self.retriever
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// 处理一轮用户输入
    pub async fn handle_turn(
        &self,
        conversation_id: &str,
        agent_type: &str,
        user_text: &str,
    ) -> Result<TurnOutcome, ServiceError> {
        if user_text.trim().is_empty() {
            return Err(ServiceError::EmptyInput);
        }
        let kind: AgentKind = agent_type.parse()?;

        let history = self.conversations.last_n(conversation_id, self.settings.history_turns);
        let history_context = format_history(&history);

        let lookup = self
            .retriever
            .retrieve_policy(user_text, self.settings.top_k, self.settings.similarity_threshold)
            .await;

        let request = AgentRequest::new(user_text)
            .with_policy_context(lookup.as_context())
            .with_history(history_context);
        let reply = self.dispatcher.dispatch_kind(kind, &request).await;

        self.conversations.add_message(conversation_id, USER_SENDER, user_text);
        self.conversations
            .add_message(conversation_id, kind.as_str(), &reply.response);

        tracing::info!(
            conversation_id,
            agent = %kind,
            policies_found = lookup.is_found(),
            "turn handled"
        );

        Ok(TurnOutcome {
            conversation_id: conversation_id.to_string(),
            agent: kind,
            reply,
            retrieved_policies: lookup.texts(),
            history: self.conversations.last_n(conversation_id, self.settings.history_turns),
        })
    }

    /// 单独查询策略（不经过智能体）
    pub async fn retrieve_policies(&self, query: &str) -> Result<PolicyLookup, ServiceError> {
        if query.trim().is_empty() {
            return Err(ServiceError::EmptyInput);
        }
        Ok(self
            .retriever
            .retrieve_policy(query, self.settings.top_k, self.settings.similarity_threshold)
            .await)
    }
}

/// 按配置装配完整服务：LLM 后端、嵌入、SQLite 索引与对话库
pub fn build_service(cfg: &AppConfig) -> anyhow::Result<SupportService> {
    let data_dir = cfg.app.data_dir();

    let (llm, model) = create_llm_from_config(cfg);
    let options = GenerationOptions {
        model,
        temperature: cfg.llm.temperature,
    };
    let completion = CompletionProvider::new(llm, PromptTemplates::from_default_dirs(), options);
    let dispatcher = Dispatcher::new(Arc::new(completion));

    let embedder = create_embedder_from_config(
        &cfg.embedding.provider,
        cfg.embedding.base_url.as_deref(),
        &cfg.embedding.model,
        cfg.embedding.dimensions,
    );
    let index = SqliteVectorIndex::open(data_dir.join(POLICY_DB_FILE))?;
    let retriever = PolicyRetriever::new(embedder, Arc::new(index));

    let store = SqliteConversationStore::open(data_dir.join(CONVERSATION_DB_FILE))?;
    tracing::info!(
        app = cfg.app.name.as_deref().unwrap_or("helpdesk"),
        "Data directory: {}",
        data_dir.display()
    );

    Ok(SupportService::new(
        Arc::new(retriever),
        Arc::new(dispatcher),
        ConversationService::new(Arc::new(store)),
        ServiceSettings::from_config(cfg),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::conversation::InMemoryConversationStore;
    use crate::llm::{EmbeddingProvider, HashEmbedder, LlmError, MockLlmClient};
    use crate::retrieval::{InMemoryVectorIndex, PolicyDocument, NO_POLICY_FOUND};

    /// 统计调用次数的哈希嵌入
    struct CountingEmbedder {
        inner: HashEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }

        fn model(&self) -> &str {
            self.inner.model()
        }
    }

    fn service(llm: Arc<MockLlmClient>) -> SupportService {
        service_with_embedder(
            llm,
            Arc::new(CountingEmbedder {
                inner: HashEmbedder::new(64),
                calls: AtomicUsize::new(0),
            }),
        )
    }

    fn service_with_embedder(llm: Arc<MockLlmClient>, embedder: Arc<CountingEmbedder>) -> SupportService {
        let completion = CompletionProvider::new(llm, PromptTemplates::default(), GenerationOptions::default());
        let retriever = PolicyRetriever::new(embedder, Arc::new(InMemoryVectorIndex::new()));
        SupportService::new(
            Arc::new(retriever),
            Arc::new(Dispatcher::new(Arc::new(completion))),
            ConversationService::new(Arc::new(InMemoryConversationStore::new())),
            ServiceSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_blank_input_rejected_before_any_work() {
        let llm = Arc::new(MockLlmClient::new());
        let embedder = Arc::new(CountingEmbedder {
            inner: HashEmbedder::new(64),
            calls: AtomicUsize::new(0),
        });
        let s = service_with_embedder(llm.clone(), embedder.clone());
        assert_eq!(s.handle_turn("c1", "sales", "  ").await.unwrap_err(), ServiceError::EmptyInput);
        assert_eq!(s.retrieve_policies("").await.unwrap_err(), ServiceError::EmptyInput);
        assert_eq!(llm.calls(), 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(s.conversations().messages("c1").is_empty());

        s.handle_turn("c1", "sales", "What plans do you offer?").await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_type() {
        let s = service(Arc::new(MockLlmClient::new()));
        let err = s.handle_turn("c1", "billing", "hello").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown agent type: billing. Valid types: sales, tech_support, customer_support"
        );
    }

    #[tokio::test]
    async fn test_turn_records_both_sides() {
        let llm = Arc::new(MockLlmClient::new());
        let s = service(llm.clone());
        let outcome = s.handle_turn("c1", "Tech Support", "My router keeps rebooting").await.unwrap();

        assert_eq!(outcome.agent, AgentKind::TechSupport);
        assert_eq!(outcome.reply.response, "Echo from Mock: My router keeps rebooting");
        assert_eq!(outcome.retrieved_policies, vec![NO_POLICY_FOUND.to_string()]);
        let senders: Vec<&str> = outcome.history.iter().map(|m| m.sender.as_str()).collect();
        assert_eq!(senders, vec!["user", "tech_support"]);

        let system = &llm.last_request().unwrap()[0].content;
        assert!(system.contains("Policy Context: No relevant policy found."));
        assert!(system.contains("Conversation History:\nNo previous messages."));
    }

    #[tokio::test]
    async fn test_history_feeds_next_turn() {
        let llm = Arc::new(MockLlmClient::new());
        let s = service(llm.clone());
        s.handle_turn("c1", "sales", "Hi there").await.unwrap();
        s.handle_turn("c1", "sales", "What plans do you have?").await.unwrap();

        let system = &llm.last_request().unwrap()[0].content;
        assert!(system.contains("user: Hi there\nsales: Echo from Mock: Hi there"));
    }

    #[tokio::test]
    async fn test_rejections_are_recorded_too() {
        let llm = Arc::new(MockLlmClient::new());
        let s = service(llm.clone());
        let outcome = s.handle_turn("c2", "tech_support", "reset my password").await.unwrap();
        assert!(outcome.reply.response.starts_with("❌ "));
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_retrieved_policies_reach_generation() {
        let llm = Arc::new(MockLlmClient::new());
        let s = service(llm.clone());
        s.retriever()
            .load_corpus(vec![PolicyDocument::new(
                "policy_0",
                "refund policy refund within 30 days",
            )])
            .await
            .unwrap();

        let lookup = s.retrieve_policies("refund policy refund within 30 days").await.unwrap();
        assert!(lookup.is_found());

        s.handle_turn("c3", "sales", "refund policy refund within 30 days")
            .await
            .unwrap();
        let system = &llm.last_request().unwrap()[0].content;
        assert!(system.contains("Policy Context: refund policy refund within 30 days"));
    }
}
