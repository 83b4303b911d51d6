//! LLM 层：生成与嵌入客户端抽象及实现（OpenAI 兼容 / DeepSeek / Mock / 哈希嵌入）、补全服务

pub mod completion;
pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use completion::{CompletionProvider, PromptTemplates, GENERATION_FALLBACK, GENERIC_TEMPLATE};
pub use deepseek::{deepseek_from_config, DEEPSEEK_CHAT};
pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashEmbedder, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{GenerationOptions, LlmClient, LlmError, Message, Role};

use crate::config::AppConfig;

/// 按配置与 API Key 选择生成后端，返回 (客户端, 实际使用的模型名)
///
/// 有 DEEPSEEK_API_KEY（或 provider = deepseek 且有 OPENAI_API_KEY）时走 DeepSeek；
/// 有 OPENAI_API_KEY 时走 OpenAI；否则使用 Mock。
pub fn create_llm_from_config(cfg: &AppConfig) -> (Arc<dyn LlmClient>, String) {
    if let Some((client, model)) = deepseek_from_config(&cfg.llm) {
        tracing::info!("Using DeepSeek LLM ({})", model);
        return (Arc::new(client), model);
    }

    let openai_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty());
    match openai_key {
        Some(key) if !cfg.llm.provider.eq_ignore_ascii_case("deepseek") => {
            let model = cfg
                .llm
                .openai
                .model
                .clone()
                .unwrap_or_else(|| cfg.llm.model.clone());
            tracing::info!("Using OpenAI LLM ({})", model);
            let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, Some(key.as_str()));
            (Arc::new(client), model)
        }
        _ => {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
            (Arc::new(MockLlmClient::new()), cfg.llm.model.clone())
        }
    }
}
