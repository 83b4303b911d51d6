//! 嵌入 API：供策略检索使用
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点，一次请求批量编码
//! - HashEmbedder：按词哈希到固定维度的确定性向量，无需网络，适合离线与测试
//!
//! 语料加载与查询必须使用同一个提供方（同一向量空间）。

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::llm::openai::openai_config;
use crate::llm::LlmError;

/// 嵌入提供方：输入 N 段文本，返回 N 个向量（顺序一致）
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// 模型标识：日志输出，并与维度一起标识索引的向量空间
    fn model(&self) -> &str;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::ProviderError(e.to_string()))?;

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        if data.len() != texts.len() {
            return Err(LlmError::ProviderError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// 确定性哈希嵌入：分词后哈希到固定维度并做 L2 归一化
///
/// 桶号取自 SHA-256 摘要，不依赖进程、平台或依赖版本，向量可以落库。
pub struct HashEmbedder {
    model: String,
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.clamp(8, 4096);
        Self {
            model: format!("helpdesk/simple-hash-{}", dimensions),
            dimensions,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = text
            .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .filter(|t| !t.is_empty());
        for token in tokens {
            vector[bucket(&token.to_lowercase(), self.dimensions)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

fn bucket(token: &str, dimensions: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % dimensions as u64) as usize
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// 从应用配置创建嵌入提供方：provider = "hash" 或无 OPENAI_API_KEY 时退回 HashEmbedder
pub fn create_embedder_from_config(
    provider: &str,
    base_url: Option<&str>,
    model: &str,
    dimensions: usize,
) -> Arc<dyn EmbeddingProvider> {
    if provider.eq_ignore_ascii_case("hash") {
        return Arc::new(HashEmbedder::new(dimensions));
    }
    let key = std::env::var("OPENAI_API_KEY").ok();
    if key.as_deref().unwrap_or("").is_empty() || key.as_deref() == Some("sk-placeholder") {
        tracing::warn!("embedding: no OPENAI_API_KEY, using hash embedder");
        return Arc::new(HashEmbedder::new(dimensions));
    }
    tracing::info!("Using OpenAI embeddings ({})", model);
    Arc::new(OpenAiEmbedder::new(base_url, model, key.as_deref()))
}
