//! 策略检索层：语料加载、向量索引、带阈值的 top-k 查询

pub mod index;
pub mod retriever;

use thiserror::Error;

use crate::llm::LlmError;

pub use index::{cosine_similarity, EmbeddingSpace, IndexHit, IndexedDocument, InMemoryVectorIndex, SqliteVectorIndex, VectorIndex};
pub use retriever::{
    read_policy_dir, LoadReport, PolicyDocument, PolicyLookup, PolicyRetriever, ScoredPolicy,
    NO_POLICY_FOUND, RETRIEVAL_ERROR,
};

/// 检索层错误（查询路径上会被转换为 PolicyLookup::Failed，不向对话流程传播）
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("No policies found")]
    EmptyCorpus,

    #[error("Embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("Embedding dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding space mismatch: index built with {stored}, current embedder is {current}; rebuild with load-policies --reload")]
    SpaceMismatch { stored: String, current: String },

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Failed to read policy corpus: {0}")]
    Corpus(String),
}

impl From<rusqlite::Error> for RetrievalError {
    fn from(e: rusqlite::Error) -> Self {
        RetrievalError::Index(e.to_string())
    }
}
