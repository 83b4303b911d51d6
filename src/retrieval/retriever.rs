//! 语义策略检索器
//!
//! 语料加载：读取策略文本，去除空白文档，一次批量嵌入后整批写入索引；索引非空时跳过（幂等）。
//! 查询：用同一嵌入提供方编码查询，取最近 k 条，保留相似度 >= 阈值者，按相似度降序返回。
//! 索引记录构建时的向量空间，查询或加载所用嵌入模型不一致时报错而不是静默无命中。

use std::path::Path;
use std::sync::Arc;

use walkdir::WalkDir;

use super::{EmbeddingSpace, IndexedDocument, RetrievalError, VectorIndex};
use crate::llm::EmbeddingProvider;

/// 无命中时对外暴露的唯一文本
pub const NO_POLICY_FOUND: &str = "No relevant policy found.";
/// 检索失败时对外暴露的唯一文本
pub const RETRIEVAL_ERROR: &str = "Error retrieving policy.";

/// 策略文档：稳定 id + 不可变文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    pub id: String,
    pub text: String,
}

impl PolicyDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// 带相似度的检索结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPolicy {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// 一次查询的结果：命中 / 无命中 / 失败 三者可区分
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyLookup {
    Found(Vec<ScoredPolicy>),
    NoMatch,
    Failed(String),
}

impl PolicyLookup {
    /// 文本视图：命中时为各策略文本，否则为单元素哨兵
    pub fn texts(&self) -> Vec<String> {
        match self {
            PolicyLookup::Found(hits) => hits.iter().map(|h| h.text.clone()).collect(),
            PolicyLookup::NoMatch => vec![NO_POLICY_FOUND.to_string()],
            PolicyLookup::Failed(_) => vec![RETRIEVAL_ERROR.to_string()],
        }
    }

    /// 拼接为生成上下文（换行分隔）
    pub fn as_context(&self) -> String {
        self.texts().join("\n")
    }

    pub fn is_found(&self) -> bool {
        matches!(self, PolicyLookup::Found(_))
    }
}

/// 语料加载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadReport {
    Inserted { count: usize },
    AlreadyPopulated { existing: usize },
}

/// 读取目录下全部 .txt 策略文件（递归、按文件名排序），去除空白文档，id 为 policy_<序号>
pub fn read_policy_dir(dir: impl AsRef<Path>) -> Result<Vec<PolicyDocument>, RetrievalError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(RetrievalError::Corpus(format!(
            "policy directory not found: {}",
            dir.display()
        )));
    }

    let mut texts = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RetrievalError::Corpus(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Corpus(format!("{}: {}", path.display(), e)))?;
        let text = text.trim();
        if !text.is_empty() {
            texts.push(text.to_string());
        }
    }

    tracing::info!("Loaded {} policy documents after filtering empty files.", texts.len());
    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| PolicyDocument::new(format!("policy_{}", i), text))
        .collect())
}

/// 语义策略检索器：嵌入提供方 + 向量索引，进程启动时构建一次并共享
pub struct PolicyRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl PolicyRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn document_count(&self) -> Result<usize, RetrievalError> {
        self.index.len()
    }

    /// 写入语料；索引已有文档时不重复写入
    pub async fn load_corpus(&self, documents: Vec<PolicyDocument>) -> Result<LoadReport, RetrievalError> {
        let documents: Vec<PolicyDocument> = documents
            .into_iter()
            .filter_map(|d| {
                let text = d.text.trim();
                (!text.is_empty()).then(|| PolicyDocument::new(d.id, text))
            })
            .collect();
        if documents.is_empty() {
            return Err(RetrievalError::EmptyCorpus);
        }

        let existing = self.index.len()?;
        if existing > 0 {
            if let Some(stored) = self.index.space()? {
                if stored.model != self.embedder.model() {
                    return Err(RetrievalError::SpaceMismatch {
                        stored: stored.to_string(),
                        current: self.embedder.model().to_string(),
                    });
                }
            }
            tracing::warn!("Vector index already contains {} policies. Skipping reinsertion.", existing);
            return Ok(LoadReport::AlreadyPopulated { existing });
        }

        tracing::info!(
            model = self.embedder.model(),
            "Sending {} policies to embeddings provider",
            documents.len()
        );
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await.map_err(|e| {
            tracing::error!("Error embedding policy corpus: {}", e);
            RetrievalError::from(e)
        })?;
        if vectors.len() != documents.len() {
            return Err(RetrievalError::EmbeddingCountMismatch {
                expected: documents.len(),
                actual: vectors.len(),
            });
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        let space = EmbeddingSpace::new(self.embedder.model(), dimensions);
        let indexed: Vec<IndexedDocument> = documents
            .into_iter()
            .zip(vectors)
            .map(|(doc, embedding)| IndexedDocument {
                id: doc.id,
                text: doc.text,
                embedding,
            })
            .collect();
        let count = indexed.len();

        if let Err(e) = self.index.upsert_all(&space, &indexed) {
            tracing::error!("Error writing policy corpus: {}", e);
            // 不支持事务的索引可能留下部分写入；清空以便下次加载重新写入
            if let Err(clear_err) = self.index.clear() {
                tracing::error!("Failed to clear partially written index: {}", clear_err);
            }
            return Err(e);
        }
        tracing::info!(space = %space, "Vector index now contains {} policies.", count);
        Ok(LoadReport::Inserted { count })
    }

    /// 从目录读取并加载
    pub async fn load_from_dir(&self, dir: impl AsRef<Path>) -> Result<LoadReport, RetrievalError> {
        let documents = read_policy_dir(dir)?;
        self.load_corpus(documents).await
    }

    /// 清空索引后重新加载（语料变更时使用）
    pub async fn reload_corpus(&self, documents: Vec<PolicyDocument>) -> Result<LoadReport, RetrievalError> {
        let removed = self.index.clear()?;
        tracing::info!("Cleared {} policies before reload", removed);
        self.load_corpus(documents).await
    }

    /// 查询相关策略；失败不向上抛出，转为 PolicyLookup::Failed
    pub async fn retrieve_policy(&self, query: &str, k: usize, threshold: f32) -> PolicyLookup {
        match self.search(query, k, threshold).await {
            Ok(hits) if hits.is_empty() => {
                tracing::warn!("No relevant policy found (below threshold).");
                PolicyLookup::NoMatch
            }
            Ok(hits) => {
                tracing::info!("Retrieved {} policies above threshold.", hits.len());
                PolicyLookup::Found(hits)
            }
            Err(e) => {
                tracing::error!("Error retrieving policy: {}", e);
                PolicyLookup::Failed(e.to_string())
            }
        }
    }

    async fn search(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<ScoredPolicy>, RetrievalError> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = match vectors.into_iter().next() {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(RetrievalError::EmbeddingCountMismatch {
                    expected: 1,
                    actual: 0,
                })
            }
        };

        if let Some(stored) = self.index.space()? {
            let current = EmbeddingSpace::new(self.embedder.model(), query_vector.len());
            if stored != current {
                return Err(RetrievalError::SpaceMismatch {
                    stored: stored.to_string(),
                    current: current.to_string(),
                });
            }
        }

        let mut hits: Vec<ScoredPolicy> = self
            .index
            .query(&query_vector, k)?
            .into_iter()
            .map(|hit| ScoredPolicy {
                id: hit.id,
                text: hit.text,
                score: 1.0 - hit.distance,
            })
            .filter(|hit| hit.score >= threshold)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::llm::{HashEmbedder, LlmError};
    use crate::retrieval::{IndexHit, InMemoryVectorIndex, SqliteVectorIndex};

    /// 固定词表嵌入：文本含某关键词则对应维度为 1
    struct KeywordEmbedder {
        vocabulary: Vec<&'static str>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                vocabulary: vec!["refund", "shipping", "warranty", "password"],
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::ProviderError("embeddings offline".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    self.vocabulary
                        .iter()
                        .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }

        fn model(&self) -> &str {
            "keyword"
        }
    }

    fn corpus() -> Vec<PolicyDocument> {
        vec![
            PolicyDocument::new("policy_0", "Refund requests are accepted within 14 days."),
            PolicyDocument::new("policy_1", "Shipping takes 3-5 business days."),
            PolicyDocument::new("policy_2", "   "),
            PolicyDocument::new("policy_3", "Warranty covers manufacturing defects for one year."),
        ]
    }

    #[tokio::test]
    async fn test_load_skips_blank_documents() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let retriever = PolicyRetriever::new(Arc::new(KeywordEmbedder::new()), index.clone());
        let report = retriever.load_corpus(corpus()).await.unwrap();
        assert_eq!(report, LoadReport::Inserted { count: 3 });
        let ids: Vec<String> = index.get_all().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["policy_0", "policy_1", "policy_3"]);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let embedder = Arc::new(KeywordEmbedder::new());
        let retriever = PolicyRetriever::new(embedder.clone(), index.clone());

        retriever.load_corpus(corpus()).await.unwrap();
        let before = index.get_all().unwrap();

        let report = retriever.load_corpus(corpus()).await.unwrap();
        assert_eq!(report, LoadReport::AlreadyPopulated { existing: 3 });
        assert_eq!(index.get_all().unwrap(), before);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_empty_corpus_errors() {
        let retriever = PolicyRetriever::new(Arc::new(KeywordEmbedder::new()), Arc::new(InMemoryVectorIndex::new()));
        let err = retriever
            .load_corpus(vec![PolicyDocument::new("policy_0", "\n\t ")])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyCorpus));
    }

    #[tokio::test]
    async fn test_reload_replaces_documents() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let retriever = PolicyRetriever::new(Arc::new(KeywordEmbedder::new()), index.clone());
        retriever.load_corpus(corpus()).await.unwrap();
        let report = retriever
            .reload_corpus(vec![PolicyDocument::new("policy_0", "Password resets need verification.")])
            .await
            .unwrap();
        assert_eq!(report, LoadReport::Inserted { count: 1 });
        assert_eq!(retriever.document_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_similarity_and_filters_threshold() {
        let retriever = PolicyRetriever::new(Arc::new(KeywordEmbedder::new()), Arc::new(InMemoryVectorIndex::new()));
        retriever.load_corpus(corpus()).await.unwrap();

        let lookup = retriever.retrieve_policy("What is your refund policy?", 3, 0.8).await;
        match &lookup {
            PolicyLookup::Found(hits) => {
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].id, "policy_0");
                assert!((hits[0].score - 1.0).abs() < 1e-5);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
        assert_eq!(lookup.texts(), vec!["Refund requests are accepted within 14 days.".to_string()]);

        // refund + shipping：两篇文档相似度均约 0.707
        let lookup = retriever.retrieve_policy("refund and shipping", 3, 0.5).await;
        let ids: Vec<String> = match lookup {
            PolicyLookup::Found(hits) => hits.into_iter().map(|h| h.id).collect(),
            other => panic!("unexpected lookup: {:?}", other),
        };
        assert_eq!(ids, vec!["policy_0", "policy_1"]);
    }

    #[tokio::test]
    async fn test_retrieve_below_threshold_returns_single_sentinel() {
        let retriever = PolicyRetriever::new(Arc::new(KeywordEmbedder::new()), Arc::new(InMemoryVectorIndex::new()));
        retriever.load_corpus(corpus()).await.unwrap();
        let lookup = retriever.retrieve_policy("Tell me a joke", 3, 0.8).await;
        assert_eq!(lookup, PolicyLookup::NoMatch);
        let texts = lookup.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0], NO_POLICY_FOUND);
    }

    #[tokio::test]
    async fn test_retrieve_failure_is_distinct_sentinel() {
        let mut embedder = KeywordEmbedder::new();
        embedder.fail = true;
        let retriever = PolicyRetriever::new(Arc::new(embedder), Arc::new(InMemoryVectorIndex::new()));
        let lookup = retriever.retrieve_policy("refund", 3, 0.8).await;
        assert!(matches!(lookup, PolicyLookup::Failed(_)));
        assert_eq!(lookup.texts(), vec![RETRIEVAL_ERROR.to_string()]);
        assert_ne!(lookup.texts(), PolicyLookup::NoMatch.texts());
    }

    #[tokio::test]
    async fn test_query_in_other_embedding_space_fails() {
        let index = Arc::new(SqliteVectorIndex::open_in_memory().unwrap());
        let loader = PolicyRetriever::new(Arc::new(HashEmbedder::new(64)), index.clone());
        loader
            .load_corpus(vec![PolicyDocument::new("policy_0", "refund policy")])
            .await
            .unwrap();

        let same = loader.retrieve_policy("refund policy", 3, 0.8).await;
        assert!(same.is_found());

        let other = PolicyRetriever::new(Arc::new(HashEmbedder::new(128)), index.clone());
        let lookup = other.retrieve_policy("refund policy", 3, 0.8).await;
        assert!(matches!(lookup, PolicyLookup::Failed(_)));
        assert_eq!(lookup.texts(), vec![RETRIEVAL_ERROR.to_string()]);

        let keyword = PolicyRetriever::new(Arc::new(KeywordEmbedder::new()), index);
        assert!(matches!(
            keyword.retrieve_policy("refund", 3, 0.8).await,
            PolicyLookup::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_load_refuses_index_built_by_other_model() {
        let index = Arc::new(InMemoryVectorIndex::new());
        PolicyRetriever::new(Arc::new(HashEmbedder::new(64)), index.clone())
            .load_corpus(corpus())
            .await
            .unwrap();

        let embedder = Arc::new(KeywordEmbedder::new());
        let retriever = PolicyRetriever::new(embedder.clone(), index.clone());
        let err = retriever.load_corpus(corpus()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::SpaceMismatch { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

        let report = retriever.reload_corpus(corpus()).await.unwrap();
        assert_eq!(report, LoadReport::Inserted { count: 3 });
        assert!(retriever.retrieve_policy("refund", 3, 0.8).await.is_found());
    }

    /// 写入第一篇后失败、不回滚的索引
    struct PartialWriteIndex {
        inner: InMemoryVectorIndex,
    }

    impl VectorIndex for PartialWriteIndex {
        fn upsert_all(&self, space: &EmbeddingSpace, documents: &[IndexedDocument]) -> Result<(), RetrievalError> {
            self.inner.upsert_all(space, &documents[..1])?;
            Err(RetrievalError::Index("disk full".to_string()))
        }
        fn space(&self) -> Result<Option<EmbeddingSpace>, RetrievalError> {
            self.inner.space()
        }
        fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
            self.inner.query(vector, k)
        }
        fn get_all(&self) -> Result<Vec<IndexedDocument>, RetrievalError> {
            self.inner.get_all()
        }
        fn clear(&self) -> Result<usize, RetrievalError> {
            self.inner.clear()
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_index_empty() {
        let index = Arc::new(PartialWriteIndex {
            inner: InMemoryVectorIndex::new(),
        });
        let embedder = Arc::new(KeywordEmbedder::new());
        let retriever = PolicyRetriever::new(embedder.clone(), index.clone());

        let err = retriever.load_corpus(corpus()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Index(_)));
        assert_eq!(retriever.document_count().unwrap(), 0);

        // 下一次加载不会被误判为已填充
        let err = retriever.load_corpus(corpus()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Index(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_read_policy_dir_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_shipping.txt"), "Shipping policy.\n").unwrap();
        std::fs::write(dir.path().join("a_refund.txt"), "  Refund policy.  ").unwrap();
        std::fs::write(dir.path().join("c_empty.txt"), "\n\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("d_more")).unwrap();
        std::fs::write(dir.path().join("d_more").join("warranty.txt"), "Warranty policy.").unwrap();

        let docs = read_policy_dir(dir.path()).unwrap();
        let by_id: HashMap<String, String> = docs.into_iter().map(|d| (d.id, d.text)).collect();
        assert_eq!(by_id.len(), 3);
        assert_eq!(by_id["policy_0"], "Refund policy.");
        assert_eq!(by_id["policy_1"], "Shipping policy.");
        assert_eq!(by_id["policy_2"], "Warranty policy.");
    }

    #[test]
    fn test_read_policy_dir_missing() {
        let err = read_policy_dir("/definitely/not/here").unwrap_err();
        assert!(matches!(err, RetrievalError::Corpus(_)));
    }
}
