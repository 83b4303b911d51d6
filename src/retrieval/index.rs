//! 向量索引：id -> (embedding, text)
//!
//! 两个实现共用同一打分方式：全量余弦相似度，按距离（1 - 相似度）升序取前 k。
//! 策略语料规模很小，全量扫描足够。
//!
//! 索引同时记录构建它的向量空间（嵌入模型 + 维度）；整批写入要么全部生效，要么全部不生效。

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection};

use super::RetrievalError;

/// 索引中的一条文档
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// 查询命中：distance 为余弦距离，越小越近
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub text: String,
    pub distance: f32,
}

/// 构建索引所用的向量空间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSpace {
    pub model: String,
    pub dimensions: usize,
}

impl EmbeddingSpace {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions,
        }
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} dims)", self.model, self.dimensions)
    }
}

/// 向量索引接口
pub trait VectorIndex: Send + Sync {
    /// 整批插入或覆盖（按 id），同时记录向量空间；失败时不留下部分写入
    fn upsert_all(&self, space: &EmbeddingSpace, documents: &[IndexedDocument]) -> Result<(), RetrievalError>;

    /// 构建索引时记录的向量空间；空索引为 None
    fn space(&self) -> Result<Option<EmbeddingSpace>, RetrievalError>;

    /// 最近的 k 条，按距离升序；查询向量与已存向量维度不一致时报错
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, RetrievalError>;

    /// 现有全部内容（按 id 排序）
    fn get_all(&self) -> Result<Vec<IndexedDocument>, RetrievalError>;

    /// 清空索引（含向量空间记录），返回删除条数
    fn clear(&self) -> Result<usize, RetrievalError>;

    fn len(&self) -> Result<usize, RetrievalError> {
        Ok(self.get_all()?.len())
    }
}

/// 余弦相似度；维度不一致或零向量时为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn rank(query: &[f32], docs: &[IndexedDocument], k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
    if let Some(doc) = docs.iter().find(|d| d.embedding.len() != query.len()) {
        return Err(RetrievalError::DimensionMismatch {
            expected: doc.embedding.len(),
            actual: query.len(),
        });
    }
    let mut hits: Vec<IndexHit> = docs
        .iter()
        .map(|d| IndexHit {
            id: d.id.clone(),
            text: d.text.clone(),
            distance: 1.0 - cosine_similarity(query, &d.embedding),
        })
        .collect();
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    Ok(hits)
}

/// 同一批内向量维度必须一致
fn check_batch(space: &EmbeddingSpace, documents: &[IndexedDocument]) -> Result<(), RetrievalError> {
    match documents.iter().find(|d| d.embedding.len() != space.dimensions) {
        Some(d) => Err(RetrievalError::DimensionMismatch {
            expected: space.dimensions,
            actual: d.embedding.len(),
        }),
        None => Ok(()),
    }
}

#[derive(Default)]
struct MemoryState {
    entries: Vec<IndexedDocument>,
    space: Option<EmbeddingSpace>,
}

/// 内存索引（测试与临时运行）
#[derive(Default)]
pub struct InMemoryVectorIndex {
    state: RwLock<MemoryState>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> RetrievalError {
    RetrievalError::Index("index lock poisoned".to_string())
}

impl VectorIndex for InMemoryVectorIndex {
    fn upsert_all(&self, space: &EmbeddingSpace, documents: &[IndexedDocument]) -> Result<(), RetrievalError> {
        check_batch(space, documents)?;
        let mut state = self.state.write().map_err(poisoned)?;
        for doc in documents {
            match state.entries.iter_mut().find(|e| e.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => state.entries.push(doc.clone()),
            }
        }
        state.space = Some(space.clone());
        Ok(())
    }

    fn space(&self) -> Result<Option<EmbeddingSpace>, RetrievalError> {
        Ok(self.state.read().map_err(poisoned)?.space.clone())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
        let state = self.state.read().map_err(poisoned)?;
        rank(vector, &state.entries, k)
    }

    fn get_all(&self) -> Result<Vec<IndexedDocument>, RetrievalError> {
        let mut all = self.state.read().map_err(poisoned)?.entries.clone();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn clear(&self) -> Result<usize, RetrievalError> {
        let mut state = self.state.write().map_err(poisoned)?;
        let n = state.entries.len();
        state.entries.clear();
        state.space = None;
        Ok(n)
    }
}

const META_MODEL: &str = "embedding_model";
const META_DIMENSIONS: &str = "embedding_dimensions";

/// SQLite 持久化索引：embedding 以 JSON 数组存储，查询时载入内存打分；向量空间记在 index_meta 表
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RetrievalError::Index(e.to_string()))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, RetrievalError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RetrievalError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS policy_embeddings (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                embedding TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_all(conn: &Connection) -> Result<Vec<IndexedDocument>, RetrievalError> {
        let mut stmt = conn.prepare("SELECT id, text, embedding FROM policy_embeddings ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut docs = Vec::new();
        for row in rows {
            let (id, text, raw) = row?;
            let embedding: Vec<f32> = serde_json::from_str(&raw)
                .map_err(|e| RetrievalError::Index(format!("corrupt embedding for {}: {}", id, e)))?;
            docs.push(IndexedDocument { id, text, embedding });
        }
        Ok(docs)
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert_all(&self, space: &EmbeddingSpace, documents: &[IndexedDocument]) -> Result<(), RetrievalError> {
        check_batch(space, documents)?;
        let mut conn = self.conn.lock().map_err(poisoned)?;
        // 未 commit 的事务在 drop 时回滚
        let tx = conn.transaction()?;
        for doc in documents {
            let raw = serde_json::to_string(&doc.embedding).map_err(|e| RetrievalError::Index(e.to_string()))?;
            tx.execute(
                "INSERT INTO policy_embeddings (id, text, embedding) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET text = excluded.text, embedding = excluded.embedding",
                params![doc.id, doc.text, raw],
            )?;
        }
        let upsert_meta = "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value";
        tx.execute(upsert_meta, params![META_MODEL, space.model])?;
        tx.execute(upsert_meta, params![META_DIMENSIONS, space.dimensions.to_string()])?;
        tx.commit()?;
        Ok(())
    }

    fn space(&self) -> Result<Option<EmbeddingSpace>, RetrievalError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn.prepare("SELECT key, value FROM index_meta")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let (mut model, mut dimensions) = (None, None);
        for row in rows {
            let (key, value) = row?;
            match key.as_str() {
                META_MODEL => model = Some(value),
                META_DIMENSIONS => {
                    dimensions = Some(value.parse::<usize>().map_err(|e| {
                        RetrievalError::Index(format!("corrupt {}: {}", META_DIMENSIONS, e))
                    })?)
                }
                _ => {}
            }
        }
        Ok(model.zip(dimensions).map(|(model, dimensions)| EmbeddingSpace { model, dimensions }))
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
        let docs = {
            let conn = self.conn.lock().map_err(poisoned)?;
            Self::load_all(&conn)?
        };
        rank(vector, &docs, k)
    }

    fn get_all(&self) -> Result<Vec<IndexedDocument>, RetrievalError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        Self::load_all(&conn)
    }

    fn clear(&self) -> Result<usize, RetrievalError> {
        let mut conn = self.conn.lock().map_err(poisoned)?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM policy_embeddings", [])?;
        tx.execute("DELETE FROM index_meta", [])?;
        tx.commit()?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize, RetrievalError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM policy_embeddings", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    fn doc(id: &str, embedding: &[f32], text: &str) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            text: text.to_string(),
            embedding: embedding.to_vec(),
        }
    }

    fn exercise(index: &dyn VectorIndex) {
        let space = EmbeddingSpace::new("keyword", 2);
        assert_eq!(index.space().unwrap(), None);
        index
            .upsert_all(
                &space,
                &[
                    doc("policy_0", &[1.0, 0.0], "refunds"),
                    doc("policy_1", &[0.0, 1.0], "shipping"),
                    doc("policy_2", &[0.7, 0.7], "returns"),
                ],
            )
            .unwrap();
        assert_eq!(index.space().unwrap(), Some(space.clone()));

        let hits = index.query(&[1.0, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "policy_0");
        assert_eq!(hits[1].id, "policy_2");
        assert!(hits[0].distance <= hits[1].distance);

        let err = index.query(&[1.0, 0.0, 0.0], 2).unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { expected: 2, actual: 3 }));

        index
            .upsert_all(&space, &[doc("policy_1", &[0.0, 1.0], "shipping v2")])
            .unwrap();
        let all = index.get_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].text, "shipping v2");
        assert_eq!(index.len().unwrap(), 3);

        // 批内维度不一致：整批拒绝，原内容不变
        let err = index
            .upsert_all(
                &space,
                &[doc("policy_3", &[1.0, 1.0], "warranty"), doc("policy_4", &[1.0], "broken")],
            )
            .unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { .. }));
        assert_eq!(index.len().unwrap(), 3);

        assert_eq!(index.clear().unwrap(), 3);
        assert!(index.get_all().unwrap().is_empty());
        assert_eq!(index.space().unwrap(), None);
    }

    #[test]
    fn test_in_memory_index() {
        exercise(&InMemoryVectorIndex::new());
    }

    #[test]
    fn test_sqlite_index() {
        exercise(&SqliteVectorIndex::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_index_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("policies.db");
        {
            let index = SqliteVectorIndex::open(&path).unwrap();
            index
                .upsert_all(&EmbeddingSpace::new("hash", 2), &[doc("policy_0", &[0.5, 0.5], "warranty")])
                .unwrap();
        }
        let index = SqliteVectorIndex::open(&path).unwrap();
        let all = index.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].embedding, vec![0.5, 0.5]);
        assert_eq!(index.space().unwrap(), Some(EmbeddingSpace::new("hash", 2)));
    }
}
