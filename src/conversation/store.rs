use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{StoreError, StoredMessage};

/// 对话存储：只追加；同一会话内按 (timestamp, id) 排序读取
pub trait ConversationStore: Send + Sync {
    /// 以给定时间戳写入一条消息
    fn insert(
        &self,
        conversation_id: &str,
        sender: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<StoredMessage, StoreError>;

    /// 以当前 UTC 时间写入
    fn append(&self, conversation_id: &str, sender: &str, content: &str) -> Result<StoredMessage, StoreError> {
        self.insert(conversation_id, sender, content, Utc::now())
    }

    /// 会话全部消息，按时间正序
    fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// 最近 n 条消息，按时间正序返回
    fn last_n(&self, conversation_id: &str, n: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let mut all = self.messages(conversation_id)?;
        let skip = all.len().saturating_sub(n);
        Ok(all.split_off(skip))
    }

    /// 最近有消息的会话 id
    fn latest_conversation_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .recent_conversation_ids(1)?
            .into_iter()
            .next()
            .map(|(id, _)| id))
    }

    /// 最近活跃的会话及其最新时间戳，按时间倒序
    fn recent_conversation_ids(&self, limit: usize) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;

    /// 删除会话全部消息，返回删除行数
    fn delete_conversation(&self, conversation_id: &str) -> Result<usize, StoreError>;

    /// 按 sender 过滤（None 表示不过滤），按时间倒序取前 limit 条
    fn filter_by_sender(&self, sender: Option<&str>, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;
}

fn sort_chronological(messages: &mut [StoredMessage]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
}

/// 内存实现（测试与临时会话）
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    rows: RwLock<Vec<StoredMessage>>,
    next_id: AtomicI64,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn insert(
        &self,
        conversation_id: &str,
        sender: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<StoredMessage, StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let message = StoredMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp,
        };
        rows.push(message.clone());
        Ok(message)
    }

    fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<StoredMessage> = rows
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        sort_chronological(&mut out);
        Ok(out)
    }

    fn recent_conversation_ids(&self, limit: usize) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        let mut latest: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for m in rows.iter() {
            let entry = latest.entry(m.conversation_id.as_str()).or_insert(m.timestamp);
            if m.timestamp > *entry {
                *entry = m.timestamp;
            }
        }
        let mut out: Vec<(String, DateTime<Utc>)> =
            latest.into_iter().map(|(id, ts)| (id.to_string(), ts)).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out.truncate(limit);
        Ok(out)
    }

    fn delete_conversation(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let before = rows.len();
        rows.retain(|m| m.conversation_id != conversation_id);
        Ok(before - rows.len())
    }

    fn filter_by_sender(&self, sender: Option<&str>, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<StoredMessage> = rows
            .iter()
            .filter(|m| sender.map_or(true, |s| m.sender == s))
            .cloned()
            .collect();
        sort_chronological(&mut out);
        out.reverse();
        out.truncate(limit);
        Ok(out)
    }
}

/// SQLite 实现：单连接 + Mutex，时间戳以 UTC 微秒整数存储
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    /// 打开（或创建）数据库文件并建表；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp_us INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_cid ON conversations (conversation_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn to_timestamp(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros).ok_or(StoreError::InvalidTimestamp(micros))
}

type RawRow = (i64, String, String, String, i64);

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn collect_messages(rows: impl Iterator<Item = rusqlite::Result<RawRow>>) -> Result<Vec<StoredMessage>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        let (id, conversation_id, sender, content, micros) = row?;
        out.push(StoredMessage {
            id,
            conversation_id,
            sender,
            content,
            timestamp: to_timestamp(micros)?,
        });
    }
    Ok(out)
}

const SELECT_COLUMNS: &str = "SELECT id, conversation_id, sender, content, timestamp_us FROM conversations";

impl ConversationStore for SqliteConversationStore {
    fn insert(
        &self,
        conversation_id: &str,
        sender: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<StoredMessage, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversations (conversation_id, sender, content, timestamp_us) VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, sender, content, timestamp.timestamp_micros()],
        )?;
        Ok(StoredMessage {
            id: conn.last_insert_rowid(),
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp,
        })
    }

    fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE conversation_id = ?1 ORDER BY timestamp_us ASC, id ASC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![conversation_id], raw_row)?;
        collect_messages(rows)
    }

    fn last_n(&self, conversation_id: &str, n: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE conversation_id = ?1 ORDER BY timestamp_us DESC, id DESC LIMIT ?2",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![conversation_id, n as i64], raw_row)?;
        let mut out = collect_messages(rows)?;
        out.reverse();
        Ok(out)
    }

    fn recent_conversation_ids(&self, limit: usize) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, MAX(timestamp_us) AS latest FROM conversations
             GROUP BY conversation_id ORDER BY latest DESC, conversation_id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, micros) = row?;
            out.push((id, to_timestamp(micros)?));
        }
        Ok(out)
    }

    fn delete_conversation(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "DELETE FROM conversations WHERE conversation_id = ?1",
            params![conversation_id],
        )?)
    }

    fn filter_by_sender(&self, sender: Option<&str>, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE (?1 IS NULL OR sender = ?1) ORDER BY timestamp_us DESC, id DESC LIMIT ?2",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![sender, limit as i64], raw_row)?;
        collect_messages(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn exercise(store: &dyn ConversationStore) {
        // 乱序写入
        store.insert("c1", "user", "third", at(30)).unwrap();
        store.insert("c1", "user", "first", at(10)).unwrap();
        store.insert("c1", "sales", "second", at(20)).unwrap();
        store.insert("c1", "sales", "fourth", at(40)).unwrap();
        store.insert("c2", "tech_support", "other", at(35)).unwrap();

        let last: Vec<String> = store.last_n("c1", 3).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(last, vec!["second", "third", "fourth"]);

        let all: Vec<String> = store.messages("c1").unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(all, vec!["first", "second", "third", "fourth"]);
        assert_eq!(store.last_n("c1", 10).unwrap().len(), 4);
        assert!(store.last_n("missing", 5).unwrap().is_empty());

        assert_eq!(store.latest_conversation_id().unwrap().as_deref(), Some("c1"));
        let recent = store.recent_conversation_ids(5).unwrap();
        assert_eq!(recent, vec![("c1".to_string(), at(40)), ("c2".to_string(), at(35))]);

        let sales: Vec<String> = store
            .filter_by_sender(Some("sales"), 10)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(sales, vec!["fourth", "second"]);
        assert_eq!(store.filter_by_sender(None, 2).unwrap().len(), 2);

        assert_eq!(store.delete_conversation("c1").unwrap(), 4);
        assert_eq!(store.delete_conversation("c1").unwrap(), 0);
        assert_eq!(store.latest_conversation_id().unwrap().as_deref(), Some("c2"));
    }

    #[test]
    fn test_in_memory_store() {
        exercise(&InMemoryConversationStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteConversationStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        store.insert("c", "user", "a", at(0)).unwrap();
        store.insert("c", "sales", "b", at(0)).unwrap();
        let contents: Vec<String> = store.last_n("c", 2).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conversations.db");
        {
            let store = SqliteConversationStore::open(&path).unwrap();
            store.append("c9", "user", "hello").unwrap();
        }
        let store = SqliteConversationStore::open(&path).unwrap();
        let messages = store.messages("c9").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "user");
    }
}
