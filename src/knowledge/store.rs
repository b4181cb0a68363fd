//! Document Store - rusqlite 기반 문서 저장소
//!
//! 크롤링한 기사 원문(제목, 본문, URL)을 저장합니다.
//! 벡터는 LanceDB 쪽에 따로 있고, 두 저장소는 URL 해시 ID로 연결됩니다.
//! 저장 위치: <data_dir>/documents.db

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 (불변)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// URL 해시 기반 ID
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub url: String,
    pub title: String,
    pub content: String,
}

impl NewDocument {
    /// URL에서 결정적으로 유도되는 문서 ID
    pub fn id(&self) -> String {
        document_id(&self.url)
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

/// URL → 문서 ID (SHA-256 hex)
pub fn document_id(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

// ============================================================================
// DocumentStore
// ============================================================================

/// SQLite 문서 저장소
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocumentStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create documents table")?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서 저장
    ///
    /// 문서는 불변이므로 같은 ID가 이미 있으면 아무것도 하지 않고 `false`를 반환합니다.
    pub fn insert(&self, doc: &NewDocument) -> Result<bool> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO documents (id, url, title, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![doc.id(), doc.url, doc.title, doc.content, now],
            )
            .context("Failed to insert document")?;

        Ok(rows > 0)
    }

    /// 여러 ID를 한 번에 조회 (없는 ID는 결과에서 빠짐)
    pub fn get_many(&self, ids: &[String]) -> Result<HashMap<String, Document>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, url, title, content, created_at FROM documents WHERE id IN ({})",
            placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok(Document {
                id: row.get(0)?,
                url: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
                created_at: parse_datetime(row.get::<_, String>(4)?),
            })
        })?;

        let mut docs = HashMap::with_capacity(ids.len());
        for row in rows {
            let doc = row.context("Failed to read document row")?;
            docs.insert(doc.id.clone(), doc);
        }
        Ok(docs)
    }

    /// 전체 제목 목록 (수집 순서)
    pub fn titles(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT title FROM documents ORDER BY rowid")?;
        let titles = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list titles")?;
        Ok(titles)
    }

    /// 문서 수
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let total_content_bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM documents",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            document_count: document_count as usize,
            total_content_bytes: total_content_bytes as usize,
            db_path: self.db_path.clone(),
        })
    }

    /// 전체 삭제 (코퍼스 재구축용)
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn
            .execute("DELETE FROM documents", [])
            .context("Failed to clear documents")?;
        Ok(rows)
    }
}

fn parse_datetime(value: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn article(url: &str, title: &str) -> NewDocument {
        NewDocument {
            url: url.to_string(),
            title: title.to_string(),
            content: format!("Body of {}", title),
        }
    }

    fn open_store(temp_dir: &TempDir) -> DocumentStore {
        DocumentStore::open(&temp_dir.path().join("documents.db")).unwrap()
    }

    #[test]
    fn test_document_id_is_deterministic() {
        let a = document_id("https://www.thoughtco.com/brain-4159438");
        let b = document_id("https://www.thoughtco.com/brain-4159438");
        let c = document_id("https://www.thoughtco.com/other-1234");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_insert_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let doc = article("https://example.com/a-1", "Alpha");
        assert!(store.insert(&doc).unwrap());

        let mut loaded = store.get_many(&[doc.id()]).unwrap();
        let loaded = loaded.remove(&doc.id()).unwrap();
        assert_eq!(loaded.title, "Alpha");
        assert_eq!(loaded.url, "https://example.com/a-1");
        assert_eq!(loaded.content, "Body of Alpha");
        assert!(store.get_many(&["missing".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn test_insert_is_immutable() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let doc = article("https://example.com/a-1", "Alpha");
        assert!(store.insert(&doc).unwrap());

        let changed = NewDocument {
            title: "Changed".to_string(),
            ..doc.clone()
        };
        assert!(!store.insert(&changed).unwrap());
        assert_eq!(store.get_many(&[doc.id()]).unwrap()[&doc.id()].title, "Alpha");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_many_skips_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = article("https://example.com/a-1", "Alpha");
        let b = article("https://example.com/b-2", "Beta");
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        let docs = store
            .get_many(&[a.id(), "missing".to_string(), b.id()])
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[&b.id()].title, "Beta");
    }

    #[test]
    fn test_titles_stats_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.insert(&article("https://example.com/b-2", "Beta")).unwrap();
        store.insert(&article("https://example.com/a-1", "Alpha")).unwrap();

        assert_eq!(store.titles().unwrap(), vec!["Beta", "Alpha"]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(
            stats.total_content_bytes,
            "Body of Beta".len() + "Body of Alpha".len()
        );

        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }
}
