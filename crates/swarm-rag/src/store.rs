//! RAG Store (§4.2): persists (id, content, metadata, embedding) tuples
//! and answers top-k cosine-similarity queries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use serde_json::Value;
use swarm_core::{Document, Error, SearchHit};

use crate::embedding::EmbeddingProvider;

/// `stats()` response (§4.2).
#[derive(Debug, Clone)]
pub struct RagStats {
    pub count: usize,
    pub dimension: usize,
    pub backend: String,
}

/// Metadata predicate for `search`'s optional filter.
pub type MetadataFilter = dyn Fn(&HashMap<String, Value>) -> bool + Send + Sync;

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Persisted document store backed by SQLite, mirroring the
/// `Arc<Mutex<Connection>>` shape used elsewhere in this workspace for
/// small embedded-database tools. `dimension` is fixed for the store's
/// lifetime (§4.1's "chosen backend fixes d for the process lifetime");
/// opening a store whose persisted dimension disagrees with the
/// configured backend's is a hard failure rather than a silent
/// re-embed, per the Open Question decision to reject at open.
pub struct RagStore {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
    backend: String,
}

impl RagStore {
    /// Open (or create) a store at `path`. `dimension`/`backend` describe
    /// the currently configured embedding backend; if the store already
    /// has documents embedded at a different dimension, this fails with
    /// `embedding_dimension_mismatch` rather than opening in a state that
    /// would silently produce wrong similarity scores.
    pub fn open(path: impl Into<PathBuf>, dimension: usize, backend: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        let backend = backend.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage(format!("failed to create rag store directory: {e}")))?;
        }

        let conn = Connection::open(&path).map_err(|e| Error::storage(format!("failed to open rag store: {e}")))?;
        Self::init(conn, dimension, backend)
    }

    pub fn in_memory(dimension: usize, backend: impl Into<String>) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("failed to create in-memory rag store: {e}")))?;
        Self::init(conn, dimension, backend.into())
    }

    fn init(conn: Connection, dimension: usize, backend: String) -> Result<Self, Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::storage(format!("failed to create documents table: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .map_err(|e| Error::storage(format!("failed to create meta table: {e}")))?;

        let existing_dimension: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'dimension'", [], |row| row.get(0))
            .ok();

        match existing_dimension {
            Some(raw) => {
                let existing: usize = raw
                    .parse()
                    .map_err(|_| Error::storage("corrupt dimension value in rag store meta table"))?;
                if existing != dimension {
                    return Err(Error::embedding_dimension_mismatch(existing, dimension));
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('dimension', ?)",
                    params![dimension.to_string()],
                )
                .map_err(|e| Error::storage(e.to_string()))?;
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('backend', ?)",
            params![backend],
        )
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
            backend,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed and upsert `(id, content, metadata)` triples. All-or-nothing:
    /// if any computed embedding has the wrong dimension, nothing is
    /// written.
    pub async fn add(
        &self,
        embedding: &dyn EmbeddingProvider,
        items: Vec<(String, String, HashMap<String, Value>)>,
    ) -> Result<(), Error> {
        if items.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = items.iter().map(|(_, content, _)| content.clone()).collect();
        let vectors = embedding.embed(&texts).await?;

        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(Error::embedding_dimension_mismatch(self.dimension, vector.len()));
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let conn = self.conn.lock().unwrap();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::storage(format!("failed to start transaction: {e}")))?;
        for ((id, content, metadata), vector) in items.into_iter().zip(vectors.into_iter()) {
            let metadata_json = serde_json::to_string(&metadata)?;
            tx.execute(
                "INSERT OR REPLACE INTO documents (id, content, metadata, embedding, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![id, content, metadata_json, encode_embedding(&vector), now],
            )
            .map_err(|e| Error::storage(format!("failed to upsert document: {e}")))?;
        }
        tx.commit()
            .map_err(|e| Error::storage(format!("failed to commit rag store transaction: {e}")))?;

        Ok(())
    }

    /// Embed `query`, score every stored document by cosine similarity
    /// (a dot product, since embeddings are unit-normalized), keep those
    /// passing `filter`, and return the top `k` sorted by descending
    /// score with ties broken by ascending document id.
    pub async fn search(
        &self,
        embedding: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, Error> {
        let k = k.clamp(1, 100);
        let query_vectors = embedding.embed(std::slice::from_ref(&query.to_string())).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding_backend_unavailable("no embedding returned for query"))?;

        let rows = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT id, content, metadata, embedding, created_at FROM documents")
                .map_err(|e| Error::storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let content: String = row.get(1)?;
                    let metadata_json: String = row.get(2)?;
                    let embedding: Vec<u8> = row.get(3)?;
                    let created_at: i64 = row.get(4)?;
                    Ok((id, content, metadata_json, embedding, created_at))
                })
                .map_err(|e| Error::storage(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect::<Vec<_>>();
            rows
        };

        let mut hits: Vec<SearchHit> = Vec::new();
        for (id, content, metadata_json, embedding_bytes, created_at) in rows {
            let metadata: HashMap<String, Value> = serde_json::from_str(&metadata_json).unwrap_or_default();
            if let Some(f) = filter {
                if !f(&metadata) {
                    continue;
                }
            }
            let vector = decode_embedding(&embedding_bytes);
            let score = dot(&query_vector, &vector);
            let document = Document {
                id,
                content,
                metadata,
                embedding: vector,
                created_at: UNIX_EPOCH + std::time::Duration::from_secs(created_at.max(0) as u64),
            };
            hits.push(SearchHit { document, score });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Idempotent; returns whether a document was actually removed.
    pub fn delete(&self, id: &str) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?", params![id])
            .map_err(|e| Error::storage(format!("failed to delete document: {e}")))?;
        Ok(rows > 0)
    }

    pub fn stats(&self) -> Result<RagStats, Error> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(|e| Error::storage(e.to_string()))?;
        Ok(RagStats {
            count: count as usize,
            dimension: self.dimension,
            backend: self.backend.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::normalize;
    use async_trait::async_trait;

    struct FixedEmbeddingProvider {
        vectors: HashMap<String, Vec<f32>>,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddingProvider {
        fn backend(&self) -> &str {
            "fixed"
        }
        fn dimension(&self) -> Option<usize> {
            Some(self.dimension)
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = self
                        .vectors
                        .get(t)
                        .cloned()
                        .unwrap_or_else(|| vec![0.0; self.dimension]);
                    normalize(&mut v);
                    v
                })
                .collect())
        }
    }

    fn provider() -> FixedEmbeddingProvider {
        let mut vectors = HashMap::new();
        vectors.insert("cats".to_string(), vec![1.0, 0.0]);
        vectors.insert("dogs".to_string(), vec![0.0, 1.0]);
        vectors.insert("kittens".to_string(), vec![0.9, 0.1]);
        FixedEmbeddingProvider { vectors, dimension: 2 }
    }

    #[tokio::test]
    async fn test_add_and_search_ranks_by_cosine_similarity() {
        let store = RagStore::in_memory(2, "fixed").unwrap();
        let provider = provider();
        store
            .add(
                &provider,
                vec![
                    ("a".into(), "cats".into(), HashMap::new()),
                    ("b".into(), "dogs".into(), HashMap::new()),
                    ("c".into(), "kittens".into(), HashMap::new()),
                ],
            )
            .await
            .unwrap();

        let hits = store.search(&provider, "cats", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "a");
        assert_eq!(hits[1].document.id, "c");
    }

    #[tokio::test]
    async fn test_add_rejects_dimension_mismatch() {
        let store = RagStore::in_memory(3, "fixed").unwrap();
        let provider = provider();
        let result = store
            .add(&provider, vec![("a".into(), "cats".into(), HashMap::new())])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = RagStore::in_memory(2, "fixed").unwrap();
        let provider = provider();
        store
            .add(&provider, vec![("a".into(), "cats".into(), HashMap::new())])
            .await
            .unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
    }

    #[tokio::test]
    async fn test_stats_reports_count_and_dimension() {
        let store = RagStore::in_memory(2, "fixed").unwrap();
        let provider = provider();
        store
            .add(&provider, vec![("a".into(), "cats".into(), HashMap::new())])
            .await
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.dimension, 2);
        assert_eq!(stats.backend, "fixed");
    }

    #[test]
    fn test_open_rejects_dimension_change() {
        let dir = tempfile_dir();
        let path = dir.join("rag.sqlite");
        let _ = std::fs::remove_file(&path);
        {
            let _store = RagStore::open(&path, 2, "fixed").unwrap();
        }
        let reopened = RagStore::open(&path, 3, "fixed");
        assert!(reopened.is_err());
        let _ = std::fs::remove_file(&path);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("swarm-rag-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
