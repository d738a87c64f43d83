use std::sync::Arc;

use chrono::DateTime;
use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::ChunkRow;
use crate::db::now_ns;
use crate::error::Result;
use crate::rag::embedder::Embedder;
use crate::types::ChunkMetadata;

// ---------------------------------------------------------------------------
// Vector encoding + distance
// ---------------------------------------------------------------------------

/// Little-endian f32 bytes, the on-disk embedding representation.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine distance in [0,2]: 0 = same direction. Degenerate (zero-norm)
/// vectors rank last.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += *x as f64 * *x as f64;
        norm_b += *y as f64 * *y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ---------------------------------------------------------------------------
// VectorIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub source_url: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Chunk store with SQLite persistence and an in-memory mirror for
/// similarity queries. The mirror is hydrated once at open and kept in sync
/// by `store`; queries never touch the database.
pub struct VectorIndex {
    pool: SqlitePool,
    chunks: DashMap<(String, i64), Arc<StoredChunk>>,
}

impl VectorIndex {
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let rows = sqlx::query_as::<_, ChunkRow>("SELECT * FROM article_chunks")
            .fetch_all(&pool)
            .await?;

        let chunks = DashMap::new();
        for row in rows {
            let chunk = StoredChunk {
                source_url: row.source_url.clone(),
                chunk_index: row.chunk_index,
                content: row.content,
                embedding: decode_embedding(&row.embedding),
                metadata: ChunkMetadata {
                    title: row.title,
                    published_at: row.published_at,
                    source_name: row.source_name,
                    search_query: row.search_query,
                },
            };
            chunks.insert((row.source_url, row.chunk_index), Arc::new(chunk));
        }

        info!(hydrated = chunks.len(), "vector index ready");
        Ok(Self { pool, chunks })
    }

    /// Insert-if-absent on (source_url, chunk_index). Returns whether a new
    /// chunk was stored; re-ingesting a document is a no-op, not an error.
    pub async fn store(
        &self,
        source_url: &str,
        chunk_index: i64,
        content: &str,
        embedding: Vec<f32>,
        metadata: &ChunkMetadata,
    ) -> Result<bool> {
        let key = (source_url.to_string(), chunk_index);
        if self.chunks.contains_key(&key) {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO article_chunks
                (source_url, chunk_index, content, embedding,
                 title, published_at, source_name, search_query, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(source_url)
        .bind(chunk_index)
        .bind(content)
        .bind(encode_embedding(&embedding))
        .bind(&metadata.title)
        .bind(&metadata.published_at)
        .bind(&metadata.source_name)
        .bind(&metadata.search_query)
        .bind(now_ns())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.chunks.insert(
            key,
            Arc::new(StoredChunk {
                source_url: source_url.to_string(),
                chunk_index,
                content: content.to_string(),
                embedding,
                metadata: metadata.clone(),
            }),
        );
        Ok(true)
    }

    /// The k nearest chunks by ascending cosine distance; equal distances
    /// rank the most recently published first.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<(Arc<StoredChunk>, f64)> {
        let mut scored: Vec<(Arc<StoredChunk>, f64)> = self
            .chunks
            .iter()
            .map(|entry| {
                let chunk = Arc::clone(entry.value());
                let distance = cosine_distance(vector, &chunk.embedding);
                (chunk, distance)
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| published_ts(&b.0).cmp(&published_ts(&a.0)))
        });
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn published_ts(chunk: &StoredChunk) -> i64 {
    chunk
        .metadata
        .published_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(i64::MIN)
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Embeds a query and returns the top-k most similar stored chunks.
pub struct Retriever {
    embedder: Embedder,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<(Arc<StoredChunk>, f64)>> {
        let vector = self.embedder.embed(query).await?;
        Ok(self.index.query(&vector, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;

    fn meta(published_at: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            title: "t".to_string(),
            published_at: published_at.map(|s| s.to_string()),
            source_name: Some("Reuters".to_string()),
            search_query: None,
        }
    }

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }

    #[test]
    fn cosine_distance_of_orthogonal_vectors_is_one() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-9);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 2.0);
    }

    #[tokio::test]
    async fn query_ranks_by_ascending_distance() {
        let pool = connect(":memory:").await.unwrap();
        let index = VectorIndex::open(pool).await.unwrap();

        // Unit vectors at known angles from the query [1, 0]:
        // distance = 1 - cos(theta).
        let near = vec![0.9f32, (1.0f32 - 0.81).sqrt()]; // distance 0.1
        let far = vec![0.7f32, (1.0f32 - 0.49).sqrt()]; // distance 0.3
        let mid = vec![0.8f32, 0.6]; // distance 0.2

        index.store("u://a", 0, "near", near, &meta(None)).await.unwrap();
        index.store("u://b", 0, "far", far, &meta(None)).await.unwrap();
        index.store("u://c", 0, "mid", mid, &meta(None)).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.content, "near");
        assert_eq!(hits[1].0.content, "mid");
        assert!(hits[0].1 < hits[1].1);
    }

    #[tokio::test]
    async fn equal_distances_rank_most_recent_first() {
        let pool = connect(":memory:").await.unwrap();
        let index = VectorIndex::open(pool).await.unwrap();

        let v = vec![1.0f32, 0.0];
        index
            .store("u://old", 0, "old", v.clone(), &meta(Some("2026-08-01T00:00:00Z")))
            .await
            .unwrap();
        index
            .store("u://new", 0, "new", v.clone(), &meta(Some("2026-08-04T12:00:00Z")))
            .await
            .unwrap();

        let hits = index.query(&v, 2);
        assert_eq!(hits[0].0.content, "new");
        assert_eq!(hits[1].0.content, "old");
    }

    #[tokio::test]
    async fn reingesting_a_chunk_is_a_no_op() {
        let pool = connect(":memory:").await.unwrap();
        let index = VectorIndex::open(pool.clone()).await.unwrap();

        let inserted = index
            .store("u://a", 0, "first", vec![1.0, 0.0], &meta(None))
            .await
            .unwrap();
        assert!(inserted);
        let repeated = index
            .store("u://a", 0, "changed", vec![0.0, 1.0], &meta(None))
            .await
            .unwrap();
        assert!(!repeated);
        assert_eq!(index.len(), 1);

        let content: String =
            sqlx::query_scalar("SELECT content FROM article_chunks WHERE source_url = 'u://a'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(content, "first");
    }

    #[tokio::test]
    async fn reopen_hydrates_persisted_chunks() {
        let pool = connect(":memory:").await.unwrap();
        {
            let index = VectorIndex::open(pool.clone()).await.unwrap();
            index
                .store("u://a", 0, "persisted", vec![1.0, 0.0], &meta(None))
                .await
                .unwrap();
        }

        let reopened = VectorIndex::open(pool).await.unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.query(&[1.0, 0.0], 1);
        assert_eq!(hits[0].0.content, "persisted");
    }
}
