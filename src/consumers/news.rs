use std::sync::Arc;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::Message;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CHUNK_OVERLAP, CHUNK_SIZE};
use crate::error::Result;
use crate::rag::chunker::chunk;
use crate::rag::embedder::Embedder;
use crate::rag::index::VectorIndex;
use crate::types::{ChunkMetadata, NewsArticle};

/// Consumes news.feed: chunk → embed → store, then commit.
///
/// One chunk's embedding failure skips that chunk only; sibling chunks still
/// land. Re-delivered articles are no-ops because the index is
/// insert-if-absent on (url, chunk_index).
pub struct NewsConsumer {
    consumer: StreamConsumer,
    embedder: Embedder,
    index: Arc<VectorIndex>,
}

impl NewsConsumer {
    pub fn new(consumer: StreamConsumer, embedder: Embedder, index: Arc<VectorIndex>) -> Self {
        Self { consumer, embedder, index }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("news consumer started");
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("news consumer drained, exiting");
                    return Ok(());
                }
                msg = self.consumer.recv() => msg?,
            };

            self.process(&msg).await?;
            self.consumer.commit_message(&msg, CommitMode::Sync)?;
        }
    }

    async fn process(&self, msg: &BorrowedMessage<'_>) -> Result<()> {
        let Some(payload) = msg.payload() else {
            warn!("empty news payload, skipping");
            return Ok(());
        };
        let raw: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("undecodable news payload, skipping: {e}");
                return Ok(());
            }
        };

        let Some(article) = parse_article(&raw) else {
            debug!("article without url or content, skipping");
            return Ok(());
        };

        // The title rides along in every chunk for retrieval relevance.
        let full_text = format!("{}\n\n{}", article.title, article.content);
        let chunks = chunk(&full_text, CHUNK_SIZE, CHUNK_OVERLAP);
        let metadata = ChunkMetadata {
            title: article.title.clone(),
            published_at: article.published_at.clone(),
            source_name: article.source_name.clone(),
            search_query: article.search_query.clone(),
        };

        let mut stored = 0usize;
        let mut skipped = 0usize;
        for (i, text) in chunks.iter().enumerate() {
            let vector = match self.embedder.embed(text).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(url = %article.url, chunk_index = i, "embedding failed, skipping chunk: {e}");
                    skipped += 1;
                    continue;
                }
            };
            if self.index.store(&article.url, i as i64, text, vector, &metadata).await? {
                stored += 1;
            }
        }

        info!(
            url = %article.url,
            chunks = chunks.len(),
            stored,
            skipped,
            "article processed: \"{}\"",
            truncate(&article.title, 50),
        );
        Ok(())
    }
}

/// Pull the fields we persist out of a raw news.feed message. None when the
/// article has no url or no usable text.
pub fn parse_article(raw: &Value) -> Option<NewsArticle> {
    let url = raw
        .get("url")
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())?
        .to_string();

    let content = raw
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .or_else(|| {
            raw.get("description")
                .and_then(|d| d.as_str())
                .filter(|d| !d.is_empty())
        })?
        .to_string();

    Some(NewsArticle {
        url,
        title: raw.get("title").and_then(|t| t.as_str()).unwrap_or("").to_string(),
        content,
        published_at: raw
            .get("publishedAt")
            .and_then(|p| p.as_str())
            .map(|p| p.to_string()),
        source_name: raw
            .get("source")
            .and_then(|s| s.get("name"))
            .and_then(|n| n.as_str())
            .map(|n| n.to_string()),
        search_query: raw
            .get("_search_query")
            .and_then(|q| q.as_str())
            .map(|q| q.to_string()),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
