//! VectorIndex: consumed as an external collaborator. This module defines the narrow
//! `search` contract plus a Qdrant-backed implementation, grounded in
//! `mira-chat/src/semantic.rs`'s `SemanticSearch` (connection setup, graceful
//! unavailable-mode, metadata round-tripping) but reshaped around a richer, typed
//! `Chunk` metadata struct instead of that file's loose `HashMap<String, Value>`
//! payload bag. Index construction and embedding-model internals are out of scope —
//! this is a pure consumer.

use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};

use crate::error::VectorIndexError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub hotel: String,
    pub hotel_name: String,
    pub page_type: String,
    pub url: String,
    pub category: Option<String>,
    pub language: String,
    pub updated_at: Option<String>,
    pub chunk_index: u32,
}

/// One retrievable text unit. Additive fields populated by the reranker
/// (`rerank_score`, `rerank_raw`, `original_score`) and by retrieve's keyword-scoring
/// path over cached chunks stay `None` until those stages run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub metadata: ChunkMetadata,
    pub text: String,
    pub score: f32,
    pub rerank_score: Option<f32>,
    pub rerank_raw: Option<f32>,
    pub original_score: Option<f32>,
    /// Set by the reranker when a chunk survives filtering only via the
    /// query-keyword fallback, for logging/diagnostics.
    pub kept_by_keyword: bool,
}

impl Chunk {
    pub fn category(&self) -> Option<&str> {
        self.metadata.category.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub hotel: Option<String>,
    pub category: Option<String>,
}

/// The narrow capability contract a vector index must satisfy: `search(query, hotel?,
/// category?, topK) -> [{chunkId, text, metadata, distance, score}]` where
/// `score = 1 - distance`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filter: SearchFilter,
        top_k: usize,
    ) -> Result<Vec<Chunk>, VectorIndexError>;

    fn is_available(&self) -> bool;
}

pub struct QdrantIndex {
    client: Option<Qdrant>,
    collection: String,
}

impl QdrantIndex {
    pub fn new(url: Option<&str>, collection: impl Into<String>) -> Self {
        let client = url.and_then(|u| {
            Qdrant::from_url(u)
                .timeout(HTTP_TIMEOUT)
                .skip_compatibility_check()
                .build()
                .map_err(|e| tracing::warn!("failed to build qdrant client: {e}"))
                .ok()
        });
        Self {
            client,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(
        &self,
        query: &str,
        filter: SearchFilter,
        top_k: usize,
    ) -> Result<Vec<Chunk>, VectorIndexError> {
        let Some(client) = &self.client else {
            return Err(VectorIndexError::Unavailable("qdrant client not configured".into()));
        };

        use qdrant_client::qdrant::{Condition, Filter, SearchPointsBuilder};

        let embedding = embed_placeholder(query);

        let mut qdrant_filter = Filter::default();
        if let Some(hotel) = &filter.hotel {
            qdrant_filter.must.push(Condition::matches("hotel", hotel.clone()));
        }
        if let Some(category) = &filter.category {
            qdrant_filter.must.push(Condition::matches("category", category.clone()));
        }

        let mut builder = SearchPointsBuilder::new(&self.collection, embedding, top_k as u64)
            .with_payload(true);
        if !qdrant_filter.must.is_empty() {
            builder = builder.filter(qdrant_filter);
        }

        let response = client
            .search_points(builder)
            .await
            .map_err(|e| VectorIndexError::Search(e.to_string()))?;

        let chunks = response
            .result
            .into_iter()
            .filter_map(|point| point_to_chunk(point))
            .collect();
        Ok(chunks)
    }

    fn is_available(&self) -> bool {
        self.client.is_some()
    }
}

fn point_to_chunk(point: qdrant_client::qdrant::ScoredPoint) -> Option<Chunk> {
    let payload = point.payload;
    let get_str = |k: &str| -> String {
        payload
            .get(k)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default()
    };
    let text = get_str("text");
    if text.is_empty() {
        return None;
    }
    Some(Chunk {
        chunk_id: get_str("chunk_id"),
        metadata: ChunkMetadata {
            doc_id: get_str("doc_id"),
            hotel: get_str("hotel"),
            hotel_name: get_str("hotel_name"),
            page_type: get_str("page_type"),
            url: get_str("url"),
            category: payload.get("category").and_then(|v| v.as_str()).map(str::to_string),
            language: get_str("language"),
            updated_at: payload.get("updated_at").and_then(|v| v.as_str()).map(str::to_string),
            chunk_index: payload
                .get("chunk_index")
                .and_then(|v| v.as_integer())
                .unwrap_or(0) as u32,
        },
        text,
        score: point.score,
        rerank_score: None,
        rerank_raw: None,
        original_score: None,
        kept_by_keyword: false,
    })
}

/// Embedding generation is an external collaborator — this crate does not own an
/// embedding model. A deployment wires a real embedding call in before this reaches
/// `search_points`; this placeholder keeps the module compilable standalone.
fn embed_placeholder(_query: &str) -> Vec<f32> {
    vec![0.0; 768]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_without_url() {
        let idx = QdrantIndex::new(None, "chunks");
        assert!(!idx.is_available());
    }

    #[test]
    fn test_chunk_category_accessor() {
        let chunk = Chunk {
            chunk_id: "c1".into(),
            metadata: ChunkMetadata {
                doc_id: "d1".into(),
                hotel: "josun_palace".into(),
                hotel_name: "조선 팰리스".into(),
                page_type: "dining".into(),
                url: "https://example.com".into(),
                category: Some("다이닝".into()),
                language: "ko".into(),
                updated_at: None,
                chunk_index: 0,
            },
            text: "text".into(),
            score: 0.9,
            rerank_score: None,
            rerank_raw: None,
            original_score: None,
            kept_by_keyword: false,
        };
        assert_eq!(chunk.category(), Some("다이닝"));
    }
}
