//! Cross-encoder rescoring with a per-(query, chunk-prefix) score cache and the
//! absolute/relative quality gates. Grounded in `rag/reranker.py`. Cross-encoder
//! inference itself is an external collaborator, consumed through a narrow capability
//! contract — this module owns the caching, normalization, and filtering around a
//! `CrossEncoder::score_pairs` call.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::korean::{any_keyword_matches, extract_query_keywords};
use crate::vector_index::Chunk;

pub const MIN_KEEP: usize = 2;
pub const RELATIVE_THRESHOLD: f32 = 0.35;
pub const SKIP_THRESHOLD: f32 = 0.90;
pub const ABSOLUTE_RAW_SCORE_FLOOR: f32 = -5.0;
const CACHE_CAPACITY: usize = 500;

/// The narrow capability contract a cross-encoder must satisfy: score each
/// (query, text) pair, higher meaning more relevant, raw (unnormalized) scores for the
/// absolute-floor check.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Vec<f32>;
}

/// Placeholder cross-encoder, kept only so this module is independently compilable and
/// testable. A real deployment wires in an actual cross-encoder inference call before
/// this reaches `Reranker::rerank`.
pub struct PlaceholderCrossEncoder;

#[async_trait]
impl CrossEncoder for PlaceholderCrossEncoder {
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Vec<f32> {
        vec![0.0; pairs.len()]
    }
}

struct ScoreCache {
    map: HashMap<String, f32>,
    order: VecDeque<String>,
}

impl ScoreCache {
    fn new() -> Self {
        Self { map: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&self, key: &str) -> Option<f32> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: String, score: f32) {
        if !self.map.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.map.insert(key, score);
        while self.map.len() > CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

fn chunk_cache_key(query: &str, text: &str) -> String {
    let prefix: String = text.chars().take(200).collect();
    let content = format!("{query}|{prefix}");
    format!("{:x}", md5::compute(content.as_bytes()))
}

pub struct Reranker {
    cross_encoder: Box<dyn CrossEncoder>,
    cache: Mutex<ScoreCache>,
}

impl Reranker {
    pub fn new(cross_encoder: Box<dyn CrossEncoder>) -> Self {
        Self { cross_encoder, cache: Mutex::new(ScoreCache::new()) }
    }

    /// Rescoring pass. Returns the filtered, rerank-sorted chunks plus whether the
    /// absolute raw-score floor was tripped (`evidenceGate` treats that as a hard fail
    /// regardless of the normalized scores).
    pub async fn rerank(&self, query: &str, chunks: Vec<Chunk>, top_k: usize) -> (Vec<Chunk>, bool) {
        if chunks.is_empty() {
            return (Vec::new(), false);
        }

        let mut raw_scores: Vec<Option<f32>> = Vec::with_capacity(chunks.len());
        let mut pairs_to_compute = Vec::new();
        let mut index_map = Vec::new();

        {
            let cache = self.cache.lock().await;
            for (i, chunk) in chunks.iter().enumerate() {
                let key = chunk_cache_key(query, &chunk.text);
                if let Some(score) = cache.get(&key) {
                    raw_scores.push(Some(score));
                } else {
                    raw_scores.push(None);
                    pairs_to_compute.push((query.to_string(), chunk.text.clone()));
                    index_map.push(i);
                }
            }
        }

        if !pairs_to_compute.is_empty() {
            let computed = self.cross_encoder.score_pairs(&pairs_to_compute).await;
            let mut cache = self.cache.lock().await;
            for (idx, score) in index_map.iter().zip(computed.into_iter()) {
                raw_scores[*idx] = Some(score);
                let key = chunk_cache_key(query, &chunks[*idx].text);
                cache.insert(key, score);
            }
        }

        let raw_scores: Vec<f32> = raw_scores.into_iter().map(|s| s.unwrap_or(0.0)).collect();

        let best_raw = raw_scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let is_low_quality = best_raw < ABSOLUTE_RAW_SCORE_FLOOR;

        let score_min = raw_scores.iter().copied().fold(f32::INFINITY, f32::min);
        let score_max = raw_scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let uniform = score_max - score_min <= 0.01;

        let mut scored: Vec<Chunk> = chunks
            .into_iter()
            .zip(raw_scores.iter())
            .map(|(mut chunk, &raw)| {
                let normalized = if uniform { 0.5 } else { (raw - score_min) / (score_max - score_min) };
                chunk.rerank_score = Some(normalized);
                chunk.rerank_raw = Some(raw);
                chunk.original_score = Some(chunk.score);
                chunk
            })
            .collect();

        scored.sort_by(|a, b| {
            b.rerank_score
                .unwrap_or(0.0)
                .partial_cmp(&a.rerank_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top_rerank_score = scored.first().and_then(|c| c.rerank_score).unwrap_or(0.0);
        let relative_threshold = top_rerank_score * RELATIVE_THRESHOLD;
        let query_keywords = extract_query_keywords(query);
        let keyword_refs: Vec<&str> = query_keywords.iter().map(String::as_str).collect();

        let mut filtered = Vec::new();
        for mut chunk in scored {
            let keep_by_score = chunk.rerank_score.unwrap_or(0.0) >= relative_threshold;
            let keep_by_min_keep = filtered.len() < MIN_KEEP;
            let keep_by_keyword = !keep_by_score
                && !keep_by_min_keep
                && !keyword_refs.is_empty()
                && any_keyword_matches(&chunk.text, &keyword_refs);

            if keep_by_score || keep_by_min_keep || keep_by_keyword {
                if keep_by_keyword {
                    chunk.kept_by_keyword = true;
                }
                filtered.push(chunk);
            }
        }

        filtered.truncate(top_k);
        (filtered, is_low_quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::ChunkMetadata;

    fn make_chunk(text: &str, score: f32) -> Chunk {
        Chunk {
            chunk_id: text.to_string(),
            metadata: ChunkMetadata {
                doc_id: "d".into(),
                hotel: "josun_palace".into(),
                hotel_name: "조선 팰리스".into(),
                page_type: "faq".into(),
                url: "https://example.com".into(),
                category: None,
                language: "ko".into(),
                updated_at: None,
                chunk_index: 0,
            },
            text: text.to_string(),
            score,
            rerank_score: None,
            rerank_raw: None,
            original_score: None,
            kept_by_keyword: false,
        }
    }

    struct FixedScores(Vec<f32>);

    #[async_trait]
    impl CrossEncoder for FixedScores {
        async fn score_pairs(&self, pairs: &[(String, String)]) -> Vec<f32> {
            self.0.iter().copied().take(pairs.len()).collect()
        }
    }

    #[tokio::test]
    async fn test_empty_chunks_returns_empty() {
        let reranker = Reranker::new(Box::new(PlaceholderCrossEncoder));
        let (result, poor) = reranker.rerank("조식 시간", vec![], 5).await;
        assert!(result.is_empty());
        assert!(!poor);
    }

    #[tokio::test]
    async fn test_low_quality_floor_trips_on_all_bad_scores() {
        let reranker = Reranker::new(Box::new(FixedScores(vec![-8.0, -9.0])));
        let chunks = vec![make_chunk("a", 0.5), make_chunk("b", 0.4)];
        let (_, poor) = reranker.rerank("조식 시간", chunks, 5).await;
        assert!(poor);
    }

    #[tokio::test]
    async fn test_min_keep_retains_at_least_two() {
        let reranker = Reranker::new(Box::new(FixedScores(vec![5.0, -4.0, -4.1, -4.2])));
        let chunks = vec![
            make_chunk("a", 0.9),
            make_chunk("b", 0.2),
            make_chunk("c", 0.1),
            make_chunk("d", 0.05),
        ];
        let (result, _) = reranker.rerank("질문", chunks, 5).await;
        assert!(result.len() >= MIN_KEEP);
    }

    #[tokio::test]
    async fn test_cache_hit_reuses_score() {
        let reranker = Reranker::new(Box::new(FixedScores(vec![3.0])));
        let chunks = vec![make_chunk("동일 텍스트", 0.5)];
        let (first, _) = reranker.rerank("질문", chunks.clone(), 5).await;
        assert_eq!(first[0].rerank_raw, Some(3.0));
        // second call with a cross encoder that would return a different score if invoked
        let reranker2 = Reranker::new(Box::new(FixedScores(vec![99.0])));
        reranker2.cache.lock().await.insert(chunk_cache_key("질문", "동일 텍스트"), 3.0);
        let (second, _) = reranker2.rerank("질문", chunks, 5).await;
        assert_eq!(second[0].rerank_raw, Some(3.0));
    }
}
