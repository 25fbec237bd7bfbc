//! retrieve + evidenceGate: searches the vector index for a hotel/category-scoped set
//! of chunks, reranks them, and decides whether the result is strong enough evidence to
//! compose an answer from. Grounded in `rag/nodes_retrieve.py`.

use crate::constants::{hotel_name, HOTEL_KEYWORDS, RETRIEVE_TOPIC_PRIORITY, SYNONYM_DICT, TOPIC_REINFORCEMENT};
use crate::reranker::{Reranker, SKIP_THRESHOLD};
use crate::state::{HistoryMessage, PipelineRecord, PipelineSettings, RerankQuality};
use crate::vector_index::{Chunk, SearchFilter, VectorIndex};

const TOP_K: usize = 5;

/// Drops a detected hotel's own name out of the search query; vector search scores
/// worse, not better, when a proper noun dominates a short query. Falls back to the
/// original query if stripping would leave fewer than 3 characters behind.
fn strip_hotel_name(query: &str, hotel: Option<&str>) -> String {
    let Some(hotel) = hotel else { return query.to_string() };
    let Some(aliases) = HOTEL_KEYWORDS.get(hotel) else { return query.to_string() };

    let mut sorted: Vec<&str> = aliases.clone();
    sorted.sort_by_key(|a| std::cmp::Reverse(a.chars().count()));

    for alias in sorted {
        if query.to_lowercase().contains(&alias.to_lowercase()) {
            let idx = query.to_lowercase().find(&alias.to_lowercase()).unwrap();
            let mut stripped = String::with_capacity(query.len());
            stripped.push_str(&query[..idx]);
            stripped.push_str(&query[idx + alias.len().min(query.len() - idx)..]);
            let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
            if stripped.chars().count() >= 3 {
                return stripped;
            }
            return query.to_string();
        }
    }
    query.to_string()
}

/// Scans the last three user turns, most recent first, against a fixed topic-keyword
/// priority list (breakfast before dining before pool...). The first message with any
/// match wins.
fn extract_conversation_topic(history: &[HistoryMessage]) -> Option<&'static str> {
    let recent_user: Vec<&HistoryMessage> =
        history.iter().rev().filter(|m| m.role == "user").take(3).collect();

    for msg in recent_user {
        let lower = msg.content.to_lowercase();
        for (topic, keywords) in RETRIEVE_TOPIC_PRIORITY {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                return Some(topic);
            }
        }
    }
    None
}

/// Appends up to three synonym expansions, one per matched dictionary key, skipping any
/// key whose synonyms already appear in the query.
fn expand_query(query: &str) -> String {
    let mut expanded = query.to_string();
    let mut appended = 0;
    let lower = query.to_lowercase();

    for (key, synonyms) in SYNONYM_DICT.iter() {
        if appended >= 3 {
            break;
        }
        if !lower.contains(key) {
            continue;
        }
        if synonyms.iter().any(|s| lower.contains(&s.to_lowercase())) {
            continue;
        }
        if let Some(longest) = synonyms.iter().max_by_key(|s| s.chars().count()) {
            expanded.push(' ');
            expanded.push_str(longest);
            appended += 1;
        }
    }
    expanded
}

/// Keyword-overlap scoring over a session's cached chunks, used as a fast first pass
/// before the vector index is consulted again for the same topic.
fn search_cached_chunks(cached: &[Chunk], query: &str) -> Vec<Chunk> {
    let keywords = crate::korean::extract_query_keywords(query);
    if keywords.is_empty() {
        return Vec::new();
    }
    let keyword_refs: Vec<&str> = keywords.iter().map(String::as_str).collect();

    let mut scored: Vec<Chunk> = cached
        .iter()
        .filter_map(|chunk| {
            let hits = keyword_refs.iter().filter(|kw| chunk.text.contains(*kw)).count();
            if hits == 0 {
                return None;
            }
            let mut c = chunk.clone();
            c.score = hits as f32 / keyword_refs.len() as f32;
            Some(c)
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Merges cached-chunk and fresh-search results by `chunk_id`, keeping the higher score
/// for any duplicate, sorted by score descending.
fn merge_results(cached: Vec<Chunk>, fresh: Vec<Chunk>) -> Vec<Chunk> {
    let mut by_id: std::collections::HashMap<String, Chunk> = std::collections::HashMap::new();
    for chunk in cached.into_iter().chain(fresh.into_iter()) {
        by_id
            .entry(chunk.chunk_id.clone())
            .and_modify(|existing| {
                if chunk.score > existing.score {
                    *existing = chunk.clone();
                }
            })
            .or_insert(chunk);
    }
    let mut merged: Vec<Chunk> = by_id.into_values().collect();
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

/// Searches, boosts, reranks, and records `retrieved_chunks`/`top_score`/
/// `rerank_quality`/`conversation_topic`/`effective_category`.
pub async fn run(
    record: &mut PipelineRecord,
    index: &dyn VectorIndex,
    reranker: &Reranker,
    settings: &PipelineSettings,
) {
    let query = record.normalized_query.clone();
    let mut search_query = strip_hotel_name(&query, record.detected_hotel.as_deref());

    // Session-held topic fallback when history is non-empty but no extraction matched.
    let mut conversation_topic = extract_conversation_topic(&record.history).map(str::to_string);
    let mut session_current_topic: Option<String> = None;
    let mut session_current_hotel: Option<String> = None;
    let mut session_last_chunks: Vec<Chunk> = Vec::new();
    if let Some(ctx) = &record.session_context {
        let guard = ctx.lock().await;
        session_current_topic = guard.current_topic.clone();
        session_current_hotel = guard.current_hotel.clone();
        session_last_chunks = guard.last_chunks.clone();
    }
    if conversation_topic.is_none() && !record.history.is_empty() {
        conversation_topic = session_current_topic.clone();
    }

    // Effective category filter is dropped only when the query is a follow-up (history
    // present) AND the detected category diverges from the ongoing conversation topic —
    // a follow-up that stays on the same topic keeps its category filter.
    let effective_category = if record.history.is_empty()
        || record.detected_category.as_deref() == conversation_topic.as_deref()
    {
        record.detected_category.clone()
    } else {
        None
    };

    // Query-boost: reinforce the query with the topic's canonical phrase when the
    // session is actively continuing the same topic and no explicit category narrowed
    // it already.
    if let (Some(topic), true, true) = (
        conversation_topic.as_deref(),
        !record.history.is_empty(),
        effective_category.is_none(),
    ) {
        if session_current_topic.as_deref() == Some(topic) {
            if let Some(reinforcement) = TOPIC_REINFORCEMENT.get(topic) {
                let words: Vec<&str> = search_query.split_whitespace().collect();
                if !words.contains(reinforcement) {
                    search_query = format!("{search_query} {reinforcement}");
                }
            }
        }
    }

    let cached_results = if !session_last_chunks.is_empty()
        && !record.history.is_empty()
        && conversation_topic.is_some()
        && conversation_topic == session_current_topic
    {
        search_cached_chunks(&session_last_chunks, &search_query)
    } else {
        Vec::new()
    };

    let expanded_query = expand_query(&search_query);

    let use_cache_only = cached_results.len() >= 2 && cached_results.first().map(|c| c.score >= 0.7).unwrap_or(false);

    let mut results = if use_cache_only {
        cached_results.clone()
    } else {
        let filter = SearchFilter {
            hotel: record.detected_hotel.clone().or(session_current_hotel),
            category: effective_category.clone(),
        };
        let fresh = index.search(&expanded_query, filter, TOP_K).await.unwrap_or_default();
        if !cached_results.is_empty() {
            merge_results(cached_results, fresh)
        } else {
            fresh
        }
    };

    if results.len() < 2 && effective_category.is_some() {
        let fallback_filter =
            SearchFilter { hotel: record.detected_hotel.clone(), category: None };
        let fallback = index.search(&expanded_query, fallback_filter, TOP_K).await.unwrap_or_default();
        if fallback.len() > results.len() {
            results = fallback;
        }
    }

    let pre_rerank_top_score = results.iter().map(|c| c.score).fold(0.0f32, f32::max);
    let mut rerank_quality = RerankQuality::Ok;

    if settings.reranker_enabled && results.len() >= 2 {
        if pre_rerank_top_score >= SKIP_THRESHOLD {
            rerank_quality = RerankQuality::Skipped;
        } else {
            let (reranked, is_poor) = reranker.rerank(&search_query, results, TOP_K).await;
            results = reranked;
            if is_poor {
                rerank_quality = RerankQuality::Poor;
            }
            for chunk in results.iter_mut() {
                if let Some(original) = chunk.original_score {
                    chunk.score = original;
                }
            }
        }
    }

    let top_score = results.iter().map(|c| c.score).fold(0.0f32, f32::max);

    record.retrieved_chunks = results;
    record.top_score = top_score;
    record.rerank_quality = rerank_quality;
    record.conversation_topic = conversation_topic;
    record.effective_category = effective_category;
}

/// The four-way evidence check: an invalid query or a poor rerank always fails
/// regardless of score; otherwise both enough chunks and a high-enough top score are
/// required.
pub fn evidence_gate(record: &mut PipelineRecord, settings: &PipelineSettings) {
    if !record.is_valid_query {
        record.evidence_passed = false;
        record.evidence_reason = Some("호텔 관련 질문이 아닙니다.".into());
        return;
    }

    if record.rerank_quality == RerankQuality::Poor {
        record.evidence_passed = false;
        record.evidence_reason = Some("검색 결과의 의미적 관련성이 낮습니다. (리랭커 품질: poor)".into());
        return;
    }

    let has_enough_chunks = record.retrieved_chunks.len() >= settings.min_chunks_required;
    let has_good_score = record.top_score >= settings.evidence_gate_threshold;
    let passed = has_enough_chunks && has_good_score;

    record.evidence_reason = Some(if !has_enough_chunks {
        "관련 정보를 찾을 수 없습니다.".to_string()
    } else if !has_good_score {
        format!("검색 결과의 관련성이 낮습니다. (점수: {:.2})", record.top_score)
    } else {
        "근거 검증 통과".to_string()
    });
    record.evidence_passed = passed;
}

#[allow(dead_code)]
fn hotel_display(hotel: Option<&str>) -> String {
    hotel.map(hotel_name).unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::ChunkMetadata;
    use async_trait::async_trait;

    fn make_chunk(id: &str, text: &str, score: f32) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            metadata: ChunkMetadata {
                doc_id: id.to_string(),
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

    struct FixedIndex(Vec<Chunk>);

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn search(
            &self,
            _query: &str,
            _filter: SearchFilter,
            _top_k: usize,
        ) -> Result<Vec<Chunk>, crate::error::VectorIndexError> {
            Ok(self.0.clone())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_strip_hotel_name_removes_alias() {
        let result = strip_hotel_name("그랜드 조선 부산 조식 시간", Some("grand_josun_busan"));
        assert!(!result.contains("그랜드 조선 부산"));
        assert!(result.contains("조식"));
    }

    #[test]
    fn test_strip_hotel_name_falls_back_when_residual_too_short() {
        let result = strip_hotel_name("그랜드 조선 부산", Some("grand_josun_busan"));
        assert_eq!(result, "그랜드 조선 부산");
    }

    #[test]
    fn test_expand_query_appends_synonym() {
        let expanded = expand_query("조식 시간 알려줘");
        assert!(expanded.contains("아침식사") || expanded.contains("모닝뷔페"));
    }

    #[test]
    fn test_extract_conversation_topic_prefers_most_recent() {
        let history =
            vec![HistoryMessage::user("조식 시간 알려줘"), HistoryMessage::user("수영장 운영시간은?")];
        assert_eq!(extract_conversation_topic(&history), Some("수영장"));
    }

    #[tokio::test]
    async fn test_evidence_gate_fails_on_invalid_query() {
        let mut record = PipelineRecord::new("질문".into(), None, vec![], None);
        record.is_valid_query = false;
        evidence_gate(&mut record, &PipelineSettings::default());
        assert!(!record.evidence_passed);
    }

    #[tokio::test]
    async fn test_evidence_gate_fails_on_low_score() {
        let mut record = PipelineRecord::new("질문".into(), None, vec![], None);
        record.retrieved_chunks = vec![make_chunk("c1", "text", 0.1)];
        record.top_score = 0.1;
        evidence_gate(&mut record, &PipelineSettings::default());
        assert!(!record.evidence_passed);
    }

    #[tokio::test]
    async fn test_evidence_gate_passes_on_good_score() {
        let mut record = PipelineRecord::new("질문".into(), None, vec![], None);
        record.retrieved_chunks = vec![make_chunk("c1", "text", 0.8)];
        record.top_score = 0.8;
        evidence_gate(&mut record, &PipelineSettings::default());
        assert!(record.evidence_passed);
    }

    #[tokio::test]
    async fn test_retrieve_populates_chunks_from_index() {
        let mut record = PipelineRecord::new("조식 시간 알려줘".into(), None, vec![], None);
        record.normalized_query = record.query.clone();
        let index = FixedIndex(vec![make_chunk("c1", "조식은 7시부터입니다", 0.8)]);
        let reranker = Reranker::new(Box::new(crate::reranker::PlaceholderCrossEncoder));
        let settings = PipelineSettings { reranker_enabled: false, ..Default::default() };
        run(&mut record, &index, &reranker, &settings).await;
        assert_eq!(record.retrieved_chunks.len(), 1);
        assert!(record.top_score > 0.0);
    }

    #[tokio::test]
    async fn test_effective_category_kept_on_followup_matching_topic() {
        let history = vec![HistoryMessage::user("조식 시간 알려줘")];
        let mut record = PipelineRecord::new("가격은 얼마예요".into(), None, history, None);
        record.normalized_query = record.query.clone();
        record.detected_category = Some("조식".to_string());
        let index = FixedIndex(vec![make_chunk("c1", "조식은 7시부터입니다", 0.8)]);
        let reranker = Reranker::new(Box::new(crate::reranker::PlaceholderCrossEncoder));
        let settings = PipelineSettings { reranker_enabled: false, ..Default::default() };
        run(&mut record, &index, &reranker, &settings).await;
        assert_eq!(record.effective_category.as_deref(), Some("조식"));
    }

    #[tokio::test]
    async fn test_effective_category_dropped_on_followup_diverging_topic() {
        let history = vec![HistoryMessage::user("조식 시간 알려줘")];
        let mut record = PipelineRecord::new("가격은 얼마예요".into(), None, history, None);
        record.normalized_query = record.query.clone();
        record.detected_category = Some("수영장".to_string());
        let index = FixedIndex(vec![make_chunk("c1", "조식은 7시부터입니다", 0.8)]);
        let reranker = Reranker::new(Box::new(crate::reranker::PlaceholderCrossEncoder));
        let settings = PipelineSettings { reranker_enabled: false, ..Default::default() };
        run(&mut record, &index, &reranker, &settings).await;
        assert_eq!(record.effective_category, None);
    }
}
