//! answerCompose: turns the top retrieved chunks into a natural-language answer whose
//! every sentence maps back to retrieved text. Grounded in
//! `rag/nodes_compose.py::answerComposeNode`; the merge/URL-label/cross-reference-hint
//! helpers that file calls (`_mergeChunkInfo`, `_extractUrlDetails`, `_buildCrossRefHint`,
//! `_checkContextSufficiency`) have no available source body, so these are authored
//! from their observed behavior rather than translated.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::hotel_name;
use crate::llm::{LlmClient, LlmOptions};
use crate::state::PipelineRecord;
use crate::verify::extract_direct_answer;
use crate::vector_index::Chunk;

const MAX_CONTEXT_CHUNKS: usize = 5;
const MAX_DIRECT_EXTRACT_CHUNKS: usize = 3;

/// Groups chunks by source URL, deduplicating sentences within a group while keeping
/// `Q:`/`A:` markers intact, and keeps the highest score (and its metadata) seen for
/// that URL. Resorts by score descending and keeps the top five.
fn merge_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut by_url: Vec<Chunk> = Vec::new();

    for chunk in chunks {
        if let Some(existing) = by_url.iter_mut().find(|c: &&mut Chunk| c.metadata.url == chunk.metadata.url) {
            let mut seen: HashSet<String> = existing
                .text
                .split(['\n', '.'])
                .map(|s| normalize_sentence(s))
                .collect();
            for sentence in chunk.text.split(['\n', '.']) {
                let normalized = normalize_sentence(sentence);
                if normalized.is_empty() || seen.contains(&normalized) {
                    continue;
                }
                seen.insert(normalized);
                existing.text.push('\n');
                existing.text.push_str(sentence.trim());
            }
            if chunk.score > existing.score {
                existing.score = chunk.score;
                existing.metadata = chunk.metadata;
            }
        } else {
            by_url.push(chunk);
        }
    }

    by_url.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    by_url.truncate(MAX_CONTEXT_CHUNKS);
    by_url
}

fn normalize_sentence(sentence: &str) -> String {
    sentence.trim().to_lowercase()
}

/// Produces a short page-type label plus hotel attribution for one chunk, used as a
/// reference hint line in the LLM system prompt.
fn url_label(chunk: &Chunk) -> String {
    let page_label = match chunk.metadata.page_type.as_str() {
        "dining" => "다이닝 페이지",
        "package" => "패키지 페이지",
        "location" => "위치 페이지",
        "faq" => "FAQ",
        "room" => "객실 페이지",
        "facility" => "시설 페이지",
        other if !other.is_empty() => "정보 페이지",
        _ => "페이지",
    };
    let hotel = if chunk.metadata.hotel_name.is_empty() { hotel_name(&chunk.metadata.hotel) } else { &chunk.metadata.hotel_name };
    if hotel.is_empty() {
        page_label.to_string()
    } else {
        format!("{hotel} {page_label}")
    }
}

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}").unwrap());
static PRICE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*\s*원").unwrap());
static QA_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[AQ]:").unwrap());

/// Classifies a chunk's information types for the cross-reference hint line: whether it
/// carries times, prices, bullet lists, a location line, policy language, a Q&A marker,
/// or is simply typed by its page_type.
fn classify_info_types(chunk: &Chunk) -> Vec<&'static str> {
    let mut types = Vec::new();
    if TIME_PATTERN.is_match(&chunk.text) {
        types.push("시간정보");
    }
    if PRICE_PATTERN.is_match(&chunk.text) {
        types.push("가격정보");
    }
    if chunk.text.lines().filter(|l| l.trim_start().starts_with(['-', '•', '*'])).count() >= 2 {
        types.push("목록");
    }
    if chunk.text.contains("위치") || chunk.text.contains("LOCATION") {
        types.push("위치정보");
    }
    if chunk.text.contains("정책") || chunk.text.contains("규정") {
        types.push("정책정보");
    }
    if QA_MARKER.is_match(&chunk.text) {
        types.push("FAQ");
    }
    if types.is_empty() {
        types.push(page_type_hint(&chunk.metadata.page_type));
    }
    types
}

fn page_type_hint(page_type: &str) -> &'static str {
    match page_type {
        "dining" => "다이닝",
        "package" => "패키지",
        _ => "일반정보",
    }
}

/// One guide line per reference nudging the model to integrate rather than pick one
/// reference wholesale.
fn build_cross_ref_hint(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] {} — {}", i + 1, url_label(chunk), classify_info_types(chunk).join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

static WHAT_QUESTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(무엇|뭐|어떤 것|어떤것)").unwrap());
static WHICH_RESTAURANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"어느\s*(레스토랑|식당)").unwrap());
static WHAT_MENU: Lazy<Regex> = Lazy::new(|| Regex::new(r"(무슨|어떤)\s*메뉴").unwrap());

/// True when the query asks an open-ended "what X / which restaurant / what menu"
/// question but no chunk carries any concrete, citable detail — times, prices,
/// proper-named facilities, or a Q&A marker.
fn context_insufficient(query: &str, chunks: &[Chunk]) -> bool {
    let is_open_ended =
        WHAT_QUESTION.is_match(query) || WHICH_RESTAURANT.is_match(query) || WHAT_MENU.is_match(query);
    if !is_open_ended {
        return false;
    }
    !chunks.iter().any(|c| {
        TIME_PATTERN.is_match(&c.text)
            || PRICE_PATTERN.is_match(&c.text)
            || QA_MARKER.is_match(&c.text)
            || PROPER_NAMED_FACILITY.is_match(&c.text)
    })
}

static PROPER_NAMED_FACILITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[가-힣A-Za-z]{2,}\s*(?:레스토랑|식당|라운지|풀|센터|카페|바|클럽|스파|사우나)").unwrap());

static REF_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[REF:([0-9,\s]+)\]").unwrap());
static CJK_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[一-鿿]").unwrap());
static REPEATED_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.]{4,}").unwrap());
static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static EXCESS_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// A handful of Chinese characters the model occasionally substitutes for a Korean
/// homophone or near-equivalent; scrubbed before the blanket CJK removal pass.
const CJK_SUBSTITUTIONS: &[(&str, &str)] = &[("的", "의"), ("和", "와"), ("不", ""), ("是", "")];

fn scrub_hallucinated_cjk(text: &str) -> String {
    let mut cleaned = text.to_string();
    for (from, to) in CJK_SUBSTITUTIONS {
        cleaned = cleaned.replace(from, to);
    }
    CJK_RANGE.replace_all(&cleaned, "").to_string()
}

fn normalize_punctuation(text: &str) -> String {
    let text = REPEATED_PUNCT.replace_all(text, "...");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    let text = EXCESS_SPACES.replace_all(&text, " ");
    text.trim().to_string()
}

/// Extracts `[REF:n,n,...]` markers as a source-URL list (resolved against `chunks`'
/// 1-based position) and strips the markers from the answer text.
fn parse_references(answer: &str, chunks: &[Chunk]) -> (String, Vec<String>) {
    let mut sources = Vec::new();
    for caps in REF_MARKER.captures_iter(answer) {
        for raw in caps[1].split(',') {
            if let Ok(idx) = raw.trim().parse::<usize>() {
                if idx >= 1 {
                    if let Some(chunk) = chunks.get(idx - 1) {
                        if !chunk.metadata.url.is_empty() && !sources.contains(&chunk.metadata.url) {
                            sources.push(chunk.metadata.url.clone());
                        }
                    }
                }
            }
        }
    }
    let cleaned = REF_MARKER.replace_all(answer, "").to_string();
    (cleaned, sources)
}

fn system_prompt(hotel: Option<&str>, cross_ref_hint: &str) -> String {
    let hotel_line = hotel
        .map(|h| format!("대상 호텔: {}\n", hotel_name(h)))
        .unwrap_or_default();
    format!(
        "당신은 조선호텔앤리조트 계열 호텔의 고객 응대 챗봇입니다.\n{hotel_line}\
아래 제공된 참고 자료만 근거로 답변하세요. 자료에 없는 고유명사, 교통편, 전화번호는 \
절대로 지어내지 마세요. 한국어 높임말로 완전한 문장을 사용하세요. 답변에 사용한 \
참고 자료 번호를 답변 끝에 [REF:1,2] 형식으로 표기하세요.\n\n참고 자료 안내:\n{cross_ref_hint}"
    )
}

fn build_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

const FALLBACK_NO_CONTEXT: &str = "죄송합니다, 해당 내용으로 정확한 정보를 찾을 수 없습니다. 호텔 대표번호로 문의 부탁드립니다.";

/// Runs the full answerCompose pipeline, writing `record.answer` and `record.sources`.
/// Called only when `record.evidence_passed` is true — the orchestrator short-circuits
/// straight to `policyFilter` otherwise.
pub async fn run(record: &mut PipelineRecord, llm: &LlmClient) {
    let merged = merge_chunks(record.retrieved_chunks.clone());

    if context_insufficient(&record.query, &merged) {
        record.answer = FALLBACK_NO_CONTEXT.to_string();
        record.sources = Vec::new();
        prepend_redirect(record);
        return;
    }

    let cross_ref_hint = build_cross_ref_hint(&merged);

    let (mut answer, mut sources) = if record.llm_failed {
        direct_extract_answer(&record.query, &merged, record.detected_hotel.as_deref())
    } else {
        let system = system_prompt(record.detected_hotel.as_deref(), &cross_ref_hint);
        let context = build_context(&merged);
        let prompt = format!("참고 자료:\n{context}\n\n질문: {}", record.query);
        let options = LlmOptions { temperature: 0.2, max_tokens: 700, num_ctx: llm.default_num_ctx() };

        match llm.call(&prompt, &system, options, None).await {
            crate::error::LlmOutcome::Ok(text) if !text.contains("temporary error") && !text.trim().is_empty() => {
                parse_references(&text, &merged)
            }
            _ => direct_extract_answer(&record.query, &merged, record.detected_hotel.as_deref()),
        }
    };

    answer = scrub_hallucinated_cjk(&answer);
    answer = normalize_punctuation(&answer);
    if sources.is_empty() {
        sources = merged
            .iter()
            .filter(|c| !c.metadata.url.is_empty())
            .map(|c| c.metadata.url.clone())
            .take(1)
            .collect();
    }

    record.answer = answer;
    record.sources = sources;
    prepend_redirect(record);
}

fn prepend_redirect(record: &mut PipelineRecord) {
    if let Some(msg) = &record.restaurant_redirect_msg {
        if !record.answer.starts_with(msg.as_str()) {
            record.answer = format!("{msg}\n\n{}", record.answer);
        }
    }
}

/// Direct-extraction fallback used when the LLM is unavailable or failed: walks up to
/// three top chunks and prefers a "Q: ... A: ..." block, else a structured-field bullet
/// list, else gives up on that chunk.
fn direct_extract_answer(query: &str, chunks: &[Chunk], hotel: Option<&str>) -> (String, Vec<String>) {
    for chunk in chunks.iter().take(MAX_DIRECT_EXTRACT_CHUNKS) {
        if let Some(extracted) = extract_direct_answer(&chunk.text, query) {
            let hotel_prefix = hotel
                .map(|h| format!("[{}] ", hotel_name(h)))
                .unwrap_or_default();
            let sources = if chunk.metadata.url.is_empty() { Vec::new() } else { vec![chunk.metadata.url.clone()] };
            return (format!("{hotel_prefix}{extracted}"), sources);
        }
    }
    (FALLBACK_NO_CONTEXT.to_string(), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::ChunkMetadata;

    fn chunk(url: &str, text: &str, score: f32) -> Chunk {
        Chunk {
            chunk_id: url.to_string(),
            metadata: ChunkMetadata {
                doc_id: "d".into(),
                hotel: "josun_palace".into(),
                hotel_name: "조선 팰리스".into(),
                page_type: "dining".into(),
                url: url.into(),
                category: Some("다이닝".into()),
                language: "ko".into(),
                updated_at: None,
                chunk_index: 0,
            },
            text: text.into(),
            score,
            rerank_score: None,
            rerank_raw: None,
            original_score: None,
            kept_by_keyword: false,
        }
    }

    #[test]
    fn test_merge_chunks_dedupes_by_url_and_keeps_best_score() {
        let chunks = vec![
            chunk("https://a", "운영시간은 7시부터입니다.", 0.6),
            chunk("https://a", "운영시간은 7시부터입니다.\n가격은 5만원입니다.", 0.8),
        ];
        let merged = merge_chunks(chunks);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].text.contains("가격"));
        assert_eq!(merged[0].score, 0.8);
    }

    #[test]
    fn test_context_insufficient_for_open_ended_without_concrete_detail() {
        let chunks = vec![chunk("https://a", "다양한 레스토랑을 이용하실 수 있습니다.", 0.5)];
        assert!(context_insufficient("어떤 레스토랑이 있나요", &chunks));
    }

    #[test]
    fn test_context_sufficient_when_chunk_has_qa_marker() {
        let chunks = vec![chunk("https://a", "Q: 메뉴가 뭔가요\nA: 뷔페입니다.", 0.5)];
        assert!(!context_insufficient("어떤 메뉴가 있나요", &chunks));
    }

    #[test]
    fn test_parse_references_resolves_urls_and_strips_marker() {
        let chunks = vec![chunk("https://a", "text", 0.9)];
        let (cleaned, sources) = parse_references("답변입니다. [REF:1]", &chunks);
        assert!(!cleaned.contains("REF"));
        assert_eq!(sources, vec!["https://a".to_string()]);
    }

    #[test]
    fn test_scrub_hallucinated_cjk_removes_remaining_range() {
        let cleaned = scrub_hallucinated_cjk("안녕하세요 的 测试 입니다");
        assert!(!cleaned.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c)));
    }
}
