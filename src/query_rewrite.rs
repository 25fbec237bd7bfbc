//! queryRewrite: folds recent history into a self-contained query so retrieval never
//! sees a bare anaphor ("there", "then", "how much"). Grounded in
//! `rag/nodes_preprocess.py::queryRewriteNode` / `_tryRuleBasedRewrite`.
//!
//! Three tiers, cheapest first: a handful of hand-written rewrite rules that need no
//! LLM call, a topic-switch/self-complete guard that skips rewriting altogether when
//! the current query is already its own topic, and only then a short LLM call.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{GENERAL_TOPICS, TOPIC_GROUPS};
use crate::error::LlmOutcome;
use crate::llm::{LlmClient, LlmOptions};
use crate::state::{HistoryMessage, PipelineRecord};

static HOTEL_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*(?:팰리스|부산|제주|레스케이프|그래비티)[^\]]*)\]").unwrap());

static FACILITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"([\w가-힣]+\s*(?:레스토랑|식당|카페|바|라운지|뷔페|다이닝))").unwrap(),
        Regex::new(r"((?:수영장|풀|피트니스|헬스|사우나|스파|키즈클럽|비즈니스\s*센터))").unwrap(),
        Regex::new(r"((?:조식|석식|런치|디너|브런치))").unwrap(),
    ]
});

static CONTEXT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^그럼\s*").unwrap(),
        Regex::new(r"^그러면\s*").unwrap(),
        Regex::new(r"^그래서\s*").unwrap(),
        Regex::new(r"^그것\s*").unwrap(),
        Regex::new(r"^그거\s*").unwrap(),
        Regex::new(r"^이것\s*").unwrap(),
        Regex::new(r"^이거\s*").unwrap(),
        Regex::new(r"^거기\s*").unwrap(),
        Regex::new(r"^위에\s*").unwrap(),
        Regex::new(r"^아까\s*").unwrap(),
        Regex::new(r"도\s*알려").unwrap(),
        Regex::new(r"는\s*어때").unwrap(),
        Regex::new(r"는\s*어떻게").unwrap(),
        Regex::new(r"^더\s*").unwrap(),
        Regex::new(r"^다른\s*").unwrap(),
        Regex::new(r"대략|대충|약|정도").unwrap(),
        Regex::new(r"할\s*수\s*있").unwrap(),
        Regex::new(r"되나요|돼나요").unwrap(),
        Regex::new(r"가능한가|가능해").unwrap(),
        Regex::new(r"안\s*되나|안\s*돼나").unwrap(),
        Regex::new(r"얼마|비용|가격").unwrap(),
        Regex::new(r"어디|위치|장소").unwrap(),
        Regex::new(r"몇\s*시|언제").unwrap(),
    ]
});

static THERE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^거기\s+(.+)").unwrap());
static GEUREOM_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^그럼\s+(.+)").unwrap());
static GEUREOMYEON_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^그러면\s+(.+)").unwrap());
static WHAT_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^몇\s*시").unwrap());
static HOW_MUCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^얼마").unwrap());
static WHERE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^어디").unwrap());
static WHEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^언제").unwrap());
static RESERVATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^예약").unwrap());
static REWRITE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(재작성된\s*질문[:\s]*|질문[:\s]*)").unwrap());

/// Extracts a prior subject (facility name or bracketed hotel name) by walking history
/// most-recent-first; the first message that yields a facility match stops the scan.
fn try_rule_based_rewrite(query: &str, history: &[HistoryMessage]) -> Option<String> {
    if history.is_empty() {
        return None;
    }

    let query_strip = query.trim();
    let mut prev_subject: Option<String> = None;
    let mut prev_hotel: Option<String> = None;

    for msg in history.iter().rev() {
        if msg.role == "assistant" {
            if let Some(m) = HOTEL_BRACKET.captures(&msg.content) {
                prev_hotel = Some(m.get(1).unwrap().as_str().to_string());
            }
            for fp in FACILITY_PATTERNS.iter() {
                if let Some(m) = fp.captures(&msg.content) {
                    prev_subject = Some(m.get(1).unwrap().as_str().trim().to_string());
                    break;
                }
            }
            if prev_subject.is_some() {
                break;
            }
        } else if msg.role == "user" {
            for fp in FACILITY_PATTERNS.iter() {
                if let Some(m) = fp.captures(&msg.content) {
                    prev_subject = Some(m.get(1).unwrap().as_str().trim().to_string());
                    break;
                }
            }
            if prev_subject.is_some() {
                break;
            }
        }
    }

    if prev_subject.is_none() && prev_hotel.is_none() {
        return None;
    }

    let subject = prev_subject.clone().or_else(|| prev_hotel.clone()).unwrap_or_default();

    if let Some(m) = THERE_PATTERN.captures(query_strip) {
        let place_subject = prev_hotel.clone().or_else(|| prev_subject.clone()).unwrap_or_default();
        return Some(format!("{place_subject} {}", &m[1]));
    }
    if let Some(m) = GEUREOM_PATTERN.captures(query_strip) {
        let rest = &m[1];
        return Some(match &prev_hotel {
            Some(h) => format!("{h} {rest}"),
            None => format!("{subject} {rest}"),
        });
    }
    if let Some(m) = GEUREOMYEON_PATTERN.captures(query_strip) {
        return Some(match &prev_hotel {
            Some(h) => format!("{h} {}", &m[1]),
            None => format!("{subject} {}", &m[1]),
        });
    }
    if WHAT_TIME.is_match(query_strip) {
        return Some(format!("{subject} 운영시간"));
    }
    if HOW_MUCH.is_match(query_strip) {
        return Some(format!("{subject} 가격"));
    }
    if WHERE.is_match(query_strip) {
        return Some(format!("{subject} 위치"));
    }
    if WHEN.is_match(query_strip) {
        return Some(format!("{subject} 운영시간"));
    }
    if RESERVATION.is_match(query_strip) {
        return Some(format!("{subject} 예약 방법"));
    }

    None
}

/// Classifies a query into its topic group, preferring concrete subjects (rooms,
/// dining, facilities...) over the general ones (location, transport, contact).
fn classify_topic(query_lower: &str) -> Option<&'static str> {
    let mut matched = Vec::new();
    for (topic, keywords) in TOPIC_GROUPS.iter() {
        if keywords.iter().any(|kw| query_lower.contains(kw)) {
            matched.push(*topic);
        }
    }
    let specific: Vec<&str> = matched.iter().copied().filter(|t| !GENERAL_TOPICS.contains(t)).collect();
    specific.first().copied().or_else(|| matched.first().copied())
}

async fn llm_rewrite(query: &str, history: &[HistoryMessage], llm: &LlmClient) -> (String, bool) {
    let start = history.len().saturating_sub(4);
    let recent = &history[start..];

    let mut history_text = String::new();
    for msg in recent {
        let role = if msg.role == "user" { "Q" } else { "A" };
        let content: String = msg.content.chars().take(150).collect();
        history_text.push_str(&format!("{role}: {content}\n"));
    }

    let system = "한국어 질문 재작성 전문가. 반드시 한국어로만 응답. 질문 1문장만 출력.";
    let prompt = format!(
        "[대화]\n{history_text}[현재 질문] {query}\n\n이전 대화의 주제(장소/서비스명)를 포함하여 완전한 질문으로 재작성하세요. 다른 주제면 원본 유지.\n재작성:"
    );

    let options = LlmOptions { temperature: 0.0, max_tokens: 60, num_ctx: 1024 };
    match llm.call(&prompt, system, options, None).await {
        LlmOutcome::Ok(text) => {
            let mut rewritten = text.trim().to_string();
            if rewritten.is_empty() || rewritten.chars().count() > 200 {
                rewritten = query.to_string();
            }
            rewritten = REWRITE_PREFIX.replace(&rewritten, "").trim().to_string();
            (rewritten, false)
        }
        LlmOutcome::Timeout | LlmOutcome::Failure(_) => (query.to_string(), true),
    }
}

/// Resolves anaphora and elliptical follow-ups into `rewritten_query`. On LLM failure,
/// sets `llm_failed` so downstream nodes skip further LLM calls.
pub async fn run(record: &mut PipelineRecord, llm: &LlmClient) {
    let query = record.query.clone();

    if record.history.is_empty() {
        record.rewritten_query = query;
        return;
    }

    let needs_rewrite =
        CONTEXT_PATTERNS.iter().any(|p| p.is_match(&query)) || query.trim().chars().count() < 20;

    if !needs_rewrite {
        record.rewritten_query = query;
        return;
    }

    if let Some(rule_result) = try_rule_based_rewrite(&query, &record.history) {
        record.rewritten_query = rule_result;
        return;
    }

    let query_lower = query.to_lowercase();
    if let Some(current_topic) = classify_topic(&query_lower) {
        let keywords = TOPIC_GROUPS.iter().find(|(t, _)| *t == current_topic).map(|(_, k)| k).unwrap();

        let mut history_topics = std::collections::HashSet::new();
        let recent_user: Vec<&HistoryMessage> =
            record.history.iter().rev().take(4).filter(|m| m.role == "user").collect();
        for msg in recent_user {
            let lower = msg.content.to_lowercase();
            for (topic, kws) in TOPIC_GROUPS.iter() {
                if kws.iter().any(|kw| lower.contains(kw)) {
                    history_topics.insert(*topic);
                }
            }
        }

        if history_topics.is_empty() || !history_topics.contains(current_topic) {
            record.rewritten_query = query;
            return;
        }

        if keywords.iter().any(|kw| query_lower.contains(kw)) {
            record.rewritten_query = query;
            return;
        }
    }

    let (rewritten, failed) = llm_rewrite(&query, &record.history, llm).await;
    record.rewritten_query = rewritten;
    record.llm_failed = failed;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_based_rewrite_there_pattern() {
        let history = vec![HistoryMessage::assistant("[그랜드 조선 부산] 아리아는 1층에 있습니다.")];
        let result = try_rule_based_rewrite("거기 메뉴는?", &history);
        assert!(result.unwrap().contains("메뉴는?"));
    }

    #[test]
    fn test_rule_based_rewrite_bare_time_question() {
        let history = vec![HistoryMessage::user("아리아 레스토랑 위치 알려줘")];
        let result = try_rule_based_rewrite("몇 시에 열어?", &history).unwrap();
        assert!(result.contains("아리아 레스토랑"));
        assert!(result.contains("운영시간"));
    }

    #[test]
    fn test_rule_based_rewrite_returns_none_without_subject() {
        let history = vec![HistoryMessage::user("안녕하세요")];
        assert!(try_rule_based_rewrite("몇 시에 열어?", &history).is_none());
    }

    #[test]
    fn test_classify_topic_prefers_specific_over_general() {
        let topic = classify_topic("레스토랑 위치가 어디야");
        assert_eq!(topic, Some("다이닝"));
    }

    #[tokio::test]
    async fn test_run_passes_through_when_no_history() {
        let mut record = PipelineRecord::new("체크인 시간".into(), None, vec![], None);
        let backend = crate::llm::OllamaBackend::new("http://localhost:11434", "test", "5m", 4);
        let llm = LlmClient::new(Box::new(backend), false);
        run(&mut record, &llm).await;
        assert_eq!(record.rewritten_query, "체크인 시간");
    }

    #[tokio::test]
    async fn test_run_skips_rewrite_on_topic_switch() {
        let history = vec![HistoryMessage::user("조식 시간 알려줘"), HistoryMessage::assistant("조식은 7시부터입니다.")];
        let mut record = PipelineRecord::new("수영장 운영시간 알려줘".into(), None, history, None);
        let backend = crate::llm::OllamaBackend::new("http://localhost:11434", "test", "5m", 4);
        let llm = LlmClient::new(Box::new(backend), false);
        run(&mut record, &llm).await;
        assert_eq!(record.rewritten_query, "수영장 운영시간 알려줘");
    }
}
