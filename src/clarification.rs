//! clarificationCheck: decides whether the query is specific enough to retrieve
//! against, or whether the assistant should ask a narrowing question first. Grounded in
//! `rag/nodes_preprocess.py::clarificationCheckNode`. Eight ordered checks, first match
//! wins; everything here reads `record.query` (the caller's original text) for
//! ambiguity judgments and `record.normalized_query` for context-boosted checks, since
//! the LLM rewrite must never manufacture or defuse ambiguity it didn't create.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::constants::{hotel_name, AMBIGUOUS_PATTERNS, CONTEXT_CLARIFICATION};
use crate::state::{PipelineRecord, RestaurantAction};

const CONTEXT_SPECIFIC_TARGETS: &[&str] = &[
    "객실", "방", "투숙", "숙박", "레스토랑", "다이닝", "로비", "수영장", "풀", "피트니스", "스파",
    "사우나", "정책", "규정", "패키지", "프로모션", "혜택", "비용", "요금", "가격", "얼마", "무게",
    "kg", "킬로",
];

const SPECIFIC_TARGETS: &[&str] = &[
    "체크인", "체크아웃", "조식", "아침식사", "아침밥", "아침", "브런치", "중식", "점심", "석식",
    "저녁", "뷔페", "수영장", "풀", "피트니스", "헬스", "운동", "스파", "마사지", "사우나", "찜질",
    "레스토랑", "다이닝", "라운지", "키즈", "연회", "객실", "방", "주차", "발렛", "와이파이", "세탁",
    "컨시어지", "룸서비스", "홍연", "아리아", "콘스탄스", "팔레", "취소", "환불", "취소정책",
    "환불정책", "노쇼", "정책", "규정", "투숙", "숙박", "묵", "예약", "패키지", "프로모션", "혜택",
    "할인", "이벤트", "특가", "반려동물", "애견", "강아지", "펫", "어린이", "키즈클럽",
];

const TRANSPORT_DISCARD_SUBJECTS: &[&str] = &["호텔", "숙소", "리조트", "호텔로", "호텔까지", "호텔에"];

const GENERIC_WORDS: &[&str] = &[
    "운영", "이용", "시설", "서비스", "정보", "안내", "문의", "호텔", "여기", "거기", "저기", "뭐",
    "무엇", "어떻게", "얼마", "그것", "이것", "그거", "이거", "좀", "혹시", "그런데", "알려줘", "알려",
    "해줘", "보여줘", "말해줘", "찾아줘", "가르쳐줘", "알고", "싶어", "싶어요", "싶은데", "궁금",
    "궁금해", "있나", "없나", "하고", "싶다", "있어", "없어", "될까", "되나",
];

static PARTICLE_ENDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(에서|인가요|나요|은|는|이|가|의|에|를|을|도|만|야|요|까|어요|해|돼|되)$").unwrap());

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s가-힣]").unwrap());

fn extract_subject_entity(query: &str, matched_keywords: &[&str]) -> Option<String> {
    let mut working = query.to_lowercase();
    for kw in matched_keywords {
        working = working.replace(kw, "");
    }
    let normalized = PUNCTUATION.replace_all(&working, " ").to_string();

    normalized
        .split_whitespace()
        .map(|w| PARTICLE_ENDING.replace(w, "").to_string())
        .filter(|w| w.chars().count() >= 2 && !GENERIC_WORDS.contains(&w.as_str()))
        .max_by_key(|w| w.chars().count())
}

fn transport_is_ambiguous(original_lower: &str) -> bool {
    let Some(pattern) = AMBIGUOUS_PATTERNS.get("교통") else { return false };
    let matched = pattern.keywords.iter().any(|kw| original_lower.contains(kw));
    let excluded = pattern.excludes.iter().any(|ex| original_lower.contains(ex));
    matched && !excluded
}

/// Runs the eight-step clarification check, short-circuiting the pipeline on any branch
/// that produces a clarifying question.
pub fn run(record: &mut PipelineRecord) {
    let original_query = record.query.trim().to_string();
    let original_lower = original_query.to_lowercase();
    let context_query = if !record.normalized_query.is_empty() {
        record.normalized_query.clone()
    } else if !record.rewritten_query.is_empty() {
        record.rewritten_query.clone()
    } else {
        record.query.clone()
    };
    let context_lower = context_query.to_lowercase();

    let hotel_prefix = |hotel: &Option<String>| -> String {
        match hotel {
            Some(h) => format!("[{}] ", hotel_name(h)),
            None => String::new(),
        }
    };

    // 1. Entity clarification short-circuits before anything else.
    if record.restaurant_entity.action == Some(RestaurantAction::Clarify) {
        let msg = record.restaurant_redirect_msg.clone().unwrap_or_default();
        record.needs_clarification = true;
        record.clarification_question = Some(msg.clone());
        record.clarification_options = record.restaurant_entity.clarify_options.clone();
        record.clarification_type = Some("restaurant_entity".into());
        record.evidence_passed = true;
        record.final_answer = msg;
        return;
    }

    // 2. Loop prevention: if a prior assistant turn already asked one of the context
    // questions, and the current query answers that same context, proceed without
    // re-asking.
    let mut previous_contexts: HashSet<&str> = HashSet::new();
    for msg in &record.history {
        if msg.role != "assistant" {
            continue;
        }
        for (key, cc) in CONTEXT_CLARIFICATION.iter() {
            if msg.content.contains(cc.question) {
                previous_contexts.insert(key);
            }
        }
    }
    for key in &previous_contexts {
        if let Some(cc) = CONTEXT_CLARIFICATION.get(*key) {
            if cc.keywords.iter().any(|kw| context_lower.contains(kw)) {
                record.needs_clarification = false;
                record.detected_context = Some((*key).to_string());
                return;
            }
        }
    }

    // 3. Context + a concrete target already present: proceed.
    for (key, cc) in CONTEXT_CLARIFICATION.iter() {
        let context_matches = cc.keywords.iter().any(|kw| context_lower.contains(kw));
        if context_matches && CONTEXT_SPECIFIC_TARGETS.iter().any(|t| context_lower.contains(t)) {
            record.needs_clarification = false;
            record.detected_context = Some((*key).to_string());
            return;
        }
    }

    // 4/5. Context with or without a direct trigger.
    for (key, cc) in CONTEXT_CLARIFICATION.iter() {
        let context_matches = cc.keywords.iter().any(|kw| context_lower.contains(kw));
        if !context_matches {
            continue;
        }
        if cc.direct_triggers.iter().any(|t| context_lower.contains(t)) {
            record.needs_clarification = false;
            record.detected_context = Some((*key).to_string());
            return;
        }
        let question = format!("{}{}", hotel_prefix(&record.detected_hotel), cc.question);
        record.needs_clarification = true;
        record.clarification_question = Some(question.clone());
        record.clarification_options = cc.options.iter().map(|s| s.to_string()).collect();
        record.clarification_type = Some((*key).to_string());
        record.evidence_passed = true;
        record.final_answer = question;
        return;
    }

    // 6. Specific-target short-circuit, deferring to transport disambiguation.
    let is_transport_ambiguous = transport_is_ambiguous(&original_lower);
    let has_specific_target = SPECIFIC_TARGETS.iter().any(|t| context_lower.contains(t));
    if has_specific_target && !is_transport_ambiguous {
        record.needs_clarification = false;
        return;
    }

    // 7. Ambiguous pattern with subject extraction; first qualifying pattern wins.
    for pattern_key in ["교통", "시간", "가격"] {
        let Some(pattern) = AMBIGUOUS_PATTERNS.get(pattern_key) else { continue };
        let excluded = pattern
            .excludes
            .iter()
            .any(|ex| original_lower.contains(ex) || context_lower.contains(ex));
        if excluded {
            continue;
        }
        let matched_keywords: Vec<&str> =
            pattern.keywords.iter().copied().filter(|kw| original_lower.contains(kw)).collect();
        if matched_keywords.is_empty() {
            continue;
        }

        let mut subject = extract_subject_entity(&original_query, &matched_keywords);
        if pattern_key == "교통" {
            if let Some(s) = &subject {
                if TRANSPORT_DISCARD_SUBJECTS.contains(&s.as_str()) {
                    subject = None;
                }
            }
        }

        if subject.is_some() {
            record.needs_clarification = false;
            return;
        }

        let question = format!("{}{}", hotel_prefix(&record.detected_hotel), pattern.question);
        record.needs_clarification = true;
        record.clarification_question = Some(question.clone());
        record.clarification_options = pattern.options.iter().map(|s| s.to_string()).collect();
        record.clarification_type = Some(pattern_key.to_string());
        record.evidence_passed = true;
        record.final_answer = question;
        return;
    }

    record.needs_clarification = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess;
    use crate::state::HistoryMessage;

    #[test]
    fn test_specific_target_proceeds_without_clarification() {
        let mut record = PipelineRecord::new("조식 시간 알려줘".into(), None, vec![], None);
        preprocess::run(&mut record);
        run(&mut record);
        assert!(!record.needs_clarification);
    }

    #[test]
    fn test_ambiguous_transport_without_subject_asks_clarification() {
        let mut record = PipelineRecord::new("오시는 길 알려줘".into(), None, vec![], None);
        preprocess::run(&mut record);
        run(&mut record);
        assert!(record.needs_clarification);
        assert_eq!(record.clarification_type.as_deref(), Some("교통"));
    }

    #[test]
    fn test_ambiguous_transport_with_subject_proceeds() {
        let mut record = PipelineRecord::new("공항에서 오시는 길 알려줘".into(), None, vec![], None);
        preprocess::run(&mut record);
        run(&mut record);
        assert!(!record.needs_clarification);
    }

    #[test]
    fn test_context_clarification_pet_without_trigger() {
        let mut record = PipelineRecord::new("반려동물 데려가도 되나요".into(), None, vec![], None);
        preprocess::run(&mut record);
        run(&mut record);
        assert!(record.needs_clarification);
        assert_eq!(record.clarification_type.as_deref(), Some("반려동물"));
    }

    #[test]
    fn test_context_direct_trigger_proceeds() {
        let mut record = PipelineRecord::new("반려동물 객실 동반 가능한가요".into(), None, vec![], None);
        preprocess::run(&mut record);
        run(&mut record);
        assert!(!record.needs_clarification);
    }

    #[test]
    fn test_loop_prevention_answers_prior_question() {
        let history = vec![
            HistoryMessage::user("반려동물 같이 있어도 돼요?"),
            HistoryMessage::assistant(
                "반려동물 동반 투숙에 대해 궁금하신 점이 객실 동반 가능 여부인가요, 추가 요금인가요?",
            ),
        ];
        let mut record = PipelineRecord::new("반려동물 동반 추가 요금이 궁금해요".into(), None, history, None);
        preprocess::run(&mut record);
        run(&mut record);
        assert!(!record.needs_clarification);
        assert_eq!(record.detected_context.as_deref(), Some("반려동물"));
    }

    #[test]
    fn test_extract_subject_entity_picks_longest_remaining_word() {
        // "호텔까지" survives stripping untouched and is longer than "공항"; the transport
        // discard list is what rules out the bare hotel destination, not this function.
        let subject = extract_subject_entity("공항에서 호텔까지 오는 방법", &["오시는 길"]);
        assert_eq!(subject.as_deref(), Some("호텔까지"));
    }
}
