//! preprocess: language detection, hotel/category tagging, query validity gate, and
//! restaurant-entity resolution. Grounded in `rag/nodes_preprocess.py::preprocessNode`.

use crate::constants::{CATEGORY_KEYWORDS, HOTEL_KEYWORDS, INVALID_QUERY_PATTERNS, MIN_QUERY_LENGTH, VALID_QUERY_KEYWORDS};
use crate::entity;
use crate::korean::{any_keyword_matches, hangul_ratio};
use crate::state::{Language, PipelineRecord, RestaurantAction};

/// Finds the first hotel whose aliases (longest first) appear in `query`.
fn detect_hotel(query_lower: &str) -> Option<String> {
    let mut entries: Vec<(&str, &str)> = Vec::new();
    for (key, aliases) in HOTEL_KEYWORDS.iter() {
        for alias in aliases {
            entries.push((*key, *alias));
        }
    }
    entries.sort_by_key(|(_, alias)| std::cmp::Reverse(alias.chars().count()));
    entries
        .into_iter()
        .find(|(_, alias)| query_lower.contains(&alias.to_lowercase()))
        .map(|(key, _)| key.to_string())
}

fn detect_category(query_lower: &str) -> Option<String> {
    let mut entries: Vec<(&str, &str)> = Vec::new();
    for (category, keywords) in CATEGORY_KEYWORDS.iter() {
        for kw in keywords {
            entries.push((*category, *kw));
        }
    }
    entries.sort_by_key(|(_, kw)| std::cmp::Reverse(kw.chars().count()));
    entries
        .into_iter()
        .find(|(_, kw)| query_lower.contains(&kw.to_lowercase()))
        .map(|(category, _)| category.to_string())
}

fn is_valid_query(query: &str, has_history: bool) -> bool {
    if INVALID_QUERY_PATTERNS.iter().any(|p| p.is_match(query)) {
        return false;
    }
    if query.trim().chars().count() < MIN_QUERY_LENGTH {
        return false;
    }
    if has_history {
        return true;
    }
    any_keyword_matches(query, VALID_QUERY_KEYWORDS)
}

/// Detects language, hotel, category; gates query validity; resolves restaurant
/// entities against the caller's original query (never the LLM-rewritten one, so an
/// LLM-injected restaurant name can't trigger a false redirect).
pub fn run(record: &mut PipelineRecord) {
    let query = if record.rewritten_query.trim().is_empty() {
        record.query.trim().to_string()
    } else {
        record.rewritten_query.trim().to_string()
    };
    record.normalized_query = query.clone();

    record.language = if hangul_ratio(&query) > 0.3 { Language::Ko } else { Language::En };

    let query_lower = query.to_lowercase();
    record.detected_hotel = record.hotel.clone().or_else(|| detect_hotel(&query_lower));
    record.detected_category = detect_category(&query_lower);

    record.is_valid_query = is_valid_query(&query, !record.history.is_empty());

    let original_query = record.query.trim();
    let entity_result = entity::resolve(original_query, record.detected_hotel.as_deref());

    match entity_result.action {
        Some(RestaurantAction::Redirect) => {
            record.detected_hotel = entity_result.redirect_hotel.clone();
            record.restaurant_redirect_msg = entity_result.message.clone();
        }
        Some(RestaurantAction::Clarify) => {
            record.restaurant_redirect_msg = entity_result.message.clone();
        }
        _ => {}
    }
    record.restaurant_entity = entity_result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HistoryMessage;

    #[test]
    fn test_detects_language_korean() {
        let mut record = PipelineRecord::new("체크인 시간 알려줘".into(), None, vec![], None);
        run(&mut record);
        assert_eq!(record.language, Language::Ko);
    }

    #[test]
    fn test_detects_hotel_longest_alias_first() {
        let mut record = PipelineRecord::new("그랜드 조선 부산 조식 시간".into(), None, vec![], None);
        run(&mut record);
        assert_eq!(record.detected_hotel.as_deref(), Some("grand_josun_busan"));
    }

    #[test]
    fn test_invalid_query_rejected_without_keyword() {
        let mut record = PipelineRecord::new("ㅋㅋㅋ".into(), None, vec![], None);
        run(&mut record);
        assert!(!record.is_valid_query);
    }

    #[test]
    fn test_followup_bypasses_keyword_gate() {
        let history = vec![HistoryMessage::user("조식 시간 알려줘"), HistoryMessage::assistant("7시부터입니다.")];
        let mut record = PipelineRecord::new("그럼 가격은요".into(), None, history, None);
        run(&mut record);
        assert!(record.is_valid_query);
    }

    #[test]
    fn test_entity_redirect_sets_detected_hotel() {
        let mut record = PipelineRecord::new("아리아 메뉴 알려줘".into(), Some("josun_palace".into()), vec![], None);
        run(&mut record);
        assert_eq!(record.detected_hotel.as_deref(), Some("grand_josun_busan"));
        assert!(record.restaurant_redirect_msg.is_some());
    }
}
