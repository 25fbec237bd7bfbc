//! policyFilter: the final gate before a response leaves the pipeline. Applies the
//! personal-information refusal, the evidence-gate fallback template, category-driven
//! answer dressing (warning/updated-at lines), a last safety-net scrub, and source-URL
//! appending. Grounded in `rag/nodes_verify.py::policyFilterNode`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{hotel_info, CATEGORY_RULES, FORBIDDEN_KEYWORDS, HOTELS};
use crate::state::PipelineRecord;

fn contact_guide(hotel: Option<&str>) -> String {
    match hotel.and_then(hotel_info) {
        Some(info) => format!("{} ({})", info.name, info.phone),
        None => HOTELS.iter().map(|h| format!("{} ({})", h.name, h.phone)).collect::<Vec<_>>().join(", "),
    }
}

const PII_REFUSAL_TEMPLATE: &str = "죄송합니다, 예약번호나 결제 정보와 같은 개인정보는 채팅으로 안내해 드릴 수 없습니다. 안전한 확인을 위해 아래 연락처로 직접 문의 부탁드립니다.";

/// Step 1: an immediate refusal when the user's *query* contains a forbidden keyword,
/// regardless of how the rest of the pipeline went.
fn check_forbidden_keywords(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    if FORBIDDEN_KEYWORDS.iter().any(|kw| lower.contains(&kw.to_lowercase())) {
        Some(format!("{PII_REFUSAL_TEMPLATE}\n\n연락처: {}", contact_guide(None)))
    } else {
        None
    }
}

static TRANSPORT_QUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"가는 방법|오시는 길|교통편|어떻게 가").unwrap());

/// Step 2: when evidence was never found, the fallback either points to the hotel's
/// location page (for a transport query) or to its phone contact otherwise.
fn evidence_fail_fallback(record: &PipelineRecord) -> String {
    let contact = contact_guide(record.detected_hotel.as_deref());
    if TRANSPORT_QUERY.is_match(&record.query) {
        if let Some(info) = record.detected_hotel.as_deref().and_then(hotel_info) {
            return format!(
                "죄송합니다, 요청하신 교통 정보를 정확히 찾지 못했습니다. 아래 위치 안내 페이지를 참고하시거나 {contact}로 문의 부탁드립니다.\n\n참고 정보:\n{}",
                info.location_url
            );
        }
    }
    format!("죄송합니다, 관련 정보를 찾을 수 없습니다. 자세한 사항은 {contact}로 문의 부탁드립니다.")
}

/// Step 3: category-driven dressing — a fixed warning line (e.g. "요금은 시즌에 따라
/// 변동될 수 있습니다") and, for categories that always carry one, an "updated at" line
/// sourced from the highest-scoring chunk's metadata.
fn apply_category_rule(answer: &str, category: Option<&str>, updated_at: Option<&str>) -> String {
    let Some(rule) = category.and_then(|c| CATEGORY_RULES.get(c)) else {
        return answer.to_string();
    };

    let mut dressed = answer.to_string();
    if let Some(warning) = rule.warning {
        dressed.push_str(&format!("\n\n⚠️ {warning}"));
    }
    if rule.always_include_updated_at {
        if let Some(updated_at) = updated_at {
            dressed.push_str(&format!("\n(정보 업데이트: {updated_at})"));
        }
    }
    dressed
}

static ERROR_PATTERN_SAFETY_NET: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\btraceback\b").unwrap(),
        Regex::new(r"(?i)\berror:\s").unwrap(),
        Regex::new(r"(?i)\bundefined\b").unwrap(),
        Regex::new(r"\{\{.*?\}\}").unwrap(),
    ]
});

/// A last scrub for anything that looks like a leaked error message or template
/// placeholder, regardless of which upstream node produced it.
fn safety_net_scrub(answer: &str) -> String {
    let mut cleaned = answer.to_string();
    for pattern in ERROR_PATTERN_SAFETY_NET.iter() {
        cleaned = pattern.replace_all(&cleaned, "").to_string();
    }
    crate::known_names::collapse_blank_runs(&cleaned)
}

static URL_IN_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[\w\-.]+(?:/[\w\-./?=&%]*)?").unwrap());
const SOURCES_HEADER: &str = "참고 정보:";

/// Appends `sources` as a dedup'd list, merging into an existing "참고 정보:" section if
/// the answer already has one (as the transport-fallback path can produce) rather than
/// creating a second one.
fn append_sources(answer: &str, sources: &[String]) -> String {
    if sources.is_empty() {
        return answer.to_string();
    }

    let existing_urls: Vec<&str> = URL_IN_TEXT.find_iter(answer).map(|m| m.as_str()).collect();
    let new_urls: Vec<&String> = sources.iter().filter(|s| !existing_urls.contains(&s.as_str())).collect();
    if new_urls.is_empty() {
        return answer.to_string();
    }

    if answer.contains(SOURCES_HEADER) {
        let mut result = answer.to_string();
        for url in new_urls {
            result.push('\n');
            result.push_str(url);
        }
        result
    } else {
        let list = new_urls.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("\n");
        format!("{answer}\n\n{SOURCES_HEADER}\n{list}")
    }
}

/// Runs the full policy-filter phase, writing `record.policy_passed`,
/// `record.policy_reason`, and `record.final_answer`.
pub fn run(record: &mut PipelineRecord) {
    if let Some(refusal) = check_forbidden_keywords(&record.query) {
        record.policy_passed = false;
        record.policy_reason = Some("개인정보 요청 감지".into());
        record.final_answer = refusal;
        return;
    }

    if !record.evidence_passed {
        record.policy_passed = true;
        record.policy_reason = record.evidence_reason.clone();
        record.final_answer = evidence_fail_fallback(record);
        return;
    }

    let base_answer = if record.verified_answer.is_empty() { record.answer.clone() } else { record.verified_answer.clone() };

    let updated_at = record
        .retrieved_chunks
        .first()
        .and_then(|c| c.metadata.updated_at.as_deref());
    let dressed = apply_category_rule(&base_answer, record.effective_category.as_deref(), updated_at);
    let scrubbed = safety_net_scrub(&dressed);
    let final_answer = append_sources(&scrubbed, &record.sources);

    record.policy_passed = record.verification_passed;
    record.policy_reason = if record.verification_passed {
        None
    } else {
        Some(record.verification_issues.join("; "))
    };
    record.final_answer = final_answer;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record() -> PipelineRecord {
        PipelineRecord::new("체크인 시간 알려주세요".into(), Some("josun_palace".into()), vec![], None)
    }

    #[test]
    fn test_forbidden_keyword_short_circuits_to_refusal() {
        let mut record = base_record();
        record.query = "제 예약번호가 뭐였죠".into();
        record.evidence_passed = true;
        run(&mut record);
        assert!(!record.policy_passed);
        assert!(record.final_answer.contains("개인정보"));
    }

    #[test]
    fn test_evidence_fail_uses_transport_fallback_for_transport_query() {
        let mut record = base_record();
        record.query = "조선 팰리스 오시는 길 알려주세요".into();
        record.evidence_passed = false;
        record.evidence_reason = Some("관련 정보를 찾을 수 없습니다.".into());
        run(&mut record);
        assert!(record.final_answer.contains("location"));
    }

    #[test]
    fn test_category_rule_appends_fee_warning() {
        let mut record = base_record();
        record.evidence_passed = true;
        record.effective_category = Some("요금/결제".into());
        record.verified_answer = "조식 요금은 5만원입니다.".into();
        record.verification_passed = true;
        run(&mut record);
        assert!(record.final_answer.contains("변동될 수 있습니다"));
    }

    #[test]
    fn test_append_sources_dedupes_against_existing_url() {
        let answer = "참고 정보:\nhttps://a.com".to_string();
        let result = append_sources(&answer, &["https://a.com".to_string(), "https://b.com".to_string()]);
        assert_eq!(result.matches("https://a.com").count(), 1);
        assert!(result.contains("https://b.com"));
    }

    #[test]
    fn test_safety_net_scrub_removes_template_placeholder() {
        let cleaned = safety_net_scrub("답변입니다. {{unfilled}} 추가 내용");
        assert!(!cleaned.contains("{{"));
    }
}
