//! Sentence-level claim extraction and evidence matching — the hardest piece of the
//! anti-hallucination machinery. Grounded in `rag/grounding.py`. Every claim in a
//! composed answer must trace back to retrieved text; numeric and proper-noun tokens
//! get an additional hard gate on top of plain word overlap.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{ExclusiveKeywords, EXCLUSIVE_KEYWORDS, SENSITIVE_PATTERNS};
use crate::state::{Claim, GroundingConfidence, GroundingResult};

/// Per-claim grounding threshold, kept distinct from the evidence-gate's own 0.65
/// default — these two thresholds gate different things (retrieval quality vs.
/// per-claim evidence).
pub const CLAIM_EVIDENCE_THRESHOLD: f32 = 0.45;

static PROPER_NOUN_BILINGUAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\p{Hangul}]{2,}(?:\s+[\p{Hangul}]+)*)\s*\(([A-Za-z][A-Za-z\s&'\-]+)\)").unwrap()
});

static PROPER_NOUN_FACILITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\p{Hangul}A-Za-z]{2,}(?:\s+[\p{Hangul}A-Za-z]+)*)\s+(레스토랑|카페|바|라운지|센터|클럽)").unwrap()
});

static GENERIC_PHRASES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"고급스러운 시설").unwrap(),
        Regex::new(r"다양한 서비스").unwrap(),
        Regex::new(r"고객님의 취향").unwrap(),
        Regex::new(r"편안한 휴식").unwrap(),
        Regex::new(r"최상의 서비스").unwrap(),
        Regex::new(r"이러한 객실들은").unwrap(),
        Regex::new(r"각각.*제공하며").unwrap(),
    ]
});

static RULE_TRIGGER_PATTERNS: &[&str] = &[
    "입장 가능", "반려", "펫", "pet", "애완", "어린이", "미성년자", "휠체어", "장애인", "흡연", "음식물",
];

static INTENT_KEYWORDS: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("fee_entry", vec!["입장료", "이용료", "이용 요금", "얼마", "가격", "비용", "요금"]),
        ("fee_rental", vec!["대여", "렌탈", "빌려", "빌릴", "대여료", "대여비", "렌트", "대여 비용"]),
        (
            "rental_items",
            vec!["타월", "가운", "수영복", "수모", "수영모", "락커", "튜브", "수건", "물안경", "오리발"],
        ),
        ("rule", vec!["규정", "규칙", "제한", "금지", "허용", "안되", "안돼", "불가", "가능"]),
        ("hours", vec!["시간", "운영", "오픈", "마감", "몇시", "언제"]),
        ("location", vec!["위치", "어디", "층", "찾아가"]),
        ("capacity", vec!["인원", "몇명", "몇 명", "최대"]),
    ]
});

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").unwrap());
static HANGUL_2PLUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{Hangul}]{2,}").unwrap());
static ENGLISH_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z]+").unwrap());

/// Classifies a query's intent(s). `rental_items` is checked first and unconditionally;
/// `rule`'s "가능" keyword is reclassified into `fee_rental` in a rental context, and
/// only counts as `rule` when paired with a rule-trigger word (pet/child/wheelchair...).
pub fn classify_intent(query: &str) -> Vec<&'static str> {
    let lower = query.to_lowercase();
    let mut intents = Vec::new();

    let rental_items = INTENT_KEYWORDS.iter().find(|(k, _)| *k == "rental_items").unwrap();
    if rental_items.1.iter().any(|kw| lower.contains(kw)) {
        intents.push("rental_items");
    }

    for (intent, keywords) in INTENT_KEYWORDS.iter() {
        if *intent == "rental_items" {
            continue;
        }
        if *intent == "rule" {
            if intents.contains(&"rental_items") && lower.contains("대여") && lower.contains("가능") {
                if !intents.contains(&"fee_rental") {
                    intents.push("fee_rental");
                }
                continue;
            }
            if lower.contains("가능") {
                if RULE_TRIGGER_PATTERNS.iter().any(|p| lower.contains(p)) {
                    intents.push("rule");
                }
                continue;
            }
        }
        if keywords.iter().any(|kw| lower.contains(kw)) {
            intents.push(intent);
        }
    }

    if intents.is_empty() {
        vec!["general"]
    } else {
        intents
    }
}

/// Sensitive/numeric tokens a claim may contain, with their semantic type label.
pub fn extract_sensitive_tokens(text: &str) -> Vec<(String, &'static str)> {
    let mut tokens = Vec::new();
    for (re, label) in SENSITIVE_PATTERNS.iter() {
        for m in re.find_iter(text) {
            tokens.push((m.as_str().to_string(), *label));
        }
    }
    tokens
}

fn hangul_and_english_words(lower_text: &str) -> HashSet<String> {
    let mut words: HashSet<String> = HANGUL_2PLUS.find_iter(lower_text).map(|m| m.as_str().to_string()).collect();
    words.extend(ENGLISH_WORD.find_iter(lower_text).map(|m| m.as_str().to_string()));
    words
}

fn digit_set(text: &str) -> HashSet<String> {
    DIGIT_RUN.find_iter(text).map(|m| m.as_str().replace(',', "")).collect()
}

/// Finds the best-supporting span for `claim` within `context`, and a score in [0,1].
pub fn find_evidence_span(claim: &str, context: &str) -> (Option<String>, f32) {
    if claim.is_empty() || context.is_empty() {
        return (None, 0.0);
    }

    let claim_lower = claim.to_lowercase();
    let context_lower = context.to_lowercase();

    if context_lower.contains(&claim_lower) {
        return (Some(claim.to_string()), 1.0);
    }

    let claim_numbers = digit_set(&claim_lower);
    let context_numbers = digit_set(&context_lower);

    let number_match_score = if claim_numbers.is_empty() {
        0.0
    } else {
        let matched = claim_numbers
            .iter()
            .filter(|n| context_numbers.iter().any(|c| c == *n || c.contains(n.as_str()) || n.contains(c.as_str())))
            .count();
        matched as f32 / claim_numbers.len() as f32
    };

    let claim_words = hangul_and_english_words(&claim_lower);
    if claim_words.is_empty() {
        let span = if number_match_score > 0.0 { Some(claim.to_string()) } else { None };
        return (span, number_match_score);
    }

    let context_words = hangul_and_english_words(&context_lower);
    let overlap = claim_words.intersection(&context_words).count();
    let word_overlap_score = overlap as f32 / claim_words.len() as f32;

    let mut best_span: Option<String> = None;
    let mut best_score = 0.0f32;

    for sentence in context.split(['.', '\n']) {
        let trimmed = sentence.trim();
        if trimmed.chars().count() < 5 {
            continue;
        }
        let sentence_lower = trimmed.to_lowercase();
        let sentence_words = hangul_and_english_words(&sentence_lower);
        let sent_overlap = claim_words.intersection(&sentence_words).count();
        let mut sent_score = sent_overlap as f32 / claim_words.len() as f32;

        if !claim_numbers.is_empty() {
            let sentence_numbers = digit_set(trimmed);
            if claim_numbers.iter().any(|n| sentence_numbers.contains(n)) {
                sent_score += 0.3;
            }
        }

        if sent_score > best_score {
            best_score = sent_score;
            best_span = Some(trimmed.to_string());
        }
    }

    let mut final_score = word_overlap_score.max(best_score);
    if number_match_score > 0.0 {
        final_score = final_score.max(number_match_score * 0.8 + word_overlap_score * 0.2);
    }

    (best_span, final_score.min(1.0))
}

/// Verifies a claim's numeric tokens are backed by the context, unit-aware per type.
pub fn verify_numeric_tokens(answer: &str, context: &str) -> (bool, Vec<String>) {
    let answer_tokens = extract_sensitive_tokens(answer);
    if answer_tokens.is_empty() {
        return (true, Vec::new());
    }

    let mut unverified = Vec::new();
    for (token, token_type) in answer_tokens {
        match token_type {
            "가격" => {
                let price_num: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
                if price_num.len() >= 3 {
                    let context_numbers = digit_set(context);
                    if !context_numbers.contains(&price_num) {
                        unverified.push(format!("{token} ({token_type})"));
                    }
                }
            }
            "할인율" | "연령" | "인원" | "시간" => {
                if !context.contains(&token) {
                    let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
                    if !digits.is_empty() {
                        let unit_re = match token_type {
                            "할인율" => Regex::new(&format!(r"{digits}\s*%")).unwrap(),
                            "연령" => Regex::new(&format!(r"{digits}\s*세")).unwrap(),
                            "인원" => Regex::new(&format!(r"{digits}\s*[인명]")).unwrap(),
                            _ => Regex::new(&regex::escape(&token)).unwrap(),
                        };
                        if !unit_re.is_match(context) {
                            unverified.push(format!("{token} ({token_type})"));
                        }
                    } else {
                        unverified.push(format!("{token} ({token_type})"));
                    }
                }
            }
            "무료" | "유료" | "할인" => {
                if !context.contains(&token) {
                    unverified.push(format!("{token} ({token_type})"));
                }
            }
            _ => {}
        }
    }

    (unverified.is_empty(), unverified)
}

/// Splits an answer into individual claims: newline/bullet split first, falling back
/// to sentence split when that yields at most one claim.
pub fn split_into_claims(answer: &str) -> Vec<String> {
    static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-•*]\s*").unwrap());
    static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.。]\s*").unwrap());

    let mut claims: Vec<String> = answer
        .trim()
        .split('\n')
        .map(|line| BULLET.replace(line.trim(), "").into_owned())
        .filter(|line| line.chars().count() >= 5)
        .collect();

    if claims.len() <= 1 {
        claims = SENTENCE_SPLIT
            .split(answer)
            .map(|s| s.trim().to_string())
            .filter(|s| s.chars().count() >= 5)
            .collect();
    }

    if claims.is_empty() {
        claims = vec![answer.trim().to_string()];
    }

    claims
}

pub fn is_generic_phrase(text: &str) -> bool {
    GENERIC_PHRASES.iter().any(|re| re.is_match(text))
}

/// Verifies bilingual and facility-suffixed proper nouns appear in `context`.
pub fn verify_proper_nouns(text: &str, context: &str) -> (bool, Vec<String>) {
    let mut unverified = Vec::new();
    let context_lower = context.to_lowercase();

    for m in PROPER_NOUN_BILINGUAL.captures_iter(text) {
        let full = m.get(0).unwrap().as_str();
        let ko = m.get(1).unwrap().as_str().trim().to_lowercase();
        let en = m.get(2).unwrap().as_str().trim().to_lowercase();
        if !context_lower.contains(&ko) && !context_lower.contains(&en) {
            unverified.push(format!("{full} (한영병기 시설명)"));
        }
    }

    for m in PROPER_NOUN_FACILITY.captures_iter(text) {
        let full = m.get(0).unwrap().as_str();
        let facility_name = m.get(1).unwrap().as_str().trim();
        if facility_name.chars().count() >= 2 && !context_lower.contains(&facility_name.to_lowercase()) {
            unverified.push(format!("{full} (시설명)"));
        }
    }

    (unverified.is_empty(), unverified)
}

/// Verifies one claim against `context`: generic phrases auto-pass; otherwise evidence
/// span, numeric tokens, and proper nouns are checked in sequence, with an unverified
/// proper noun forcing rejection regardless of evidence score.
pub fn verify_claim(claim: &str, context: &str) -> Claim {
    if is_generic_phrase(claim) {
        return Claim {
            text: claim.to_string(),
            evidence_span: None,
            evidence_score: 1.0,
            is_grounded: true,
            has_numeric: false,
            numeric_verified: true,
        };
    }

    let (evidence_span, evidence_score) = find_evidence_span(claim, context);

    let answer_tokens = extract_sensitive_tokens(claim);
    let has_numeric = !answer_tokens.is_empty();
    let numeric_verified = if has_numeric { verify_numeric_tokens(claim, context).0 } else { true };

    let (proper_noun_verified, _) = verify_proper_nouns(claim, context);
    if !proper_noun_verified {
        return Claim {
            text: claim.to_string(),
            evidence_span,
            evidence_score,
            is_grounded: false,
            has_numeric,
            numeric_verified: false,
        };
    }

    let is_grounded = evidence_score >= CLAIM_EVIDENCE_THRESHOLD && (!has_numeric || numeric_verified);

    Claim { text: claim.to_string(), evidence_span, evidence_score, is_grounded, has_numeric, numeric_verified }
}

/// Full answer grounding verification: splits into claims, verifies each, and rolls up
/// into a three-way confidence verdict.
pub fn verify(answer: &str, context: &str, query: &str) -> GroundingResult {
    if answer.is_empty() || context.is_empty() {
        return GroundingResult {
            passed: false,
            verified_claims: Vec::new(),
            rejected_claims: Vec::new(),
            reason: "답변 또는 근거 없음".into(),
            confidence: GroundingConfidence::Ungrounded,
        };
    }

    let _intents = classify_intent(query);
    let claims = split_into_claims(answer);

    let mut verified_claims = Vec::new();
    let mut rejected_claims = Vec::new();

    for claim_text in claims {
        let claim = verify_claim(&claim_text, context);
        if claim.is_grounded {
            verified_claims.push(claim);
        } else {
            rejected_claims.push(claim);
        }
    }

    if verified_claims.is_empty() && !rejected_claims.is_empty() {
        let reason = format!("모든 주장이 근거 부족: {}개", rejected_claims.len());
        return GroundingResult {
            passed: false,
            verified_claims: Vec::new(),
            rejected_claims,
            reason,
            confidence: GroundingConfidence::Ungrounded,
        };
    }

    if !rejected_claims.is_empty() {
        let reason = format!("일부 주장 근거 부족: {}개 제거", rejected_claims.len());
        return GroundingResult {
            passed: true,
            verified_claims,
            rejected_claims,
            reason,
            confidence: GroundingConfidence::Uncertain,
        };
    }

    GroundingResult {
        passed: true,
        verified_claims,
        rejected_claims: Vec::new(),
        reason: "모든 주장 검증 통과".into(),
        confidence: GroundingConfidence::Certain,
    }
}

pub fn build_fallback_response(contact_info: &str) -> String {
    let mut response = "죄송합니다, 해당 내용에 대한 정확한 정보를 현재 자료에서 찾지 못했습니다.".to_string();
    if !contact_info.is_empty() {
        response.push_str(&format!("\n\n자세한 사항은 {contact_info}로 문의 부탁드립니다."));
    }
    response
}

// ---------------------------------------------------------------------------
// CategoryConsistencyChecker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CategoryConsistencyResult {
    pub passed: bool,
    pub contaminated_sentences: Vec<String>,
    pub foreign_keywords_found: Vec<String>,
    pub cleaned_answer: String,
    pub reason: String,
}

fn exclusive_keywords_for(category: &str) -> Option<&'static ExclusiveKeywords> {
    EXCLUSIVE_KEYWORDS.get(category)
}

/// Scans an answer for sentences carrying another category's exclusive keyword and
/// drops them, preventing category cross-contamination.
pub fn verify_category_consistency(answer: &str, target_category: Option<&str>) -> CategoryConsistencyResult {
    let Some(target_category) = target_category.filter(|c| !c.is_empty()) else {
        return CategoryConsistencyResult {
            passed: true,
            reason: "카테고리 미지정 또는 답변 없음".into(),
            ..Default::default()
        };
    };
    if answer.is_empty() {
        return CategoryConsistencyResult {
            passed: true,
            reason: "카테고리 미지정 또는 답변 없음".into(),
            ..Default::default()
        };
    }

    let Some(keywords) = exclusive_keywords_for(target_category) else {
        return CategoryConsistencyResult {
            passed: true,
            reason: format!("'{target_category}' 카테고리 키워드 미정의"),
            ..Default::default()
        };
    };

    let mut contaminated_sentences = Vec::new();
    let mut foreign_found: Vec<String> = Vec::new();
    let mut clean_sentences = Vec::new();

    for sentence in answer.split(['.', '\n']) {
        let sentence = sentence.trim();
        if sentence.chars().count() < 3 {
            continue;
        }
        let sentence_lower = sentence.to_lowercase();
        let mut contaminated = false;
        for kw in keywords.foreign {
            if sentence_lower.contains(&kw.to_lowercase()) {
                contaminated = true;
                if !foreign_found.contains(&kw.to_string()) {
                    foreign_found.push(kw.to_string());
                }
                contaminated_sentences.push(sentence.to_string());
                break;
            }
        }
        if !contaminated {
            clean_sentences.push(sentence.to_string());
        }
    }

    if !contaminated_sentences.is_empty() {
        let cleaned_answer =
            if clean_sentences.is_empty() { String::new() } else { format!("{}.", clean_sentences.join(". ")) };
        return CategoryConsistencyResult {
            passed: false,
            contaminated_sentences,
            foreign_keywords_found: foreign_found.clone(),
            cleaned_answer,
            reason: format!("다른 카테고리 정보 혼입 감지: {}", foreign_found.join(", ")),
        };
    }

    CategoryConsistencyResult { passed: true, cleaned_answer: answer.to_string(), reason: "카테고리 일관성 유지".into(), ..Default::default() }
}

/// Returns the cleaned answer (post category-contamination removal) plus whether
/// cleaning happened, falling back to a refusal template if too little text survives.
pub fn cleaned_answer(answer: &str, target_category: Option<&str>, contact_guide: &str) -> (String, bool) {
    let result = verify_category_consistency(answer, target_category);
    if result.passed {
        return (answer.to_string(), false);
    }

    if result.cleaned_answer.chars().count() < 10 {
        let mut fallback = "죄송합니다, 해당 내용에 대한 정확한 정보를 찾을 수 없습니다.".to_string();
        if !contact_guide.is_empty() {
            fallback.push_str(&format!("\n자세한 사항은 {contact_guide}로 문의 부탁드립니다."));
        }
        return (fallback, true);
    }

    (result.cleaned_answer, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_intent_defaults_general() {
        assert_eq!(classify_intent("안녕하세요"), vec!["general"]);
    }

    #[test]
    fn test_classify_intent_rule_requires_trigger() {
        // "가능" alone, no rule-trigger keyword, should not become "rule".
        let intents = classify_intent("이용 가능한가요?");
        assert!(!intents.contains(&"rule"));
    }

    #[test]
    fn test_classify_intent_rule_fires_with_pet_trigger() {
        let intents = classify_intent("반려동물 동반 가능한가요?");
        assert!(intents.contains(&"rule"));
    }

    #[test]
    fn test_classify_intent_rental_then_fee_rental() {
        let intents = classify_intent("수영복 대여 가능한가요?");
        assert!(intents.contains(&"rental_items"));
        assert!(intents.contains(&"fee_rental"));
        assert!(!intents.contains(&"rule"));
    }

    #[test]
    fn test_find_evidence_span_exact_match() {
        let (span, score) = find_evidence_span("체크인은 오후 3시입니다", "체크인은 오후 3시입니다.");
        assert_eq!(span.as_deref(), Some("체크인은 오후 3시입니다"));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_find_evidence_span_no_overlap_scores_low() {
        let (_, score) = find_evidence_span("수영장은 24시간 운영됩니다", "체크인은 오후 3시입니다.");
        assert!(score < 0.3);
    }

    #[test]
    fn test_verify_numeric_tokens_price_requires_exact_digits() {
        let (ok, _) = verify_numeric_tokens("가격은 50,000원 입니다", "요금은 50,000원입니다.");
        assert!(ok);
        let (ok2, unverified) = verify_numeric_tokens("가격은 500,000원 입니다", "요금은 50,000원입니다.");
        assert!(!ok2);
        assert!(!unverified.is_empty());
    }

    #[test]
    fn test_split_into_claims_bullets() {
        let claims = split_into_claims("- 체크인은 오후 3시\n- 체크아웃은 낮 12시");
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0], "체크인은 오후 3시");
    }

    #[test]
    fn test_verify_claim_generic_phrase_auto_passes() {
        let claim = verify_claim("고급스러운 시설을 자랑합니다", "아무 상관없는 컨텍스트");
        assert!(claim.is_grounded);
        assert_eq!(claim.evidence_score, 1.0);
    }

    #[test]
    fn test_verify_proper_noun_bilingual_requires_one_form_in_context() {
        let (ok, _) = verify_proper_nouns("그랜드 셰프 (Grand Chef)가 운영합니다", "그랜드 셰프가 직접 만듭니다.");
        assert!(ok);
        let (ok2, unverified) = verify_proper_nouns("미지의 셰프 (Unknown Chef)가 운영합니다", "아무 관련 없는 문장입니다.");
        assert!(!ok2);
        assert!(!unverified.is_empty());
    }

    #[test]
    fn test_verify_all_claims_grounded_yields_certain() {
        let result = verify("체크인은 오후 3시입니다", "체크인은 오후 3시입니다.", "체크인 시간");
        assert!(result.passed);
        assert_eq!(result.confidence, GroundingConfidence::Certain);
    }

    #[test]
    fn test_verify_all_rejected_yields_ungrounded() {
        let result = verify("수영장은 100층에 있습니다", "체크인은 오후 3시입니다.", "수영장 위치");
        assert!(!result.passed);
        assert_eq!(result.confidence, GroundingConfidence::Ungrounded);
    }

    #[test]
    fn test_category_consistency_flags_foreign_keyword() {
        let result = verify_category_consistency("조식은 7시부터 제공됩니다. 수영장은 24시간 이용 가능합니다.", Some("조식"));
        assert!(!result.passed);
        assert!(result.foreign_keywords_found.contains(&"수영장".to_string()));
        assert!(result.cleaned_answer.contains("조식은 7시부터"));
    }

    #[test]
    fn test_category_consistency_passes_without_foreign_keyword() {
        let result = verify_category_consistency("조식은 7시부터 10시까지 제공됩니다.", Some("조식"));
        assert!(result.passed);
    }

    #[test]
    fn test_category_consistency_skips_when_no_category() {
        let result = verify_category_consistency("아무 답변입니다.", None);
        assert!(result.passed);
    }
}
