//! The answer-verification node: response-quality screening, hallucination checks
//! (numeric, proper-noun, transportation, cross-hotel, phone, URL, price-digit), and the
//! final verified-answer reconstruction. Grounded in `rag/verify.py`'s `AnswerVerifier`
//! and the phase sequence of `rag/nodes_verify.py::answerVerifyNode`. Delegates the
//! claim-level grounding gate and category-consistency check to `crate::grounding`
//! rather than re-implementing them.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{hotel_info, HOTELS, SUSPICIOUS_PATTERNS};
use crate::grounding;
use crate::known_names::{ForbiddenPatterns, KnownNames};
use crate::korean::hangul_ratio;
use crate::state::{GroundingConfidence, PipelineRecord};

// ---------------------------------------------------------------------------
// query-context relevance (never hard-fails; logged only)
// ---------------------------------------------------------------------------

/// Topic → expansion-keyword table for the query/answer topic-match check. Authored
/// from the inline dict literal inside `checkQueryContextRelevance` (no standalone
/// table exists in the retrieved source).
static CATEGORY_KEYWORD_MAP: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("반려동물", vec!["반려동물", "애견", "강아지", "펫", "pet", "동물"]),
        ("주차", vec!["주차", "발렛", "parking", "주차장"]),
        ("수영장", vec!["수영장", "풀", "pool", "인피니티풀"]),
        ("조식", vec!["조식", "아침식사", "breakfast", "뷔페"]),
    ])
});

/// Extracts the topic(s) a query is about, used only to sanity-check the answer stayed
/// on-topic. Distinct from `korean::extract_query_keywords`'s general tokenizer — this
/// one only recognizes the four topics `CATEGORY_KEYWORD_MAP` tracks.
fn extract_topic_keywords(query: &str) -> Vec<&'static str> {
    let lower = query.to_lowercase();
    CATEGORY_KEYWORD_MAP
        .iter()
        .filter(|(_, expansions)| expansions.iter().any(|kw| lower.contains(kw)))
        .map(|(topic, _)| *topic)
        .collect()
}

/// Never hard-fails: just reports whether the answer seems to have drifted off the
/// query's topic, for `verification_issues` logging.
fn check_query_context_relevance(query: &str, answer: &str) -> Option<String> {
    let topics = extract_topic_keywords(query);
    if topics.is_empty() {
        return None;
    }
    let answer_lower = answer.to_lowercase();
    let off_topic: Vec<&str> = topics
        .iter()
        .filter(|topic| {
            let expansions = &CATEGORY_KEYWORD_MAP[*topic];
            !expansions.iter().any(|kw| answer_lower.contains(kw))
        })
        .copied()
        .collect();
    if off_topic.is_empty() {
        None
    } else {
        Some(format!("쿼리 주제와 답변 불일치 가능성: {}", off_topic.join(", ")))
    }
}

// ---------------------------------------------------------------------------
// response quality
// ---------------------------------------------------------------------------

static MEANINGLESS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^(네|예|아니오|아니요)[.!]?$").unwrap(),
        Regex::new(r"^[.!?\s]*$").unwrap(),
        Regex::new(r"(?i)^(error|undefined|null|nan)$").unwrap(),
    ]
});

static FORBIDDEN_PHRASE_MARKERS: &[&str] = &["궁금하신가요", "도움이 되셨나요", "더 궁금한"];

static TIME_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}\s*[-~]\s*\d{1,2}:\d{2}").unwrap());
static HOTEL_TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(호텔|조선|그랜드|팰리스|레스케이프|그래비티)").unwrap());
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.,!?():\-\[\]~\s]").unwrap());
static CJK_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u4e00-\u9fff\u3040-\u30ff]").unwrap());

/// Hard-fails only on length/meaningless/CJK-contamination/low-Korean-ratio; a lone
/// forbidden phrase is reported but does not itself fail the check — matching
/// `checkResponseQuality`'s "포함되어 있지만 그 자체로 실패시키지 않음" note.
fn check_response_quality(answer: &str) -> (bool, Vec<String>) {
    let mut issues = Vec::new();
    let trimmed = answer.trim();

    if trimmed.chars().count() < 5 {
        issues.push("답변이 너무 짧습니다.".to_string());
        return (false, issues);
    }

    if MEANINGLESS_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
        issues.push("의미 없는 답변입니다.".to_string());
        return (false, issues);
    }

    let cjk_count = CJK_CHAR.find_iter(trimmed).count();
    if cjk_count > 2 {
        issues.push(format!("비한국어 문자 과다 포함 ({cjk_count}자)"));
        return (false, issues);
    }

    let stripped = TIME_RANGE.replace_all(trimmed, "");
    let stripped = HOTEL_TERM.replace_all(&stripped, "");
    let stripped = PUNCTUATION.replace_all(&stripped, "");
    if !stripped.is_empty() {
        let ratio = hangul_ratio(&stripped);
        if ratio < 0.25 {
            issues.push(format!("한국어 비율이 낮습니다. ({ratio:.2})"));
            return (false, issues);
        }
    }

    if FORBIDDEN_PHRASE_MARKERS.iter().any(|m| trimmed.contains(m)) {
        issues.push("금지된 문구 포함".to_string());
    }

    (true, issues)
}

// ---------------------------------------------------------------------------
// direct-answer extraction / raw-dump guard (shared with compose's fallback path)
// ---------------------------------------------------------------------------

static QA_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)Q:\s*(.+?)\nA:\s*(.+?)(?:\n\n|$)").unwrap());
static HOURS_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(HOURS|운영시간|영업시간)\s*[:：]\s*(.+)$").unwrap());
static LOCATION_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(LOCATION|위치)\s*[:：]\s*(.+)$").unwrap());
static INQUIRY_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(INQUIRY|문의)\s*[:：]\s*(.+)$").unwrap());
static NAME_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(NAME|명칭)\s*[:：]\s*(.+)$").unwrap());
static DESC_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(DESCRIPTION|설명)\s*[:：]\s*(.+)$").unwrap());

/// Prefers a "Q: ... A: ..." block matching the query; otherwise assembles a structured
/// field list (name/description/hours/location/inquiry) into prose or a bullet list when
/// two or more fields are present.
pub fn extract_direct_answer(text: &str, query: &str) -> Option<String> {
    if is_raw_dump(text) {
        return None;
    }

    let query_keywords = crate::korean::extract_query_keywords(query);
    for caps in QA_BLOCK.captures_iter(text) {
        let question = caps.get(1)?.as_str();
        if query_keywords.iter().any(|kw| question.contains(kw.as_str())) || query_keywords.is_empty() {
            return Some(caps.get(2)?.as_str().trim().to_string());
        }
    }

    let mut parts = Vec::new();
    if let Some(c) = NAME_LINE.captures(text) {
        parts.push(c.get(2).unwrap().as_str().trim().to_string());
    }
    if let Some(c) = DESC_LINE.captures(text) {
        parts.push(c.get(2).unwrap().as_str().trim().to_string());
    }
    if let Some(c) = HOURS_LINE.captures(text) {
        parts.push(format!("운영시간: {}", c.get(2).unwrap().as_str().trim()));
    }
    if let Some(c) = LOCATION_LINE.captures(text) {
        parts.push(format!("위치: {}", c.get(2).unwrap().as_str().trim()));
    }
    if let Some(c) = INQUIRY_LINE.captures(text) {
        parts.push(format!("문의: {}", c.get(2).unwrap().as_str().trim()));
    }

    if parts.is_empty() {
        None
    } else if parts.len() >= 2 {
        Some(parts.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n"))
    } else {
        Some(parts.remove(0))
    }
}

static NAV_MARKERS: &[&str] =
    &["HOME", "로그인", "회원가입", "바로가기", "Copyright", "전체메뉴", "GNB", "sitemap", "Sitemap", "SNS 공유"];

/// Rejects text that looks like a scraped navigation/UI dump rather than prose:
/// presence of common nav-chrome markers, or mostly very-short lines. No original
/// source body exists for this check; authored from the one-line "raw-dump guard"
/// description.
fn is_raw_dump(text: &str) -> bool {
    if NAV_MARKERS.iter().any(|m| text.contains(m)) {
        return true;
    }
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() >= 4 {
        let short = lines.iter().filter(|l| l.trim().chars().count() <= 6).count();
        if short as f64 / lines.len() as f64 > 0.7 {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// sentence-level cleanup helper (regex has no lookbehind; scans manually instead)
// ---------------------------------------------------------------------------

const SENTENCE_ENDERS: &[char] = &['.', '!', '?', '다', '요'];

/// Splits on whitespace that immediately follows a sentence-ending character, keeping
/// the ender attached to the preceding chunk — equivalent to a lookbehind split on
/// `[.!?다요]` followed by whitespace, without relying on lookbehind support.
fn split_sentences_keep_delim(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut result = Vec::new();
    let mut start = 0usize;

    for i in 0..chars.len() {
        let (idx, ch) = chars[i];
        if ch.is_whitespace() && i > 0 && SENTENCE_ENDERS.contains(&chars[i - 1].1) {
            let piece = text[start..idx].trim();
            if !piece.is_empty() {
                result.push(piece.to_string());
            }
            start = idx;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        result.push(tail.to_string());
    }
    result
}

fn drop_sentences<F: Fn(&str) -> bool>(text: &str, should_drop: F) -> String {
    split_sentences_keep_delim(text)
        .into_iter()
        .filter(|s| !should_drop(s))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// transportation hallucination
// ---------------------------------------------------------------------------

static FABRICATED_ROUTE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?:지하철|버스|KTX)\s*\d+\s*호선?").unwrap(),
        Regex::new(r"(?:공항|역)에서\s*(?:택시|버스|지하철)로\s*약?\s*\d+\s*분").unwrap(),
        Regex::new(r"\d+\s*번\s*(?:출구|버스)").unwrap(),
    ]
});

static TRANSPORT_QUERY_KEYWORDS: &[&str] = &["가는 방법", "오시는 길", "교통편", "지하철", "버스", "택시"];

/// Drops sentences carrying a fabricated-looking route pattern not present in
/// `context`, and flags an issue when an off-topic query (not asking about
/// transportation) answer still mentions transport terms absent from context.
fn check_transportation_hallucination(query: &str, answer: &str, context: &str) -> (String, Vec<String>) {
    let mut issues = Vec::new();

    let cleaned = drop_sentences(answer, |sentence| {
        FABRICATED_ROUTE.iter().any(|re| re.is_match(sentence)) && !re_any_match_in_context(re_hits(sentence), context)
    });

    let is_transport_query = TRANSPORT_QUERY_KEYWORDS.iter().any(|kw| query.contains(kw));
    if !is_transport_query {
        for kw in TRANSPORT_QUERY_KEYWORDS {
            if cleaned.contains(kw) && !context.contains(kw) {
                issues.push(format!("질의와 무관한 교통 정보 포함 가능성: {kw}"));
            }
        }
    }

    (cleaned, issues)
}

fn re_hits(sentence: &str) -> Vec<String> {
    FABRICATED_ROUTE
        .iter()
        .flat_map(|re| re.find_iter(sentence).map(|m| m.as_str().to_string()))
        .collect()
}

fn re_any_match_in_context(hits: Vec<String>, context: &str) -> bool {
    !hits.is_empty() && hits.iter().any(|h| context.contains(h.as_str()))
}

// ---------------------------------------------------------------------------
// numeric hallucination: claim-level sensitive-token check (reuses
// constants::SENSITIVE_PATTERNS via grounding) plus a broader answer-level
// extraction covering every numeric category spec.md §4.9 item 4 names, and the
// full-answer suspicious-format scan.
// ---------------------------------------------------------------------------

static RE_PRICES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d,]+\s*원").unwrap());
static RE_TIMES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}").unwrap());
static RE_PHONES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{2,4}[-.]?\d{3,4}[-.]?\d{4}").unwrap());
static RE_PERCENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s*%").unwrap());
static RE_FLOORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s*층").unwrap());
static RE_PERSONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s*인").unwrap());
static RE_WEIGHTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\d+\s*kg").unwrap());
static RE_AGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s*세").unwrap());
static RE_FULL_DATES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}년\s*\d{1,2}월\s*\d{1,2}일").unwrap());
static RE_MONTH_DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}월\s*\d{1,2}일").unwrap());

/// Every numeric surface form spec.md §4.9 item 4 names: prices, times, phones,
/// percents, floors, persons, weights, ages, full dates, month-days. Distinct from
/// `grounding::extract_sensitive_tokens`, which only tracks the narrower claim-level
/// categories the per-claim verifier cares about.
fn extract_answer_numbers(text: &str) -> Vec<String> {
    [&RE_PRICES, &RE_TIMES, &RE_PHONES, &RE_PERCENTS, &RE_FLOORS, &RE_PERSONS, &RE_WEIGHTS, &RE_AGES, &RE_FULL_DATES, &RE_MONTH_DAYS]
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_string()))
        .collect()
}

fn check_hallucination(answer: &str, context: &str) -> Vec<String> {
    let mut issues = Vec::new();

    let (ok, unverified) = grounding::verify_numeric_tokens(answer, context);
    if !ok {
        issues.extend(unverified.into_iter().map(|t| format!("수치 검증 실패: {t}")));
    }

    for (pattern, label) in SUSPICIOUS_PATTERNS.iter() {
        if let Some(m) = pattern.find(answer) {
            if !context.contains(m.as_str()) {
                issues.push(format!("의심: {} 발견", *label));
            }
        }
    }

    let context_numbers = extract_answer_numbers(context);
    let context_digits: String = context.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    for num in extract_answer_numbers(answer) {
        let num_norm: String = num.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
        if num_norm.chars().count() <= 2 {
            continue;
        }
        let found = context_numbers.iter().any(|c| {
            let c_norm: String = c.chars().filter(|ch| *ch != ',' && !ch.is_whitespace()).collect();
            num_norm.contains(&c_norm) || c_norm.contains(&num_norm)
        }) || context_digits.contains(&num_norm);
        if !found {
            issues.push(format!("검증실패: '{num}' - 컨텍스트에 없음"));
        }
    }

    issues
}

// ---------------------------------------------------------------------------
// proper-noun hallucination (delegates pattern matching to grounding, adds whitelist)
// ---------------------------------------------------------------------------

fn check_proper_noun_hallucination(answer: &str, context: &str, known_names: &KnownNames) -> (String, Vec<String>) {
    let mut issues = Vec::new();
    let (ok, unverified) = grounding::verify_proper_nouns(answer, context);
    if ok {
        return (answer.to_string(), issues);
    }

    let mut still_unverified = Vec::new();
    for entry in &unverified {
        let noun = entry.split(" (").next().unwrap_or(entry.as_str());
        if known_names.contains(noun) {
            continue;
        }
        still_unverified.push(entry.clone());
    }

    if still_unverified.is_empty() {
        return (answer.to_string(), issues);
    }

    let cleaned = drop_sentences(answer, |sentence| {
        still_unverified.iter().any(|entry| {
            let noun = entry.split(" (").next().unwrap_or(entry.as_str());
            sentence.contains(noun)
        })
    });
    issues.push(format!("검증되지 않은 고유명사: {}", still_unverified.join(", ")));
    (cleaned, issues)
}

// ---------------------------------------------------------------------------
// query person-name check (셰프/매니저/소믈리에 ... named in the query, not context)
// ---------------------------------------------------------------------------

static PERSON_NAME_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([가-힣]{2,4})\s*(셰프|쉐프|대표|오너|총괄|매니저|소믈리에)").unwrap());

fn check_query_person_name(query: &str, context: &str) -> Option<String> {
    let caps = PERSON_NAME_QUERY.captures(query)?;
    let name = caps.get(1)?.as_str();
    let title = caps.get(2)?.as_str();
    if !context.contains(name) {
        Some(format!("질의에 언급된 인물 정보 없음: {name} {title}"))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// hotel cross-contamination
// ---------------------------------------------------------------------------

fn check_hotel_cross_contamination(answer: &str, detected_hotel: Option<&str>) -> (String, Vec<String>) {
    let Some(own_key) = detected_hotel else {
        return (answer.to_string(), Vec::new());
    };
    let mut issues = Vec::new();
    let mut cleaned = answer.to_string();

    for hotel in HOTELS {
        if hotel.key == own_key {
            continue;
        }
        if answer.contains(hotel.name) || answer.contains(hotel.phone) {
            cleaned = drop_sentences(&cleaned, |sentence| sentence.contains(hotel.name) || sentence.contains(hotel.phone));
            issues.push(format!("다른 호텔 정보 혼입: {}", hotel.name));
        }
    }

    (cleaned, issues)
}

// ---------------------------------------------------------------------------
// phone hallucination
// ---------------------------------------------------------------------------

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"0\d{1,2}-\d{3,4}-\d{4}").unwrap());

fn check_phone_hallucination(answer: &str, context: &str) -> (String, Vec<String>) {
    let mut issues = Vec::new();
    let known_phones: Vec<&str> = HOTELS.iter().map(|h| h.phone).collect();

    let cleaned = drop_sentences(answer, |sentence| {
        PHONE_PATTERN.find_iter(sentence).any(|m| {
            let phone = m.as_str();
            !context.contains(phone) && !known_phones.contains(&phone)
        })
    });

    if cleaned != answer {
        issues.push("검증되지 않은 전화번호 포함".to_string());
    }
    (cleaned, issues)
}

// ---------------------------------------------------------------------------
// URL hallucination
// ---------------------------------------------------------------------------

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[\w\-.]+(?:/[\w\-./?=&%]*)?").unwrap());

/// Known website hostnames, derived from `constants::HOTELS` rather than a hardcoded
/// domain list, so the set always matches the hotel directory's actual websites.
fn known_domains() -> Vec<String> {
    HOTELS.iter().filter_map(|h| host_of(h.website)).collect()
}

fn host_of(url: &str) -> Option<String> {
    let without_scheme = url.splitn(2, "://").nth(1)?;
    let host = without_scheme.split(['/', '?', '#']).next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn check_url_hallucination(answer: &str, context: &str) -> (String, Vec<String>) {
    let mut issues = Vec::new();
    let domains = known_domains();

    let cleaned = drop_sentences(answer, |sentence| {
        URL_PATTERN.find_iter(sentence).any(|m| {
            let url = m.as_str();
            let host_known = domains.iter().any(|d| url.contains(d.as_str()));
            !context.contains(url) && !host_known
        })
    });

    if cleaned != answer {
        issues.push("검증되지 않은 URL 포함".to_string());
    }
    (cleaned, issues)
}

// ---------------------------------------------------------------------------
// price digit manipulation (10x / 100x / inverse ratio)
// ---------------------------------------------------------------------------

static PRICE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d[\d,]*)\s*원").unwrap());

/// Flags a price whose digits are a suspicious 10x, 100x, or inverse multiple of a price
/// actually present in context — a common LLM digit-manipulation failure mode distinct
/// from a price missing entirely (handled by `check_hallucination`).
fn check_price_digit_manipulation(answer: &str, context: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let context_prices: Vec<u64> =
        PRICE_DIGITS.captures_iter(context).filter_map(|c| c[1].replace(',', "").parse().ok()).collect();

    for caps in PRICE_DIGITS.captures_iter(answer) {
        let Ok(answer_price) = caps[1].replace(',', "").parse::<u64>() else { continue };
        if context_prices.contains(&answer_price) {
            continue;
        }
        for &context_price in &context_prices {
            if context_price == 0 {
                continue;
            }
            let ratio = answer_price as f64 / context_price as f64;
            if (ratio - 10.0).abs() < 0.01 || (ratio - 100.0).abs() < 0.01 || (ratio - 0.1).abs() < 0.001 {
                issues.push(format!("가격 자릿수 조작 의심: {}원 (원본: {}원)", answer_price, context_price));
                break;
            }
        }
    }
    issues
}

// ---------------------------------------------------------------------------
// orchestration
// ---------------------------------------------------------------------------

const SEVERE_MARKERS: &[&str] = &["추정", "추측", "비정상", "수치 검증 실패"];
const FALLBACK_PHRASES: &[&str] =
    &["죄송합니다", "찾을 수 없습니다", "찾지 못했습니다", "정확한 정보", "문의 부탁드립니다"];

fn is_fallback_answer(answer: &str) -> bool {
    answer.chars().count() < 100 && FALLBACK_PHRASES.iter().any(|p| answer.contains(p))
}

const SEVERE_REFUSAL: &str =
    "죄송합니다, 해당 질문에 대해 확실하지 않은 정보가 포함되어 정확한 답변을 드리기 어렵습니다. 정확한 안내를 위해 호텔로 직접 문의 부탁드립니다.";

/// Runs the full verification phase sequence against `record.answer`, writing
/// `record.verification_passed`, `record.verification_issues`, `record.verified_answer`,
/// `record.grounding_result`, and `record.query_intents`.
pub fn run(record: &mut PipelineRecord, known_names: &KnownNames, forbidden_patterns: &ForbiddenPatterns) {
    let context: String = record.retrieved_chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n");
    let mut issues = Vec::new();
    let mut answer = record.answer.clone();

    // Phase 0: query/answer topic relevance, never hard-fails.
    if let Some(issue) = check_query_context_relevance(&record.query, &answer) {
        issues.push(issue);
    }

    // Phase 1: response quality, hard-fails unless the only issue is a forbidden phrase.
    let (quality_ok, quality_issues) = check_response_quality(&answer);
    let only_forbidden_phrase =
        quality_issues.len() == 1 && quality_issues[0] == "금지된 문구 포함";
    issues.extend(quality_issues.clone());
    if !quality_ok && !(quality_issues.is_empty() || only_forbidden_phrase) {
        record.verification_passed = false;
        record.verification_issues = issues;
        record.verified_answer = grounding::build_fallback_response(&contact_guide(record.detected_hotel.as_deref()));
        return;
    }

    // Phase 2: claim-level grounding + intent classification.
    record.query_intents = grounding::classify_intent(&record.query).into_iter().map(String::from).collect();
    let grounding_result = grounding::verify(&answer, &context, &record.query);

    // Phase 3: numeric hallucination.
    issues.extend(check_hallucination(&answer, &context));

    // Phase 3.3: proper-noun hallucination.
    let (cleaned, proper_noun_issues) = check_proper_noun_hallucination(&answer, &context, known_names);
    answer = cleaned;
    issues.extend(proper_noun_issues);

    // Phase 3.35: query person-name check.
    if let Some(issue) = check_query_person_name(&record.query, &context) {
        issues.push(issue);
    }

    // Phase 3.4: transportation hallucination.
    let (cleaned, transport_issues) = check_transportation_hallucination(&record.query, &answer, &context);
    answer = cleaned;
    issues.extend(transport_issues);

    // Phase 3.5: hotel/category cross-contamination.
    let (cleaned, hotel_issues) = check_hotel_cross_contamination(&answer, record.detected_hotel.as_deref());
    answer = cleaned;
    issues.extend(hotel_issues);

    let (cleaned, phone_issues) = check_phone_hallucination(&answer, &context);
    answer = cleaned;
    issues.extend(phone_issues);

    let (cleaned, url_issues) = check_url_hallucination(&answer, &context);
    answer = cleaned;
    issues.extend(url_issues);

    issues.extend(check_price_digit_manipulation(&answer, &context));

    let category_result = grounding::verify_category_consistency(&answer, record.effective_category.as_deref());
    if !category_result.passed {
        answer = category_result.cleaned_answer.clone();
        issues.push(category_result.reason.clone());
    }

    // Severe-issue escalation: certain keywords in the accumulated issues force a hard
    // refusal regardless of how much of the answer otherwise survived.
    if issues.iter().any(|i| SEVERE_MARKERS.iter().any(|m| i.contains(m))) {
        record.verification_passed = false;
        record.verification_issues = issues;
        record.verified_answer = SEVERE_REFUSAL.to_string();
        record.grounding_result = Some(grounding_result);
        return;
    }

    // Final-pass reconstruction, keyed on grounding confidence.
    let mut verified_answer = match grounding_result.confidence {
        GroundingConfidence::Certain => answer.clone(),
        GroundingConfidence::Uncertain => {
            let unverified_numeric: Vec<_> =
                grounding_result.rejected_claims.iter().filter(|c| c.has_numeric && !c.numeric_verified).collect();
            if !unverified_numeric.is_empty() {
                drop_sentences(&answer, |sentence| {
                    unverified_numeric.iter().any(|c| sentence.contains(c.text.as_str()))
                })
            } else {
                answer.clone()
            }
        }
        GroundingConfidence::Ungrounded => {
            grounding::build_fallback_response(&contact_guide(record.detected_hotel.as_deref()))
        }
    };

    if grounding_result.confidence == GroundingConfidence::Uncertain && verified_answer.chars().count() < 10 {
        verified_answer = grounding::build_fallback_response(&contact_guide(record.detected_hotel.as_deref()));
    }

    // Phase 4.1: fallback-improvement via direct extraction when the answer collapsed
    // to a short refusal but chunks actually contain something citable.
    if is_fallback_answer(&verified_answer) {
        if let Some(improved) = improve_fallback(record, &context) {
            verified_answer = improved;
        }
    }

    verified_answer = forbidden_patterns.scrub(&verified_answer);
    verified_answer = crate::known_names::collapse_blank_runs(&verified_answer);

    // Final forgiveness: if everything remaining is a forbidden-phrase issue only, the
    // node still passes.
    let only_forbidden_issues = !issues.is_empty() && issues.iter().all(|i| i == "금지된 문구 포함");

    record.verification_passed = quality_ok || only_forbidden_phrase || only_forbidden_issues;
    record.verification_issues = issues;
    record.verified_answer = verified_answer;
    record.grounding_result = Some(grounding_result);
}

fn contact_guide(hotel: Option<&str>) -> String {
    match hotel.and_then(hotel_info) {
        Some(info) => format!("{} ({})", info.name, info.phone),
        None => HOTELS.iter().map(|h| format!("{} ({})", h.name, h.phone)).collect::<Vec<_>>().join(", "),
    }
}

static PHONE_QUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"전화번호|연락처|전화\s*주세요").unwrap());

/// Direct-extraction attempts in priority order: an explicit phone-number query gets
/// the hotel directory's phone directly; otherwise a phone pattern already present in a
/// chunk; otherwise the general `extract_direct_answer` over the strongest chunk.
fn improve_fallback(record: &PipelineRecord, context: &str) -> Option<String> {
    if PHONE_QUERY.is_match(&record.query) {
        if let Some(info) = record.detected_hotel.as_deref().and_then(hotel_info) {
            return Some(format!("{} 대표번호는 {}입니다.", info.name, info.phone));
        }
    }

    if let Some(m) = PHONE_PATTERN.find(context) {
        return Some(format!("문의 전화번호: {}", m.as_str()));
    }

    record.retrieved_chunks.first().and_then(|c| extract_direct_answer(&c.text, &record.query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_response_quality_rejects_short_answer() {
        let (ok, issues) = check_response_quality("네.");
        assert!(!ok);
        assert!(!issues.is_empty());
    }

    #[test]
    fn test_check_response_quality_accepts_normal_korean_answer() {
        let (ok, _) = check_response_quality("체크인은 오후 3시부터 가능합니다.");
        assert!(ok);
    }

    #[test]
    fn test_check_response_quality_flags_cjk_contamination() {
        let (ok, issues) = check_response_quality("体育馆 이용 시간은 9시부터 입니다 的 和 是");
        assert!(!ok);
        assert!(issues.iter().any(|i| i.contains("비한국어")));
    }

    #[test]
    fn test_check_hallucination_flags_ungrounded_floor() {
        let issues = check_hallucination("라운지는 25층에 있습니다.", "스카이라운지는 18층에 위치합니다.");
        assert!(issues.iter().any(|i| i.contains("25층")));
    }

    #[test]
    fn test_check_hallucination_flags_ungrounded_full_date() {
        let issues = check_hallucination("2026년 3월 1일부터 운영합니다.", "패키지는 2026년 5월 1일부터 적용됩니다.");
        assert!(issues.iter().any(|i| i.contains("2026년 3월 1일")));
    }

    #[test]
    fn test_check_hallucination_accepts_floor_present_in_context() {
        let issues = check_hallucination("스카이라운지는 18층에 위치합니다.", "스카이라운지는 18층에 위치합니다.");
        assert!(!issues.iter().any(|i| i.contains("층")));
    }

    #[test]
    fn test_check_hallucination_flags_suspicious_room_number() {
        let issues = check_hallucination("객실 번호는 1205호 입니다.", "체크인은 오후 3시부터 가능합니다.");
        assert!(issues.iter().any(|i| i.contains("객실 번호")));
    }

    #[test]
    fn test_extract_direct_answer_prefers_qa_block() {
        let text = "Q: 조식 시간이 어떻게 되나요\nA: 오전 7시부터 10시까지입니다.\n\n";
        let answer = extract_direct_answer(text, "조식 시간").unwrap();
        assert!(answer.contains("7시"));
    }

    #[test]
    fn test_extract_direct_answer_assembles_structured_fields() {
        let text = "NAME: 아리아\nHOURS: 18:00-22:00\nLOCATION: 2층";
        let answer = extract_direct_answer(text, "아리아 위치").unwrap();
        assert!(answer.contains("- "));
        assert!(answer.contains("위치"));
    }

    #[test]
    fn test_is_raw_dump_detects_nav_chrome() {
        assert!(is_raw_dump("HOME\n로그인\n회원가입\n바로가기"));
    }

    #[test]
    fn test_is_raw_dump_false_for_normal_prose() {
        assert!(!is_raw_dump("체크인은 오후 3시부터 가능하며 체크아웃은 정오입니다."));
    }

    #[test]
    fn test_split_sentences_keep_delim_basic() {
        let parts = split_sentences_keep_delim("체크인은 3시입니다. 체크아웃은 12시입니다.");
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_check_hotel_cross_contamination_drops_other_hotel_sentence() {
        let answer = "조선 팰리스는 시내에 있습니다. 그랜드 조선 부산은 해운대에 있습니다.";
        let (cleaned, issues) = check_hotel_cross_contamination(answer, Some("josun_palace"));
        assert!(!cleaned.contains("해운대"));
        assert!(!issues.is_empty());
    }

    #[test]
    fn test_check_price_digit_manipulation_flags_10x() {
        let issues = check_price_digit_manipulation("가격은 500,000원입니다.", "요금은 50,000원입니다.");
        assert!(!issues.is_empty());
    }

    #[test]
    fn test_check_url_hallucination_allows_known_domain() {
        let (cleaned, issues) = check_url_hallucination(
            "자세한 내용은 https://www.josunpalace.com/dining 에서 확인하세요.",
            "아무 관련 없는 컨텍스트",
        );
        assert!(cleaned.contains("josunpalace.com"));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_check_url_hallucination_drops_unknown_domain() {
        let (cleaned, issues) =
            check_url_hallucination("예약은 https://booking-fake-site.example/xyz 에서 하세요.", "아무 관련 없는 컨텍스트");
        assert!(!cleaned.contains("booking-fake-site"));
        assert!(!issues.is_empty());
    }
}
