//! Korean-language-aware text helpers shared across preprocess, retrieve, the
//! reranker, and the grounding gate: Hangul ratio detection, particle/ending
//! stripping, and keyword extraction with a word-boundary rule for 1-char keywords.

use once_cell::sync::Lazy;
use regex::Regex;

/// Inclusive Hangul syllable block, matching the source's `[가-힣]` character class.
pub fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Fraction of Hangul characters in `text`, used by preprocess to decide "ko" vs "en".
pub fn hangul_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let total = text.chars().count() as f64;
    let hangul = text.chars().filter(|c| is_hangul(*c)).count() as f64;
    hangul / total
}

static PARTICLE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(에서|에는|에도|해줘|해요|인가요|인지|입니까|할까|인데|하고|해도|대해|관해|은|는|이|가|을|를|의|도|만|에|로|으로)$",
    )
    .unwrap()
});

/// Strips one trailing Korean particle/ending from a word, mirroring the reranker's
/// `_extractQueryKeywords` suffix-stripping regex (applied once, not recursively).
pub fn strip_particle(word: &str) -> &str {
    if let Some(m) = PARTICLE_SUFFIX.find(word) {
        &word[..m.start()]
    } else {
        word
    }
}

static HANGUL_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{Hangul}]{2,}").unwrap());

const STOPWORDS: &[&str] = &[
    "어떻게", "언제", "어디", "무엇", "얼마", "여기", "거기", "호텔", "정보", "안내", "문의",
    "운영", "이용", "서비스", "레스토랑", "객실", "시설", "소개", "가능", "알려줘",
];

/// Extracts 2+-char Hangul keywords from a query, strips one trailing particle from
/// each, drops anything shorter than 2 chars after stripping, and filters stopwords.
/// Grounded in `rag/reranker.py::_extractQueryKeywords`.
pub fn extract_query_keywords(query: &str) -> Vec<String> {
    HANGUL_WORD
        .find_iter(query)
        .filter_map(|m| {
            let stripped = strip_particle(m.as_str());
            if stripped.chars().count() >= 2 && !STOPWORDS.contains(&stripped) {
                Some(stripped.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// True if `keyword` occurs in `text` as a valid match: multi-char keywords match by
/// plain substring containment; a 1-char keyword must not be immediately adjacent
/// (before or after) to another Hangul character, the word-boundary rule resolved as
/// an Open Question in SPEC_FULL.md rather than copied ad hoc from the source.
pub fn keyword_matches(text: &str, keyword: &str) -> bool {
    let keyword_chars = keyword.chars().count();
    if keyword_chars == 0 {
        return false;
    }
    if keyword_chars > 1 {
        return text.contains(keyword);
    }

    let kw_char = keyword.chars().next().unwrap();
    let chars: Vec<char> = text.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c == kw_char {
            let before_ok = i == 0 || !is_hangul(chars[i - 1]);
            let after_ok = i + 1 >= chars.len() || !is_hangul(chars[i + 1]);
            if before_ok && after_ok {
                return true;
            }
        }
    }
    false
}

/// True if any of `keywords` matches `text`, honoring the length>=2 substring rule and
/// the 1-char boundary rule uniformly — the shared gate used by `preprocess`'s
/// valid-query-keyword check.
pub fn any_keyword_matches(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|kw| {
        if kw.chars().count() >= 2 {
            lower.contains(&kw.to_lowercase())
        } else {
            keyword_matches(text, kw)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hangul_ratio_korean() {
        assert!(hangul_ratio("체크인 시간 알려주세요") > 0.3);
    }

    #[test]
    fn test_hangul_ratio_english() {
        assert!(hangul_ratio("what time is checkin") < 0.3);
    }

    #[test]
    fn test_strip_particle() {
        assert_eq!(strip_particle("아리아는"), "아리아");
        assert_eq!(strip_particle("피트니스"), "피트니스");
    }

    #[test]
    fn test_extract_query_keywords_filters_stopwords() {
        let kws = extract_query_keywords("피트니스는 몇시에 열어요?");
        assert!(kws.iter().any(|k| k == "피트니스"));
        assert!(!kws.iter().any(|k| k == "몇시"));
    }

    #[test]
    fn test_single_char_keyword_word_boundary_matches() {
        // "방" as a standalone room-related token must match.
        assert!(keyword_matches("방 있어요?", "방"));
    }

    #[test]
    fn test_single_char_keyword_word_boundary_rejects_compound() {
        // "방" inside "문방구" (stationery store) must not match.
        assert!(!keyword_matches("문방구 어디 있어요?", "방"));
    }
}
