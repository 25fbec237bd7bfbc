//! Loads the two JSON whitelists used by `verify`: a proper-noun allowlist
//! (`known_names.json`) and a set of regexes to scrub from every answer
//! (`forbidden_patterns.json`). Both are read once at startup and held
//! behind `Arc` for the lifetime of the process, matching the single
//! `AnswerVerifier.__init__` load in `rag/verify.py`. Missing or malformed
//! files fall back to small hardcoded defaults rather than failing startup.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
struct KnownNamesFile {
    #[serde(default)]
    brands: Vec<String>,
    #[serde(default)]
    restaurants: std::collections::HashMap<String, Vec<String>>,
    #[serde(default)]
    facilities: Vec<String>,
    #[serde(default)]
    room_types: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ForbiddenPatternsFile {
    #[serde(default)]
    patterns: Vec<String>,
}

static DEFAULT_KNOWN_NAMES: Lazy<HashSet<String>> = Lazy::new(|| {
    ["조선", "그랜드 조선", "조선 팰리스", "레스케이프", "그래비티", "조선호텔"]
        .iter()
        .map(|s| s.to_string())
        .collect()
});

const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[r"궁금하신가요\??", r"도움이?\s*되셨나요\??"];

/// Proper-noun whitelist: brands, restaurants (flattened across hotels),
/// facilities, room types. Lookups are case-insensitive substring checks,
/// matching `checkProperNounHallucination`'s `known.lower() in nounLower`.
pub struct KnownNames {
    names: HashSet<String>,
}

impl KnownNames {
    pub fn load(path: Option<&Path>) -> Self {
        let names = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|contents| serde_json::from_str::<KnownNamesFile>(&contents).ok())
            .map(|file| {
                let mut names: HashSet<String> = file.brands.into_iter().collect();
                for hotel_names in file.restaurants.into_values() {
                    names.extend(hotel_names);
                }
                names.extend(file.facilities);
                names.extend(file.room_types);
                names
            })
            .unwrap_or_else(|| DEFAULT_KNOWN_NAMES.clone());
        Self { names }
    }

    /// True if `noun` is a known name, or contains / is contained by one
    /// case-insensitively.
    pub fn contains(&self, noun: &str) -> bool {
        let noun_lower = noun.to_lowercase();
        self.names.iter().any(|known| {
            let known_lower = known.to_lowercase();
            known_lower == noun_lower || noun_lower.contains(&known_lower)
        })
    }
}

/// Regexes scrubbed from every verified answer as a final pass, loaded from
/// `forbidden_patterns.json` (one JSON string per pattern) with a tiny
/// built-in fallback if the file is absent or any pattern fails to compile.
pub struct ForbiddenPatterns {
    set: Vec<Regex>,
}

impl ForbiddenPatterns {
    pub fn load(path: Option<&Path>) -> Self {
        let patterns: Vec<String> = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|contents| serde_json::from_str::<ForbiddenPatternsFile>(&contents).ok())
            .map(|file| file.patterns)
            .filter(|patterns| !patterns.is_empty())
            .unwrap_or_else(|| DEFAULT_FORBIDDEN_PATTERNS.iter().map(|s| s.to_string()).collect());

        let set = patterns
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect();
        Self { set }
    }

    /// Strips every forbidden phrase, then collapses runs of 3+ newlines.
    pub fn scrub(&self, answer: &str) -> String {
        let mut cleaned = answer.to_string();
        for pattern in &self.set {
            cleaned = pattern.replace_all(&cleaned, "").to_string();
        }
        collapse_blank_runs(&cleaned)
    }
}

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

pub fn collapse_blank_runs(text: &str) -> String {
    BLANK_RUN.replace_all(text.trim(), "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_known_names_contains_brand() {
        let names = KnownNames::load(None);
        assert!(names.contains("조선"));
        assert!(!names.contains("낯선이름"));
    }

    #[test]
    fn test_default_forbidden_patterns_scrub() {
        let patterns = ForbiddenPatterns::load(None);
        let cleaned = patterns.scrub("더 궁금하신가요? 감사합니다.");
        assert!(!cleaned.contains("궁금하신가요"));
    }

    #[test]
    fn test_load_from_missing_path_falls_back() {
        let names = KnownNames::load(Some(Path::new("/nonexistent/known_names.json")));
        assert!(names.contains("그래비티"));
    }
}
