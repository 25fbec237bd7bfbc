//! Named error types at the crate's boundaries.
//!
//! Pipeline nodes never propagate these — per the "no exceptions as control flow"
//! design note, node failures are recorded as record fields (`llmFailed`,
//! `evidencePassed`, ...) and handled by the next node, not by `?`. These types exist
//! for genuine boundary failures: config loading, the LLM transport, the vector index.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse json config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM call timed out after {0}s")]
    Timeout(u64),
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM backend returned an error status: {0}")]
    BadStatus(String),
}

#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),
    #[error("vector index search failed: {0}")]
    Search(String),
}

/// The outcome of an LLM call, modeled as a sum type rather than a `Result` a caller
/// might `?`-away. Timeouts are never retried and never silently become empty strings.
#[derive(Debug, Clone)]
pub enum LlmOutcome {
    Ok(String),
    Timeout,
    Failure(String),
}

impl LlmOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            LlmOutcome::Ok(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, LlmOutcome::Ok(_))
    }
}
