//! Ambient configuration: a `~/.josun-rag/config.toml` file, overridable by CLI flags
//! and environment variables (clap's `env` attribute), with a `Config::default()`
//! fallback on any load failure. Modeled on `mira-chat/src/config.rs`.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub qdrant_url: Option<String>,
    pub groq_api_key: Option<String>,
    pub groq_model: Option<String>,
    pub ollama_model: Option<String>,
    pub log_dir: Option<String>,
    pub known_names_path: Option<String>,
    pub forbidden_patterns_path: Option<String>,
    pub evidence_gate_threshold: Option<f32>,
    pub min_chunks_required: Option<usize>,
    pub reranker_enabled: Option<bool>,
    pub llm_enabled: Option<bool>,
}

impl Config {
    /// Loads `~/.josun-rag/config.toml`. Missing file or parse error both fall back to
    /// `Config::default()` — this deliberately never hard-fails startup, matching the
    /// teacher's `Config::load()`. The warning is printed directly (not via `tracing`)
    /// since the subscriber has not been installed yet at this point in `main()`.
    pub fn load() -> Self {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("warning: failed to parse {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".josun-rag")
            .join("config.toml")
    }
}

/// CLI arguments. Precedence is CLI flag > config-file value > built-in default,
/// resolved explicitly in `main()` rather than via clap's own defaulting so the
/// config-file layer can participate.
#[derive(Debug, Parser)]
#[command(name = "josun-rag", about = "Hotel FAQ retrieval-augmented QA core")]
pub struct Args {
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    #[arg(long, env = "QDRANT_URL")]
    pub qdrant_url: Option<String>,

    #[arg(long, env = "USE_GROQ")]
    pub use_groq: Option<bool>,

    #[arg(long, env = "GROQ_API_KEY")]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "GROQ_MODEL")]
    pub groq_model: Option<String>,

    #[arg(long, env = "LLM_TIMEOUT")]
    pub llm_timeout: Option<u64>,

    #[arg(long, env = "OLLAMA_MODEL")]
    pub ollama_model: Option<String>,

    #[arg(long, env = "OLLAMA_NUM_CTX")]
    pub ollama_num_ctx: Option<u32>,

    #[arg(long, env = "OLLAMA_KEEP_ALIVE")]
    pub ollama_keep_alive: Option<String>,

    #[arg(long, env = "OLLAMA_NUM_THREAD")]
    pub ollama_num_thread: Option<u32>,

    #[arg(long, env = "OLLAMA_NUM_GPU")]
    pub ollama_num_gpu: Option<i32>,

    #[arg(long, env = "OLLAMA_NUM_BATCH")]
    pub ollama_num_batch: Option<u32>,

    #[arg(long, env = "LLM_CACHE_ENABLED")]
    pub llm_cache_enabled: Option<bool>,

    #[arg(long, env = "LLM_CACHE_SIZE")]
    pub llm_cache_size: Option<usize>,

    #[arg(long, env = "KNOWN_NAMES_PATH")]
    pub known_names_path: Option<String>,

    #[arg(long, env = "FORBIDDEN_PATTERNS_PATH")]
    pub forbidden_patterns_path: Option<String>,

    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<String>,

    #[arg(long, env = "EVIDENCE_THRESHOLD")]
    pub evidence_gate_threshold: Option<f32>,

    #[arg(long, env = "MIN_CHUNKS_REQUIRED")]
    pub min_chunks_required: Option<usize>,

    #[arg(long, env = "RERANKER_ENABLED")]
    pub reranker_enabled: Option<bool>,

    #[arg(long, env = "LLM_ENABLED")]
    pub llm_enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let cfg = Config::default();
        assert!(cfg.qdrant_url.is_none());
        assert!(cfg.groq_api_key.is_none());
    }

    #[test]
    fn test_config_path_ends_with_expected_segments() {
        let path = Config::config_path();
        assert!(path.ends_with(".josun-rag/config.toml"));
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let result = Config::load_from(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }
}
