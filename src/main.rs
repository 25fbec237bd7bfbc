//! Boot sequence: env/config loading, logging init, singleton construction, and the
//! HTTP server. Grounded in `mira-chat/src/main.rs`'s dotenv-then-tracing-init order,
//! CLI/config-file precedence resolution, and pretty startup banner.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use josun_rag::config::{Args, Config};
use josun_rag::http::{self, AppState};
use josun_rag::known_names::{ForbiddenPatterns, KnownNames};
use josun_rag::llm::{GroqBackend, LlmBackend, LlmClient, OllamaBackend};
use josun_rag::orchestrator::PipelineOrchestrator;
use josun_rag::reranker::{PlaceholderCrossEncoder, Reranker};
use josun_rag::session::SessionStore;
use josun_rag::state::PipelineSettings;
use josun_rag::vector_index::{QdrantIndex, VectorIndex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_path = dirs::home_dir().map(|h| h.join(".josun-rag").join(".env")).filter(|p| p.exists());
    if let Some(path) = env_path {
        let _ = dotenvy::from_path(&path);
    } else {
        let _ = dotenvy::dotenv();
    }

    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Config::load();

    let qdrant_url = args.qdrant_url.clone().or(config.qdrant_url.clone());
    let use_groq = args.use_groq.unwrap_or(false);
    let groq_api_key = args.groq_api_key.clone().or(config.groq_api_key.clone());
    let groq_model = args.groq_model.clone().or(config.groq_model.clone()).unwrap_or_else(|| "llama-3.3-70b-versatile".to_string());
    let ollama_model = args.ollama_model.clone().or(config.ollama_model.clone()).unwrap_or_else(|| "qwen2.5:14b".to_string());
    let ollama_num_ctx = args.ollama_num_ctx.unwrap_or(4096);
    let ollama_keep_alive = args.ollama_keep_alive.clone().unwrap_or_else(|| "30m".to_string());
    let ollama_num_thread = args.ollama_num_thread.unwrap_or(8);
    let llm_cache_enabled = args.llm_cache_enabled.unwrap_or(true);
    let known_names_path = args.known_names_path.clone().or(config.known_names_path.clone());
    let forbidden_patterns_path = args.forbidden_patterns_path.clone().or(config.forbidden_patterns_path.clone());
    let evidence_gate_threshold = args.evidence_gate_threshold.or(config.evidence_gate_threshold).unwrap_or(0.65);
    let min_chunks_required = args.min_chunks_required.or(config.min_chunks_required).unwrap_or(1);
    let reranker_enabled = args.reranker_enabled.or(config.reranker_enabled).unwrap_or(true);
    let llm_enabled = args.llm_enabled.or(config.llm_enabled).unwrap_or(true);

    println!();
    println!("josun-rag {}", env!("CARGO_PKG_VERSION"));
    println!("{}", "-".repeat(50));
    println!("Listen       {}", args.listen);
    println!("LLM backend  {}", if use_groq { format!("groq ({groq_model})") } else { format!("ollama ({ollama_model})") });
    println!(
        "Qdrant       {}",
        qdrant_url.as_deref().map(|_| "configured").unwrap_or("disabled (search unavailable)")
    );

    let backend: Box<dyn LlmBackend> = if use_groq {
        let Some(api_key) = groq_api_key else {
            anyhow::bail!("GROQ_API_KEY required when --use-groq is set");
        };
        Box::new(GroqBackend::new(api_key, groq_model))
    } else {
        Box::new(OllamaBackend::new("http://localhost:11434", ollama_model, ollama_keep_alive, ollama_num_thread))
    };
    let llm = Arc::new(LlmClient::new(backend, llm_cache_enabled).with_default_num_ctx(ollama_num_ctx));
    let vector_index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(qdrant_url.as_deref(), "hotel_faq"));
    let reranker = Arc::new(Reranker::new(Box::new(PlaceholderCrossEncoder)));
    let sessions = SessionStore::new();
    let known_names = Arc::new(KnownNames::load(known_names_path.as_deref().map(std::path::Path::new)));
    let forbidden_patterns = Arc::new(ForbiddenPatterns::load(forbidden_patterns_path.as_deref().map(std::path::Path::new)));

    let settings = PipelineSettings {
        evidence_gate_threshold,
        min_chunks_required,
        reranker_enabled,
        llm_enabled,
    };

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        llm,
        vector_index,
        reranker,
        sessions,
        known_names,
        forbidden_patterns,
        settings,
    ));

    println!("{}", "-".repeat(50));
    println!();

    let port: u16 = args.listen.rsplit(':').next().and_then(|p| p.parse().ok()).unwrap_or(8080);
    http::run(port, AppState { orchestrator }).await
}
