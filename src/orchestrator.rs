//! The nine-node pipeline graph: sequential execution with two conditional
//! short-circuit edges (needs-clarification → straight to `log`; evidence-gate-fail →
//! straight to `policyFilter`, skipping compose and verify). Grounded in the graph
//! wiring implied by `rag/nodes_*.py`'s node names and `rag/nodes_verify.py`'s
//! conditional edges, reshaped into an explicit Rust call sequence instead of a
//! graph-execution library.

use std::sync::Arc;
use std::time::Instant;

use crate::known_names::{ForbiddenPatterns, KnownNames};
use crate::llm::LlmClient;
use crate::log as log_node;
use crate::reranker::Reranker;
use crate::session::SessionStore;
use crate::state::{HistoryMessage, PipelineRecord, PipelineSettings};
use crate::vector_index::VectorIndex;
use crate::{clarification, compose, policy, preprocess, query_rewrite, retrieve, verify};

/// Holds every singleton collaborator the pipeline needs across requests. Constructed
/// once at startup and shared behind `Arc` by the HTTP layer.
pub struct PipelineOrchestrator {
    pub llm: Arc<LlmClient>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub reranker: Arc<Reranker>,
    pub sessions: Arc<SessionStore>,
    pub known_names: Arc<KnownNames>,
    pub forbidden_patterns: Arc<ForbiddenPatterns>,
    pub settings: PipelineSettings,
}

/// What the HTTP layer actually needs back from a completed request.
pub struct PipelineOutcome {
    pub answer: String,
    pub hotel: Option<String>,
    pub category: Option<String>,
    pub evidence_passed: bool,
    pub sources: Vec<String>,
    pub top_score: f32,
}

impl PipelineOrchestrator {
    pub fn new(
        llm: Arc<LlmClient>,
        vector_index: Arc<dyn VectorIndex>,
        reranker: Arc<Reranker>,
        sessions: Arc<SessionStore>,
        known_names: Arc<KnownNames>,
        forbidden_patterns: Arc<ForbiddenPatterns>,
        settings: PipelineSettings,
    ) -> Self {
        Self { llm, vector_index, reranker, sessions, known_names, forbidden_patterns, settings }
    }

    /// Runs a single request through all nine nodes (or a short-circuit path), logging
    /// per-node timing at debug level and a single JSONL record at the end.
    pub async fn handle(
        &self,
        query: String,
        hotel: Option<String>,
        history: Vec<HistoryMessage>,
        session_id: Option<String>,
    ) -> PipelineOutcome {
        let session_context = Some(self.sessions.get_or_create(session_id).await);
        let mut record = PipelineRecord::new(query, hotel, history, session_context);

        self.run_node("queryRewrite", || query_rewrite::run(&mut record, &self.llm)).await;
        self.run_node_sync("preprocess", || preprocess::run(&mut record));
        self.run_node_sync("clarificationCheck", || clarification::run(&mut record));

        if record.needs_clarification {
            self.finish_with_clarification(&mut record).await;
            log_node::write(&record);
            return self.outcome(&record);
        }

        self.run_node("retrieve", || retrieve::run(&mut record, self.vector_index.as_ref(), &self.reranker, &self.settings))
            .await;
        self.run_node_sync("evidenceGate", || retrieve::evidence_gate(&mut record, &self.settings));

        if record.evidence_passed {
            self.run_node("answerCompose", || compose::run(&mut record, &self.llm)).await;
            self.run_node_sync("verify", || verify::run(&mut record, &self.known_names, &self.forbidden_patterns));
        } else {
            record.verified_answer = record.answer.clone();
        }

        self.run_node_sync("policyFilter", || policy::run(&mut record));
        self.update_session(&record).await;
        log_node::write(&record);
        self.outcome(&record)
    }

    async fn run_node<F, Fut>(&self, name: &str, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let start = Instant::now();
        f().await;
        tracing::debug!(node = name, elapsed_ms = start.elapsed().as_millis(), "pipeline node completed");
    }

    fn run_node_sync<F>(&self, name: &str, f: F)
    where
        F: FnOnce(),
    {
        let start = Instant::now();
        f();
        tracing::debug!(node = name, elapsed_ms = start.elapsed().as_millis(), "pipeline node completed");
    }

    /// The clarification short-circuit: no retrieval, compose, verify, or policy run —
    /// the clarifying question itself becomes the final answer.
    async fn finish_with_clarification(&self, record: &mut PipelineRecord) {
        let question = record.clarification_question.clone().unwrap_or_default();
        let options = if record.clarification_options.is_empty() {
            String::new()
        } else {
            format!("\n\n- {}", record.clarification_options.join("\n- "))
        };
        record.final_answer = format!("{question}{options}");
        record.policy_passed = true;
    }

    /// Session state is updated once, after the pipeline has fully resolved — never
    /// mid-pipeline, so a concurrent request for the same session never observes a
    /// half-updated topic.
    async fn update_session(&self, record: &PipelineRecord) {
        let Some(ctx) = &record.session_context else { return };
        let mut guard = ctx.lock().await;
        guard.update_topic(record.conversation_topic.as_deref(), record.detected_hotel.as_deref());
        if !record.retrieved_chunks.is_empty() {
            guard.cache_chunks(record.retrieved_chunks.clone(), &record.normalized_query);
        }
    }

    fn outcome(&self, record: &PipelineRecord) -> PipelineOutcome {
        PipelineOutcome {
            answer: record.final_answer.clone(),
            hotel: record.detected_hotel.clone(),
            category: record.effective_category.clone(),
            evidence_passed: record.evidence_passed,
            sources: record.sources.clone(),
            top_score: record.top_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmBackend, LlmOptions};
    use crate::reranker::PlaceholderCrossEncoder;
    use crate::vector_index::{Chunk, ChunkMetadata, SearchFilter};
    use async_trait::async_trait;

    struct StubLlm;
    #[async_trait]
    impl LlmBackend for StubLlm {
        async fn chat(&self, _system: &str, _prompt: &str, _options: &LlmOptions) -> Result<String, crate::error::LlmError> {
            Ok("죄송합니다, 관련 정보를 찾지 못했습니다.".to_string())
        }
        async fn chat_stream(
            &self,
            _system: &str,
            _prompt: &str,
            _options: &LlmOptions,
            _on_token: &crate::llm::StreamCallback,
        ) -> Result<String, crate::error::LlmError> {
            Ok(String::new())
        }
    }

    struct EmptyIndex;
    #[async_trait]
    impl VectorIndex for EmptyIndex {
        async fn search(
            &self,
            _query: &str,
            _filter: SearchFilter,
            _top_k: usize,
        ) -> Result<Vec<Chunk>, crate::error::VectorIndexError> {
            Ok(Vec::new())
        }
        fn is_available(&self) -> bool {
            true
        }
    }

    fn make_orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            Arc::new(LlmClient::new(Box::new(StubLlm), false)),
            Arc::new(EmptyIndex),
            Arc::new(Reranker::new(Box::new(PlaceholderCrossEncoder))),
            SessionStore::new(),
            Arc::new(KnownNames::load(None)),
            Arc::new(ForbiddenPatterns::load(None)),
            PipelineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_no_evidence_short_circuits_to_policy_fallback() {
        let orchestrator = make_orchestrator();
        let outcome = orchestrator.handle("조식 시간 알려줘".into(), Some("josun_palace".into()), vec![], None).await;
        assert!(!outcome.evidence_passed);
        assert!(!outcome.answer.is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_query_short_circuits_to_clarification() {
        let orchestrator = make_orchestrator();
        let outcome = orchestrator.handle("가는 방법 알려줘".into(), None, vec![], None).await;
        assert!(outcome.answer.contains("호텔"));
    }

    #[test]
    fn test_dummy_metadata_constructs() {
        let _ = ChunkMetadata {
            doc_id: "d".into(),
            hotel: "josun_palace".into(),
            hotel_name: "조선 팰리스".into(),
            page_type: "faq".into(),
            url: String::new(),
            category: None,
            language: "ko".into(),
            updated_at: None,
            chunk_index: 0,
        };
    }
}
