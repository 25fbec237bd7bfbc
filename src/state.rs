//! The pipeline record: an explicit struct with every field pre-declared, replacing the
//! "mutated dict" pattern the source used. Each field is owned by the node that writes
//! it; the orchestrator never re-orders and no node reads a field another node writes
//! later than it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::session::ConversationContext;
use crate::vector_index::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Ko,
    En,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankQuality {
    Ok,
    Poor,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingConfidence {
    Certain,
    Uncertain,
    Ungrounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestaurantAction {
    Proceed,
    Redirect,
    Clarify,
}

/// One role-tagged turn of conversation history, caller-supplied and read-only within
/// the pipeline.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Outcome of `EntityResolver::resolve`, grounded in `rag/entity.py::extractRestaurantEntity`.
#[derive(Debug, Clone, Default)]
pub struct RestaurantEntity {
    pub action: Option<RestaurantAction>,
    pub matched_alias: Option<String>,
    pub matched_hotels: Vec<String>,
    pub redirect_hotel: Option<String>,
    pub message: Option<String>,
    pub clarify_options: Vec<String>,
}

/// One sentence-level assertion extracted from a generated answer, and the evidence it
/// was checked against. Grounded in `rag/grounding.py`'s `Claim` dataclass.
#[derive(Debug, Clone)]
pub struct Claim {
    pub text: String,
    pub evidence_span: Option<String>,
    pub evidence_score: f32,
    pub is_grounded: bool,
    pub has_numeric: bool,
    pub numeric_verified: bool,
}

/// The grounding gate's full verdict over a composed answer. Grounded in
/// `rag/grounding.py`'s `GroundingResult` dataclass.
#[derive(Debug, Clone)]
pub struct GroundingResult {
    pub passed: bool,
    pub verified_claims: Vec<Claim>,
    pub rejected_claims: Vec<Claim>,
    pub reason: String,
    pub confidence: GroundingConfidence,
}

/// Tunables resolved once at startup (CLI > env > config file > built-in default) and
/// shared read-only across every request. Grounded in `policies/policy_manager.py`'s
/// `getEvidenceThreshold`/`getMinChunks`, resolved per SPEC_FULL.md's Open Question
/// decision as one configurable evidence-gate threshold rather than the several
/// differing constants scattered across the source (0.45/0.5/0.65).
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub evidence_gate_threshold: f32,
    pub min_chunks_required: usize,
    pub reranker_enabled: bool,
    pub llm_enabled: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            evidence_gate_threshold: 0.65,
            min_chunks_required: 1,
            reranker_enabled: true,
            llm_enabled: true,
        }
    }
}

/// The record that flows through all nine pipeline nodes. Exclusively owned by the
/// in-flight request; `session_context` is the one field that is a shared reference
/// into `SessionStore` rather than request-owned data — read and updated once, never
/// outlived by the request.
pub struct PipelineRecord {
    // caller-supplied, immutable
    pub query: String,
    pub hotel: Option<String>,
    pub history: Vec<HistoryMessage>,
    pub session_context: Option<Arc<Mutex<ConversationContext>>>,
    pub pipeline_start: Instant,

    // queryRewrite
    pub rewritten_query: String,
    pub llm_failed: bool,

    // preprocess
    pub language: Language,
    pub detected_hotel: Option<String>,
    pub detected_category: Option<String>,
    pub normalized_query: String,
    pub is_valid_query: bool,
    pub restaurant_entity: RestaurantEntity,
    pub restaurant_redirect_msg: Option<String>,

    // clarificationCheck
    pub needs_clarification: bool,
    pub clarification_question: Option<String>,
    pub clarification_options: Vec<String>,
    pub clarification_type: Option<String>,
    pub detected_context: Option<String>,

    // retrieve
    pub retrieved_chunks: Vec<Chunk>,
    pub top_score: f32,
    pub rerank_quality: RerankQuality,
    pub conversation_topic: Option<String>,
    pub effective_category: Option<String>,

    // evidenceGate
    pub evidence_passed: bool,
    pub evidence_reason: Option<String>,

    // answerCompose
    pub answer: String,
    pub sources: Vec<String>,

    // verify
    pub verification_passed: bool,
    pub verification_issues: Vec<String>,
    pub verified_answer: String,
    pub grounding_result: Option<GroundingResult>,
    pub query_intents: Vec<String>,

    // policyFilter
    pub policy_passed: bool,
    pub policy_reason: Option<String>,
    pub final_answer: String,
}

impl PipelineRecord {
    pub fn new(
        query: String,
        hotel: Option<String>,
        history: Vec<HistoryMessage>,
        session_context: Option<Arc<Mutex<ConversationContext>>>,
    ) -> Self {
        Self {
            rewritten_query: query.clone(),
            query,
            hotel,
            history,
            session_context,
            pipeline_start: Instant::now(),
            llm_failed: false,
            language: Language::Ko,
            detected_hotel: None,
            detected_category: None,
            normalized_query: String::new(),
            is_valid_query: true,
            restaurant_entity: RestaurantEntity::default(),
            restaurant_redirect_msg: None,
            needs_clarification: false,
            clarification_question: None,
            clarification_options: Vec::new(),
            clarification_type: None,
            detected_context: None,
            retrieved_chunks: Vec::new(),
            top_score: 0.0,
            rerank_quality: RerankQuality::Skipped,
            conversation_topic: None,
            effective_category: None,
            evidence_passed: false,
            evidence_reason: None,
            answer: String::new(),
            sources: Vec::new(),
            verification_passed: true,
            verification_issues: Vec::new(),
            verified_answer: String::new(),
            grounding_result: None,
            query_intents: Vec::new(),
            policy_passed: true,
            policy_reason: None,
            final_answer: String::new(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.pipeline_start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults_rewritten_query_to_query() {
        let record = PipelineRecord::new("체크인 시간".into(), None, vec![], None);
        assert_eq!(record.rewritten_query, "체크인 시간");
        assert!(!record.evidence_passed);
    }

    #[test]
    fn test_history_message_constructors() {
        let m = HistoryMessage::user("안녕하세요");
        assert_eq!(m.role, "user");
    }
}
