//! Structured JSONL audit log: one line per completed request, written to
//! `logs/chat_YYYYMMDD.jsonl` in append mode. Grounded in
//! `rag/nodes_verify.py::logNode`'s record shape, adapted from its `data/logs/` path
//! convention to this crate's flatter `logs/` layout (SPEC_FULL.md §1.3).

use std::fs::OpenOptions;
use std::io::Write;

use chrono::Utc;
use serde::Serialize;

use crate::state::{GroundingConfidence, PipelineRecord};

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    timestamp: String,
    duration_s: f64,
    query: &'a str,
    hotel: Option<&'a str>,
    category: Option<&'a str>,
    evidence_passed: bool,
    verification_passed: bool,
    verification_issues: &'a [String],
    top_score: f32,
    chunks_count: usize,
    final_answer: &'a str,
    grounding_confidence: Option<&'static str>,
    grounding_passed: Option<bool>,
    query_intents: &'a [String],
}

fn confidence_label(confidence: GroundingConfidence) -> &'static str {
    match confidence {
        GroundingConfidence::Certain => "certain",
        GroundingConfidence::Uncertain => "uncertain",
        GroundingConfidence::Ungrounded => "ungrounded",
    }
}

fn log_path() -> std::path::PathBuf {
    let dir = std::path::Path::new("logs");
    let date = Utc::now().format("%Y%m%d");
    dir.join(format!("chat_{date}.jsonl"))
}

/// Appends one JSONL line for `record`. Logging failures (missing directory,
/// permissions) are swallowed with a warning — a request must never fail because its
/// audit trail couldn't be written.
pub fn write(record: &PipelineRecord) {
    let entry = LogRecord {
        timestamp: Utc::now().to_rfc3339(),
        duration_s: record.elapsed_secs(),
        query: &record.query,
        hotel: record.detected_hotel.as_deref(),
        category: record.effective_category.as_deref(),
        evidence_passed: record.evidence_passed,
        verification_passed: record.verification_passed,
        verification_issues: &record.verification_issues,
        top_score: record.top_score,
        chunks_count: record.retrieved_chunks.len(),
        final_answer: &record.final_answer,
        grounding_confidence: record.grounding_result.as_ref().map(|g| confidence_label(g.confidence)),
        grounding_passed: record.grounding_result.as_ref().map(|g| g.passed),
        query_intents: &record.query_intents,
    };

    let line = match serde_json::to_string(&entry) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize chat log record");
            return;
        }
    };

    let path = log_path();
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(error = %e, path = %dir.display(), "failed to create log directory");
            return;
        }
    }

    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| writeln!(f, "{line}"));

    if let Err(e) = result {
        tracing::warn!(error = %e, path = %path.display(), "failed to append chat log record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_does_not_panic_without_log_dir() {
        let record = PipelineRecord::new("테스트 질문".into(), None, vec![], None);
        write(&record);
    }

    #[test]
    fn test_confidence_label_mapping() {
        assert_eq!(confidence_label(GroundingConfidence::Certain), "certain");
        assert_eq!(confidence_label(GroundingConfidence::Uncertain), "uncertain");
    }
}
