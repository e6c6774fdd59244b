//! Append-only audit trail for pipeline runs.
//!
//! Every attempted stage appends exactly one [`StageRecord`], whether the
//! stage succeeded or failed. Ordinals are assigned at append time, start at
//! 1, and strictly increase with no gaps, so the ledger doubles as a replay
//! of what the pipeline actually did and in which order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TemplateResolution,
    PageExtraction,
    DataHealing,
    FieldMapping,
    StatementGeneration,
    QualityAudit,
    Certification,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemplateResolution => "template_resolution",
            Self::PageExtraction => "page_extraction",
            Self::DataHealing => "data_healing",
            Self::FieldMapping => "field_mapping",
            Self::StatementGeneration => "statement_generation",
            Self::QualityAudit => "quality_audit",
            Self::Certification => "certification",
        }
    }
}

/// One ledger entry: what ran, against which backend, over which input,
/// with what result and cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub ordinal: u32,
    pub stage: Stage,
    pub backend_id: String,
    pub input_hash: String,
    pub output_summary: String,
    pub latency_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only stage record sequence for one run.
///
/// Written by the single orchestrator task; not designed for concurrent
/// writers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLedger {
    records: Vec<StageRecord>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for an attempted stage and return its ordinal.
    pub fn append(
        &mut self,
        stage: Stage,
        backend_id: &str,
        input_hash: String,
        output_summary: String,
        latency: std::time::Duration,
    ) -> u32 {
        let ordinal = (self.records.len() + 1) as u32;
        tracing::debug!(
            ordinal,
            stage = stage.as_str(),
            backend_id,
            latency_ms = latency.as_millis() as u64,
            %output_summary,
            "Stage recorded"
        );
        self.records.push(StageRecord {
            ordinal,
            stage,
            backend_id: backend_id.to_string(),
            input_hash,
            output_summary,
            latency_seconds: latency.as_secs_f64(),
            timestamp: Utc::now(),
        });
        ordinal
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&StageRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<StageRecord> {
        self.records
    }
}

/// SHA-256 of `bytes` as lowercase hex, used for ledger input hashes.
pub fn content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().map(|b| format!("{b:02x}")).collect()
}
