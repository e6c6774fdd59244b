//! Pipeline configuration: confidence thresholds, worker limits, admission caps.
//!
//! Every tunable the pipeline reads lives here and is passed in explicitly at
//! construction. Invalid combinations are rejected at startup by [`PipelineConfig::validate`],
//! never patched up at runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid threshold ordering: review_threshold ({review}) must be strictly below auto_map_threshold ({auto})")]
    ThresholdOrdering { review: f64, auto: f64 },

    #[error("Threshold out of range: {name} = {value} (must be within {range})")]
    ThresholdRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("Invalid setting: {name} = {value} (must be at least 1)")]
    BelowMinimum { name: &'static str, value: u64 },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Tunables for one pipeline instance.
///
/// Defaults match the values the system has been operated with:
/// 4 extraction workers, a 60 s per-page budget, and the 0.85 / 0.70
/// mapping thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Similarity strictly above this maps a field automatically.
    pub auto_map_threshold: f64,
    /// Similarity at or above this (and not above `auto_map_threshold`)
    /// queues the field for human review.
    pub review_threshold: f64,
    /// Upper bound on concurrently executing page-extraction tasks.
    pub max_workers: usize,
    /// Wall-clock budget for a single page-extraction attempt.
    pub per_page_timeout_secs: u64,
    /// Admission cap: paged documents above this page count are rejected.
    pub max_pages: usize,
    /// Admission cap: documents above this size are rejected.
    pub max_document_size_mb: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_map_threshold: 0.85,
            review_threshold: 0.70,
            max_workers: 4,
            per_page_timeout_secs: 60,
            max_pages: 100,
            max_document_size_mb: 50,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Check the whole configuration; called once at startup.
    ///
    /// Threshold invariant: `0 <= review_threshold < auto_map_threshold <= 1`.
    /// A violating configuration is a fatal error, not a runtime fallback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.auto_map_threshold > 0.0 && self.auto_map_threshold <= 1.0) {
            return Err(ConfigError::ThresholdRange {
                name: "auto_map_threshold",
                value: self.auto_map_threshold,
                range: "(0, 1]",
            });
        }
        if !(self.review_threshold >= 0.0 && self.review_threshold < 1.0) {
            return Err(ConfigError::ThresholdRange {
                name: "review_threshold",
                value: self.review_threshold,
                range: "[0, 1)",
            });
        }
        if self.review_threshold >= self.auto_map_threshold {
            return Err(ConfigError::ThresholdOrdering {
                review: self.review_threshold,
                auto: self.auto_map_threshold,
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "max_workers",
                value: 0,
            });
        }
        if self.per_page_timeout_secs == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "per_page_timeout_secs",
                value: 0,
            });
        }
        if self.max_pages == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "max_pages",
                value: 0,
            });
        }
        if self.max_document_size_mb == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "max_document_size_mb",
                value: 0,
            });
        }
        Ok(())
    }

    /// Admission size cap in bytes.
    pub fn max_document_size_bytes(&self) -> u64 {
        self.max_document_size_mb * 1024 * 1024
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
