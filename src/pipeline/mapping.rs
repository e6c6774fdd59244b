//! Field mapping resolution and confidence classification.
//!
//! The classification backend proposes mappings from extracted source fields
//! to the reference schema, each with a similarity score. The score alone
//! decides what happens to the mapping; any action the backend suggests is
//! advisory and recomputed here from the configured thresholds.

use serde::{Deserialize, Serialize};

use crate::backend::MappingResponse;
use crate::pipeline_config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingAction {
    /// Confidence high enough to apply without review.
    AutoMap,
    /// Mid-band confidence, queued for human review.
    ReviewNeeded,
    /// Below the review floor: treated as a field the reference schema
    /// does not have.
    NewField,
}

impl MappingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoMap => "AUTO_MAP",
            Self::ReviewNeeded => "REVIEW_NEEDED",
            Self::NewField => "NEW_FIELD",
        }
    }
}

/// Classify a similarity score against the configured thresholds.
///
/// The upper boundary is exclusive and the lower inclusive: a score exactly
/// at `auto_map_threshold` or at `review_threshold` is `ReviewNeeded`.
pub fn classify(similarity: f64, config: &PipelineConfig) -> MappingAction {
    if similarity > config.auto_map_threshold {
        MappingAction::AutoMap
    } else if similarity >= config.review_threshold {
        MappingAction::ReviewNeeded
    } else {
        MappingAction::NewField
    }
}

/// One resolved mapping with its locally-computed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub reference_field: Option<String>,
    pub similarity: f64,
    pub action: MappingAction,
    pub reasoning: Option<String>,
}

/// Resolve a backend mapping response into classified field mappings.
///
/// Similarity scores are clamped into [0, 1] before classification; the
/// backend's advisory action is discarded (logged when it disagrees).
pub fn resolve_mappings(response: MappingResponse, config: &PipelineConfig) -> Vec<FieldMapping> {
    response
        .mappings
        .into_iter()
        .map(|raw| {
            let similarity = raw.similarity.clamp(0.0, 1.0);
            let action = classify(similarity, config);
            if let Some(advisory) = &raw.action {
                if advisory != action.as_str() {
                    tracing::debug!(
                        source_field = %raw.source_field,
                        advisory = %advisory,
                        computed = action.as_str(),
                        "Overriding backend-advised mapping action"
                    );
                }
            }
            FieldMapping {
                source_field: raw.source_field,
                reference_field: raw.reference_field,
                similarity,
                action,
                reasoning: raw.reasoning,
            }
        })
        .collect()
}

/// Per-run mapping statistics, carried into the pipeline outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSummary {
    pub auto_mapped: usize,
    pub review_needed: usize,
    pub new_fields: usize,
    pub average_similarity: f64,
}

impl MappingSummary {
    pub fn from_mappings(mappings: &[FieldMapping]) -> Self {
        let mut summary = Self {
            auto_mapped: 0,
            review_needed: 0,
            new_fields: 0,
            average_similarity: 0.0,
        };
        for mapping in mappings {
            match mapping.action {
                MappingAction::AutoMap => summary.auto_mapped += 1,
                MappingAction::ReviewNeeded => summary.review_needed += 1,
                MappingAction::NewField => summary.new_fields += 1,
            }
        }
        if !mappings.is_empty() {
            summary.average_similarity =
                mappings.iter().map(|m| m.similarity).sum::<f64>() / mappings.len() as f64;
        }
        summary
    }
}
