//! Backend response parsing and shape validation.
//!
//! Inference backends reply with text that usually wraps JSON in Markdown
//! code fences. [`parse_json_payload`] peels the fences and parses; the
//! typed helpers below then validate the JSON against the shape each stage
//! expects. Any violation surfaces as [`BackendError::MalformedResponse`].

use serde::de::DeserializeOwned;

use super::types::{AuditReport, MappingResponse};
use super::BackendError;
use crate::pipeline::extraction::types::PageContent;
use crate::pipeline::healing::HealingIssue;

/// Parse a backend text reply into JSON, tolerating Markdown code fences.
pub fn parse_json_payload(response: &str) -> Result<serde_json::Value, BackendError> {
    let json_str = strip_code_fences(response);
    serde_json::from_str(json_str)
        .map_err(|e| BackendError::MalformedResponse(format!("Invalid JSON payload: {e}")))
}

/// Strip a ```json ... ``` (or bare ``` ... ```) fence if present.
///
/// Returns the inner content, or the trimmed input when no fence is found.
/// Trailing prose after the closing fence is discarded.
fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        let content = &trimmed[content_start..];
        return match content.find("```") {
            Some(end) => content[..end].trim(),
            None => content.trim(),
        };
    }

    if let Some(rest) = trimmed.strip_prefix("```") {
        // Bare fence: drop the opening fence line, then the closing fence.
        let content = match rest.find('\n') {
            Some(nl) => &rest[nl + 1..],
            None => rest,
        };
        return match content.find("```") {
            Some(end) => content[..end].trim(),
            None => content.trim(),
        };
    }

    trimmed
}

/// Validate a JSON value against an expected shape.
fn validate_shape<T: DeserializeOwned>(
    what: &str,
    value: serde_json::Value,
) -> Result<T, BackendError> {
    serde_json::from_value(value)
        .map_err(|e| BackendError::MalformedResponse(format!("{what}: {e}")))
}

/// Validate the per-page extraction shape: `{tables, headers, footnotes}`.
pub fn parse_page_content(value: serde_json::Value) -> Result<PageContent, BackendError> {
    validate_shape("page extraction", value)
}

/// Validate the issue-detection shape: `{"issues": [...]}`.
///
/// The envelope is strict; individual items are parsed leniently, skipping
/// entries the backend got wrong. The healer re-checks row and field targets
/// anyway, so a dropped item can only mean one less repair.
pub fn parse_issue_list(value: serde_json::Value) -> Result<Vec<HealingIssue>, BackendError> {
    #[derive(serde::Deserialize)]
    struct IssueEnvelope {
        issues: Vec<serde_json::Value>,
    }

    let envelope: IssueEnvelope = validate_shape("issue list", value)?;
    Ok(parse_array_lenient(&envelope.issues))
}

/// Validate the field-mapping shape: `{"mappings": [...], ...}`.
///
/// Strict all the way down: mapping drives the reconciliation the statements
/// are built from, so a response this stage cannot fully understand fails
/// the stage rather than silently shrinking.
pub fn parse_mapping_response(value: serde_json::Value) -> Result<MappingResponse, BackendError> {
    validate_shape("field mapping", value)
}

/// Validate the audit-report shape.
pub fn parse_audit_report(value: serde_json::Value) -> Result<AuditReport, BackendError> {
    validate_shape("audit report", value)
}

/// Parse an array leniently — skip items that fail to deserialize.
fn parse_array_lenient<T: DeserializeOwned>(items: &[serde_json::Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}
