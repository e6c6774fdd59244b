//! Deterministic repair of extracted records.
//!
//! The classification backend reports data quality issues; [`heal`] applies
//! one repair per issue on a copy of the record set. Repairs are dispatched
//! by issue kind:
//!
//! - `missing`: write the suggested value into the target cell
//! - `outlier`: cap a numeric cell at the field's 95th percentile
//! - `type_error`: coerce the whole field column to numbers, nulling cells
//!   that will not coerce
//! - `inconsistent_format`: left untouched for human review
//!
//! Issue lists come from an untrusted model, so targets are re-checked here:
//! an issue naming a row or field that does not exist is skipped silently.

use serde::{Deserialize, Serialize};

use crate::pipeline::extraction::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Missing,
    Outlier,
    TypeError,
    InconsistentFormat,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Outlier => "outlier",
            Self::TypeError => "type_error",
            Self::InconsistentFormat => "inconsistent_format",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One detected defect in the extracted records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingIssue {
    pub row: usize,
    pub field: String,
    pub kind: IssueKind,
    #[serde(default)]
    pub suggested_value: Option<serde_json::Value>,
    pub severity: IssueSeverity,
}

/// Apply every issue's repair to a copy of `records`.
///
/// Pure and free of I/O. The input slice is never mutated, and healing an
/// already-healed set with an empty issue list returns it unchanged:
/// `heal(heal(records, issues), []) == heal(records, issues)`.
pub fn heal(records: &[Record], issues: &[HealingIssue]) -> Vec<Record> {
    let mut healed = records.to_vec();

    for issue in issues {
        let Some(record) = healed.get(issue.row) else {
            tracing::debug!(
                row = issue.row,
                field = %issue.field,
                kind = issue.kind.as_str(),
                "Issue targets a missing row, skipping"
            );
            continue;
        };
        if !record.contains_key(&issue.field) {
            tracing::debug!(
                row = issue.row,
                field = %issue.field,
                kind = issue.kind.as_str(),
                "Issue targets an unknown field, skipping"
            );
            continue;
        }

        match issue.kind {
            IssueKind::Missing => apply_missing(&mut healed, issue),
            IssueKind::Outlier => apply_outlier(&mut healed, issue),
            IssueKind::TypeError => coerce_column(&mut healed, &issue.field),
            IssueKind::InconsistentFormat => {
                tracing::debug!(
                    row = issue.row,
                    field = %issue.field,
                    "Format issue passed through for review"
                );
            }
        }
    }

    healed
}

fn apply_missing(records: &mut [Record], issue: &HealingIssue) {
    if let Some(suggested) = &issue.suggested_value {
        records[issue.row].insert(issue.field.clone(), suggested.clone());
    }
}

/// Cap a numeric cell at the field's 95th percentile, recomputed from the
/// current record set. Non-numeric cells are left alone, and values already
/// at or below the percentile are not rewritten.
fn apply_outlier(records: &mut [Record], issue: &HealingIssue) {
    let Some(original) = records[issue.row].get(&issue.field).and_then(numeric_value) else {
        return;
    };

    let column: Vec<f64> = records
        .iter()
        .filter_map(|r| r.get(&issue.field).and_then(numeric_value))
        .collect();
    let Some(p95) = percentile(&column, 0.95) else {
        return;
    };

    if p95 < original {
        if let Some(capped) = serde_json::Number::from_f64(p95) {
            records[issue.row].insert(issue.field.clone(), serde_json::Value::Number(capped));
        }
    }
}

/// Coerce every cell of `field` to a number, nulling cells that will not
/// coerce. Numbers and nulls pass through untouched.
fn coerce_column(records: &mut [Record], field: &str) {
    for record in records.iter_mut() {
        let Some(value) = record.get_mut(field) else {
            continue;
        };
        let coerced = match value {
            serde_json::Value::Number(_) | serde_json::Value::Null => continue,
            serde_json::Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number),
            _ => None,
        };
        *value = coerced.unwrap_or(serde_json::Value::Null);
    }
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    value.as_f64()
}

/// Interpolated percentile over `values`, `q` in [0, 1]. None when empty.
fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
