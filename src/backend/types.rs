//! Wire shapes for classification and audit responses.
//!
//! Page-extraction shapes live with the extraction stage
//! (`pipeline::extraction::types`) and healing-issue shapes with the healer
//! (`pipeline::healing`); this module holds the shapes the mapping and audit
//! stages expect back from the backend.

use serde::{Deserialize, Serialize};

use crate::models::AuditStatus;

/// One field-mapping decision as returned by the classification backend.
///
/// The `action` the backend proposes is advisory: the pipeline recomputes it
/// from `similarity` and the configured thresholds so that behavior is
/// identical across backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFieldMapping {
    pub source_field: String,
    #[serde(default)]
    pub reference_field: Option<String>,
    pub similarity: f64,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Envelope for the field-mapping response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResponse {
    pub mappings: Vec<RawFieldMapping>,
    #[serde(default)]
    pub unmatched_source: Vec<String>,
    #[serde(default)]
    pub unmatched_reference: Vec<String>,
}

/// One audit checklist item. Status and details are backend prose; the
/// pipeline stores them without interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCheck {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Arithmetic verification narratives attached to the audit report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MathematicalProofs {
    #[serde(default)]
    pub trial_balance: Option<String>,
    #[serde(default)]
    pub balance_sheet: Option<String>,
    #[serde(default)]
    pub income_statement: Option<String>,
    #[serde(default)]
    pub cash_flow: Option<String>,
}

/// Quality-assurance audit report.
///
/// `overall_status` and `overall_score` drive run completion status and
/// notification severity; everything else is carried into the certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub overall_status: AuditStatus,
    pub overall_score: f64,
    #[serde(default)]
    pub checks: Vec<AuditCheck>,
    #[serde(default)]
    pub mathematical_proofs: MathematicalProofs,
    #[serde(default)]
    pub risk_assessment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_response_parses_minimal_payload() {
        let json = serde_json::json!({
            "mappings": [
                {"source_field": "Net Revenue", "reference_field": "Revenue", "similarity": 0.91}
            ]
        });
        let parsed: MappingResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.mappings.len(), 1);
        assert_eq!(parsed.mappings[0].source_field, "Net Revenue");
        assert!(parsed.unmatched_source.is_empty());
        assert!(parsed.mappings[0].action.is_none());
    }

    #[test]
    fn mapping_without_similarity_rejected() {
        let json = serde_json::json!({
            "mappings": [{"source_field": "Cash"}]
        });
        let parsed: Result<MappingResponse, _> = serde_json::from_value(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn audit_report_parses_full_payload() {
        let json = serde_json::json!({
            "overall_status": "REVIEW",
            "overall_score": 78.5,
            "checks": [
                {"name": "trial_balance", "status": "PASS", "score": 100.0,
                 "details": "Debits 5200 == Credits 5200"},
                {"name": "completeness", "status": "WARNING", "recommendations": ["Review row 14"]}
            ],
            "mathematical_proofs": {
                "trial_balance": "sum(debits) = 5200 = sum(credits)"
            },
            "risk_assessment": "Two accounts need manual review"
        });
        let report: AuditReport = serde_json::from_value(json).unwrap();
        assert_eq!(report.overall_status, AuditStatus::Review);
        assert!((report.overall_score - 78.5).abs() < f64::EPSILON);
        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.checks[1].recommendations.len(), 1);
        assert!(report.mathematical_proofs.balance_sheet.is_none());
    }

    #[test]
    fn audit_report_requires_status_and_score() {
        let json = serde_json::json!({"checks": []});
        let parsed: Result<AuditReport, _> = serde_json::from_value(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_audit_status_rejected() {
        let json = serde_json::json!({"overall_status": "MAYBE", "overall_score": 50.0});
        let parsed: Result<AuditReport, _> = serde_json::from_value(json);
        assert!(parsed.is_err());
    }
}
