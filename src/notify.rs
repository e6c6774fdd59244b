//! Run alerting.
//!
//! Notifications are fire-and-forget: a delivery failure is logged and
//! swallowed, never failing the run that raised it. The audit outcome maps
//! onto a severity ladder; clean passes map to `Success`, which the
//! orchestrator suppresses rather than sending.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AuditStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Map a finished audit onto the alert ladder.
///
/// A failed audit is critical, anything flagged for review is a warning,
/// and passing audits grade down by score: below 70 warns, below 85
/// informs, at or above 85 is a clean pass.
pub fn audit_severity(status: AuditStatus, score: f64) -> Severity {
    match status {
        AuditStatus::Fail => Severity::Critical,
        AuditStatus::Review => Severity::Warning,
        AuditStatus::Pass => {
            if score < 70.0 {
                Severity::Warning
            } else if score < 85.0 {
                Severity::Info
            } else {
                Severity::Success
            }
        }
    }
}

/// Delivery surface for run alerts.
pub trait Notifier: Send + Sync {
    fn notify(&self, run_id: &Uuid, severity: Severity, message: &str);
}

/// Notifier that writes alerts to the log stream.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, run_id: &Uuid, severity: Severity, message: &str) {
        match severity {
            Severity::Critical => {
                tracing::error!(%run_id, severity = severity.as_str(), "{message}")
            }
            Severity::Warning => {
                tracing::warn!(%run_id, severity = severity.as_str(), "{message}")
            }
            Severity::Info | Severity::Success => {
                tracing::info!(%run_id, severity = severity.as_str(), "{message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_audit_is_critical() {
        assert_eq!(audit_severity(AuditStatus::Fail, 95.0), Severity::Critical);
        assert_eq!(audit_severity(AuditStatus::Fail, 10.0), Severity::Critical);
    }

    #[test]
    fn review_audit_warns_regardless_of_score() {
        assert_eq!(audit_severity(AuditStatus::Review, 99.0), Severity::Warning);
    }

    #[test]
    fn passing_audit_grades_by_score() {
        assert_eq!(audit_severity(AuditStatus::Pass, 60.0), Severity::Warning);
        assert_eq!(audit_severity(AuditStatus::Pass, 70.0), Severity::Info);
        assert_eq!(audit_severity(AuditStatus::Pass, 84.9), Severity::Info);
        assert_eq!(audit_severity(AuditStatus::Pass, 85.0), Severity::Success);
        assert_eq!(audit_severity(AuditStatus::Pass, 100.0), Severity::Success);
    }

    #[test]
    fn severity_wire_format_is_uppercase() {
        assert_eq!(
            serde_json::to_value(Severity::Critical).unwrap(),
            serde_json::json!("CRITICAL")
        );
        assert_eq!(Severity::Warning.as_str(), "WARNING");
    }

    #[test]
    fn log_notifier_delivers_without_panicking() {
        let notifier = LogNotifier;
        let run_id = Uuid::new_v4();
        notifier.notify(&run_id, Severity::Critical, "audit failed");
        notifier.notify(&run_id, Severity::Info, "audit score 80.0");
    }
}
