use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RunStatus;

/// One processing run as persisted in the run store.
///
/// Created with status `processing` before the first stage executes and
/// updated exactly twice afterwards: on completion (`ready` or
/// `review_needed`, with verification fields filled in) or on terminal
/// failure (`error`, with the message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub user_id: String,
    pub fiscal_year: i32,
    pub document_ref: String,
    pub status: RunStatus,
    pub error_message: Option<String>,
    /// Overall audit score (0-100), present once the run completed.
    pub overall_score: Option<f64>,
    /// SHA-256 of the certificate document, present once the run completed.
    pub certificate_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Fresh run in `processing` state with a new id.
    pub fn new(user_id: &str, fiscal_year: i32, document_ref: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            fiscal_year,
            document_ref: document_ref.to_string(),
            status: RunStatus::Processing,
            error_message: None,
            overall_score: None,
            certificate_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}
