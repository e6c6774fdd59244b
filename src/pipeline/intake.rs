//! Submission admission checks.
//!
//! Everything here runs before a run row is created: a rejected submission
//! never appears in the run store.

use std::path::PathBuf;

use crate::models::DocumentKind;
use crate::pipeline_config::PipelineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Unsupported document format '{extension}' (expected pdf, xlsx or xls)")]
    UnsupportedFormat { extension: String },

    #[error("Document is {size_bytes} bytes, over the {limit_mb} MB limit")]
    DocumentTooLarge { size_bytes: u64, limit_mb: u64 },

    #[error("Document has {pages} pages, over the {limit} page limit")]
    TooManyPages { pages: usize, limit: usize },

    #[error("User id must not be empty")]
    EmptyUserId,

    #[error("User id is {length} characters, over the 255 character limit")]
    UserIdTooLong { length: usize },

    #[error("Document source does not match the declared {kind} kind")]
    SourceMismatch { kind: &'static str },

    #[error("Cannot inspect document: {0}")]
    Unreadable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A statement processing request as submitted by the caller.
#[derive(Debug, Clone)]
pub struct Submission {
    pub document_path: PathBuf,
    pub user_id: String,
    pub fiscal_year: i32,
}

/// A submission that passed admission.
#[derive(Debug, Clone)]
pub struct AdmittedDocument {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub size_bytes: u64,
}

/// Admit a submission or reject it with the first failed check.
///
/// Checks, in order: user id present and at most 255 characters, document
/// extension supported, document size within the configured limit. The
/// extension also routes the document: `pdf` runs the paged branch,
/// `xlsx`/`xls` the tabular one.
pub fn admit(
    submission: &Submission,
    config: &PipelineConfig,
) -> Result<AdmittedDocument, ValidationError> {
    if submission.user_id.is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    let length = submission.user_id.chars().count();
    if length > 255 {
        return Err(ValidationError::UserIdTooLong { length });
    }

    let extension = submission
        .document_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let kind = match extension.as_str() {
        "pdf" => DocumentKind::Paged,
        "xlsx" | "xls" => DocumentKind::Tabular,
        _ => return Err(ValidationError::UnsupportedFormat { extension }),
    };

    let size_bytes = std::fs::metadata(&submission.document_path)?.len();
    if size_bytes > config.max_document_size_bytes() {
        return Err(ValidationError::DocumentTooLarge {
            size_bytes,
            limit_mb: config.max_document_size_mb,
        });
    }

    Ok(AdmittedDocument {
        path: submission.document_path.clone(),
        kind,
        size_bytes,
    })
}
