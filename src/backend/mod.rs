//! Inference backend capability interface.
//!
//! Every external AI interaction (page extraction, issue detection, field
//! mapping, audit) goes through [`InferenceBackend::request`] with an
//! [`OperationKind`] tag and a JSON payload. Concrete backends are swappable
//! implementations behind the trait; the pipeline never names a vendor.
//!
//! The pipeline validates the *shape* of every response before use (see
//! [`parser`]); a response that fails validation is a
//! [`BackendError::MalformedResponse`], never a crash.

pub mod http;
pub mod parser;
pub mod types;

pub use http::{HttpInferenceBackend, MockBackend};
pub use types::{AuditCheck, AuditReport, MappingResponse, RawFieldMapping};

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Cannot reach inference backend at {0}")]
    Connection(String),

    #[error("Backend request timed out after {0}s")]
    Timeout(u64),

    #[error("Backend returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Backend response violated the expected shape: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    /// Whether this failure is a shape violation rather than a transport
    /// problem. Both kinds are retried the same way during page extraction;
    /// the distinction only matters for terminal error reporting.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedResponse(_))
    }
}

/// What the pipeline is asking the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Structured table extraction from one page's payload.
    Extract,
    /// Classification over tabular records: data-quality issue detection
    /// or field mapping, depending on the request payload.
    Classify,
    /// Quality-assurance audit over the assembled statements.
    Audit,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Classify => "classify",
            Self::Audit => "audit",
        }
    }
}

/// Polymorphic inference capability.
///
/// Object-safe by returning a boxed future, so the pipeline can hold
/// `Box<dyn InferenceBackend>` and swap implementations per deployment.
pub trait InferenceBackend: Send + Sync {
    /// Identifier recorded in stage records (typically the model name).
    fn id(&self) -> &str;

    /// Submit one operation and await its structured output.
    fn request<'a>(
        &'a self,
        kind: OperationKind,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, BackendError>> + Send + 'a>>;
}
