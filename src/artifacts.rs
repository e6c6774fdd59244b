//! Output artifact generation.
//!
//! Two artifacts per successful run: the reconciled statement (TSV, one
//! column per reference field) and the certification document (HTML). Both
//! are written atomically via a temp file and verified on disk before the
//! pipeline advances; the returned [`ArtifactRef`] carries the SHA-256 of
//! the bytes written so downstream consumers can verify what they read.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AuditStatus;
use crate::pipeline::extraction::Record;
use crate::pipeline::ledger::content_hash;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Artifact missing after write: {}", .0.display())]
    Missing(PathBuf),
}

/// Pointer to a written artifact plus the hash of its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub content_hash: String,
}

/// Everything the certification document attests to.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub run_id: Uuid,
    pub user_id: String,
    pub fiscal_year: i32,
    pub document_ref: String,
    pub overall_score: f64,
    pub overall_status: AuditStatus,
    pub statement_hash: String,
    pub issued_at: DateTime<Utc>,
}

pub trait ArtifactGenerator: Send + Sync {
    fn render_statement(
        &self,
        run_id: &Uuid,
        field_names: &[String],
        records: &[Record],
    ) -> Result<ArtifactRef, ArtifactError>;

    fn render_certificate(&self, certificate: &Certificate) -> Result<ArtifactRef, ArtifactError>;
}

/// Artifact generator writing to a local output directory.
pub struct LocalArtifactGenerator {
    output_dir: PathBuf,
}

impl LocalArtifactGenerator {
    /// Create the generator, creating `output_dir` if needed.
    pub fn new(output_dir: &Path) -> Result<Self, ArtifactError> {
        std::fs::create_dir_all(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Write bytes through a temp file in the same directory, then verify
    /// the final path exists.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<ArtifactRef, ArtifactError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.output_dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(path).map_err(|e| e.error)?;

        if !path.exists() {
            return Err(ArtifactError::Missing(path.to_path_buf()));
        }

        Ok(ArtifactRef {
            path: path.to_path_buf(),
            content_hash: content_hash(bytes),
        })
    }
}

impl ArtifactGenerator for LocalArtifactGenerator {
    fn render_statement(
        &self,
        run_id: &Uuid,
        field_names: &[String],
        records: &[Record],
    ) -> Result<ArtifactRef, ArtifactError> {
        let mut out = String::new();
        out.push_str(&field_names.join("\t"));
        out.push('\n');
        for record in records {
            let row: Vec<String> = field_names
                .iter()
                .map(|name| record.get(name).map(cell_text).unwrap_or_default())
                .collect();
            out.push_str(&row.join("\t"));
            out.push('\n');
        }

        let path = self.output_dir.join(format!("statement_{run_id}.tsv"));
        let artifact = self.write_atomic(&path, out.as_bytes())?;
        tracing::info!(path = %artifact.path.display(), rows = records.len(), "Statement written");
        Ok(artifact)
    }

    fn render_certificate(&self, certificate: &Certificate) -> Result<ArtifactRef, ArtifactError> {
        let html = render_certificate_html(certificate);
        let path = self
            .output_dir
            .join(format!("certificate_{}.html", certificate.run_id));
        let artifact = self.write_atomic(&path, html.as_bytes())?;
        tracing::info!(path = %artifact.path.display(), "Certificate written");
        Ok(artifact)
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_certificate_html(cert: &Certificate) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><meta charset=\"utf-8\"><title>Certification FY{year}</title></head>\n\
         <body>\n\
         <h1>Statement Certification</h1>\n\
         <table>\n\
         <tr><td>Run</td><td>{run_id}</td></tr>\n\
         <tr><td>Prepared for</td><td>{user}</td></tr>\n\
         <tr><td>Fiscal year</td><td>{year}</td></tr>\n\
         <tr><td>Source document</td><td>{doc}</td></tr>\n\
         <tr><td>Audit status</td><td>{status}</td></tr>\n\
         <tr><td>Audit score</td><td>{score:.1}</td></tr>\n\
         <tr><td>Statement SHA-256</td><td>{hash}</td></tr>\n\
         <tr><td>Issued at</td><td>{issued}</td></tr>\n\
         </table>\n\
         </body>\n\
         </html>\n",
        run_id = cert.run_id,
        user = cert.user_id,
        year = cert.fiscal_year,
        doc = cert.document_ref,
        status = cert.overall_status.as_str(),
        score = cert.overall_score,
        hash = cert.statement_hash,
        issued = cert.issued_at.to_rfc3339(),
    )
}
