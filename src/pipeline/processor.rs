//! Statement processing orchestrator.
//!
//! Single entry point that drives one run through the stage sequence:
//! template resolution → page extraction → data healing → field mapping →
//! statement generation → quality audit → certification. Stages run
//! strictly in order; concurrency exists only inside the page extractor.
//!
//! Every attempted stage appends one ledger record, success or failure, and
//! any stage error converts the run into a terminal [`PipelineOutcome::Failed`]
//! carrying the failing stage and the partial ledger. Collaborators (backend,
//! run store, notifier, artifact generator) are trait objects so the
//! orchestrator is fully testable with mocks.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::artifacts::{ArtifactError, ArtifactGenerator, ArtifactRef, Certificate};
use crate::backend::{parser, AuditReport, BackendError, InferenceBackend, OperationKind};
use crate::db::{DatabaseError, RunStore};
use crate::models::{AuditStatus, DocumentKind, RunRecord, RunStatus};
use crate::notify::{audit_severity, Notifier, Severity};
use crate::pipeline::extraction::{
    flatten, DocumentExtraction, ExtractionError, PageExtractor, PageSource, Record, TableSource,
};
use crate::pipeline::healing;
use crate::pipeline::intake::{self, AdmittedDocument, Submission, ValidationError};
use crate::pipeline::ledger::{content_hash, AuditLedger, Stage, StageRecord};
use crate::pipeline::mapping::{self, FieldMapping, MappingSummary};
use crate::pipeline_config::{ConfigError, PipelineConfig};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Terminal error classification carried in a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected before any stage ran.
    Validation,
    /// Backend transport failure during a classification or audit stage.
    Backend,
    /// Backend replied but violated the expected shape.
    MalformedResponse,
    /// A stage's precondition or postcondition was unmet.
    StageFailure,
}

/// Internal stage error: classification plus a caller-facing message.
#[derive(Debug)]
struct StageError {
    kind: ErrorKind,
    message: String,
}

impl StageError {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::StageFailure,
            message: message.into(),
        }
    }
}

impl From<BackendError> for StageError {
    fn from(e: BackendError) -> Self {
        let kind = if e.is_malformed() {
            ErrorKind::MalformedResponse
        } else {
            ErrorKind::Backend
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

impl From<ExtractionError> for StageError {
    fn from(e: ExtractionError) -> Self {
        Self::failure(e.to_string())
    }
}

impl From<ArtifactError> for StageError {
    fn from(e: ArtifactError) -> Self {
        Self::failure(e.to_string())
    }
}

impl From<DatabaseError> for StageError {
    fn from(e: DatabaseError) -> Self {
        Self::failure(e.to_string())
    }
}

impl From<serde_json::Error> for StageError {
    fn from(e: serde_json::Error) -> Self {
        Self::failure(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Request and outcome types
// ---------------------------------------------------------------------------

/// How the run reads its source document.
pub enum DocumentSource {
    /// Paged document, fanned out page by page through the backend.
    Paged(Arc<dyn PageSource>),
    /// Tabular document, read directly into records with no fan-out.
    Tabular(Arc<dyn TableSource>),
}

/// Where the reference schema comes from — chosen by the caller, never
/// inferred from file content.
pub enum ReferenceSchema {
    /// Extract the schema from a reference document.
    Document(Arc<dyn PageSource>),
    /// Use an already-resolved field list.
    Preloaded(Vec<String>),
}

/// One run request: the admitted-to-be submission plus its data sources.
pub struct RunRequest {
    pub submission: Submission,
    pub source: DocumentSource,
    pub reference: ReferenceSchema,
}

/// Per-run statistics carried in the completed outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pages: usize,
    pub fallback_pages: usize,
    pub failed_pages: usize,
    pub records: usize,
    pub issues_detected: usize,
    pub mapping: MappingSummary,
    pub audit_status: AuditStatus,
    pub audit_score: f64,
}

/// Successful terminal result.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRun {
    pub run_id: Uuid,
    pub statement: ArtifactRef,
    pub certificate: ArtifactRef,
    pub ledger: Vec<StageRecord>,
    pub summary: RunSummary,
}

/// Failed terminal result. `run_id` is absent when admission rejected the
/// submission before a run row was created; `ledger` holds every stage
/// record appended before the failure, including the failed attempt's own.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRun {
    pub run_id: Option<Uuid>,
    pub failed_stage: Option<Stage>,
    pub kind: ErrorKind,
    pub message: String,
    pub ledger: Vec<StageRecord>,
}

/// What every caller gets back — success or typed failure, never a fault.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed(CompletedRun),
    Failed(FailedRun),
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn ledger(&self) -> &[StageRecord] {
        match self {
            Self::Completed(run) => &run.ledger,
            Self::Failed(run) => &run.ledger,
        }
    }
}

/// Output of the middle stages, threaded between them inside one run.
struct ExtractedData {
    records: Vec<Record>,
    pages: usize,
    fallback_pages: usize,
    failed_pages: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives a statement run end to end.
///
/// One instance is reusable across runs; all per-run state lives in the
/// ledger and the locals of [`StatementProcessor::process`].
pub struct StatementProcessor {
    backend: Arc<dyn InferenceBackend>,
    run_store: Arc<dyn RunStore>,
    notifier: Arc<dyn Notifier>,
    artifacts: Arc<dyn ArtifactGenerator>,
    config: PipelineConfig,
}

impl StatementProcessor {
    /// Wire a processor from explicit collaborators. The configuration is
    /// validated here: an invalid threshold ordering fails construction,
    /// it is never deferred to run time.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        run_store: Arc<dyn RunStore>,
        notifier: Arc<dyn Notifier>,
        artifacts: Arc<dyn ArtifactGenerator>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            backend,
            run_store,
            notifier,
            artifacts,
            config,
        })
    }

    /// Run one submission through the full stage sequence.
    ///
    /// Blocking from the caller's perspective: the future resolves only
    /// once the run is terminal. Progress is observable by reading the run
    /// store, not through callbacks.
    pub async fn process(&self, request: RunRequest) -> PipelineOutcome {
        // Admission. A rejected submission leaves no trace in the run store.
        let admitted = match self.admit(&request) {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::warn!(error = %e, "Submission rejected at admission");
                return PipelineOutcome::Failed(FailedRun {
                    run_id: None,
                    failed_stage: None,
                    kind: ErrorKind::Validation,
                    message: e.to_string(),
                    ledger: vec![],
                });
            }
        };

        let document_ref = admitted.path.display().to_string();
        let run = RunRecord::new(
            &request.submission.user_id,
            request.submission.fiscal_year,
            &document_ref,
        );
        if let Err(e) = self.run_store.create_run(&run) {
            return PipelineOutcome::Failed(FailedRun {
                run_id: Some(run.id),
                failed_stage: None,
                kind: ErrorKind::StageFailure,
                message: format!("Failed to create run record: {e}"),
                ledger: vec![],
            });
        }
        tracing::info!(
            run_id = %run.id,
            user_id = %run.user_id,
            fiscal_year = run.fiscal_year,
            document = %document_ref,
            "Run created"
        );

        let (ledger, result) = self.drive(&request, &admitted, run.id).await;
        match result {
            Ok(completed) => {
                self.notify_completion(&run.id, &completed.summary);
                PipelineOutcome::Completed(CompletedRun {
                    run_id: run.id,
                    statement: completed.statement,
                    certificate: completed.certificate,
                    ledger: ledger.into_records(),
                    summary: completed.summary,
                })
            }
            Err((stage, error)) => {
                tracing::error!(
                    run_id = %run.id,
                    stage = stage.as_str(),
                    error = %error.message,
                    "Run failed"
                );
                if let Err(db) =
                    self.run_store
                        .update_run_status(&run.id, RunStatus::Error, Some(&error.message))
                {
                    tracing::error!(run_id = %run.id, error = %db, "Failed to record run error");
                }
                self.notifier.notify(
                    &run.id,
                    Severity::Critical,
                    &format!("Run failed at {}: {}", stage.as_str(), error.message),
                );
                PipelineOutcome::Failed(FailedRun {
                    run_id: Some(run.id),
                    failed_stage: Some(stage),
                    kind: error.kind,
                    message: error.message,
                    ledger: ledger.into_records(),
                })
            }
        }
    }

    /// Admission checks, all before the run row exists: intake policy, the
    /// declared kind matching the supplied source, and the page-count cap.
    fn admit(&self, request: &RunRequest) -> Result<AdmittedDocument, ValidationError> {
        let admitted = intake::admit(&request.submission, &self.config)?;

        match (&admitted.kind, &request.source) {
            (DocumentKind::Paged, DocumentSource::Paged(_)) => {}
            (DocumentKind::Tabular, DocumentSource::Tabular(_)) => {}
            (kind, _) => {
                return Err(ValidationError::SourceMismatch {
                    kind: kind.as_str(),
                })
            }
        }

        if let DocumentSource::Paged(source) = &request.source {
            let pages = source
                .page_count()
                .map_err(|e| ValidationError::Unreadable(e.to_string()))?;
            if pages > self.config.max_pages {
                return Err(ValidationError::TooManyPages {
                    pages,
                    limit: self.config.max_pages,
                });
            }
        }

        Ok(admitted)
    }

    /// The stage sequence proper. Returns the ledger in every case together
    /// with either the completed data or the failing stage and its error.
    async fn drive(
        &self,
        request: &RunRequest,
        admitted: &AdmittedDocument,
        run_id: Uuid,
    ) -> (AuditLedger, Result<CompletedData, (Stage, StageError)>) {
        let mut ledger = AuditLedger::new();

        macro_rules! stage {
            ($stage:expr, $body:expr) => {
                match $body.await {
                    Ok(value) => value,
                    Err(e) => return (ledger, Err(($stage, e))),
                }
            };
        }

        let reference_fields = stage!(
            Stage::TemplateResolution,
            self.resolve_template(&mut ledger, &request.reference)
        );
        let extracted = stage!(
            Stage::PageExtraction,
            self.extract_document(&mut ledger, request, admitted)
        );
        let (healed, issues_detected) = stage!(
            Stage::DataHealing,
            self.heal_records(&mut ledger, &extracted.records)
        );
        let mappings = stage!(
            Stage::FieldMapping,
            self.map_fields(&mut ledger, &healed, &reference_fields)
        );
        let statement = stage!(
            Stage::StatementGeneration,
            self.generate_statement(&mut ledger, run_id, &healed)
        );
        let report = stage!(
            Stage::QualityAudit,
            self.audit_quality(&mut ledger, &healed, &mappings, &statement)
        );
        let certificate = stage!(
            Stage::Certification,
            self.certify(&mut ledger, run_id, request, admitted, &report, &statement)
        );

        // Completion side effects. The ledger already holds all seven
        // records, so a storage failure here still returns them intact.
        let status = if report.overall_status == AuditStatus::Pass {
            RunStatus::Ready
        } else {
            RunStatus::ReviewNeeded
        };
        if let Err(e) = self.run_store.complete_run(
            &run_id,
            status.clone(),
            report.overall_score,
            &certificate.content_hash,
        ) {
            return (ledger, Err((Stage::Certification, e.into())));
        }
        tracing::info!(run_id = %run_id, status = status.as_str(), "Run completed");

        let summary = RunSummary {
            pages: extracted.pages,
            fallback_pages: extracted.fallback_pages,
            failed_pages: extracted.failed_pages,
            records: healed.len(),
            issues_detected,
            mapping: MappingSummary::from_mappings(&mappings),
            audit_status: report.overall_status,
            audit_score: report.overall_score,
        };
        (
            ledger,
            Ok(CompletedData {
                statement,
                certificate,
                summary,
            }),
        )
    }

    // -- Stage 1: template resolution ---------------------------------------

    async fn resolve_template(
        &self,
        ledger: &mut AuditLedger,
        reference: &ReferenceSchema,
    ) -> Result<Vec<String>, StageError> {
        let started = Instant::now();
        let (input_hash, backend_id, result) = match reference {
            ReferenceSchema::Preloaded(fields) => (
                content_hash(fields.join("\n").as_bytes()),
                "local",
                Ok(fields.clone()),
            ),
            ReferenceSchema::Document(source) => {
                let extractor = PageExtractor::new(Arc::clone(&self.backend), &self.config);
                let result = extractor
                    .extract(Arc::clone(source))
                    .await
                    .map(|doc| flatten::collect_field_names(&doc.pages))
                    .map_err(StageError::from);
                (
                    content_hash(b"reference-document"),
                    self.backend.id(),
                    result,
                )
            }
        };
        let result = result.and_then(|fields| {
            if fields.is_empty() {
                Err(StageError::failure("Reference schema has no fields"))
            } else {
                Ok(fields)
            }
        });

        finish_stage(
            ledger,
            Stage::TemplateResolution,
            backend_id,
            input_hash,
            started,
            result.map(|fields| {
                let summary = format!("{} reference fields", fields.len());
                (fields, summary)
            }),
        )
    }

    // -- Stage 2: page extraction -------------------------------------------

    async fn extract_document(
        &self,
        ledger: &mut AuditLedger,
        request: &RunRequest,
        admitted: &AdmittedDocument,
    ) -> Result<ExtractedData, StageError> {
        let started = Instant::now();
        let input_hash = std::fs::read(&admitted.path)
            .map(|bytes| content_hash(&bytes))
            .unwrap_or_else(|_| content_hash(admitted.path.to_string_lossy().as_bytes()));

        let (backend_id, result) = match &request.source {
            DocumentSource::Paged(source) => {
                let extractor = PageExtractor::new(Arc::clone(&self.backend), &self.config);
                let result = extractor
                    .extract(Arc::clone(source))
                    .await
                    .map_err(StageError::from)
                    .map(|doc| {
                        let records = flatten::flatten_pages(&doc.pages);
                        let summary = page_summary(&doc, records.len());
                        let data = ExtractedData {
                            records,
                            pages: doc.page_count,
                            fallback_pages: doc.fallback_pages(),
                            failed_pages: doc.failed_pages(),
                        };
                        (data, summary)
                    });
                (self.backend.id(), result)
            }
            DocumentSource::Tabular(source) => {
                let result = source.read_records().map_err(StageError::from).map(|records| {
                    let summary = format!("{} records from tabular source", records.len());
                    let data = ExtractedData {
                        records,
                        pages: 0,
                        fallback_pages: 0,
                        failed_pages: 0,
                    };
                    (data, summary)
                });
                ("local", result)
            }
        };

        finish_stage(
            ledger,
            Stage::PageExtraction,
            backend_id,
            input_hash,
            started,
            result,
        )
    }

    // -- Stage 3: data healing ----------------------------------------------

    async fn heal_records(
        &self,
        ledger: &mut AuditLedger,
        records: &[Record],
    ) -> Result<(Vec<Record>, usize), StageError> {
        let started = Instant::now();
        let input_hash = hash_json(records)?;

        let result = async {
            let input = serde_json::json!({
                "mode": "issue_detection",
                "records": records,
            });
            let output = self.backend.request(OperationKind::Classify, input).await?;
            let issues = parser::parse_issue_list(output)?;
            let healed = healing::heal(records, &issues);
            let summary = format!("{} issues detected over {} records", issues.len(), records.len());
            Ok(((healed, issues.len()), summary))
        }
        .await;

        finish_stage(
            ledger,
            Stage::DataHealing,
            self.backend.id(),
            input_hash,
            started,
            result,
        )
    }

    // -- Stage 4: field mapping ---------------------------------------------

    async fn map_fields(
        &self,
        ledger: &mut AuditLedger,
        records: &[Record],
        reference_fields: &[String],
    ) -> Result<Vec<FieldMapping>, StageError> {
        let started = Instant::now();
        let source_fields = record_field_names(records);
        let input_hash = content_hash(
            format!("{}|{}", source_fields.join("\n"), reference_fields.join("\n")).as_bytes(),
        );

        let result = async {
            let input = serde_json::json!({
                "mode": "field_mapping",
                "source_fields": source_fields,
                "reference_fields": reference_fields,
            });
            let output = self.backend.request(OperationKind::Classify, input).await?;
            let response = parser::parse_mapping_response(output)?;
            let mappings = mapping::resolve_mappings(response, &self.config);
            let counts = MappingSummary::from_mappings(&mappings);
            let summary = format!(
                "{} mappings ({} auto, {} review, {} new)",
                mappings.len(),
                counts.auto_mapped,
                counts.review_needed,
                counts.new_fields
            );
            Ok((mappings, summary))
        }
        .await;

        finish_stage(
            ledger,
            Stage::FieldMapping,
            self.backend.id(),
            input_hash,
            started,
            result,
        )
    }

    // -- Stage 5: statement generation --------------------------------------

    async fn generate_statement(
        &self,
        ledger: &mut AuditLedger,
        run_id: Uuid,
        records: &[Record],
    ) -> Result<ArtifactRef, StageError> {
        let started = Instant::now();
        let input_hash = hash_json(records)?;

        let columns = record_field_names(records);
        let result = self
            .artifacts
            .render_statement(&run_id, &columns, records)
            .map_err(StageError::from)
            .map(|artifact| {
                let summary = format!("{} rows, {} columns", records.len(), columns.len());
                (artifact, summary)
            });

        finish_stage(
            ledger,
            Stage::StatementGeneration,
            "local",
            input_hash,
            started,
            result,
        )
    }

    // -- Stage 6: quality audit ---------------------------------------------

    async fn audit_quality(
        &self,
        ledger: &mut AuditLedger,
        records: &[Record],
        mappings: &[FieldMapping],
        statement: &ArtifactRef,
    ) -> Result<AuditReport, StageError> {
        let started = Instant::now();
        let input_hash = statement.content_hash.clone();

        let result = async {
            let input = serde_json::json!({
                "records": records,
                "mappings": mappings,
                "statement_hash": statement.content_hash,
            });
            let output = self.backend.request(OperationKind::Audit, input).await?;
            let report = parser::parse_audit_report(output)?;
            let summary = format!(
                "status {} score {:.1}",
                report.overall_status.as_str(),
                report.overall_score
            );
            Ok((report, summary))
        }
        .await;

        finish_stage(
            ledger,
            Stage::QualityAudit,
            self.backend.id(),
            input_hash,
            started,
            result,
        )
    }

    // -- Stage 7: certification ---------------------------------------------

    async fn certify(
        &self,
        ledger: &mut AuditLedger,
        run_id: Uuid,
        request: &RunRequest,
        admitted: &AdmittedDocument,
        report: &AuditReport,
        statement: &ArtifactRef,
    ) -> Result<ArtifactRef, StageError> {
        let started = Instant::now();
        let input_hash = hash_json(report)?;

        let certificate = Certificate {
            run_id,
            user_id: request.submission.user_id.clone(),
            fiscal_year: request.submission.fiscal_year,
            document_ref: admitted.path.display().to_string(),
            overall_score: report.overall_score,
            overall_status: report.overall_status,
            statement_hash: statement.content_hash.clone(),
            issued_at: chrono::Utc::now(),
        };
        let result = self
            .artifacts
            .render_certificate(&certificate)
            .map_err(StageError::from)
            .map(|artifact| {
                let summary = format!("certificate {}", &artifact.content_hash[..12]);
                (artifact, summary)
            });

        finish_stage(
            ledger,
            Stage::Certification,
            "local",
            input_hash,
            started,
            result,
        )
    }

    /// Post-completion alert. Clean passes map to `Success`, which is
    /// suppressed rather than delivered.
    fn notify_completion(&self, run_id: &Uuid, summary: &RunSummary) {
        let severity = audit_severity(summary.audit_status, summary.audit_score);
        if severity == Severity::Success {
            return;
        }
        self.notifier.notify(
            run_id,
            severity,
            &format!(
                "Audit {} with score {:.1}",
                summary.audit_status.as_str(),
                summary.audit_score
            ),
        );
    }
}

/// Data threaded out of a completed stage sequence.
struct CompletedData {
    statement: ArtifactRef,
    certificate: ArtifactRef,
    summary: RunSummary,
}

/// Append the stage record for an attempt, success or failure, then pass
/// the stage's value (or error) through.
fn finish_stage<T>(
    ledger: &mut AuditLedger,
    stage: Stage,
    backend_id: &str,
    input_hash: String,
    started: Instant,
    result: Result<(T, String), StageError>,
) -> Result<T, StageError> {
    match result {
        Ok((value, summary)) => {
            ledger.append(stage, backend_id, input_hash, summary, started.elapsed());
            Ok(value)
        }
        Err(error) => {
            ledger.append(
                stage,
                backend_id,
                input_hash,
                format!("failed: {}", error.message),
                started.elapsed(),
            );
            Err(error)
        }
    }
}

/// Distinct field names across records, in order of first appearance.
fn record_field_names(records: &[Record]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for record in records {
        for name in record.keys() {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.clone());
            }
        }
    }
    fields
}

fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StageError> {
    Ok(content_hash(&serde_json::to_vec(value)?))
}

fn page_summary(doc: &DocumentExtraction, records: usize) -> String {
    format!(
        "{} pages ({} fallback, {} failed), {} records",
        doc.page_count,
        doc.fallback_pages(),
        doc.failed_pages(),
        records
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;
    use crate::artifacts::LocalArtifactGenerator;
    use crate::backend::MockBackend;
    use crate::db::SqliteRunStore;
    use crate::pipeline::extraction::{TextPageSource, TsvTableSource};

    /// Notifier that records every delivery for assertion.
    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<(Uuid, Severity, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, run_id: &Uuid, severity: Severity, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push((*run_id, severity, message.to_string()));
        }
    }

    fn extract_payload(input: &serde_json::Value) -> serde_json::Value {
        let page = input["page_number"].as_u64().unwrap();
        serde_json::json!({
            "tables": [{
                "table_id": format!("t{page}"),
                "headers": ["Account", "Amount"],
                "rows": [[format!("Line {page}"), page * 100], ["Cash", null]],
            }],
        })
    }

    fn audit_payload(status: &str, score: f64) -> serde_json::Value {
        serde_json::json!({
            "overall_status": status,
            "overall_score": score,
            "checks": [{"name": "trial_balance", "status": "PASS", "score": 100.0}],
            "mathematical_proofs": {"trial_balance": "sum(debits) == sum(credits)"},
        })
    }

    /// Backend scripting the happy path for every operation kind.
    fn happy_backend() -> Arc<dyn InferenceBackend> {
        Arc::new(MockBackend::new("fin-test", |kind, input| match kind {
            OperationKind::Extract => Ok(extract_payload(input)),
            OperationKind::Classify => match input["mode"].as_str() {
                Some("issue_detection") => Ok(serde_json::json!({
                    "issues": [{
                        "row": 1, "field": "Amount", "kind": "missing",
                        "suggested_value": 75, "severity": "low",
                    }],
                })),
                Some("field_mapping") => Ok(serde_json::json!({
                    "mappings": [
                        {"source_field": "Account", "reference_field": "Account", "similarity": 0.95},
                        {"source_field": "Amount", "reference_field": "Balance", "similarity": 0.75},
                    ],
                })),
                other => panic!("unexpected classify mode {other:?}"),
            },
            OperationKind::Audit => Ok(audit_payload("PASS", 92.5)),
        }))
    }

    struct Harness {
        processor: StatementProcessor,
        store: Arc<SqliteRunStore>,
        notifier: Arc<RecordingNotifier>,
        _output: tempfile::TempDir,
        docs: tempfile::TempDir,
    }

    fn harness(backend: Arc<dyn InferenceBackend>, config: PipelineConfig) -> Harness {
        let output = tempfile::tempdir().unwrap();
        let docs = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteRunStore::in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let artifacts = Arc::new(LocalArtifactGenerator::new(output.path()).unwrap());
        let processor = StatementProcessor::new(
            backend,
            store.clone(),
            notifier.clone(),
            artifacts,
            config,
        )
        .unwrap();
        Harness {
            processor,
            store,
            notifier,
            _output: output,
            docs,
        }
    }

    fn write_doc(harness: &Harness, name: &str, text: &str) -> PathBuf {
        let path = harness.docs.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn paged_request(harness: &Harness, name: &str, text: &str) -> RunRequest {
        let path = write_doc(harness, name, text);
        RunRequest {
            submission: Submission {
                document_path: path,
                user_id: "analyst-7".to_string(),
                fiscal_year: 2025,
            },
            source: DocumentSource::Paged(Arc::new(TextPageSource::from_text(text))),
            reference: ReferenceSchema::Preloaded(vec![
                "Account".to_string(),
                "Balance".to_string(),
            ]),
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            per_page_timeout_secs: 2,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn completed_run_appends_seven_ordered_stages() {
        let h = harness(happy_backend(), fast_config());
        let request = paged_request(&h, "annual.pdf", "page one\x0cpage two\x0cpage three");

        let outcome = h.processor.process(request).await;

        let run = match outcome {
            PipelineOutcome::Completed(run) => run,
            other => panic!("expected completion, got {other:?}"),
        };
        let ordinals: Vec<u32> = run.ledger.iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5, 6, 7]);
        let stages: Vec<Stage> = run.ledger.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::TemplateResolution,
                Stage::PageExtraction,
                Stage::DataHealing,
                Stage::FieldMapping,
                Stage::StatementGeneration,
                Stage::QualityAudit,
                Stage::Certification,
            ]
        );

        assert_eq!(run.summary.pages, 3);
        assert_eq!(run.summary.records, 6);
        assert_eq!(run.summary.issues_detected, 1);
        assert_eq!(run.summary.mapping.auto_mapped, 1);
        assert_eq!(run.summary.mapping.review_needed, 1);
        assert_eq!(run.summary.audit_status, AuditStatus::Pass);
        assert!(run.statement.path.exists());
        assert!(run.certificate.path.exists());

        let stored = h.store.get_run_status(&run.run_id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Ready);
        assert_eq!(stored.overall_score, Some(92.5));
        assert_eq!(
            stored.certificate_hash.as_deref(),
            Some(run.certificate.content_hash.as_str())
        );

        // Clean pass: no notification delivered.
        assert!(h.notifier.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_fallback_still_completes() {
        // Page 2's primary extraction fails; its raw text is tabular enough
        // for the layout fallback, so the run still completes.
        let backend: Arc<dyn InferenceBackend> = Arc::new(MockBackend::new("fin-test", |kind, input| {
            match kind {
                OperationKind::Extract => {
                    if input["page_number"].as_u64() == Some(2) {
                        Err(BackendError::Api {
                            status: 500,
                            body: "extractor crashed".into(),
                        })
                    } else {
                        Ok(extract_payload(input))
                    }
                }
                OperationKind::Classify => match input["mode"].as_str() {
                    Some("issue_detection") => Ok(serde_json::json!({"issues": []})),
                    _ => Ok(serde_json::json!({"mappings": []})),
                },
                OperationKind::Audit => Ok(audit_payload("PASS", 90.0)),
            }
        }));
        let h = harness(backend, fast_config());
        let text = "page one\x0cAccount\tAmount\nFees\t42\nTotal\t42\x0cpage three";
        let request = paged_request(&h, "annual.pdf", text);

        let outcome = h.processor.process(request).await;

        let run = match outcome {
            PipelineOutcome::Completed(run) => run,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(run.summary.pages, 3);
        assert_eq!(run.summary.fallback_pages, 1);
        assert_eq!(run.summary.failed_pages, 0);
    }

    #[tokio::test]
    async fn malformed_mapping_fails_at_field_mapping() {
        let backend: Arc<dyn InferenceBackend> = Arc::new(MockBackend::new("fin-test", |kind, input| {
            match kind {
                OperationKind::Extract => Ok(extract_payload(input)),
                OperationKind::Classify => match input["mode"].as_str() {
                    Some("issue_detection") => Ok(serde_json::json!({"issues": []})),
                    // Envelope without the required `mappings` array.
                    _ => Ok(serde_json::json!({"result": "here are your mappings"})),
                },
                OperationKind::Audit => panic!("audit must not run after mapping failed"),
            }
        }));
        let h = harness(backend, fast_config());
        let request = paged_request(&h, "annual.pdf", "one\x0ctwo");

        let outcome = h.processor.process(request).await;

        let failed = match outcome {
            PipelineOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(failed.failed_stage, Some(Stage::FieldMapping));
        assert_eq!(failed.kind, ErrorKind::MalformedResponse);

        // Ledger covers every stage up to and including the failed attempt.
        let ordinals: Vec<u32> = failed.ledger.iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);
        let last = failed.ledger.last().unwrap();
        assert_eq!(last.stage, Stage::FieldMapping);
        assert!(last.output_summary.starts_with("failed:"));

        let stored = h
            .store
            .get_run_status(&failed.run_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RunStatus::Error);
        assert!(stored.error_message.unwrap().contains("field mapping"));

        let events = h.notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, Severity::Critical);
    }

    #[tokio::test]
    async fn backend_error_during_healing_fails_stage() {
        let backend: Arc<dyn InferenceBackend> = Arc::new(MockBackend::new("fin-test", |kind, input| {
            match kind {
                OperationKind::Extract => Ok(extract_payload(input)),
                OperationKind::Classify => Err(BackendError::Connection(
                    "http://localhost:8130".into(),
                )),
                OperationKind::Audit => panic!("audit must not run"),
            }
        }));
        let h = harness(backend, fast_config());
        let request = paged_request(&h, "annual.pdf", "one\x0ctwo");

        let outcome = h.processor.process(request).await;

        let failed = match outcome {
            PipelineOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(failed.failed_stage, Some(Stage::DataHealing));
        assert_eq!(failed.kind, ErrorKind::Backend);
        assert_eq!(failed.ledger.len(), 3);
    }

    #[tokio::test]
    async fn admission_rejection_leaves_no_run_row() {
        let h = harness(happy_backend(), fast_config());
        let path = write_doc(&h, "notes.txt", "not a statement");
        let request = RunRequest {
            submission: Submission {
                document_path: path,
                user_id: "analyst-7".to_string(),
                fiscal_year: 2025,
            },
            source: DocumentSource::Paged(Arc::new(TextPageSource::from_text("x"))),
            reference: ReferenceSchema::Preloaded(vec!["Account".to_string()]),
        };

        let outcome = h.processor.process(request).await;

        let failed = match outcome {
            PipelineOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {other:?}"),
        };
        assert!(failed.run_id.is_none());
        assert!(failed.failed_stage.is_none());
        assert_eq!(failed.kind, ErrorKind::Validation);
        assert!(failed.ledger.is_empty());
        assert!(h.store.list_runs("analyst-7", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_cap_rejected_before_run_creation() {
        let config = PipelineConfig {
            max_pages: 2,
            ..fast_config()
        };
        let h = harness(happy_backend(), config);
        let request = paged_request(&h, "annual.pdf", "a\x0cb\x0cc");

        let outcome = h.processor.process(request).await;

        let failed = match outcome {
            PipelineOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(failed.kind, ErrorKind::Validation);
        assert!(failed.message.contains("3 pages"));
        assert!(h.store.list_runs("analyst-7", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn tabular_document_skips_page_fanout() {
        let backend: Arc<dyn InferenceBackend> = Arc::new(MockBackend::new("fin-test", |kind, input| {
            match kind {
                OperationKind::Extract => panic!("tabular runs must not fan out pages"),
                OperationKind::Classify => match input["mode"].as_str() {
                    Some("issue_detection") => Ok(serde_json::json!({"issues": []})),
                    _ => Ok(serde_json::json!({
                        "mappings": [
                            {"source_field": "Account", "reference_field": "Account", "similarity": 0.99},
                        ],
                    })),
                },
                OperationKind::Audit => Ok(audit_payload("PASS", 95.0)),
            }
        }));
        let h = harness(backend, fast_config());
        let text = "Account\tAmount\nCash\t1200\nLoans\t800\n";
        let path = write_doc(&h, "book.xlsx", text);
        let request = RunRequest {
            submission: Submission {
                document_path: path,
                user_id: "analyst-7".to_string(),
                fiscal_year: 2025,
            },
            source: DocumentSource::Tabular(Arc::new(TsvTableSource::from_text(text))),
            reference: ReferenceSchema::Preloaded(vec!["Account".to_string()]),
        };

        let outcome = h.processor.process(request).await;

        let run = match outcome {
            PipelineOutcome::Completed(run) => run,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(run.summary.pages, 0);
        assert_eq!(run.summary.records, 2);
        // Stage 2 is still recorded even without fan-out.
        assert_eq!(run.ledger[1].stage, Stage::PageExtraction);
        assert_eq!(run.ledger[1].backend_id, "local");
    }

    #[tokio::test]
    async fn source_kind_mismatch_rejected() {
        let h = harness(happy_backend(), fast_config());
        let path = write_doc(&h, "book.xlsx", "Account\tAmount\n");
        let request = RunRequest {
            submission: Submission {
                document_path: path,
                user_id: "analyst-7".to_string(),
                fiscal_year: 2025,
            },
            // Declared tabular by extension, but a paged source was supplied.
            source: DocumentSource::Paged(Arc::new(TextPageSource::from_text("x"))),
            reference: ReferenceSchema::Preloaded(vec!["Account".to_string()]),
        };

        let outcome = h.processor.process(request).await;

        let failed = match outcome {
            PipelineOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(failed.kind, ErrorKind::Validation);
        assert!(failed.message.contains("tabular"));
    }

    #[tokio::test]
    async fn review_audit_marks_run_review_needed() {
        let backend: Arc<dyn InferenceBackend> = Arc::new(MockBackend::new("fin-test", |kind, input| {
            match kind {
                OperationKind::Extract => Ok(extract_payload(input)),
                OperationKind::Classify => match input["mode"].as_str() {
                    Some("issue_detection") => Ok(serde_json::json!({"issues": []})),
                    _ => Ok(serde_json::json!({"mappings": []})),
                },
                OperationKind::Audit => Ok(audit_payload("REVIEW", 68.0)),
            }
        }));
        let h = harness(backend, fast_config());
        let request = paged_request(&h, "annual.pdf", "one\x0ctwo");

        let outcome = h.processor.process(request).await;

        let run = match outcome {
            PipelineOutcome::Completed(run) => run,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(run.summary.audit_status, AuditStatus::Review);

        let stored = h.store.get_run_status(&run.run_id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::ReviewNeeded);

        let events = h.notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, Severity::Warning);
        assert!(events[0].2.contains("68.0"));
    }

    #[tokio::test]
    async fn reference_document_branch_resolves_schema() {
        let h = harness(happy_backend(), fast_config());
        let mut request = paged_request(&h, "annual.pdf", "one\x0ctwo");
        request.reference =
            ReferenceSchema::Document(Arc::new(TextPageSource::from_text("reference page")));

        let outcome = h.processor.process(request).await;

        let run = match outcome {
            PipelineOutcome::Completed(run) => run,
            other => panic!("expected completion, got {other:?}"),
        };
        // Template resolution went through the extraction backend.
        assert_eq!(run.ledger[0].backend_id, "fin-test");
        assert_eq!(run.ledger[0].output_summary, "2 reference fields");
    }

    #[tokio::test]
    async fn empty_reference_schema_fails_first_stage() {
        let h = harness(happy_backend(), fast_config());
        let mut request = paged_request(&h, "annual.pdf", "one");
        request.reference = ReferenceSchema::Preloaded(vec![]);

        let outcome = h.processor.process(request).await;

        let failed = match outcome {
            PipelineOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(failed.failed_stage, Some(Stage::TemplateResolution));
        assert_eq!(failed.kind, ErrorKind::StageFailure);
        assert_eq!(failed.ledger.len(), 1);
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let output = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            auto_map_threshold: 0.5,
            review_threshold: 0.9,
            ..PipelineConfig::default()
        };
        let result = StatementProcessor::new(
            happy_backend(),
            Arc::new(SqliteRunStore::in_memory().unwrap()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(LocalArtifactGenerator::new(output.path()).unwrap()),
            config,
        );
        assert!(result.is_err());
    }
}
