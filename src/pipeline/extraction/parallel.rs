//! Bounded-concurrency page extraction.
//!
//! Fans pages out to the inference backend with at most `max_workers` in
//! flight, then fans results back in ordered by page number. A page failure
//! never aborts the document: each page gets one primary attempt against the
//! backend (bounded by the per-page timeout), then one shot at the local
//! text-layout fallback, and finally degrades to a `Failed` placeholder so
//! the result always has exactly one entry per page.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::Semaphore;

use crate::backend::{parser, BackendError, InferenceBackend, OperationKind};
use crate::pipeline_config::PipelineConfig;

use super::fallback;
use super::types::{
    DocumentExtraction, ExtractionMethod, PageContent, PageExtraction, PageSource,
};
use super::ExtractionError;

pub struct PageExtractor {
    backend: Arc<dyn InferenceBackend>,
    worker_limit: usize,
    page_timeout: Duration,
}

impl PageExtractor {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            worker_limit: config.max_workers,
            page_timeout: Duration::from_secs(config.per_page_timeout_secs),
        }
    }

    /// Extract every page of `source`, at most `worker_limit` pages in
    /// flight. Returns one entry per page in page order regardless of
    /// completion order or individual page failures.
    ///
    /// A document with zero pages is rejected with `EmptyDocument` rather
    /// than yielding an empty result: nothing downstream can do anything
    /// with a pageless document, so it fails here like an admission check.
    pub async fn extract(
        &self,
        source: Arc<dyn PageSource>,
    ) -> Result<DocumentExtraction, ExtractionError> {
        let page_count = source.page_count()?;
        if page_count == 0 {
            return Err(ExtractionError::EmptyDocument);
        }

        tracing::info!(
            page_count,
            workers = self.worker_limit,
            "Starting page extraction"
        );

        let semaphore = Arc::new(Semaphore::new(self.worker_limit.max(1)));
        let mut handles = Vec::with_capacity(page_count);

        for page_number in 1..=page_count {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("page semaphore closed");
            let backend = Arc::clone(&self.backend);
            let source = Arc::clone(&source);
            let timeout = self.page_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                extract_page(backend.as_ref(), source.as_ref(), page_number, timeout).await
            }));
        }

        let mut pages = Vec::with_capacity(page_count);
        for (page_number, handle) in (1..=page_count).zip(handles) {
            // A crashed page task is just another failed page: it must not
            // take the rest of the document down with it.
            let page = match handle.await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(page_number, error = %e, "Page task aborted");
                    PageExtraction::failed(page_number, format!("page task aborted: {e}"))
                }
            };
            pages.push(page);
        }
        pages.sort_by_key(|p| p.page_number);

        let extraction = DocumentExtraction { pages, page_count };
        tracing::info!(
            tables = extraction.table_count(),
            fallback_pages = extraction.fallback_pages(),
            failed_pages = extraction.failed_pages(),
            "Page extraction finished"
        );
        Ok(extraction)
    }
}

/// Extract one page. Infallible by contract: backend trouble downgrades to
/// the layout fallback, and a fallback miss yields a `Failed` placeholder
/// carrying the primary error. The page payload lives only for the duration
/// of this call.
async fn extract_page(
    backend: &dyn InferenceBackend,
    source: &dyn PageSource,
    page_number: usize,
    timeout: Duration,
) -> PageExtraction {
    let payload = match source.load_page(page_number) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(page_number, error = %e, "Failed to load page payload");
            return PageExtraction::failed(page_number, e.to_string());
        }
    };

    match attempt_primary(backend, page_number, &payload, timeout).await {
        Ok(content) => {
            tracing::debug!(page_number, tables = content.tables.len(), "Page extracted");
            PageExtraction::from_content(page_number, content, ExtractionMethod::Primary)
        }
        Err(primary_error) => {
            tracing::warn!(
                page_number,
                error = %primary_error,
                "Primary extraction failed, trying text-layout fallback"
            );
            let text = String::from_utf8_lossy(&payload);
            let tables = fallback::recover_tables(&text);
            if tables.is_empty() {
                PageExtraction::failed(page_number, primary_error.to_string())
            } else {
                PageExtraction {
                    page_number,
                    tables,
                    headers: vec![],
                    footnotes: vec![],
                    method: ExtractionMethod::Fallback,
                    error: Some(primary_error.to_string()),
                }
            }
        }
    }
}

/// One backend attempt for one page, bounded by the per-page timeout.
async fn attempt_primary(
    backend: &dyn InferenceBackend,
    page_number: usize,
    payload: &[u8],
    timeout: Duration,
) -> Result<PageContent, BackendError> {
    let input = serde_json::json!({
        "page_number": page_number,
        "payload_base64": base64::engine::general_purpose::STANDARD.encode(payload),
    });

    let output = tokio::time::timeout(timeout, backend.request(OperationKind::Extract, input))
        .await
        .map_err(|_| BackendError::Timeout(timeout.as_secs()))??;

    parser::parse_page_content(output)
}
