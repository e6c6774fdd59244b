//! Watch-folder ingestion.
//!
//! Polls an intake directory and hands each new financial document to a
//! sink exactly once. Deduplication keys on path, size and mtime, so a file
//! that grows or is rewritten is picked up again. The first poll tick fires
//! immediately, which doubles as a scan of files already present when the
//! monitor starts.
//!
//! The sink owns its own error handling, like the notifier: a document the
//! sink cannot process must not stall the watch loop.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use crate::models::DocumentKind;
use crate::pipeline::intake::Submission;

/// Poll cadence when none is configured.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Filename markers that flag a drop as the reference template for the
/// prior fiscal year rather than data for the target year.
const TEMPLATE_MARKERS: [&str; 2] = ["template", "2024"];

const REFERENCE_YEAR: i32 = 2024;
const TARGET_YEAR: i32 = 2025;

/// A supported document spotted in the watch folder.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedDocument {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub size_bytes: u64,
    /// Whether the filename marks this as the reference template.
    pub is_reference: bool,
    pub fiscal_year: i32,
}

impl DetectedDocument {
    /// Turn the detection into a processing submission for `user_id`.
    pub fn into_submission(self, user_id: &str) -> Submission {
        Submission {
            document_path: self.path,
            user_id: user_id.to_string(),
            fiscal_year: self.fiscal_year,
        }
    }
}

/// Receiver for detected documents. Dyn-compatible async, same shape as the
/// inference backend seam.
pub trait DocumentSink: Send + Sync {
    fn handle<'a>(
        &'a self,
        document: DetectedDocument,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

pub struct FolderMonitor {
    directory: PathBuf,
    poll_interval: Duration,
    seen: Mutex<HashSet<String>>,
}

impl FolderMonitor {
    /// Create a monitor over `directory`, creating it if absent.
    pub fn new(directory: impl Into<PathBuf>) -> std::io::Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            seen: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// One pass over the directory: every supported file not yet seen (at
    /// its current size and mtime) is dispatched to `sink`. Returns the
    /// number of documents dispatched. Files are visited in name order.
    pub async fn scan(&self, sink: &dyn DocumentSink) -> std::io::Result<usize> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        paths.sort();

        let mut dispatched = 0;
        for path in paths {
            let Some(kind) = route(&path) else {
                continue;
            };
            let metadata = match std::fs::metadata(&path) {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot stat dropped file");
                    continue;
                }
            };

            let fresh = {
                let mut seen = self.seen.lock().expect("watch dedupe set poisoned");
                seen.insert(fingerprint(&path, &metadata))
            };
            if !fresh {
                continue;
            }

            let document = analyze(&path, kind, metadata.len());
            tracing::info!(
                path = %document.path.display(),
                kind = ?document.kind,
                is_reference = document.is_reference,
                "Detected document in watch folder"
            );
            sink.handle(document).await;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Start the polling loop on the runtime. Scan errors are logged and
    /// the loop keeps going; use the returned handle to stop it.
    pub fn start(self: Arc<Self>, sink: Arc<dyn DocumentSink>) -> MonitorHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(
                directory = %self.directory.display(),
                interval_secs = self.poll_interval.as_secs_f64(),
                "Watch-folder monitor started"
            );
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while !flag.load(Ordering::Relaxed) {
                ticker.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = self.scan(sink.as_ref()).await {
                    tracing::warn!(error = %e, "Watch-folder scan failed");
                }
            }
            tracing::info!("Watch-folder monitor shutting down");
        });

        MonitorHandle { shutdown, handle }
    }
}

/// Handle for a running watch loop. `shutdown()` requests a stop; the loop
/// exits at its next tick.
pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Request a stop and wait for the loop to exit.
    pub async fn stop(self) {
        self.shutdown();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Extension routing, mirroring admission: anything else is ignored.
fn route(path: &Path) -> Option<DocumentKind> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => Some(DocumentKind::Paged),
        "xlsx" | "xls" => Some(DocumentKind::Tabular),
        _ => None,
    }
}

fn fingerprint(path: &Path, metadata: &std::fs::Metadata) -> String {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}_{}_{}", path.display(), metadata.len(), mtime)
}

fn analyze(path: &Path, kind: DocumentKind, size_bytes: u64) -> DetectedDocument {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let is_reference = TEMPLATE_MARKERS.iter().any(|marker| name.contains(marker));
    DetectedDocument {
        path: path.to_path_buf(),
        kind,
        size_bytes,
        is_reference,
        fiscal_year: if is_reference {
            REFERENCE_YEAR
        } else {
            TARGET_YEAR
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::intake;
    use crate::pipeline_config::PipelineConfig;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<DetectedDocument>>,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|d| d.path.file_name().unwrap().to_str().unwrap().to_string())
                .collect()
        }
    }

    impl DocumentSink for RecordingSink {
        fn handle<'a>(
            &'a self,
            document: DetectedDocument,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.events.lock().unwrap().push(document);
            })
        }
    }

    fn drop_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn supported_files_detected_and_routed() {
        let dir = tempfile::tempdir().unwrap();
        drop_file(&dir, "annual.pdf", b"%PDF");
        drop_file(&dir, "book.xlsx", b"PK");
        drop_file(&dir, "notes.txt", b"ignore me");

        let monitor = FolderMonitor::new(dir.path()).unwrap();
        let sink = RecordingSink::default();

        let dispatched = monitor.scan(&sink).await.unwrap();

        assert_eq!(dispatched, 2);
        assert_eq!(sink.names(), vec!["annual.pdf", "book.xlsx"]);
        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].kind, DocumentKind::Paged);
        assert_eq!(events[1].kind, DocumentKind::Tabular);
        assert_eq!(events[0].size_bytes, 4);
    }

    #[tokio::test]
    async fn rescan_skips_already_seen_files() {
        let dir = tempfile::tempdir().unwrap();
        drop_file(&dir, "annual.pdf", b"%PDF");

        let monitor = FolderMonitor::new(dir.path()).unwrap();
        let sink = RecordingSink::default();

        assert_eq!(monitor.scan(&sink).await.unwrap(), 1);
        assert_eq!(monitor.scan(&sink).await.unwrap(), 0);
        assert_eq!(sink.names(), vec!["annual.pdf"]);
    }

    #[tokio::test]
    async fn grown_file_detected_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = drop_file(&dir, "annual.pdf", b"%PDF");

        let monitor = FolderMonitor::new(dir.path()).unwrap();
        let sink = RecordingSink::default();
        monitor.scan(&sink).await.unwrap();

        std::fs::write(&path, b"%PDF with more pages").unwrap();
        assert_eq!(monitor.scan(&sink).await.unwrap(), 1);
        assert_eq!(sink.names(), vec!["annual.pdf", "annual.pdf"]);
    }

    #[tokio::test]
    async fn template_filename_marks_reference() {
        let dir = tempfile::tempdir().unwrap();
        drop_file(&dir, "fy2024_statement.xlsx", b"PK");
        drop_file(&dir, "q3_filing.pdf", b"%PDF");

        let monitor = FolderMonitor::new(dir.path()).unwrap();
        let sink = RecordingSink::default();
        monitor.scan(&sink).await.unwrap();

        let events = sink.events.lock().unwrap();
        assert!(events[0].is_reference);
        assert_eq!(events[0].fiscal_year, 2024);
        assert!(!events[1].is_reference);
        assert_eq!(events[1].fiscal_year, 2025);
    }

    #[tokio::test]
    async fn detected_document_admits_as_submission() {
        let dir = tempfile::tempdir().unwrap();
        drop_file(&dir, "annual.pdf", b"%PDF");

        let monitor = FolderMonitor::new(dir.path()).unwrap();
        let sink = RecordingSink::default();
        monitor.scan(&sink).await.unwrap();

        let document = sink.events.lock().unwrap().remove(0);
        let submission = document.into_submission("analyst-7");
        assert_eq!(submission.fiscal_year, 2025);
        let admitted = intake::admit(&submission, &PipelineConfig::default()).unwrap();
        assert_eq!(admitted.kind, DocumentKind::Paged);
    }

    #[tokio::test]
    async fn monitor_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let intake_dir = dir.path().join("intake");
        assert!(!intake_dir.exists());

        let _monitor = FolderMonitor::new(&intake_dir).unwrap();
        assert!(intake_dir.is_dir());
    }

    #[tokio::test]
    async fn running_monitor_picks_up_dropped_file() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(
            FolderMonitor::new(dir.path())
                .unwrap()
                .with_poll_interval(Duration::from_millis(10)),
        );
        let sink = Arc::new(RecordingSink::default());

        let handle = Arc::clone(&monitor).start(sink.clone());
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(30)).await;
        drop_file(&dir, "late_arrival.pdf", b"%PDF");
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.stop().await;
        assert_eq!(sink.names(), vec!["late_arrival.pdf"]);
    }
}
