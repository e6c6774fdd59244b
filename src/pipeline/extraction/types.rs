use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// One structured table lifted from a page.
///
/// This is also the shape extraction backends must return per table; `rows`
/// cells stay as raw JSON values because source documents mix text and
/// numbers freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub table_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub position: Option<TablePosition>,
}

/// Table anchor on the page, when the backend reports one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePosition {
    pub x: f64,
    pub y: f64,
}

/// Page content as returned by the extraction backend.
///
/// `tables` is required — a reply without it fails shape validation and is
/// treated as malformed. Loose page headers and footnotes are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContent {
    pub tables: Vec<Table>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub footnotes: Vec<String>,
}

/// How a page's content was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Extraction backend returned well-formed structured data.
    Primary,
    /// Text-layout heuristic recovered tables after the backend failed.
    Fallback,
    /// Both paths failed; the page carries an error instead of content.
    Failed,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
        }
    }
}

/// Per-page extraction result.
///
/// The page extractor guarantees exactly one of these per submitted page,
/// ordered by `page_number`, with no duplicates and no gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageExtraction {
    pub page_number: usize,
    pub tables: Vec<Table>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub footnotes: Vec<String>,
    pub method: ExtractionMethod,
    /// Populated when `method` is `Failed` (and, for diagnosability, when a
    /// fallback page carries the primary attempt's error).
    #[serde(default)]
    pub error: Option<String>,
}

impl PageExtraction {
    pub fn from_content(
        page_number: usize,
        content: PageContent,
        method: ExtractionMethod,
    ) -> Self {
        Self {
            page_number,
            tables: content.tables,
            headers: content.headers,
            footnotes: content.footnotes,
            method,
            error: None,
        }
    }

    pub fn failed(page_number: usize, error: String) -> Self {
        Self {
            page_number,
            tables: vec![],
            headers: vec![],
            footnotes: vec![],
            method: ExtractionMethod::Failed,
            error: Some(error),
        }
    }
}

/// Whole-document extraction: one entry per page, page-number ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub pages: Vec<PageExtraction>,
    pub page_count: usize,
}

impl DocumentExtraction {
    pub fn failed_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.method == ExtractionMethod::Failed)
            .count()
    }

    pub fn fallback_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.method == ExtractionMethod::Fallback)
            .count()
    }

    pub fn table_count(&self) -> usize {
        self.pages.iter().map(|p| p.tables.len()).sum()
    }
}

/// Page payload access abstraction (allows mocking for tests).
///
/// Implementations render one page at a time; the extractor drops each
/// payload as soon as that page's attempt completes, so sources should not
/// hand out long-lived buffers.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> Result<usize, ExtractionError>;

    /// Load one page's raw payload (1-based page numbers).
    fn load_page(&self, page_number: usize) -> Result<Vec<u8>, ExtractionError>;
}

/// Tabular record access abstraction for spreadsheet-kind documents.
pub trait TableSource: Send + Sync {
    fn read_records(&self) -> Result<Vec<Record>, ExtractionError>;
}

/// One flattened tabular row: field name to nullable value.
pub type Record = serde_json::Map<String, serde_json::Value>;
