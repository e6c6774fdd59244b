//! Plain-text document sources — no renderer required.
//!
//! Operational and test implementations of the source traits:
//! - [`TextPageSource`]: paged text files, pages separated by form feeds
//! - [`TsvTableSource`]: tab-separated tabular files, first line = headers
//!
//! Real PDF renderers and spreadsheet readers plug in behind the same
//! [`PageSource`] / [`TableSource`] traits.

use std::path::Path;

use super::types::{PageSource, Record, TableSource};
use super::ExtractionError;

/// Paged plain-text source: pages separated by form-feed (`\x0c`).
pub struct TextPageSource {
    pages: Vec<String>,
}

impl TextPageSource {
    pub fn open(path: &Path) -> Result<Self, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| ExtractionError::EncodingError(e.to_string()))?;
        Ok(Self::from_text(&text))
    }

    pub fn from_text(text: &str) -> Self {
        let pages = text.split('\x0c').map(str::to_string).collect();
        Self { pages }
    }
}

impl PageSource for TextPageSource {
    fn page_count(&self) -> Result<usize, ExtractionError> {
        Ok(self.pages.len())
    }

    fn load_page(&self, page_number: usize) -> Result<Vec<u8>, ExtractionError> {
        let page = self
            .pages
            .get(page_number.wrapping_sub(1))
            .ok_or(ExtractionError::PageOutOfRange {
                page: page_number,
                page_count: self.pages.len(),
            })?;
        Ok(page.clone().into_bytes())
    }
}

/// Tab-separated tabular source: first non-empty line is the header row,
/// each following non-empty line is one record.
pub struct TsvTableSource {
    text: String,
}

impl TsvTableSource {
    pub fn open(path: &Path) -> Result<Self, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| ExtractionError::EncodingError(e.to_string()))?;
        Ok(Self { text })
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl TableSource for TsvTableSource {
    fn read_records(&self) -> Result<Vec<Record>, ExtractionError> {
        let mut lines = self.text.lines().filter(|l| !l.trim().is_empty());

        let headers: Vec<&str> = lines
            .next()
            .ok_or(ExtractionError::MissingHeaderRow)?
            .split('\t')
            .map(str::trim)
            .collect();

        let records = lines
            .map(|line| {
                let mut record = Record::new();
                let mut cells = line.split('\t').map(str::trim);
                for header in &headers {
                    let value = cells.next().map(parse_cell).unwrap_or(serde_json::Value::Null);
                    record.insert(header.to_string(), value);
                }
                record
            })
            .collect();

        Ok(records)
    }
}

/// Interpret one cell: empty → null, numeric text → number, else string.
fn parse_cell(cell: &str) -> serde_json::Value {
    if cell.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(n) = cell.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return serde_json::Value::Number(num);
        }
    }
    serde_json::Value::String(cell.to_string())
}
