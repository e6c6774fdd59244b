//! Flattening extracted tables into named records.

use super::types::{PageExtraction, Record, Table};

/// Flatten every extracted table into records, page order preserved.
pub fn flatten_pages(pages: &[PageExtraction]) -> Vec<Record> {
    pages
        .iter()
        .flat_map(|page| page.tables.iter().flat_map(table_records))
        .collect()
}

/// One record per data row, keyed by the table's headers.
///
/// Rows shorter than the header set get nulls for the missing cells; cells
/// beyond the header set are dropped.
pub fn table_records(table: &Table) -> Vec<Record> {
    table
        .rows
        .iter()
        .map(|row| {
            let mut record = Record::new();
            for (i, header) in table.headers.iter().enumerate() {
                let value = row.get(i).cloned().unwrap_or(serde_json::Value::Null);
                record.insert(header.clone(), value);
            }
            record
        })
        .collect()
}

/// Distinct field names across all extracted tables, in order of first
/// appearance. Used to resolve the reference schema from a template
/// document.
pub fn collect_field_names(pages: &[PageExtraction]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for page in pages {
        for table in &page.tables {
            for header in &table.headers {
                if !fields.contains(header) {
                    fields.push(header.clone());
                }
            }
        }
    }
    fields
}
