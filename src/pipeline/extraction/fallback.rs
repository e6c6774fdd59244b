//! Fallback table recovery from raw text layout.
//!
//! When the extraction backend fails (or replies with an unusable shape),
//! the page payload is re-read as text and scanned for table structure:
//! lines that split into multiple delimiter-separated cells accumulate into
//! a block, and a non-tabular line closes the block. The first row of each
//! block becomes its header row.

use super::types::Table;

/// Minimum trimmed length for a line to be considered tabular.
const MIN_TABULAR_LINE_LEN: usize = 5;

/// Runs of at least this many spaces split multi-space aligned columns.
const MIN_SPACE_GAP: usize = 3;

/// Recover table structure from a page's text layout.
///
/// Returns every block with a header row and at least one data row; shorter
/// blocks are discarded as noise. An empty result means the fallback found
/// nothing to recover.
pub fn recover_tables(text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut block: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        let cells = split_cells(line);
        if cells.len() > 1 {
            block.push(cells);
        } else if !block.is_empty() {
            flush_block(&mut block, &mut tables);
        }
    }
    flush_block(&mut block, &mut tables);

    tables
}

/// Close an accumulated block: header row + data rows, or nothing.
fn flush_block(block: &mut Vec<Vec<String>>, tables: &mut Vec<Table>) {
    let rows = std::mem::take(block);
    if rows.len() < 2 {
        return;
    }

    let mut iter = rows.into_iter();
    let Some(headers) = iter.next() else { return };
    let data_rows = iter
        .map(|cells| cells.into_iter().map(serde_json::Value::String).collect())
        .collect();

    tables.push(Table {
        table_id: format!("fallback_table_{}", tables.len() + 1),
        title: None,
        headers,
        rows: data_rows,
        position: None,
    });
}

/// Split a line into cells on tabs, pipes, or multi-space gaps.
///
/// Patterns handled:
/// - Tab-separated: `"Cash\t1200\t1100"`
/// - Pipe-separated: `"| Cash | 1200 | 1100 |"`
/// - Multi-space aligned: `"Cash      1200      1100"`
///
/// A line yielding fewer than two cells is not tabular.
fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.len() < MIN_TABULAR_LINE_LEN {
        return vec![];
    }

    if trimmed.contains('\t') {
        return trimmed
            .split('\t')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
    }

    if trimmed.matches('|').count() >= 2 {
        return trimmed
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
    }

    split_on_space_gaps(trimmed)
}

/// Split on runs of `MIN_SPACE_GAP` or more spaces; shorter runs stay
/// inside the cell ("Net Income" is one cell).
fn split_on_space_gaps(text: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut space_run = 0usize;

    for ch in text.chars() {
        if ch == ' ' {
            space_run += 1;
            continue;
        }
        if space_run >= MIN_SPACE_GAP {
            if !current.is_empty() {
                cells.push(std::mem::take(&mut current));
            }
        } else {
            for _ in 0..space_run {
                current.push(' ');
            }
        }
        space_run = 0;
        current.push(ch);
    }
    if !current.is_empty() {
        cells.push(current);
    }

    cells
}
