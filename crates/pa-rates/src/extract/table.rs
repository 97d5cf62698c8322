//! Rendered-table strategy: read the results table out of page HTML.

use scraper::{ElementRef, Html, Selector};

use super::{map_rows, ColumnLayout, RecordContext};
use crate::types::{ExtractionFailure, RateRecord};

/// A header row plus its data rows, as plain cell text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Extract records from the first table on the page whose header row
/// names at least a provider and a price column.
pub fn extract_records(html: &str, ctx: &RecordContext) -> Result<Vec<RateRecord>, ExtractionFailure> {
    let table = find_results_table(html)?;
    map_rows(&table.headers, table.rows, ctx)
}

pub fn find_results_table(html: &str) -> Result<RawTable, ExtractionFailure> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;

    let mut first_failure = None;
    for table in document.select(&table_sel) {
        let Some(raw) = read_table(table)? else {
            continue;
        };
        match ColumnLayout::resolve(&raw.headers) {
            Ok(_) => return Ok(raw),
            Err(e) => {
                first_failure.get_or_insert(e);
            }
        }
    }

    Err(first_failure.unwrap_or(ExtractionFailure::TableNotFound))
}

fn read_table(table: ElementRef<'_>) -> Result<Option<RawTable>, ExtractionFailure> {
    let head_cells = selector("thead tr th, thead tr td")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("th, td")?;

    let mut headers: Vec<String> = table.select(&head_cells).map(cell_text).collect();
    let has_thead = !headers.is_empty();

    let mut rows: Vec<Vec<String>> = Vec::new();
    for tr in table.select(&row_sel) {
        if has_thead && in_thead(tr) {
            continue;
        }
        let cells: Vec<String> = tr.select(&cell_sel).map(cell_text).collect();
        if cells.is_empty() {
            continue;
        }
        if headers.is_empty() {
            headers = cells;
        } else {
            rows.push(cells);
        }
    }

    if headers.is_empty() {
        return Ok(None);
    }
    Ok(Some(RawTable { headers, rows }))
}

fn in_thead(tr: ElementRef<'_>) -> bool {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|el| el.value().name() == "thead")
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn selector(css: &str) -> Result<Selector, ExtractionFailure> {
    Selector::parse(css).map_err(|_| ExtractionFailure::TableNotFound)
}
