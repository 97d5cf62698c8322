//! Export strategy: wait for the site's CSV download and parse it.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{map_rows, RecordContext};
use crate::types::{ExtractionFailure, RateRecord};

/// Interval between download directory scans.
pub const DOWNLOAD_POLL: Duration = Duration::from_millis(250);

/// Parse an exported CSV file body into records.
pub fn parse_export(data: &[u8], ctx: &RecordContext) -> Result<Vec<RateRecord>, ExtractionFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ExtractionFailure::MalformedExport(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ExtractionFailure::MalformedExport(e.to_string()))?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    map_rows(&headers, rows, ctx)
}

/// Wait until a completed `.csv` file appears in `dir`.
///
/// A file counts as complete once no browser partial-download file
/// (`.crdownload`, `.part`, `.tmp`) is left beside it.
pub async fn await_download(
    dir: &Path,
    budget: Duration,
    poll: Duration,
) -> Result<PathBuf, ExtractionFailure> {
    let start = Instant::now();
    loop {
        if let Some(path) = completed_csv(dir).await {
            return Ok(path);
        }
        if start.elapsed() >= budget {
            return Err(ExtractionFailure::DownloadTimeout {
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(poll).await;
    }
}

async fn completed_csv(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut partial = false;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "crdownload" | "part" | "tmp" => partial = true,
            "csv" => {
                let modified = entry
                    .metadata()
                    .await
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH);
                if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
                    newest = Some((modified, path));
                }
            }
            _ => {}
        }
    }

    if partial {
        return None;
    }
    newest.map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnergyType, RateType, ZipCode};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ctx() -> RecordContext {
        RecordContext {
            energy_type: EnergyType::Electricity,
            zip_code: ZipCode::parse("19348").unwrap(),
            retrieved_at: Utc::now(),
            default_rate_type: RateType::Fixed,
        }
    }

    #[test]
    fn test_parse_export_with_bom_and_extra_columns() {
        let csv = "\u{feff}Supplier,Price,Term Length,Cancellation Fee,PA Wind,Contact Phone Number\n\
                   Acme Power,9.19,12,$0,No,555-0100\n\
                   Bolt Energy,8.75,24 months,$150,Yes,555-0101\n";
        let records = parse_export(csv.as_bytes(), &ctx()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].provider, "Acme Power");
        assert_eq!(records[0].rate_type, RateType::Fixed);
        assert_eq!(records[1].term_months, 24);
        assert_eq!(records[1].cancellation_fee, dec!(150));
    }

    #[test]
    fn test_parse_export_header_only() {
        let records = parse_export(b"Supplier,Price\n", &ctx()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_export_missing_provider() {
        let err = parse_export(b"Name,Price\nA,1\n", &ctx()).unwrap_err();
        assert_eq!(err, ExtractionFailure::MissingColumn("provider"));
    }

    #[tokio::test]
    async fn test_await_download_finds_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("offers.csv"), "Supplier,Price\n").unwrap();
        let path = await_download(dir.path(), Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "offers.csv");
    }

    #[tokio::test]
    async fn test_await_download_waits_for_partial() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("offers.csv"), "Supplier,Price\n").unwrap();
        std::fs::write(dir.path().join("next.csv.crdownload"), "").unwrap();
        let err = await_download(dir.path(), Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionFailure::DownloadTimeout { .. }));
    }
}
