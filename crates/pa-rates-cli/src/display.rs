use std::path::PathBuf;

use comfy_table::{Attribute, Cell, CellAlignment, Color, Table, modifiers, presets};
use pa_rates::{Archive, ArchiveEntry, RateRecord};

fn styled_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table
}

pub fn offers_table(records: &[RateRecord]) -> Table {
    // Records arrive cheapest first.
    let cheapest = records.first().map(|r| r.estimated_annual_cost);

    let mut table = styled_table();
    table.set_header(vec!["#", "Provider", "Plan", "Rate", "Term", "Est. annual", "Notes"]);
    for (i, record) in records.iter().enumerate() {
        let term = match record.term_months {
            0 => "month-to-month".to_string(),
            n => format!("{n} mo"),
        };
        let mut notes = Vec::new();
        if record.new_customers_only {
            notes.push("new customers");
        }
        if record.has_incentives {
            notes.push("incentives");
        }

        table.add_row(vec![
            Cell::new(i + 1).add_attribute(Attribute::Dim),
            Cell::new(&record.provider),
            Cell::new(&record.plan_name),
            Cell::new(format!("{} {}", record.rate_value, record.rate_unit.label()))
                .set_alignment(CellAlignment::Right),
            Cell::new(term).set_alignment(CellAlignment::Right),
            Cell::new(format!("${:.2}", record.estimated_annual_cost))
                .set_alignment(CellAlignment::Right)
                .fg(if Some(record.estimated_annual_cost) == cheapest {
                    Color::Green
                } else {
                    Color::Reset
                }),
            Cell::new(notes.join(", ")).add_attribute(Attribute::Dim),
        ]);
    }
    table
}

/// Load archive files for the history listing, skipping unreadable ones.
pub fn load_history(paths: &[PathBuf]) -> Vec<ArchiveEntry> {
    paths
        .iter()
        .filter_map(|path| match Archive::load(path) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping unreadable archive: {e}");
                None
            }
        })
        .collect()
}

pub fn history_table(entries: &[ArchiveEntry]) -> Table {
    let mut table = styled_table();
    table.set_header(vec!["Fetched (UTC)", "Offers", "Cheapest", "Provider", "File"]);
    for entry in entries {
        let cheapest = entry.records.first();
        table.add_row(vec![
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(entry.records.len()).set_alignment(CellAlignment::Right),
            Cell::new(
                cheapest
                    .map(|r| format!("${:.2}", r.estimated_annual_cost))
                    .unwrap_or_else(|| "-".to_string()),
            )
            .set_alignment(CellAlignment::Right),
            Cell::new(cheapest.map(|r| r.provider.as_str()).unwrap_or("-")),
            Cell::new(
                entry
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
            .add_attribute(Attribute::Dim),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pa_rates::{EnergyType, RateType, RateUnit, ServiceClass, ZipCode};
    use rust_decimal::Decimal;

    fn record(provider: &str, cost: Decimal) -> RateRecord {
        RateRecord {
            provider: provider.to_string(),
            plan_name: String::new(),
            rate_value: Decimal::new(899, 2),
            rate_type: RateType::Fixed,
            term_months: 12,
            cancellation_fee: Decimal::ZERO,
            estimated_annual_cost: cost,
            energy_type: EnergyType::Electricity,
            zip_code: ZipCode::parse("19103").unwrap(),
            retrieved_at: Utc::now(),
            rate_unit: RateUnit::CentsPerKwh,
            service_class: ServiceClass::Residential,
            monthly_fee: false,
            has_incentives: false,
            new_customers_only: true,
        }
    }

    #[test]
    fn test_offers_table_has_one_row_per_record() {
        let records = [
            record("Acme", Decimal::new(75516, 2)),
            record("Bolt", Decimal::new(80000, 2)),
        ];
        let table = offers_table(&records);
        assert_eq!(table.row_iter().count(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("Acme"));
        assert!(rendered.contains("$755.16"));
        assert!(rendered.contains("new customers"));
    }

    #[test]
    fn test_history_table_marks_empty_fetches() {
        let zip = ZipCode::parse("19103").unwrap();
        let entries = [ArchiveEntry {
            path: "out/papowerswitch_filtered_19103_20261018_090807_654.csv".into(),
            zip_code: zip,
            energy_type: EnergyType::Electricity,
            created_at: Utc::now(),
            records: Vec::new(),
        }];
        let table = history_table(&entries);
        assert_eq!(table.row_iter().count(), 1);
        let row: Vec<String> = table
            .row_iter()
            .next()
            .unwrap()
            .cell_iter()
            .map(|c| c.content())
            .collect();
        assert_eq!(row[1], "0");
        assert_eq!(row[2], "-");
        assert_eq!(row[4], "papowerswitch_filtered_19103_20261018_090807_654.csv");
    }

    #[test]
    fn test_load_history_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let zip = ZipCode::parse("19103").unwrap();
        let good = archive
            .save(&[record("Acme", Decimal::new(75516, 2))], &zip, EnergyType::Electricity)
            .unwrap();
        let bad = dir
            .path()
            .join("papowerswitch_filtered_19103_20200101_000000_000.csv");
        std::fs::write(&bad, "provider,rate_value\nAcme,not-a-number\n").unwrap();

        let paths = archive.history(&zip, EnergyType::Electricity).unwrap();
        assert_eq!(paths.len(), 2);
        let entries = load_history(&paths);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, good);
    }
}
