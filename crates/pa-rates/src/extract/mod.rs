//! Row extraction: turning a results table or an export file into
//! normalized [`RateRecord`]s.
//!
//! Both strategies reduce to the same shape, a header row plus string rows,
//! which [`ColumnLayout`] maps onto record fields by position.

pub mod cells;
pub mod export;
pub mod table;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    EnergyType, ExtractionFailure, RateRecord, RateType, RateUnit, ServiceClass, ZipCode,
};
use crate::usage::estimated_annual_cost;

/// How rows are pulled from a results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Parse the rendered HTML results table.
    RenderedTable,
    /// Trigger the site's CSV export and parse the downloaded file.
    Export,
}

const PROVIDER: &[&str] = &["supplier", "supplier name", "provider", "company"];
const RATE_VALUE: &[&str] = &[
    "price",
    "rate",
    "price per kwh",
    "price per ccf",
    "price per mcf",
];
const PLAN_NAME: &[&str] = &["plan", "plan name", "offer", "product"];
const RATE_TYPE: &[&str] = &["type", "rate type", "price type"];
const TERM: &[&str] = &["term length", "term", "contract term"];
const CANCELLATION_FEE: &[&str] = &[
    "cancellation fee",
    "early termination fee",
    "termination fee",
];
const SERVICE_CLASS: &[&str] = &["service type", "customer class"];
const MONTHLY_FEE: &[&str] = &["monthly fee"];
const INCENTIVES: &[&str] = &["discounts/incentives available", "incentives"];
const DETAILS: &[&str] = &["more info", "details"];

/// Request-level values stamped onto every extracted record.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub energy_type: EnergyType,
    pub zip_code: ZipCode,
    pub retrieved_at: DateTime<Utc>,
    /// Rate type assumed when the source has no type column.
    pub default_rate_type: RateType,
}

/// Column positions resolved once from a header row.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    provider: usize,
    rate_value: usize,
    plan_name: Option<usize>,
    rate_type: Option<usize>,
    term_months: Option<usize>,
    cancellation_fee: Option<usize>,
    service_class: Option<usize>,
    monthly_fee: Option<usize>,
    incentives: Option<usize>,
    details: Option<usize>,
    rate_header: String,
}

impl ColumnLayout {
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Result<Self, ExtractionFailure> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();

        let mut columns = ColumnClaims::new(&normalized);
        let [
            provider,
            rate_value,
            plan_name,
            rate_type,
            term_months,
            cancellation_fee,
            service_class,
            monthly_fee,
            incentives,
            details,
        ] = columns.resolve([
            PROVIDER,
            RATE_VALUE,
            PLAN_NAME,
            RATE_TYPE,
            TERM,
            CANCELLATION_FEE,
            SERVICE_CLASS,
            MONTHLY_FEE,
            INCENTIVES,
            DETAILS,
        ]);

        let provider = provider.ok_or(ExtractionFailure::MissingColumn("provider"))?;
        let rate_value = rate_value.ok_or(ExtractionFailure::MissingColumn("rate_value"))?;

        Ok(Self {
            provider,
            rate_value,
            plan_name,
            rate_type,
            term_months,
            cancellation_fee,
            service_class,
            monthly_fee,
            incentives,
            details,
            rate_header: normalized[rate_value].clone(),
        })
    }

    /// Map one data row. `row` is 1-based and only used for error messages.
    pub fn record(
        &self,
        row: usize,
        values: &[String],
        ctx: &RecordContext,
    ) -> Result<RateRecord, ExtractionFailure> {
        let cell = |idx: Option<usize>| idx.and_then(|i| values.get(i)).map(|s| s.trim()).unwrap_or("");

        let provider = cell(Some(self.provider));
        if provider.is_empty() {
            return Err(ExtractionFailure::EmptyCell {
                row,
                column: "provider",
            });
        }

        let rate_text = cell(Some(self.rate_value));
        if rate_text.is_empty() {
            return Err(ExtractionFailure::EmptyCell {
                row,
                column: "rate_value",
            });
        }
        let raw_rate = cells::parse_decimal(rate_text).ok_or_else(|| ExtractionFailure::NonNumeric {
            row,
            column: "rate_value",
            value: rate_text.to_string(),
        })?;
        let (rate_value, rate_unit) = normalize_rate(ctx.energy_type, &self.rate_header, rate_text, raw_rate);

        let rate_type = match self.rate_type {
            Some(_) => RateType::from_label(cell(self.rate_type)).unwrap_or(RateType::Variable),
            None => ctx.default_rate_type,
        };

        let term_text = cell(self.term_months);
        let term_months = cells::parse_term_months(term_text).ok_or_else(|| ExtractionFailure::NonNumeric {
            row,
            column: "term_months",
            value: term_text.to_string(),
        })?;

        let fee_text = cell(self.cancellation_fee);
        let cancellation_fee = cells::parse_fee(fee_text).ok_or_else(|| ExtractionFailure::NonNumeric {
            row,
            column: "cancellation_fee",
            value: fee_text.to_string(),
        })?;

        Ok(RateRecord {
            provider: provider.to_string(),
            plan_name: cell(self.plan_name).to_string(),
            rate_value,
            rate_type,
            term_months,
            cancellation_fee: cancellation_fee.abs(),
            estimated_annual_cost: estimated_annual_cost(rate_value, rate_unit),
            energy_type: ctx.energy_type,
            zip_code: ctx.zip_code.clone(),
            retrieved_at: ctx.retrieved_at,
            rate_unit,
            service_class: ServiceClass::from_label(cell(self.service_class)),
            monthly_fee: cells::parse_flag(cell(self.monthly_fee)),
            has_incentives: cells::parse_flag(cell(self.incentives)),
            new_customers_only: cell(self.details)
                .to_ascii_lowercase()
                .contains("for new customers"),
        })
    }
}

/// Resolve the layout from `headers` and map every non-blank row.
pub fn map_rows<S, I>(
    headers: &[S],
    rows: I,
    ctx: &RecordContext,
) -> Result<Vec<RateRecord>, ExtractionFailure>
where
    S: AsRef<str>,
    I: IntoIterator<Item = Vec<String>>,
{
    let layout = ColumnLayout::resolve(headers)?;
    rows.into_iter()
        .filter(|values| values.iter().any(|c| !c.trim().is_empty()))
        .enumerate()
        .map(|(i, values)| layout.record(i + 1, &values, ctx))
        .collect()
}

fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(':')
        .to_lowercase()
}

/// Assigns each header column to at most one field.
struct ColumnClaims<'a> {
    headers: &'a [String],
    claimed: Vec<bool>,
}

impl<'a> ColumnClaims<'a> {
    fn new(headers: &'a [String]) -> Self {
        Self {
            headers,
            claimed: vec![false; headers.len()],
        }
    }

    /// Exact alias matches for every field first, then alias-prefix
    /// matches over the columns still unclaimed. Earlier fields win ties.
    fn resolve<const N: usize>(&mut self, fields: [&[&str]; N]) -> [Option<usize>; N] {
        let mut found = [None; N];
        for (slot, aliases) in found.iter_mut().zip(fields) {
            *slot = self.claim(aliases, |h, alias| h == alias);
        }
        for (slot, aliases) in found.iter_mut().zip(fields) {
            if slot.is_none() {
                *slot = self.claim(aliases, starts_with_word);
            }
        }
        found
    }

    fn claim(&mut self, aliases: &[&str], matches: impl Fn(&str, &str) -> bool) -> Option<usize> {
        let idx = aliases.iter().find_map(|alias| {
            self.headers
                .iter()
                .enumerate()
                .position(|(i, h)| !self.claimed[i] && matches(h.as_str(), *alias))
        })?;
        self.claimed[idx] = true;
        Some(idx)
    }
}

/// `header` begins with `alias` followed by a non-alphanumeric character
/// or the end of the header: "price (¢/kwh)" matches "price", "termination
/// fee" does not match "term".
fn starts_with_word(header: &str, alias: &str) -> bool {
    header
        .strip_prefix(alias)
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
}

/// Bring a parsed price into its energy type's canonical unit.
fn normalize_rate(
    energy: EnergyType,
    header: &str,
    cell: &str,
    value: Decimal,
) -> (Decimal, RateUnit) {
    let cell = cell.to_lowercase();
    match energy {
        EnergyType::Electricity => {
            let in_cents = cell.contains('¢') || header.contains('¢') || header.contains("cent");
            let in_dollars = cell.contains('$') || header.contains('$') || value < Decimal::ONE;
            if !in_cents && in_dollars {
                (value * Decimal::ONE_HUNDRED, RateUnit::CentsPerKwh)
            } else {
                (value, RateUnit::CentsPerKwh)
            }
        }
        EnergyType::Gas => {
            if cell.contains("mcf") || header.contains("mcf") {
                (value, RateUnit::DollarsPerMcf)
            } else {
                (value, RateUnit::DollarsPerCcf)
            }
        }
    }
}
