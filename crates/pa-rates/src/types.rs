//! Core data types for rate offers and scrape requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which comparison site, and which commodity, a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyType {
    Electricity,
    Gas,
}

impl EnergyType {
    pub const ALL: [EnergyType; 2] = [EnergyType::Electricity, EnergyType::Gas];

    pub fn as_str(self) -> &'static str {
        match self {
            EnergyType::Electricity => "electricity",
            EnergyType::Gas => "gas",
        }
    }

    /// File-name prefix used for archives of this energy type.
    pub fn archive_prefix(self) -> &'static str {
        match self {
            EnergyType::Electricity => "papowerswitch",
            EnergyType::Gas => "pagasswitch",
        }
    }
}

impl fmt::Display for EnergyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnergyType {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "electricity" | "electric" | "power" => Ok(EnergyType::Electricity),
            "gas" | "natural-gas" | "natural_gas" => Ok(EnergyType::Gas),
            other => Err(ScrapeError::InvalidRequest(format!(
                "unknown energy type: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateType {
    Fixed,
    Variable,
}

impl RateType {
    /// Interpret the free text of a "Type" cell.
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.trim().to_ascii_lowercase();
        if lower.contains("fixed") {
            Some(RateType::Fixed)
        } else if lower.contains("variable") || lower.contains("index") || lower.contains("tiered")
        {
            Some(RateType::Variable)
        } else {
            None
        }
    }
}

/// Unit that `RateRecord::rate_value` is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    CentsPerKwh,
    DollarsPerCcf,
    DollarsPerMcf,
}

impl RateUnit {
    pub fn label(self) -> &'static str {
        match self {
            RateUnit::CentsPerKwh => "¢/kWh",
            RateUnit::DollarsPerCcf => "$/ccf",
            RateUnit::DollarsPerMcf => "$/mcf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    Residential,
    Commercial,
    Unspecified,
}

impl ServiceClass {
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_ascii_lowercase();
        if lower.is_empty() {
            ServiceClass::Unspecified
        } else if lower.contains("residential") {
            ServiceClass::Residential
        } else if lower.contains("commercial") || lower.contains("business") || lower.contains("industrial") {
            ServiceClass::Commercial
        } else {
            ServiceClass::Unspecified
        }
    }
}

/// A validated 5-digit US ZIP code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZipCode(String);

impl ZipCode {
    pub fn parse(raw: &str) -> ScrapeResult<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == 5 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(ZipCode(trimmed.to_string()))
        } else {
            Err(ScrapeError::InvalidRequest(format!(
                "ZIP code must be exactly 5 digits, got {raw:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ZipCode {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ZipCode::parse(s)
    }
}

impl TryFrom<String> for ZipCode {
    type Error = ScrapeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ZipCode::parse(&value)
    }
}

impl From<ZipCode> for String {
    fn from(zip: ZipCode) -> Self {
        zip.0
    }
}

/// One comparable offer, normalized from a source site.
///
/// Field order is the column order of archive files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub provider: String,
    pub plan_name: String,
    pub rate_value: Decimal,
    pub rate_type: RateType,
    pub term_months: u32,
    pub cancellation_fee: Decimal,
    pub estimated_annual_cost: Decimal,
    pub energy_type: EnergyType,
    pub zip_code: ZipCode,
    pub retrieved_at: DateTime<Utc>,
    pub rate_unit: RateUnit,
    pub service_class: ServiceClass,
    pub monthly_fee: bool,
    pub has_incentives: bool,
    pub new_customers_only: bool,
}

impl RateRecord {
    /// Archive header row, matching the serialized field order.
    pub const COLUMNS: [&'static str; 15] = [
        "provider",
        "plan_name",
        "rate_value",
        "rate_type",
        "term_months",
        "cancellation_fee",
        "estimated_annual_cost",
        "energy_type",
        "zip_code",
        "retrieved_at",
        "rate_unit",
        "service_class",
        "monthly_fee",
        "has_incentives",
        "new_customers_only",
    ];
}

/// Step of the site interaction at which navigation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationStage {
    LoadStartPage,
    ZipEntry,
    ServiceSelection,
    Submit,
    AwaitResults,
}

impl fmt::Display for NavigationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NavigationStage::LoadStartPage => "load_start_page",
            NavigationStage::ZipEntry => "zip_entry",
            NavigationStage::ServiceSelection => "service_selection",
            NavigationStage::Submit => "submit",
            NavigationStage::AwaitResults => "await_results",
        };
        f.write_str(name)
    }
}

/// Why an extraction could not produce records.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExtractionFailure {
    #[error("required column {0:?} not found")]
    MissingColumn(&'static str),

    #[error("row {row}: column {column:?} is empty")]
    EmptyCell { row: usize, column: &'static str },

    #[error("row {row}: column {column:?} is not numeric: {value:?}")]
    NonNumeric {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("results table not found on page")]
    TableNotFound,

    #[error("export control not found on page")]
    ExportUnavailable,

    #[error("no export file completed within {waited_ms}ms")]
    DownloadTimeout { waited_ms: u64 },

    #[error("malformed export: {0}")]
    MalformedExport(String),

    #[error("browser error: {0}")]
    Browser(String),
}

/// Errors that can end a scrape request.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    #[error("browser session failed to start: {0}")]
    SessionStart(String),

    #[error("navigation failed at {stage}: {detail}")]
    Navigation {
        stage: NavigationStage,
        detail: String,
    },

    #[error("extraction failed: {reason}")]
    Extraction { reason: ExtractionFailure },

    #[error("archive write failed for {}: {source}", path.display())]
    ArchiveWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scrape failed after {attempts} attempt(s): {last_error}")]
    ScrapeFailed {
        attempts: u32,
        last_error: Box<ScrapeError>,
    },

    #[error("scrape cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ScrapeError {
    pub fn navigation(stage: NavigationStage, detail: impl Into<String>) -> Self {
        ScrapeError::Navigation {
            stage,
            detail: detail.into(),
        }
    }

    pub fn archive_write(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        ScrapeError::ArchiveWrite {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::SessionStart(_) => "session_start",
            ScrapeError::Navigation { .. } => "navigation",
            ScrapeError::Extraction { .. } => "extraction",
            ScrapeError::ArchiveWrite { .. } => "archive_write",
            ScrapeError::ScrapeFailed { .. } => "scrape_failed",
            ScrapeError::Cancelled => "cancelled",
            ScrapeError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<ExtractionFailure> for ScrapeError {
    fn from(reason: ExtractionFailure) -> Self {
        ScrapeError::Extraction { reason }
    }
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;
