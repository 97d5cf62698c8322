//! Per-site navigation and extraction.
//!
//! Each comparison site is a [`RateSource`]: it drives a session from the
//! site's start page to its results, then pulls rows out with the
//! extraction strategy the site supports.

pub mod electricity;
pub mod gas;

use async_trait::async_trait;
use chrono::Utc;

use crate::extract::export::{await_download, parse_export, DOWNLOAD_POLL};
use crate::extract::{table, ExtractionStrategy, RecordContext};
use crate::renderer::{wait_for_any, Probe};
use crate::session::Session;
use crate::types::{
    EnergyType, ExtractionFailure, NavigationStage, RateRecord, RateType, ScrapeError,
    ScrapeResult, ZipCode,
};

pub use electricity::ElectricitySource;
pub use gas::GasSource;

/// Indicators that a search legitimately returned no offers.
pub const NO_OFFER_PROBES: [Probe<'static>; 3] = [
    Probe::Selector(".view-empty"),
    Probe::Text("no offers"),
    Probe::Text("no results"),
];

/// Elements that may carry the CSV export action.
const EXPORT_TAGS: [&str; 3] = ["a", "button", "input[type='submit']"];

/// The point at which a search's results became available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsHandle {
    /// The site reported zero offers.
    pub empty: bool,
    pub strategy: ExtractionStrategy,
    pub url: String,
    /// The site itself was narrowed to fixed-price offers, so rows without
    /// a type column are fixed.
    pub fixed_only: bool,
}

impl ResultsHandle {
    /// Rate type for rows that do not state one.
    pub fn default_rate_type(&self) -> RateType {
        if self.fixed_only {
            RateType::Fixed
        } else {
            RateType::Variable
        }
    }
}

/// Raw records from one extraction, plus the untouched export file if any.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub records: Vec<RateRecord>,
    pub raw_export: Option<Vec<u8>>,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    fn energy_type(&self) -> EnergyType;

    /// Human-readable site name.
    fn name(&self) -> &'static str;

    /// Drive the session to the results for `zip`.
    async fn submit_search(&self, session: &mut Session, zip: &ZipCode) -> ScrapeResult<ResultsHandle>;

    /// Pull raw, unfiltered records from the results.
    async fn extract(
        &self,
        session: &mut Session,
        handle: &ResultsHandle,
        zip: &ZipCode,
    ) -> ScrapeResult<Extracted>;
}

/// The source that serves `energy_type`, with production URLs.
pub fn source_for(energy_type: EnergyType) -> Box<dyn RateSource> {
    match energy_type {
        EnergyType::Electricity => Box::new(ElectricitySource::default()),
        EnergyType::Gas => Box::new(GasSource::default()),
    }
}

pub(crate) fn record_context(
    energy_type: EnergyType,
    zip: &ZipCode,
    default_rate_type: RateType,
) -> RecordContext {
    RecordContext {
        energy_type,
        zip_code: zip.clone(),
        retrieved_at: Utc::now(),
        default_rate_type,
    }
}

/// Load `url`, mapping failures to the start-page stage.
pub(crate) async fn load(session: &mut Session, url: &str) -> ScrapeResult<()> {
    let timeout_ms = session.page_timeout_ms();
    let nav = session
        .context_mut()?
        .navigate(url, timeout_ms)
        .await
        .map_err(|e| ScrapeError::navigation(NavigationStage::LoadStartPage, format!("{e:#}")))?;
    tracing::debug!(url = %nav.final_url, load_ms = nav.load_time_ms, "page loaded");
    Ok(())
}

/// Wait for either one of `results` or a no-offers indicator.
///
/// Result probes are checked first on every poll, so a results page that
/// also mentions "no results" somewhere is never reported empty.
/// Returns `true` when the search came back empty.
pub(crate) async fn await_results(session: &Session, results: &[Probe<'_>]) -> ScrapeResult<bool> {
    let mut probes: Vec<Probe<'_>> = results.to_vec();
    probes.extend_from_slice(&NO_OFFER_PROBES);
    let options = session.options();
    match wait_for_any(session.context()?, &probes, options.wait_budget, options.poll_interval).await {
        Some(i) => Ok(i >= results.len()),
        None => Err(ScrapeError::navigation(
            NavigationStage::AwaitResults,
            format!(
                "neither results nor a no-offers notice within {}s",
                options.wait_budget.as_secs()
            ),
        )),
    }
}

/// Click the site's CSV export control, wait for the download and parse it.
pub(crate) async fn export_records(
    session: &Session,
    ctx: &RecordContext,
) -> ScrapeResult<Extracted> {
    let clicked = click_export(session).await?;
    if !clicked {
        return Err(ExtractionFailure::ExportUnavailable.into());
    }

    let budget = session.options().wait_budget;
    let path = await_download(session.download_dir(), budget, DOWNLOAD_POLL).await?;
    let data = tokio::fs::read(&path).await.map_err(|e| {
        ExtractionFailure::MalformedExport(format!("reading {}: {e}", path.display()))
    })?;
    tracing::info!(file = %path.display(), bytes = data.len(), "export downloaded");

    let records = parse_export(&data, ctx)?;
    Ok(Extracted {
        records,
        raw_export: Some(data),
    })
}

/// Parse the results table out of the current page.
pub(crate) async fn table_records(
    session: &Session,
    ctx: &RecordContext,
) -> ScrapeResult<Extracted> {
    let html = session
        .context()?
        .get_html()
        .await
        .map_err(|e| ExtractionFailure::Browser(format!("reading page: {e:#}")))?;
    let records = table::extract_records(&html, ctx)?;
    Ok(Extracted {
        records,
        raw_export: None,
    })
}

async fn click_export(session: &Session) -> ScrapeResult<bool> {
    let ctx = session.context()?;
    let attempts: [&[&str]; 2] = [&["export", "csv"], &["export"]];
    for needles in attempts {
        if ctx
            .click_text(&EXPORT_TAGS, needles)
            .await
            .map_err(|e| ExtractionFailure::Browser(format!("export click: {e:#}")))?
        {
            return Ok(true);
        }
    }
    ctx.click("a[href*='csv'], a[href*='export'], .export, #export")
        .await
        .map_err(|e| ExtractionFailure::Browser(format!("export click: {e:#}")).into())
}
