//! papowerswitch.com: residential electricity offers.
//!
//! The results page takes the whole search as query parameters, so ZIP
//! entry, service selection and submission all happen by building the URL.

use async_trait::async_trait;
use url::Url;

use super::{
    await_results, export_records, load, record_context, Extracted, RateSource, ResultsHandle,
};
use crate::extract::ExtractionStrategy;
use crate::renderer::Probe;
use crate::session::Session;
use crate::types::{EnergyType, NavigationStage, ScrapeError, ScrapeResult, ZipCode};

pub const RESULTS_URL: &str = "https://www.papowerswitch.com/shop-for-rates-results";

/// Distributor id the results query has always been built with.
pub const DEFAULT_DISTRIBUTOR: u32 = 1182;

const RESULT_PROBES: [Probe<'static>; 1] =
    [Probe::Selector(".supplier-offer, .offer, .rate-card, table")];

#[derive(Debug, Clone)]
pub struct ElectricitySource {
    pub results_url: String,
    pub distributor: Option<u32>,
    /// Monthly kWh the site estimates bills with.
    pub usage_kwh: u32,
}

impl Default for ElectricitySource {
    fn default() -> Self {
        Self {
            results_url: RESULTS_URL.to_string(),
            distributor: Some(DEFAULT_DISTRIBUTOR),
            usage_kwh: 700,
        }
    }
}

impl ElectricitySource {
    /// Results URL requesting fixed-rate residential offers with no
    /// cancellation, enrollment or monthly fees, cheapest first.
    pub fn search_url(&self, zip: &ZipCode) -> ScrapeResult<Url> {
        let distributor = self.distributor.map(|d| d.to_string()).unwrap_or_default();
        let usage = self.usage_kwh.to_string();
        let params: [(&str, &str); 13] = [
            ("zip", zip.as_str()),
            ("distributor", &distributor),
            ("distributorrate", "R - Regular Residential Service"),
            ("servicetype", "residential"),
            ("usage", &usage),
            ("min-price", ""),
            ("max-price", ""),
            ("ratePreferences[]", "fixed"),
            ("offerPreferences[]", "no_cancellation"),
            ("offerPreferences[]", "no_enrollment"),
            ("offerPreferences[]", "no_monthly"),
            ("offerPreferences[]", "introductory_prices"),
            ("sortby", "est_a"),
        ];
        Url::parse_with_params(&self.results_url, params.iter()).map_err(|e| {
            ScrapeError::InvalidRequest(format!("bad results URL {:?}: {e}", self.results_url))
        })
    }
}

#[async_trait]
impl RateSource for ElectricitySource {
    fn energy_type(&self) -> EnergyType {
        EnergyType::Electricity
    }

    fn name(&self) -> &'static str {
        "PA Power Switch"
    }

    async fn submit_search(&self, session: &mut Session, zip: &ZipCode) -> ScrapeResult<ResultsHandle> {
        let url = self.search_url(zip)?;
        tracing::info!(%zip, "loading electricity results");
        load(session, url.as_str()).await?;

        let empty = await_results(session, &RESULT_PROBES).await?;
        let current = session
            .context()?
            .get_url()
            .await
            .map_err(|e| ScrapeError::navigation(NavigationStage::AwaitResults, format!("{e:#}")))?;

        Ok(ResultsHandle {
            empty,
            strategy: ExtractionStrategy::Export,
            url: current,
            // The query asks for fixed offers only.
            fixed_only: true,
        })
    }

    async fn extract(
        &self,
        session: &mut Session,
        handle: &ResultsHandle,
        zip: &ZipCode,
    ) -> ScrapeResult<Extracted> {
        if handle.empty {
            return Ok(Extracted::default());
        }
        let ctx = record_context(EnergyType::Electricity, zip, handle.default_rate_type());
        export_records(session, &ctx).await
    }
}
