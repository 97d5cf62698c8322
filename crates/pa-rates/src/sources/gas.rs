//! pagasswitch.com: residential natural-gas offers.
//!
//! Search goes through the site's ZIP form; rate schedule and offer
//! filters are applied on the results page afterwards.

use async_trait::async_trait;

use super::{
    await_results, export_records, load, record_context, table_records, Extracted, RateSource,
    ResultsHandle,
};
use crate::extract::ExtractionStrategy;
use crate::renderer::{wait_for_any, Probe};
use crate::session::Session;
use crate::types::{
    EnergyType, ExtractionFailure, NavigationStage, ScrapeError, ScrapeResult, ZipCode,
};

pub const START_URL: &str = "https://www.pagasswitch.com/shop-for-natural-gas";

const ZIP_INPUTS: [&str; 2] = ["#edit-zipcode", "input[name='zipcode']"];
const SUBMIT_BUTTONS: [&str; 2] = [
    "#edit-submit-residential-rate-search2",
    "form input[type='submit'], form button[type='submit']",
];
const RESULT_PROBES: [Probe<'static>; 3] = [
    Probe::Selector("#edit-field-type-value-fixed"),
    Probe::Selector("a[href*='csv']"),
    Probe::Text("export"),
];
const FIXED_PRICE_CHECKBOX: &str = "#edit-field-type-value-fixed";
const RATE_SCHEDULE: &str = "Regular Residential Service";
const OFFER_FILTERS: [&str; 3] = ["No Cancellation Fee", "No Deposit Required", "No Monthly Fee"];

#[derive(Debug, Clone)]
pub struct GasSource {
    pub start_url: String,
    /// Primary extraction strategy.
    pub strategy: ExtractionStrategy,
    /// Read the rendered table when the export control is missing.
    pub table_fallback: bool,
}

impl Default for GasSource {
    fn default() -> Self {
        Self {
            start_url: START_URL.to_string(),
            strategy: ExtractionStrategy::Export,
            table_fallback: true,
        }
    }
}

impl GasSource {
    /// Narrow results on the site itself. Every control here is optional:
    /// the filter engine enforces the same policy on whatever comes back.
    ///
    /// Returns whether the fixed-price filter was set.
    async fn apply_site_filters(&self, session: &Session) -> ScrapeResult<bool> {
        let ctx = session.context()?;
        let service_err =
            |e: anyhow::Error| ScrapeError::navigation(NavigationStage::ServiceSelection, format!("{e:#}"));

        let selected = ctx.select_option(RATE_SCHEDULE).await.map_err(service_err)?
            || ctx.check_labeled(RATE_SCHEDULE).await.map_err(service_err)?;
        if !selected {
            tracing::warn!("rate schedule control not found; relying on local residential filter");
        }

        let fixed = ctx.check(FIXED_PRICE_CHECKBOX).await.map_err(service_err)?
            || ctx.check_labeled("Fixed").await.map_err(service_err)?;
        if !fixed {
            tracing::warn!("fixed price filter not found");
        }

        for label in OFFER_FILTERS {
            if !ctx.check_labeled(label).await.map_err(service_err)? {
                tracing::warn!(filter = label, "offer filter not found");
            }
        }
        Ok(fixed)
    }
}

#[async_trait]
impl RateSource for GasSource {
    fn energy_type(&self) -> EnergyType {
        EnergyType::Gas
    }

    fn name(&self) -> &'static str {
        "PA Gas Switch"
    }

    async fn submit_search(&self, session: &mut Session, zip: &ZipCode) -> ScrapeResult<ResultsHandle> {
        tracing::info!(%zip, "loading gas shopping page");
        load(session, &self.start_url).await?;

        let options = session.options().clone();
        let ctx = session.context()?;

        let zip_probes = ZIP_INPUTS.map(Probe::Selector);
        let zip_input = wait_for_any(ctx, &zip_probes, options.wait_budget, options.poll_interval)
            .await
            .ok_or_else(|| ScrapeError::navigation(NavigationStage::ZipEntry, "ZIP input not found"))?;
        let filled = ctx
            .fill(ZIP_INPUTS[zip_input], zip.as_str())
            .await
            .map_err(|e| ScrapeError::navigation(NavigationStage::ZipEntry, format!("{e:#}")))?;
        if !filled {
            return Err(ScrapeError::navigation(NavigationStage::ZipEntry, "ZIP input vanished"));
        }

        let mut submitted = false;
        for selector in SUBMIT_BUTTONS {
            submitted = ctx
                .click(selector)
                .await
                .map_err(|e| ScrapeError::navigation(NavigationStage::Submit, format!("{e:#}")))?;
            if submitted {
                break;
            }
        }
        if !submitted {
            return Err(ScrapeError::navigation(NavigationStage::Submit, "submit control not found"));
        }

        if await_results(session, &RESULT_PROBES).await? {
            return Ok(ResultsHandle {
                empty: true,
                strategy: self.strategy,
                url: session.context()?.get_url().await.unwrap_or_default(),
                fixed_only: false,
            });
        }

        let fixed_only = self.apply_site_filters(session).await?;
        // Filters re-query the offer list; wait for it to settle again.
        let empty = await_results(session, &RESULT_PROBES).await?;

        Ok(ResultsHandle {
            empty,
            strategy: self.strategy,
            url: session.context()?.get_url().await.unwrap_or_default(),
            fixed_only,
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
        let ctx = record_context(EnergyType::Gas, zip, handle.default_rate_type());

        match handle.strategy {
            ExtractionStrategy::RenderedTable => table_records(session, &ctx).await,
            ExtractionStrategy::Export => match export_records(session, &ctx).await {
                Err(ScrapeError::Extraction {
                    reason: ExtractionFailure::ExportUnavailable,
                }) if self.table_fallback => {
                    tracing::warn!("export control missing; reading rendered table");
                    table_records(session, &ctx).await
                }
                other => other,
            },
        }
    }
}
