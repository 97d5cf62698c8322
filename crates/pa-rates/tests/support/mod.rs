//! Scripted in-process browser for pipeline tests.
//!
//! `FakeLauncher` serves canned pages: the start page for any URL except
//! the electricity results URL, the results page after a submit click or
//! a results URL, and drops the canned export into the session's download
//! directory when an export control is clicked. DOM queries are answered
//! with `scraper` against the current page.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pa_rates::renderer::{LaunchSettings, Launcher, NavigationResult, RenderContext, Renderer};
use pa_rates::FetchOptions;
use scraper::{Html, Selector};

#[derive(Debug, Clone, Default)]
pub struct FakeSite {
    pub start_html: String,
    pub results_html: String,
    pub export_csv: Option<String>,
    pub fail_launch: bool,
    pub fail_navigation: bool,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub tabs_closed: AtomicUsize,
    pub navigations: AtomicUsize,
    pub exports: AtomicUsize,
}

impl Counters {
    pub fn get(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FakeLauncher {
    pub site: Arc<FakeSite>,
    pub counters: Arc<Counters>,
}

impl FakeLauncher {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            counters: Arc::new(Counters::default()),
        }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, settings: &LaunchSettings<'_>) -> anyhow::Result<Box<dyn Renderer>> {
        if self.site.fail_launch {
            anyhow::bail!("chromium binary not executable");
        }
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRenderer {
            site: self.site.clone(),
            counters: self.counters.clone(),
            download_dir: settings.download_dir.to_path_buf(),
        }))
    }
}

struct FakeRenderer {
    site: Arc<FakeSite>,
    counters: Arc<Counters>,
    download_dir: PathBuf,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
        Ok(Box::new(FakeContext {
            site: self.site.clone(),
            counters: self.counters.clone(),
            download_dir: self.download_dir.clone(),
            html: Mutex::new(String::from("<html></html>")),
            url: Mutex::new(String::from("about:blank")),
        }))
    }

    async fn shutdown(self: Box<Self>) -> anyhow::Result<()> {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeContext {
    site: Arc<FakeSite>,
    counters: Arc<Counters>,
    download_dir: PathBuf,
    html: Mutex<String>,
    url: Mutex<String>,
}

impl FakeContext {
    fn page(&self) -> Html {
        Html::parse_document(&self.html.lock().unwrap())
    }

    fn matches(&self, css: &str) -> bool {
        let Ok(selector) = Selector::parse(css) else {
            return false;
        };
        self.page().select(&selector).next().is_some()
    }

    fn show_results(&self) {
        *self.html.lock().unwrap() = self.site.results_html.clone();
    }

    fn export(&self) {
        if let Some(csv) = &self.site.export_csv {
            self.counters.exports.fetch_add(1, Ordering::SeqCst);
            std::fs::write(self.download_dir.join("offers_export.csv"), csv).unwrap();
        }
    }

    /// Text of every element matching `css`, lowercased, with input values.
    fn texts(&self, css: &str) -> Vec<String> {
        let Ok(selector) = Selector::parse(css) else {
            return Vec::new();
        };
        self.page()
            .select(&selector)
            .map(|el| {
                let mut text = el.text().collect::<Vec<_>>().join(" ");
                if let Some(value) = el.value().attr("value") {
                    text.push(' ');
                    text.push_str(value);
                }
                text.to_lowercase()
            })
            .collect()
    }
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> anyhow::Result<NavigationResult> {
        self.counters.navigations.fetch_add(1, Ordering::SeqCst);
        if self.site.fail_navigation {
            anyhow::bail!("net::ERR_CONNECTION_RESET");
        }
        let html = if url.contains("shop-for-rates-results") {
            self.site.results_html.clone()
        } else {
            self.site.start_html.clone()
        };
        *self.html.lock().unwrap() = html;
        *self.url.lock().unwrap() = url.to_string();
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, _script: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn get_html(&self) -> anyhow::Result<String> {
        Ok(self.html.lock().unwrap().clone())
    }

    async fn get_url(&self) -> anyhow::Result<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.counters.tabs_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, selector: &str) -> anyhow::Result<bool> {
        Ok(self.matches(selector))
    }

    async fn text_present(&self, needle: &str) -> anyhow::Result<bool> {
        let text = self.texts("body").join(" ");
        Ok(text.contains(&needle.to_lowercase()))
    }

    async fn fill(&self, selector: &str, _value: &str) -> anyhow::Result<bool> {
        Ok(self.matches(selector))
    }

    async fn click(&self, selector: &str) -> anyhow::Result<bool> {
        if !self.matches(selector) {
            return Ok(false);
        }
        if selector.contains("submit") {
            self.show_results();
        } else if selector.contains("csv") || selector.contains("export") {
            self.export();
        }
        Ok(true)
    }

    async fn click_text(&self, tags: &[&str], needles: &[&str]) -> anyhow::Result<bool> {
        let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
        let hit = self
            .texts(&tags.join(", "))
            .into_iter()
            .find(|text| needles.iter().all(|n| text.contains(n.as_str())));
        match hit {
            Some(text) => {
                if text.contains("export") {
                    self.export();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn check_labeled(&self, label_text: &str) -> anyhow::Result<bool> {
        let needle = label_text.to_lowercase();
        Ok(self.texts("label").iter().any(|t| t.contains(&needle)))
    }

    async fn check(&self, selector: &str) -> anyhow::Result<bool> {
        Ok(self.matches(selector))
    }

    async fn select_option(&self, option_text: &str) -> anyhow::Result<bool> {
        let needle = option_text.to_lowercase();
        Ok(self.texts("option").iter().any(|t| t.contains(&needle)))
    }
}

// ─────────────────────── fixtures ───────────────────────

pub const ELECTRICITY_RESULTS: &str = r#"<html><body>
  <div class="supplier-offer">Bolt Energy 9.19</div>
  <div class="supplier-offer">Acme Power 8.49</div>
  <a class="export" href="/shop-for-rates-results/export">Export to CSV</a>
</body></html>"#;

pub const ELECTRICITY_EXPORT: &str = "\
Supplier,Price,Term Length,Cancellation Fee,Monthly Fee,Service Type,Type,PA Wind,Contact Phone Number
Bolt Energy,9.19,12,$0,No,Residential,Fixed,No,555-0100
Acme Power,8.49,24 months,$0,No,Residential,Fixed,No,555-0101
Var Co,6.99,Month-to-month,$0,No,Residential,Variable,No,555-0102
Fee Co,7.10,12,$150,No,Residential,Fixed,Yes,555-0103
";

pub const NO_OFFERS: &str = r#"<html><body>
  <div class="view-empty">There are no offers matching your search.</div>
</body></html>"#;

pub const GAS_START: &str = r#"<html><body>
  <form action="/shop-for-natural-gas">
    <input id="edit-zipcode" name="zipcode" type="text">
    <input id="edit-submit-residential-rate-search2" type="submit" value="Shop">
  </form>
</body></html>"#;

pub const GAS_RESULTS: &str = r#"<html><body>
  <label><input type="checkbox" id="edit-field-type-value-fixed"> Fixed price</label>
  <label><input type="checkbox"> No Cancellation Fee</label>
  <label><input type="checkbox"> No Deposit Required</label>
  <label><input type="checkbox"> No Monthly Fee</label>
  <select><option>All</option><option>R - Regular Residential Service</option></select>
  <a href="/offers.csv">Export Offers to CSV</a>
</body></html>"#;

pub const GAS_EXPORT: &str = "\
Supplier,Price,Type,Term Length,Cancellation Fee,Monthly Fee,Service Type,Discounts/Incentives Available,More info
Gasco,$0.559,Fixed,12 months,,No,Residential,No,Introductory rate for new customers
Fuelco,$0.499,Fixed,12 months,,No,Residential,Yes,
Heatco,$0.601,Fixed,6 months,,No,Residential,No,
Bizgas,$0.40,Fixed,12,,No,Commercial,No,
Cheapvar,$0.30,Variable,0,,No,Residential,No,
";

/// Electricity results whose page copy mentions "no results".
pub const ELECTRICITY_RESULTS_WITH_NOTICE: &str = r#"<html><body>
  <p class="help">No results for your distributor? Try another ZIP.</p>
  <div class="supplier-offer">Bolt Energy 9.19</div>
  <div class="supplier-offer">Acme Power 8.49</div>
  <a class="export" href="/shop-for-rates-results/export">Export to CSV</a>
</body></html>"#;

/// Gas export without a Type column.
pub const GAS_EXPORT_UNTYPED: &str = "\
Supplier,Price,Term Length,Cancellation Fee,Monthly Fee,Service Type,Discounts/Incentives Available
Heatco,$0.601,6 months,,No,Residential,No
Gasco,$0.559,12 months,,No,Residential,No
Feeco,$0.45,12,$50,No,Residential,No
";

/// Gas results without an export control; offers only in the table.
pub const GAS_RESULTS_TABLE_ONLY: &str = r#"<html><body>
  <label><input type="checkbox" id="edit-field-type-value-fixed"> Fixed price</label>
  <table class="views-table">
    <thead><tr><th>Supplier</th><th>Price per Mcf</th><th>Type</th><th>Cancellation Fee</th></tr></thead>
    <tbody>
      <tr><td>Gasco</td><td>$5.59</td><td>Fixed</td><td>None</td></tr>
      <tr><td>Feeco</td><td>$4.10</td><td>Fixed</td><td>$50</td></tr>
    </tbody>
  </table>
</body></html>"#;

pub fn electricity_site() -> FakeSite {
    FakeSite {
        start_html: String::new(),
        results_html: ELECTRICITY_RESULTS.to_string(),
        export_csv: Some(ELECTRICITY_EXPORT.to_string()),
        ..FakeSite::default()
    }
}

pub fn gas_site() -> FakeSite {
    FakeSite {
        start_html: GAS_START.to_string(),
        results_html: GAS_RESULTS.to_string(),
        export_csv: Some(GAS_EXPORT.to_string()),
        ..FakeSite::default()
    }
}

/// Options with short waits and no backoff, writing into `dir`.
pub fn fast_options(dir: &tempfile::TempDir) -> FetchOptions {
    FetchOptions {
        output_dir: dir.path().to_path_buf(),
        base_delay: Duration::from_millis(1),
        session_timeout: Duration::from_secs(5),
        wait_budget: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
        ..FetchOptions::default()
    }
}
