//! Renderer abstraction for browser-driven scraping.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (Chromium via chromiumoxide), plus the `Launcher`
//! that starts one renderer per session.

pub mod chromium;

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Browser launch settings for a single session.
#[derive(Debug, Clone)]
pub struct LaunchSettings<'a> {
    pub headless: bool,
    /// Where the browser must save downloaded files.
    pub download_dir: &'a Path,
    /// Timeout for individual browser protocol requests.
    pub request_timeout: Duration,
}

/// Starts browser engines.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, settings: &LaunchSettings<'_>) -> Result<Box<dyn Renderer>>;
}

/// A running browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine and release its process.
    async fn shutdown(self: Box<Self>) -> Result<()>;
}

/// A single browser context (tab).
///
/// Only `navigate`, `execute_js`, `get_html` and `get_url` are engine
/// specific; the DOM helpers are implemented on top of `execute_js`.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;

    /// PNG screenshot of the full page, where the engine supports it.
    async fn screenshot(&self) -> Result<Vec<u8>> {
        anyhow::bail!("screenshots not supported by this renderer")
    }

    /// Whether an element matching the CSS selector exists.
    async fn exists(&self, selector: &str) -> Result<bool> {
        let script = format!("document.querySelector({}) !== null", js_str(selector));
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }

    /// Whether the visible page text contains `needle` (case-insensitive).
    async fn text_present(&self, needle: &str) -> Result<bool> {
        let script = format!(
            "!!document.body && document.body.innerText.toLowerCase().includes({})",
            js_str(&needle.to_lowercase())
        );
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }

    /// Set an input's value and fire input/change events.
    async fn fill(&self, selector: &str, value: &str) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                el.value = {val};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_str(selector),
            val = js_str(value),
        );
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }

    /// Click the first element matching the CSS selector.
    async fn click(&self, selector: &str) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.scrollIntoView({{ block: 'center' }});
                el.click();
                return true;
            }})()"#,
            sel = js_str(selector),
        );
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }

    /// Click the first element of `tags` whose text (or value) contains
    /// every one of `needles`, case-insensitively.
    async fn click_text(&self, tags: &[&str], needles: &[&str]) -> Result<bool> {
        let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
        let script = format!(
            r#"(() => {{
                const needles = {needles};
                for (const el of document.querySelectorAll({tags})) {{
                    const text = ((el.innerText || '') + ' ' + (el.value || '')).toLowerCase();
                    if (needles.every(n => text.includes(n))) {{
                        el.scrollIntoView({{ block: 'center' }});
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            needles = serde_json::to_string(&needles)?,
            tags = js_str(&tags.join(", ")),
        );
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }

    /// Check the checkbox whose label contains `label_text`.
    async fn check_labeled(&self, label_text: &str) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const needle = {needle};
                for (const label of document.querySelectorAll('label')) {{
                    if (!label.innerText.toLowerCase().includes(needle)) continue;
                    const input = label.control
                        || label.querySelector('input[type=checkbox]')
                        || (label.htmlFor && document.getElementById(label.htmlFor));
                    if (!input) continue;
                    if (!input.checked) input.click();
                    return true;
                }}
                return false;
            }})()"#,
            needle = js_str(&label_text.to_lowercase()),
        );
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }

    /// Check the checkbox matching the CSS selector.
    async fn check(&self, selector: &str) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                if (!el.checked) el.click();
                return true;
            }})()"#,
            sel = js_str(selector),
        );
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }

    /// Select, in any `<select>` on the page, the first option whose text
    /// contains `option_text`.
    async fn select_option(&self, option_text: &str) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const needle = {needle};
                for (const select of document.querySelectorAll('select')) {{
                    for (const opt of select.options) {{
                        if (opt.text.toLowerCase().includes(needle)) {{
                            select.value = opt.value;
                            select.dispatchEvent(new Event('change', {{ bubbles: true }}));
                            return true;
                        }}
                    }}
                }}
                return false;
            }})()"#,
            needle = js_str(&option_text.to_lowercase()),
        );
        Ok(self.execute_js(&script).await?.as_bool().unwrap_or(false))
    }
}

/// Something a page wait can look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<'a> {
    /// An element matching a CSS selector.
    Selector(&'a str),
    /// Case-insensitive visible text.
    Text(&'a str),
}

impl Probe<'_> {
    pub async fn matches(&self, ctx: &dyn RenderContext) -> Result<bool> {
        match self {
            Probe::Selector(sel) => ctx.exists(sel).await,
            Probe::Text(text) => ctx.text_present(text).await,
        }
    }
}

/// Poll `probes` in order until one matches or `budget` elapses.
///
/// Returns the index of the first matching probe. Script errors while the
/// page is mid-navigation count as "not yet".
pub async fn wait_for_any(
    ctx: &dyn RenderContext,
    probes: &[Probe<'_>],
    budget: Duration,
    poll: Duration,
) -> Option<usize> {
    let start = Instant::now();
    loop {
        for (i, probe) in probes.iter().enumerate() {
            if probe.matches(ctx).await.unwrap_or(false) {
                return Some(i);
            }
        }
        if start.elapsed() >= budget {
            return None;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Encode a Rust string as a JavaScript string literal.
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
