//! Chromium-based renderer using chromiumoxide.

use super::{LaunchSettings, Launcher, NavigationResult, RenderContext, Renderer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Environment variable overriding Chromium discovery.
pub const CHROMIUM_PATH_ENV: &str = "PA_RATES_CHROMIUM_PATH";

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. PA_RATES_CHROMIUM_PATH env
    if let Ok(p) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.pa-rates/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidate = if cfg!(target_os = "macos") {
            home.join(".pa-rates/chromium/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing")
        } else {
            home.join(".pa-rates/chromium/chrome-linux64/chrome")
        };
        if candidate.exists() {
            return Some(candidate);
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launches a fresh Chromium process per session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    /// Explicit binary; discovered with [`find_chromium`] when `None`.
    pub executable: Option<PathBuf>,
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self, settings: &LaunchSettings<'_>) -> Result<Box<dyn Renderer>> {
        let chrome_path = match &self.executable {
            Some(path) => path.clone(),
            None => find_chromium().with_context(|| {
                format!("Chromium not found. Install Chrome or set {CHROMIUM_PATH_ENV}.")
            })?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .request_timeout(settings.request_timeout)
            .window_size(1920, 1080)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-notifications")
            .arg("--disable-blink-features=AutomationControlled");
        builder = if settings.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::debug!("chromium handler event error");
                }
            }
        });

        let download = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(settings.download_dir.display().to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("invalid download behavior: {e}"));
        let download = match download {
            Ok(params) => browser
                .execute(params)
                .await
                .context("failed to set download directory"),
            Err(e) => Err(e),
        };
        if let Err(e) = download {
            let _ = browser.close().await;
            handler_task.abort();
            return Err(e);
        }

        Ok(Box::new(ChromiumRenderer {
            browser,
            handler_task,
        }))
    }
}

/// Chromium-based renderer owning one browser process.
pub struct ChromiumRenderer {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        Ok(Box::new(ChromiumContext { page }))
    }

    async fn shutdown(self: Box<Self>) -> Result<()> {
        let ChromiumRenderer {
            mut browser,
            handler_task,
        } = *self;
        let closed = browser.close().await.context("failed to close Chromium");
        let _ = browser.wait().await;
        handler_task.abort();
        closed.map(|_| ())
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .unwrap_or_default();
        Ok(url)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await.context("failed to close page")
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .context("failed to capture screenshot")
    }
}
