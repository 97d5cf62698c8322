//! Browser session lifecycle.
//!
//! A session is one browser process, one tab and one private download
//! directory, owned by a single scrape attempt and closed exactly once.

use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::renderer::{LaunchSettings, Launcher, RenderContext, Renderer};
use crate::types::{ScrapeError, ScrapeResult};

/// Settings for opening a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    /// Bound on browser start-up and on each page load.
    pub timeout: Duration,
    /// Bound on waits for results and downloads.
    pub wait_budget: Duration,
    /// Interval between page probes while waiting.
    pub poll_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout: Duration::from_secs(60),
            wait_budget: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// An open browser session.
pub struct Session {
    renderer: Option<Box<dyn Renderer>>,
    context: Option<Box<dyn RenderContext>>,
    download_dir: TempDir,
    options: SessionOptions,
    opened_at: Instant,
}

impl Session {
    /// Launch a browser and open a tab, failing with `SessionStart` if
    /// either step errors or exceeds `options.timeout`.
    pub async fn open(launcher: &dyn Launcher, options: SessionOptions) -> ScrapeResult<Self> {
        let download_dir = tempfile::Builder::new()
            .prefix("pa-rates-download-")
            .tempdir()
            .map_err(|e| ScrapeError::SessionStart(format!("download dir: {e}")))?;

        let settings = LaunchSettings {
            headless: options.headless,
            download_dir: download_dir.path(),
            request_timeout: options.timeout,
        };

        let renderer = match tokio::time::timeout(options.timeout, launcher.launch(&settings)).await
        {
            Ok(Ok(renderer)) => renderer,
            Ok(Err(e)) => return Err(ScrapeError::SessionStart(format!("{e:#}"))),
            Err(_) => {
                return Err(ScrapeError::SessionStart(format!(
                    "browser did not start within {}s",
                    options.timeout.as_secs()
                )))
            }
        };

        let context = match tokio::time::timeout(options.timeout, renderer.new_context()).await {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                shutdown_quietly(renderer).await;
                return Err(ScrapeError::SessionStart(format!("{e:#}")));
            }
            Err(_) => {
                shutdown_quietly(renderer).await;
                return Err(ScrapeError::SessionStart("browser tab did not open".into()));
            }
        };

        tracing::debug!(headless = options.headless, "browser session opened");
        Ok(Self {
            renderer: Some(renderer),
            context: Some(context),
            download_dir,
            options,
            opened_at: Instant::now(),
        })
    }

    /// The tab this session drives.
    pub fn context(&self) -> ScrapeResult<&dyn RenderContext> {
        self.context
            .as_deref()
            .ok_or_else(|| ScrapeError::SessionStart("session already closed".into()))
    }

    pub fn context_mut(&mut self) -> ScrapeResult<&mut (dyn RenderContext + 'static)> {
        self.context
            .as_deref_mut()
            .ok_or_else(|| ScrapeError::SessionStart("session already closed".into()))
    }

    pub fn download_dir(&self) -> &Path {
        self.download_dir.path()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn page_timeout_ms(&self) -> u64 {
        self.options.timeout.as_millis() as u64
    }

    /// Close the tab, shut the browser down and remove the download
    /// directory. Errors are logged, not returned: the process is gone
    /// either way once the renderer is dropped.
    pub async fn close(mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = context.close().await {
                tracing::debug!("closing tab failed: {e:#}");
            }
        }
        if let Some(renderer) = self.renderer.take() {
            shutdown_quietly(renderer).await;
        }
        tracing::debug!(
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            "browser session closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.renderer.is_some() {
            tracing::warn!("browser session dropped without close; process released on drop");
        }
    }
}

async fn shutdown_quietly(renderer: Box<dyn Renderer>) {
    if let Err(e) = renderer.shutdown().await {
        tracing::warn!("browser shutdown failed: {e:#}");
    }
}
