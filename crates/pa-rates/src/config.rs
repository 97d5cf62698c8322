//! Fetch options and their resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::session::SessionOptions;
use crate::types::{ScrapeError, ScrapeResult};

pub const OUTPUT_DIR_ENV: &str = "PA_RATES_OUTPUT_DIR";
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Everything a caller can tune about one `fetch_rates` request.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub headless: bool,
    pub max_attempts: u32,
    /// Constant delay between attempts.
    pub base_delay: Duration,
    /// Archive root; also holds the attempt log and debug captures.
    pub output_dir: PathBuf,
    /// Bound on browser start-up and page loads.
    pub session_timeout: Duration,
    /// Bound on waiting for results and downloads.
    pub wait_budget: Duration,
    pub poll_interval: Duration,
    /// Save page HTML and a screenshot when an attempt fails.
    pub save_debug_artifacts: bool,
    /// Keep an untouched copy of the site's export file.
    pub keep_raw_export: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            session_timeout: Duration::from_secs(60),
            wait_budget: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            save_debug_artifacts: false,
            keep_raw_export: true,
        }
    }
}

impl FetchOptions {
    pub fn validate(&self) -> ScrapeResult<()> {
        if self.max_attempts == 0 {
            return Err(ScrapeError::InvalidRequest(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.session_timeout.is_zero() || self.wait_budget.is_zero() {
            return Err(ScrapeError::InvalidRequest(
                "session timeout and wait budget must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            headless: self.headless,
            timeout: self.session_timeout,
            wait_budget: self.wait_budget,
            poll_interval: self.poll_interval,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
        }
    }
}

/// Resolve the output directory: explicit value, then
/// `PA_RATES_OUTPUT_DIR`, then `./output`.
pub fn resolve_output_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_output_dir_from(explicit, std::env::var(OUTPUT_DIR_ENV).ok())
}

fn resolve_output_dir_from(explicit: Option<&Path>, env: Option<String>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_OUTPUT_DIR),
    }
}
