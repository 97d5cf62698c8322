//! Bounded retry of scrape attempts with constant backoff.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::attempt_log::{AttemptEntry, AttemptSink, Outcome};
use crate::types::{EnergyType, ScrapeError, ScrapeResult, ZipCode};

/// Extraction failures tolerated before the page is treated as
/// structurally different and the error is surfaced.
pub const EXTRACTION_ATTEMPT_LIMIT: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Constant delay between attempts.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

/// The request an attempt belongs to, for log entries.
#[derive(Debug, Clone)]
pub struct AttemptTarget {
    pub zip_code: ZipCode,
    pub energy_type: EnergyType,
}

impl AttemptTarget {
    pub fn entry(
        &self,
        stage: impl Into<String>,
        attempt: u32,
        outcome: Outcome,
        detail: Option<String>,
        elapsed: Duration,
    ) -> AttemptEntry {
        AttemptEntry {
            timestamp: Utc::now(),
            zip_code: self.zip_code.clone(),
            energy_type: self.energy_type,
            stage: stage.into(),
            attempt,
            outcome,
            detail,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// What the supervisor does with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Retry,
    /// Give up and wrap in `ScrapeFailed`.
    Exhausted,
    /// Surface the error unchanged.
    Terminal,
}

fn disposition(err: &ScrapeError, attempt: u32, extraction_failures: u32, max: u32) -> Disposition {
    match err {
        ScrapeError::SessionStart(_) | ScrapeError::Navigation { .. } if attempt < max => {
            Disposition::Retry
        }
        ScrapeError::Extraction { .. }
            if attempt < max && extraction_failures < EXTRACTION_ATTEMPT_LIMIT =>
        {
            Disposition::Retry
        }
        ScrapeError::SessionStart(_) | ScrapeError::Navigation { .. } | ScrapeError::Extraction { .. } => {
            Disposition::Exhausted
        }
        ScrapeError::ArchiveWrite { .. }
        | ScrapeError::InvalidRequest(_)
        | ScrapeError::Cancelled
        | ScrapeError::ScrapeFailed { .. } => Disposition::Terminal,
    }
}

/// Pipeline stage a failure happened in, as written to the attempt log.
pub fn stage_label(err: &ScrapeError) -> String {
    match err {
        ScrapeError::SessionStart(_) => "session_opening".to_string(),
        ScrapeError::Navigation { stage, .. } => format!("navigating:{stage}"),
        ScrapeError::Extraction { .. } => "extracting".to_string(),
        ScrapeError::ArchiveWrite { .. } => "archiving".to_string(),
        other => other.kind().to_string(),
    }
}

/// Run `op` until it succeeds, fails terminally, exhausts
/// `policy.max_attempts`, or `cancel` fires.
///
/// `op` receives the 1-based attempt number. Session and navigation
/// failures are retried up to the attempt limit; extraction failures at
/// most once. Cancellation is checked before each attempt and during the
/// delay; `op` is expected to observe the same token itself.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    target: &AttemptTarget,
    sink: &mut dyn AttemptSink,
    cancel: &CancellationToken,
    mut op: F,
) -> ScrapeResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ScrapeResult<T>>,
{
    if policy.max_attempts == 0 {
        return Err(ScrapeError::InvalidRequest(
            "max_attempts must be at least 1".into(),
        ));
    }

    let mut extraction_failures = 0;
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            sink.record(&target.entry("idle", attempt, Outcome::Cancelled, None, Duration::ZERO));
            return Err(ScrapeError::Cancelled);
        }

        let started = Instant::now();
        let result = op(attempt).await;
        let elapsed = started.elapsed();

        let err = match result {
            Ok(value) => {
                sink.record(&target.entry("extracted", attempt, Outcome::Success, None, elapsed));
                tracing::info!(attempt, elapsed_ms = elapsed.as_millis() as u64, "attempt succeeded");
                return Ok(value);
            }
            Err(err) => err,
        };

        if matches!(err, ScrapeError::Extraction { .. }) {
            extraction_failures += 1;
        }
        let stage = stage_label(&err);
        let detail = Some(err.to_string());

        match disposition(&err, attempt, extraction_failures, policy.max_attempts) {
            Disposition::Retry => {
                sink.record(&target.entry(&stage, attempt, Outcome::Retrying, detail, elapsed));
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    stage = %stage,
                    "attempt failed: {err}; retrying in {}s",
                    policy.base_delay.as_secs_f32()
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        sink.record(&target.entry("backoff", attempt, Outcome::Cancelled, None, Duration::ZERO));
                        return Err(ScrapeError::Cancelled);
                    }
                    _ = tokio::time::sleep(policy.base_delay) => {}
                }
            }
            Disposition::Exhausted => {
                sink.record(&target.entry(&stage, attempt, Outcome::Failed, detail, elapsed));
                tracing::error!(attempt, stage = %stage, "giving up: {err}");
                return Err(ScrapeError::ScrapeFailed {
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }
            Disposition::Terminal => {
                let outcome = if matches!(err, ScrapeError::Cancelled) {
                    Outcome::Cancelled
                } else {
                    Outcome::Failed
                };
                sink.record(&target.entry(&stage, attempt, outcome, detail, elapsed));
                return Err(err);
            }
        }
    }
}
