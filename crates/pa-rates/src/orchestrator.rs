//! One request in, one archived dataset out.
//!
//! The orchestrator composes session, source, retry, filter and archive
//! for a single (ZIP code, energy type) request. It is the same for both
//! energy types; only the [`RateSource`] differs.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::archive::Archive;
use crate::attempt_log::{AttemptLog, AttemptSink, MemorySink, Outcome};
use crate::config::FetchOptions;
use crate::filter;
use crate::renderer::Launcher;
use crate::retry::{run_with_retry, stage_label, AttemptTarget};
use crate::session::Session;
use crate::sources::{source_for, Extracted, RateSource};
use crate::types::{EnergyType, RateRecord, ScrapeError, ScrapeResult, ZipCode};

/// Lifecycle of one scrape request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Idle,
    SessionOpening,
    Navigating,
    Extracting,
    Filtering,
    Archiving,
    Done,
    Failed,
}

impl ScrapeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScrapeState::Done | ScrapeState::Failed)
    }

    /// Whether `self -> next` is a legal step. Navigating and Extracting
    /// may fall back to SessionOpening when an attempt is retried.
    pub fn can_transition_to(self, next: ScrapeState) -> bool {
        use ScrapeState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, SessionOpening) => true,
            (SessionOpening, SessionOpening | Navigating) => true,
            (Navigating, Extracting | SessionOpening) => true,
            (Extracting, Filtering | SessionOpening) => true,
            (Filtering, Archiving) => true,
            (Archiving, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScrapeState::Idle => "idle",
            ScrapeState::SessionOpening => "session_opening",
            ScrapeState::Navigating => "navigating",
            ScrapeState::Extracting => "extracting",
            ScrapeState::Filtering => "filtering",
            ScrapeState::Archiving => "archiving",
            ScrapeState::Done => "done",
            ScrapeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Current state plus every state visited, in order.
#[derive(Debug)]
struct StateTracker {
    current: ScrapeState,
    visited: Vec<ScrapeState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            current: ScrapeState::Idle,
            visited: vec![ScrapeState::Idle],
        }
    }

    fn advance(&mut self, next: ScrapeState) {
        if !self.current.can_transition_to(next) {
            tracing::warn!(from = %self.current, to = %next, "unexpected state transition");
        }
        tracing::debug!(from = %self.current, to = %next, "state");
        self.current = next;
        self.visited.push(next);
    }
}

/// A successful request.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Filtered, sorted offers. Empty when the site had none.
    pub records: Vec<RateRecord>,
    pub archive_path: PathBuf,
    pub raw_export_path: Option<PathBuf>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// States visited, from `Idle` to `Done`.
    pub states: Vec<ScrapeState>,
    pub elapsed: Duration,
}

/// Runs requests against one source.
pub struct Orchestrator<'a> {
    launcher: &'a dyn Launcher,
    source: Box<dyn RateSource>,
    options: FetchOptions,
    archive: Archive,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator for the production site serving `energy_type`.
    pub fn new(launcher: &'a dyn Launcher, energy_type: EnergyType, options: FetchOptions) -> Self {
        Self::with_source(launcher, source_for(energy_type), options)
    }

    pub fn with_source(
        launcher: &'a dyn Launcher,
        source: Box<dyn RateSource>,
        options: FetchOptions,
    ) -> Self {
        let archive = Archive::new(&options.output_dir);
        Self {
            launcher,
            source,
            options,
            archive,
        }
    }

    pub fn energy_type(&self) -> EnergyType {
        self.source.energy_type()
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Scrape, filter and archive offers for `zip`.
    pub async fn fetch(&self, zip: &ZipCode, cancel: &CancellationToken) -> ScrapeResult<FetchOutcome> {
        let started = Instant::now();
        let energy_type = self.energy_type();
        let tracker = Mutex::new(StateTracker::new());

        let result = self.run(zip, cancel, &tracker).await;
        let mut tracker = tracker.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());

        match result {
            Ok((records, archive_path, raw_export_path, attempts)) => {
                tracker.advance(ScrapeState::Done);
                tracing::info!(
                    %zip,
                    %energy_type,
                    offers = records.len(),
                    attempts,
                    archive = %archive_path.display(),
                    "fetch complete"
                );
                Ok(FetchOutcome {
                    records,
                    archive_path,
                    raw_export_path,
                    attempts,
                    states: tracker.visited,
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                tracker.advance(ScrapeState::Failed);
                tracing::error!(%zip, %energy_type, "fetch failed: {e}");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        zip: &ZipCode,
        cancel: &CancellationToken,
        tracker: &Mutex<StateTracker>,
    ) -> ScrapeResult<(Vec<RateRecord>, PathBuf, Option<PathBuf>, u32)> {
        self.options.validate()?;
        let energy_type = self.energy_type();
        let target = AttemptTarget {
            zip_code: zip.clone(),
            energy_type,
        };
        let mut sink = self.open_sink();

        let mut attempts = 0;
        let extracted = run_with_retry(
            &self.options.retry_policy(),
            &target,
            sink.as_mut(),
            cancel,
            |attempt| {
                attempts = attempt;
                self.attempt(zip, attempt, cancel, tracker)
            },
        )
        .await?;

        advance(tracker, ScrapeState::Filtering);
        let raw_count = extracted.records.len();
        let records = filter::process(extracted.records, energy_type);
        tracing::info!(raw = raw_count, kept = records.len(), "offers filtered");

        advance(tracker, ScrapeState::Archiving);
        let archive_started = Instant::now();
        let saved = self.save(&records, zip, extracted.raw_export.as_deref());
        let (outcome, detail) = match &saved {
            Ok(_) => (Outcome::Success, None),
            Err(e) => (Outcome::Failed, Some(e.to_string())),
        };
        sink.record(&target.entry("archiving", attempts, outcome, detail, archive_started.elapsed()));
        let (archive_path, raw_export_path) = saved?;

        Ok((records, archive_path, raw_export_path, attempts))
    }

    /// One attempt: fresh session, navigate, extract, always close.
    async fn attempt(
        &self,
        zip: &ZipCode,
        attempt: u32,
        cancel: &CancellationToken,
        tracker: &Mutex<StateTracker>,
    ) -> ScrapeResult<Extracted> {
        advance(tracker, ScrapeState::SessionOpening);
        tracing::info!(attempt, source = self.source.name(), %zip, "starting attempt");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            opened = Session::open(self.launcher, self.options.session_options()) => opened,
        };
        let mut session = opened?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
            result = self.drive(&mut session, zip, tracker) => result,
        };

        if let Err(e) = &result {
            if self.options.save_debug_artifacts
                && matches!(e, ScrapeError::Navigation { .. } | ScrapeError::Extraction { .. })
            {
                self.save_debug_artifacts(&session, e, zip).await;
            }
        }
        session.close().await;
        result
    }

    async fn drive(
        &self,
        session: &mut Session,
        zip: &ZipCode,
        tracker: &Mutex<StateTracker>,
    ) -> ScrapeResult<Extracted> {
        advance(tracker, ScrapeState::Navigating);
        let handle = self.source.submit_search(session, zip).await?;
        if handle.empty {
            tracing::info!(%zip, "site reports no offers");
        }

        advance(tracker, ScrapeState::Extracting);
        let extracted = self.source.extract(session, &handle, zip).await?;
        tracing::info!(rows = extracted.records.len(), strategy = ?handle.strategy, "rows extracted");
        Ok(extracted)
    }

    fn save(
        &self,
        records: &[RateRecord],
        zip: &ZipCode,
        raw_export: Option<&[u8]>,
    ) -> ScrapeResult<(PathBuf, Option<PathBuf>)> {
        let energy_type = self.energy_type();
        let raw_path = match raw_export {
            Some(data) if self.options.keep_raw_export => {
                Some(self.archive.save_raw_export(data, zip, energy_type)?)
            }
            _ => None,
        };
        let path = self.archive.save(records, zip, energy_type)?;
        Ok((path, raw_path))
    }

    fn open_sink(&self) -> Box<dyn AttemptSink> {
        match AttemptLog::in_dir(&self.options.output_dir) {
            Ok(log) => Box::new(log),
            Err(e) => {
                tracing::warn!("attempt log unavailable, keeping entries in memory: {e:#}");
                Box::new(MemorySink::default())
            }
        }
    }

    async fn save_debug_artifacts(&self, session: &Session, err: &ScrapeError, zip: &ZipCode) {
        let Ok(ctx) = session.context() else {
            return;
        };
        let dir = self.options.output_dir.join("debug");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("cannot create debug dir: {e}");
            return;
        }
        let stem = format!(
            "{}_{}_{}",
            stage_label(err).replace(':', "-"),
            zip,
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        match ctx.get_html().await {
            Ok(html) => {
                let path = dir.join(format!("{stem}.html"));
                match std::fs::write(&path, html) {
                    Ok(()) => tracing::info!(path = %path.display(), "saved page source"),
                    Err(e) => tracing::warn!("saving page source failed: {e}"),
                }
            }
            Err(e) => tracing::debug!("page source unavailable: {e:#}"),
        }
        if let Ok(png) = ctx.screenshot().await {
            let path = dir.join(format!("{stem}.png"));
            if let Err(e) = std::fs::write(&path, png) {
                tracing::warn!("saving screenshot failed: {e}");
            }
        }
    }
}

fn advance(tracker: &Mutex<StateTracker>, next: ScrapeState) {
    let mut guard = tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.advance(next);
}

/// Fetch offers for `zip` from the production site for `energy_type`.
///
/// Returns the filtered records and the archive file they were written to.
/// A site with zero offers is a success with empty `records` and a
/// header-only archive file.
pub async fn fetch_rates(
    zip: &str,
    energy_type: EnergyType,
    options: FetchOptions,
    launcher: &dyn Launcher,
    cancel: &CancellationToken,
) -> ScrapeResult<FetchOutcome> {
    let zip = ZipCode::parse(zip)?;
    Orchestrator::new(launcher, energy_type, options)
        .fetch(&zip, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScrapeState::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Idle,
            SessionOpening,
            Navigating,
            Extracting,
            Filtering,
            Archiving,
            Done,
        ];
        assert!(path.windows(2).all(|w| w[0].can_transition_to(w[1])));
    }

    #[test]
    fn test_retry_loops_back_to_session_opening() {
        assert!(Navigating.can_transition_to(SessionOpening));
        assert!(Extracting.can_transition_to(SessionOpening));
        assert!(SessionOpening.can_transition_to(SessionOpening));
        assert!(!Filtering.can_transition_to(SessionOpening));
        assert!(!Archiving.can_transition_to(SessionOpening));
    }

    #[test]
    fn test_terminal_states() {
        for state in [Done, Failed] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(Idle));
            assert!(!state.can_transition_to(Failed));
        }
        assert!(Idle.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Navigating));
    }

    #[test]
    fn test_tracker_records_visits() {
        let mut tracker = StateTracker::new();
        tracker.advance(SessionOpening);
        tracker.advance(Failed);
        assert_eq!(tracker.visited, vec![Idle, SessionOpening, Failed]);
    }
}
