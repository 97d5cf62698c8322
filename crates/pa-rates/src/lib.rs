//! pa-rates: scrape, filter and archive residential electricity and
//! natural-gas rate offers from Pennsylvania's shopping sites.

pub mod archive;
pub mod attempt_log;
pub mod config;
pub mod extract;
pub mod filter;
pub mod orchestrator;
pub mod renderer;
pub mod retry;
pub mod session;
pub mod sources;
pub mod types;
pub mod usage;

pub use archive::{Archive, ArchiveEntry, LatestPointer};
pub use config::{resolve_output_dir, FetchOptions};
pub use orchestrator::{fetch_rates, FetchOutcome, Orchestrator, ScrapeState};
pub use renderer::chromium::{find_chromium, ChromiumLauncher};
pub use types::*;
