//! `pa-rates doctor`: environment checks before a scheduled run.

use std::fs;
use std::path::Path;

use pa_rates::attempt_log::{AttemptLog, Outcome, ATTEMPT_LOG_FILE};
use pa_rates::find_chromium;
use pa_rates::renderer::chromium::CHROMIUM_PATH_ENV;

/// Print one line per check. Returns whether every required check passed.
pub fn run(output_dir: &Path) -> bool {
    let mut healthy = true;

    match find_chromium() {
        Some(path) => println!("  ok    chromium: {}", path.display()),
        None => {
            healthy = false;
            println!("  FAIL  chromium: not found (install Chrome or set {CHROMIUM_PATH_ENV})");
        }
    }

    match check_writable(output_dir) {
        Ok(()) => println!("  ok    output dir: {}", output_dir.display()),
        Err(e) => {
            healthy = false;
            println!("  FAIL  output dir: {}: {e}", output_dir.display());
        }
    }

    let log_path = output_dir.join(ATTEMPT_LOG_FILE);
    if log_path.is_file() {
        match AttemptLog::read_all(&log_path) {
            Ok(entries) => {
                if let Some(last) = entries.last() {
                    println!(
                        "  info  last attempt: {} {} {} at {} ({:?})",
                        last.energy_type,
                        last.zip_code,
                        last.stage,
                        last.timestamp.format("%Y-%m-%d %H:%M UTC"),
                        last.outcome
                    );
                }
                let failed = entries.iter().filter(|e| e.outcome == Outcome::Failed).count();
                if failed > 0 {
                    println!("  info  {failed} failed request(s) recorded");
                }
            }
            Err(e) => println!("  warn  attempt log unreadable: {e:#}"),
        }
    }

    healthy
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(".pa-rates-doctor");
    fs::write(&probe, b"ok")?;
    fs::remove_file(&probe)
}
