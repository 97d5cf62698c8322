//! pa-rates command-line entry point.

mod display;
mod doctor;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

use pa_rates::config::OUTPUT_DIR_ENV;
use pa_rates::renderer::chromium::CHROMIUM_PATH_ENV;
use pa_rates::{
    resolve_output_dir, Archive, ChromiumLauncher, EnergyType, FetchOptions, Orchestrator,
    ZipCode,
};

#[derive(Parser)]
#[command(
    name = "pa-rates",
    about = "Scrape, filter and archive Pennsylvania electricity and natural-gas offers",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Energy {
    Electricity,
    Gas,
}

impl From<Energy> for EnergyType {
    fn from(energy: Energy) -> Self {
        match energy {
            Energy::Electricity => EnergyType::Electricity,
            Energy::Gas => EnergyType::Gas,
        }
    }
}

#[derive(clap::Args)]
struct Target {
    /// Five-digit Pennsylvania ZIP code.
    #[arg(long)]
    zip: String,

    /// Which comparison site to use.
    #[arg(long, value_enum, default_value = "electricity")]
    energy: Energy,

    /// Archive directory. Falls back to ./output.
    #[arg(long, env = OUTPUT_DIR_ENV)]
    output_dir: Option<PathBuf>,
}

impl Target {
    fn zip(&self) -> anyhow::Result<ZipCode> {
        Ok(ZipCode::parse(&self.zip)?)
    }

    fn archive(&self) -> Archive {
        Archive::new(resolve_output_dir(self.output_dir.as_deref()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape current offers, filter them and archive the result.
    Fetch {
        #[command(flatten)]
        target: Target,

        /// Show the browser window.
        #[arg(long)]
        headed: bool,

        /// Attempts before giving up.
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Seconds to wait between attempts.
        #[arg(long, default_value_t = 5)]
        retry_delay_secs: u64,

        /// Bound on browser start-up and page loads, in seconds.
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,

        /// Bound on waiting for results and downloads, in seconds.
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,

        /// Save page HTML and a screenshot when an attempt fails.
        #[arg(long)]
        debug_artifacts: bool,

        /// Do not keep a copy of the site's export file.
        #[arg(long)]
        no_raw_export: bool,

        /// Chromium binary to launch.
        #[arg(long, env = CHROMIUM_PATH_ENV)]
        chromium: Option<PathBuf>,
    },

    /// Show the most recent archived offers.
    Latest {
        #[command(flatten)]
        target: Target,
    },

    /// List archived fetches, oldest first.
    History {
        #[command(flatten)]
        target: Target,
    },

    /// Check that a browser and the output directory are usable.
    Doctor {
        /// Archive directory to check.
        #[arg(long, env = OUTPUT_DIR_ENV)]
        output_dir: Option<PathBuf>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   pa-rates completions bash > ~/.local/share/bash-completion/completions/pa-rates
    ///   pa-rates completions zsh > ~/.zfunc/_pa-rates
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fetch {
            target,
            headed,
            max_attempts,
            retry_delay_secs,
            timeout_secs,
            wait_secs,
            debug_artifacts,
            no_raw_export,
            chromium,
        } => {
            let zip = target.zip()?;
            let energy_type = EnergyType::from(target.energy);
            let options = FetchOptions {
                headless: !headed,
                max_attempts,
                base_delay: Duration::from_secs(retry_delay_secs),
                output_dir: resolve_output_dir(target.output_dir.as_deref()),
                session_timeout: Duration::from_secs(timeout_secs),
                wait_budget: Duration::from_secs(wait_secs),
                save_debug_artifacts: debug_artifacts,
                keep_raw_export: !no_raw_export,
                ..FetchOptions::default()
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; stopping after the current step");
                    on_signal.cancel();
                }
            });

            let launcher = ChromiumLauncher {
                executable: chromium,
            };
            let orchestrator = Orchestrator::new(&launcher, energy_type, options);
            let outcome = orchestrator
                .fetch(&zip, &cancel)
                .await
                .with_context(|| format!("fetching {energy_type} offers for {zip}"))?;

            if outcome.records.is_empty() {
                println!("No offers found for {zip} ({energy_type}).");
            } else {
                println!("{}", display::offers_table(&outcome.records));
            }
            println!("Archived to {}", outcome.archive_path.display());
            if let Some(raw) = &outcome.raw_export_path {
                println!("Site export kept at {}", raw.display());
            }
            tracing::debug!(
                attempts = outcome.attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "done"
            );
        }

        Commands::Latest { target } => {
            let zip = target.zip()?;
            let energy_type = EnergyType::from(target.energy);
            let archive = target.archive();
            match archive.latest(&zip, energy_type)? {
                Some(path) => {
                    let entry = Archive::load(&path)?;
                    println!(
                        "{} offers for {zip} ({energy_type}), fetched {}",
                        entry.records.len(),
                        entry.created_at.format("%Y-%m-%d %H:%M UTC")
                    );
                    if !entry.records.is_empty() {
                        println!("{}", display::offers_table(&entry.records));
                    }
                    println!("{}", path.display());
                }
                None => {
                    println!(
                        "No archive for {zip} ({energy_type}) in {}",
                        archive.root().display()
                    );
                }
            }
        }

        Commands::History { target } => {
            let zip = target.zip()?;
            let energy_type = EnergyType::from(target.energy);
            let archive = target.archive();
            let entries = display::load_history(&archive.history(&zip, energy_type)?);
            if entries.is_empty() {
                println!(
                    "No archive for {zip} ({energy_type}) in {}",
                    archive.root().display()
                );
            } else {
                println!("{}", display::history_table(&entries));
            }
        }

        Commands::Doctor { output_dir } => {
            let healthy = doctor::run(&resolve_output_dir(output_dir.as_deref()));
            if !healthy {
                std::process::exit(1);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pa-rates", &mut std::io::stdout());
        }
    }

    Ok(())
}
