//! `galileo` command line.
//!
//! `galileo run` starts an interactive measurement session; `galileo
//! plot-worker` is the child process the session launches for live plots.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use galileo::config::Settings;
use galileo::coordinator::Coordinator;
use galileo::{logging, plot, shell};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a measurement session with an interactive prompt
    Run {
        /// Path to config TOML (default: config/galileo.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Plot worker speaking the frame protocol on stdin/stdout
    #[command(hide = true)]
    PlotWorker {
        /// Log level for the worker's stderr
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::PlotWorker { log_level } => {
            logging::init(&log_level);
            // The GUI, when built in, needs this thread; the worker builds
            // its own runtime.
            plot::serve_stdio().context("Plot worker failed")
        }
        Command::Run { config } => {
            let settings = match config {
                Some(path) => {
                    if !path.exists() {
                        bail!("Config file {} does not exist", path.display());
                    }
                    Settings::load_from(&path)
                }
                None => Settings::load(),
            }
            .context("Failed to load configuration")?;
            logging::init_from_config(&settings);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start the async runtime")?;
            let result = runtime.block_on(session(settings));
            // A pending stdin read must not hold up exit.
            runtime.shutdown_timeout(Duration::from_secs(1));
            result
        }
    }
}

async fn session(settings: Settings) -> Result<()> {
    let mut coordinator = Coordinator::from_settings(&settings)
        .await
        .context("Failed to set up the session")?;
    info!(title = coordinator.title(), "Session ready");

    if let Err(e) = coordinator.start().await {
        if let Err(quit_err) = coordinator.quit().await {
            error!("Shutdown after failed start: {quit_err}");
        }
        return Err(e).context("Failed to start the measurement");
    }

    let input = BufReader::new(tokio::io::stdin());
    if let Err(e) = shell::run(&mut coordinator, input, tokio::io::stdout()).await {
        error!("Prompt failed: {e}");
        if let Err(quit_err) = coordinator.quit().await {
            error!("Shutdown failed: {quit_err}");
        }
    }
    Ok(())
}
