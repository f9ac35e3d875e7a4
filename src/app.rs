use std::path::Path;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Overrides};
use crate::error::Result;
use crate::utils::current_human_timestamp;

pub mod controller;
pub mod summary;

pub use controller::{AppController, FetchReport};
pub use summary::{BatchSummary, SummaryRow};

/// One invocation of the tool, already parsed from the command line.
#[derive(Debug, Clone)]
pub enum Command {
    Fetch { overrides: Overrides, archive: bool },
    Probe,
    Archive { timeframe: Option<String> },
}

/// Entry point used by `main`: load settings, run the command, print its outcome.
pub async fn run(config_path: &Path, command: Command) -> Result<()> {
    let overrides = match &command {
        Command::Fetch { overrides, .. } => overrides.clone(),
        Command::Archive { timeframe } => Overrides {
            timeframe: timeframe.clone(),
            ..Overrides::default()
        },
        Command::Probe => Overrides::default(),
    };
    let config = Config::load(config_path)?.apply(overrides).validated()?;
    let controller = AppController::new(config)?;

    match command {
        Command::Fetch { archive, .. } => {
            info!("Run started at {}", current_human_timestamp());
            let cancel = CancellationToken::new();
            let listener = spawn_interrupt_listener(cancel.clone());
            let outcome = controller.fetch(archive, cancel).await;
            listener.abort();

            let report = outcome?;
            println!("{}", report.summary);
            println!("Artifacts written to {}", report.batch_dir.display());
            if let Some(path) = report.archive {
                println!("Archive written to {}", path.display());
            }
        }
        Command::Probe => {
            let policy = controller.probe().await?;
            println!(
                "Request weight limit: {} per {}s (suggested workers: {})",
                policy.request_weight_limit,
                policy.interval_secs(),
                policy.recommended_workers(crate::fetch::KLINE_REQUEST_WEIGHT)
            );
        }
        Command::Archive { .. } => {
            let path = controller.archive()?;
            println!("Archive written to {}", path.display());
        }
    }

    Ok(())
}

fn spawn_interrupt_listener(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling outstanding fetches");
            cancel.cancel();
        }
    })
}
