use std::process::ExitCode;

use anyhow::Context;
use gen_bootstrap::bootstrap::{self, Coordinator, ExitOutcome};
use gen_bootstrap::external::Collaborators;
use gen_bootstrap::tasks::CancelFlag;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "BOOTSTRAP_LOG";
const EXIT_CONFIG_INVALID: u8 = 78;
const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: i32 = 130;

fn setup_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// First Ctrl-C cancels running work; a second one exits immediately.
async fn watch_interrupt(cancel: CancelFlag) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("interrupt received; stopping running tasks");
    cancel.cancel();
    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(EXIT_INTERRUPTED);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let config = match bootstrap::load_config() {
        Ok(config) => config,
        Err(error) => {
            error!("invalid configuration: {:#}", anyhow::Error::from(error));
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    let cancel = CancelFlag::new();
    tokio::spawn(watch_interrupt(cancel.clone()));

    // Subprocess waits and the blocking HTTP client stay off the async workers.
    let run = tokio::task::spawn_blocking(move || -> anyhow::Result<ExitOutcome> {
        let tools = Collaborators::system(&config, &cancel).context("set up external tools")?;
        Ok(Coordinator::new(config, tools)
            .with_cancel(cancel)
            .orchestrate())
    });

    match run.await {
        Ok(Ok(outcome)) => ExitCode::from(outcome.exit_code()),
        Ok(Err(error)) => {
            error!("{error:#}");
            ExitCode::from(EXIT_FAILURE)
        }
        Err(error) => {
            error!("orchestration stopped unexpectedly: {error}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
