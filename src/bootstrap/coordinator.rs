use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

use crate::external::Collaborators;
use crate::models::Sleeper;
use crate::output::{report_phases, Summary};
use crate::phases::{self, gate, Phase, PhaseContext, PhaseReport};
use crate::tasks::{CancelFlag, JobBudget};

use super::settings::Config;

/// How an orchestration run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The server ran and exited, with its exit code when it had one.
    ServerExited(Option<i32>),
    ServerMissing(PathBuf),
    ServerFailed(String),
    Interrupted,
}

impl ExitOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitOutcome::ServerExited(Some(code)) => u8::try_from(*code).unwrap_or(1),
            ExitOutcome::ServerExited(None) => 0,
            ExitOutcome::ServerMissing(_) => 2,
            ExitOutcome::ServerFailed(_) => 1,
            ExitOutcome::Interrupted => 130,
        }
    }
}

/// Runs the three phases side by side under one job budget, reports, then starts the server.
pub struct Coordinator {
    config: Config,
    tools: Collaborators,
    cancel: CancelFlag,
    sleeper: Sleeper,
    out: Mutex<Box<dyn Write + Send>>,
}

impl Coordinator {
    pub fn new(config: Config, tools: Collaborators) -> Self {
        let cancel = CancelFlag::new();
        Self {
            config,
            tools,
            sleeper: interruptible_sleeper(&cancel),
            cancel,
            out: Mutex::new(Box::new(io::stdout())),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.sleeper = interruptible_sleeper(&cancel);
        self.cancel = cancel;
        self
    }

    /// Where the summary is written. Defaults to stdout.
    #[must_use]
    pub fn with_output(mut self, out: impl Write + Send + 'static) -> Self {
        self.out = Mutex::new(Box::new(out));
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs Acquire, Install and Download concurrently and waits for all three.
    ///
    /// Install opens the fetch-client gate Download waits on; Acquire opens the
    /// sources gate Install's requirement step waits on. A phase that fails or
    /// panics never stops the others.
    pub fn run_phases(&self) -> Vec<PhaseReport> {
        let ctx = PhaseContext {
            config: &self.config,
            tools: &self.tools,
            budget: JobBudget::new(self.config.limits.max_jobs),
            cancel: self.cancel.clone(),
            sleeper: self.sleeper.clone(),
        };
        let (sources_opener, sources) = gate("sources");
        let (fetch_opener, fetch_ready) = gate("fetch-client");
        let span = Span::current();

        thread::scope(|scope| {
            let acquire = scope.spawn({
                let (ctx, span) = (ctx.clone(), span.clone());
                move || {
                    let _entered =
                        info_span!(parent: &span, "phase", phase = "acquire").entered();
                    phases::acquire::run(&ctx, sources_opener)
                }
            });
            let install = scope.spawn({
                let (ctx, span) = (ctx.clone(), span.clone());
                move || {
                    let _entered =
                        info_span!(parent: &span, "phase", phase = "install").entered();
                    phases::install::run(&ctx, sources, fetch_opener)
                }
            });
            let download = scope.spawn({
                let (ctx, span) = (ctx.clone(), span.clone());
                move || {
                    let _entered =
                        info_span!(parent: &span, "phase", phase = "download").entered();
                    phases::download::run(&ctx, fetch_ready)
                }
            });

            [
                (Phase::Acquire, acquire.join()),
                (Phase::Install, install.join()),
                (Phase::Download, download.join()),
            ]
            .into_iter()
            .map(|(phase, joined)| {
                joined.unwrap_or_else(|_| PhaseReport::crashed(phase, "phase thread panicked"))
            })
            .collect()
        })
    }

    /// Full run: phases, then the summary, then the server.
    ///
    /// The summary is flushed before the server starts, since the server
    /// normally runs until it is killed.
    pub fn orchestrate(&self) -> ExitOutcome {
        let span = info_span!("bootstrap", run = %Uuid::new_v4());
        let _entered = span.enter();
        info!(
            max_jobs = self.config.limits.max_jobs.get(),
            max_attempts = self.config.limits.retry.max_attempts(),
            "bootstrap started"
        );

        let reports = self.run_phases();
        let summary = report_phases(&reports);
        if !summary.is_clean() {
            warn!(
                failures = summary.failure_count(),
                "bootstrap finished with failures; starting the server anyway"
            );
        }
        self.publish(&summary);

        let outcome = self.launch_server();
        if outcome != ExitOutcome::Interrupted {
            info!(code = outcome.exit_code(), "bootstrap finished");
        }
        outcome
    }

    fn publish(&self, summary: &Summary) {
        let mut out = self.out.lock();
        if let Err(error) = write!(out, "{summary}").and_then(|()| out.flush()) {
            warn!("could not write the summary: {error}");
        }
    }

    fn launch_server(&self) -> ExitOutcome {
        if self.cancel.is_cancelled() {
            warn!("interrupted; not starting the server");
            return ExitOutcome::Interrupted;
        }

        let spec = self.config.server_spec();
        if !spec.is_present() {
            error!(entry_point = %spec.entry_point.display(), "server entry point not found");
            return ExitOutcome::ServerMissing(spec.entry_point);
        }

        info!(
            entry_point = %spec.entry_point.display(),
            listen = %spec.listen,
            port = spec.port,
            "starting server"
        );
        let mut server = match self.tools.server.start(&spec) {
            Ok(server) => server,
            Err(error) => {
                error!("server failed to start: {error:#}");
                return ExitOutcome::ServerFailed(format!("{error:#}"));
            }
        };
        match server.wait() {
            Ok(code) => {
                info!(code, "server exited");
                ExitOutcome::ServerExited(code)
            }
            Err(_) if self.cancel.is_cancelled() => ExitOutcome::Interrupted,
            Err(error) => {
                error!("lost track of the server: {error:#}");
                ExitOutcome::ServerFailed(format!("{error:#}"))
            }
        }
    }
}

fn interruptible_sleeper(cancel: &CancelFlag) -> Sleeper {
    let cancel = cancel.clone();
    Arc::new(move |delay: Duration| {
        cancel.sleep(delay);
    })
}
