use std::sync::Arc;

use tracing::{debug, info};

use crate::models::{DownloadPlan, RetryingFetcher};
use crate::tasks::{Task, TaskKind};

use super::{Gate, Phase, PhaseContext, PhaseReport, PhaseRun};

fn download_task(fetcher: Arc<RetryingFetcher>, plan: DownloadPlan) -> Task {
    Task::new(plan.task_id(), TaskKind::Download, move || {
        let elapsed = fetcher.fetch(&plan)?;
        Ok(format!(
            "{} in {:.1}s",
            plan.target_path().display(),
            elapsed.as_secs_f64()
        ))
    })
}

/// Waits (bounded) for the fetch client, logs in when a token is present, then
/// fetches every configured asset through the retrying fetcher.
pub fn run(ctx: &PhaseContext<'_>, fetch_ready: Gate) -> PhaseReport {
    let mut run = PhaseRun::new(Phase::Download);
    run.start();

    let timeout = ctx.config.limits.fetch_client_ready_timeout;
    if !fetch_ready.wait(Some(timeout)) {
        run.note(format!(
            "fetch client not ready after {}s; downloading anyway",
            timeout.as_secs()
        ));
    }

    let client = ctx.tools.fetch.clone();
    let authenticated = match &ctx.config.token {
        Some(token) => match client.login(token.expose()) {
            Ok(()) => {
                info!("authenticated with the model hub");
                true
            }
            Err(error) => {
                run.note(format!(
                    "hub login failed, continuing with public assets only: {error:#}"
                ));
                false
            }
        },
        None => {
            debug!("no hub token set");
            false
        }
    };

    let fetcher = Arc::new(
        RetryingFetcher::new(client, ctx.config.limits.retry)
            .with_sleeper(ctx.sleeper.clone())
            .with_cancel(ctx.cancel.clone()),
    );
    let mut tasks = Vec::new();
    for (plan, gated) in ctx.config.download_plans() {
        if gated && !authenticated {
            run.note(format!(
                "skipping gated {}: no authenticated hub session",
                plan.source_id()
            ));
            continue;
        }
        tasks.push(download_task(fetcher.clone(), plan));
    }
    run.finish(ctx.pool().run(tasks))
}
