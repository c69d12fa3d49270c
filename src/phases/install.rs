use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::external::PackageInstaller;
use crate::tasks::{Task, TaskKind};

use super::{Gate, GateOpener, Phase, PhaseContext, PhaseReport, PhaseRun};

const REQUIREMENTS_FILE: &str = "requirements.txt";

fn requirements_task(installer: Arc<dyn PackageInstaller>, path: PathBuf) -> Task {
    Task::new(
        format!("requirements {}", path.display()),
        TaskKind::Install,
        move || {
            installer.install_requirements(&path)?;
            Ok(format!("installed from {}", path.display()))
        },
    )
}

fn packages_task(installer: Arc<dyn PackageInstaller>, packages: Vec<String>) -> Task {
    Task::new(
        format!("packages {}", packages.join(" ")),
        TaskKind::Install,
        move || {
            installer.install_packages(&packages)?;
            Ok(format!("installed {}", packages.join(", ")))
        },
    )
}

/// Installs the fetch client (opening `fetch_ready`), then, once `sources_ready`
/// opens, the server's base dependencies followed by each plugin's.
pub fn run(ctx: &PhaseContext<'_>, sources_ready: Gate, fetch_ready: GateOpener) -> PhaseReport {
    let mut run = PhaseRun::new(Phase::Install);
    run.start();
    let pool = ctx.pool();
    let installer = ctx.tools.installer.clone();
    let tools = &ctx.config.manifest.tools;

    if ctx.tools.fetch.is_available() {
        info!(client = %tools.fetch_client, "fetch client already installed");
    } else {
        run.absorb(pool.run(vec![packages_task(
            installer.clone(),
            vec![tools.fetch_client_package.clone()],
        )]));
    }
    fetch_ready.open();

    // Requirement files live inside the checkouts.
    sources_ready.wait(None);

    let mut base = Vec::new();
    let repo_requirements = ctx.config.repo_dir().join(REQUIREMENTS_FILE);
    if repo_requirements.is_file() {
        base.push(requirements_task(installer.clone(), repo_requirements));
    } else {
        run.note(format!(
            "no {} found; skipping base dependency install",
            repo_requirements.display()
        ));
    }
    if !ctx.config.manifest.packages.is_empty() {
        base.push(packages_task(
            installer.clone(),
            ctx.config.manifest.packages.clone(),
        ));
    }
    run.absorb(pool.run(base));

    let mut plugins = Vec::new();
    for plugin in ctx.config.plugins() {
        let requirements = plugin.dir.join(REQUIREMENTS_FILE);
        if requirements.is_file() {
            plugins.push(requirements_task(installer.clone(), requirements));
        } else if plugin.dir.is_dir() {
            run.note(format!("plugin {} has no {REQUIREMENTS_FILE}", plugin.name));
        } else {
            run.note(format!(
                "plugin {} is not checked out; skipping its dependencies",
                plugin.name
            ));
        }
    }
    run.finish(pool.run(plugins))
}
