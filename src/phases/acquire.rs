use std::path::PathBuf;
use std::sync::Arc;

use crate::external::{clone_or_update, VcsClient};
use crate::tasks::{Task, TaskKind};

use super::{GateOpener, Phase, PhaseContext, PhaseReport, PhaseRun};

fn checkout_task(
    vcs: Arc<dyn VcsClient>,
    url: String,
    dest: PathBuf,
    reference: Option<String>,
) -> Task {
    Task::new(dest.display().to_string(), TaskKind::Clone, move || {
        clone_or_update(vcs.as_ref(), &url, &dest, reference.as_deref())
    })
}

/// Clones or updates the server repository, then every plugin into its
/// `custom_nodes` directory. `sources_ready` opens once all of it is done.
pub fn run(ctx: &PhaseContext<'_>, sources_ready: GateOpener) -> PhaseReport {
    let mut run = PhaseRun::new(Phase::Acquire);
    run.start();
    let pool = ctx.pool();
    let vcs = ctx.tools.vcs.clone();

    // Plugins are cloned inside the server checkout, so it has to exist first.
    let repository = &ctx.config.manifest.repository;
    run.absorb(pool.run(vec![checkout_task(
        vcs.clone(),
        repository.url.clone(),
        ctx.config.repo_dir(),
        None,
    )]));

    let plugins = ctx
        .config
        .plugins()
        .iter()
        .map(|plugin| {
            checkout_task(
                vcs.clone(),
                plugin.url.clone(),
                plugin.dir.clone(),
                plugin.reference.clone(),
            )
        })
        .collect();
    let report = run.finish(pool.run(plugins));

    sources_ready.open();
    report
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use super::*;
    use crate::bootstrap::{Config, Manifest, PluginEntry};
    use crate::external::testing::{
        FakeServer, RecordingInstaller, RecordingVcs, ScriptedFetchClient,
    };
    use crate::external::Collaborators;
    use crate::phases::gate;
    use crate::tasks::{CancelFlag, JobBudget};

    fn config(root: &std::path::Path, plugins: &[&str]) -> Config {
        let mut manifest = Manifest::default();
        manifest.workspace = root.to_path_buf();
        manifest.plugins = plugins.iter().map(|url| PluginEntry::from_url(*url)).collect();
        Config::from_manifest_with(manifest, &|_: &str| None).unwrap()
    }

    fn tools(vcs: Arc<RecordingVcs>) -> Collaborators {
        Collaborators {
            vcs,
            installer: Arc::new(RecordingInstaller::default()),
            fetch: Arc::new(ScriptedFetchClient::new()),
            server: Arc::new(FakeServer::default()),
        }
    }

    fn context<'a>(config: &'a Config, tools: &'a Collaborators) -> PhaseContext<'a> {
        PhaseContext {
            config,
            tools,
            budget: JobBudget::new(NonZeroUsize::new(2).unwrap()),
            cancel: CancelFlag::new(),
            sleeper: Arc::new(|_: Duration| {}),
        }
    }

    #[test]
    fn clones_repository_before_plugins_and_opens_the_gate() {
        let root = tempfile::tempdir().unwrap();
        let config = config(
            root.path(),
            &["https://example.com/a/One.git", "https://example.com/b/Two.git"],
        );
        let vcs = Arc::new(RecordingVcs::default());
        let tools = tools(vcs.clone());
        let (opener, sources) = gate("sources");

        let report = run(&context(&config, &tools), opener);

        assert!(sources.is_open());
        assert_eq!(report.outcomes.successes.len(), 3);
        assert!(report.is_clean());
        assert_eq!(vcs.calls()[0], format!("clone {}", config.repo_dir().display()));
        assert!(config.repo_dir().join("custom_nodes/One/.git").is_dir());
    }

    #[test]
    fn failed_plugin_clone_is_recorded_and_others_continue() {
        let root = tempfile::tempdir().unwrap();
        let config = config(
            root.path(),
            &["https://example.com/a/Broken.git", "https://example.com/b/Fine.git"],
        );
        let tools = tools(Arc::new(RecordingVcs::failing_on(
            "https://example.com/a/Broken.git",
        )));
        let (opener, _sources) = gate("sources");

        let report = run(&context(&config, &tools), opener);

        assert_eq!(report.outcomes.failures.len(), 1);
        assert_eq!(report.outcomes.successes.len(), 2);
        let failure = &report.outcomes.failures[0];
        assert!(failure.task_id.as_str().ends_with("Broken"));
        assert!(failure.detail.contains("Broken.git"));
    }

    #[test]
    fn existing_checkout_is_updated() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path(), &[]);
        fs::create_dir_all(config.repo_dir().join(".git")).unwrap();
        let tools = tools(Arc::new(RecordingVcs::default()));
        let (opener, _sources) = gate("sources");

        let report = run(&context(&config, &tools), opener);

        assert!(report.outcomes.successes[0].detail.starts_with("updated"));
    }
}
