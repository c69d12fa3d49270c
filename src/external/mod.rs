mod git;
mod hub;
mod pip;
mod process;
mod server;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::Result;

use crate::bootstrap::{Config, FetchBackend};
use crate::tasks::CancelFlag;

pub use git::{clone_or_update, is_checkout, GitCli, VcsClient};
pub use hub::{FetchClient, HubCli, HubHttp};
pub use pip::{PackageInstaller, PipInstaller};
pub use process::{locate, ProcessRunner};
pub use server::{PythonServer, ServerLauncher, ServerProcess, ServerSpec};

/// The external tools an orchestration run drives.
#[derive(Clone)]
pub struct Collaborators {
    pub vcs: Arc<dyn VcsClient>,
    pub installer: Arc<dyn PackageInstaller>,
    pub fetch: Arc<dyn FetchClient>,
    pub server: Arc<dyn ServerLauncher>,
}

impl Collaborators {
    /// Real subprocess-backed tools, every one bounded by the task timeout.
    pub fn system(config: &Config, cancel: &CancelFlag) -> Result<Self> {
        let tools = &config.manifest.tools;
        let runner = ProcessRunner::new(config.limits.task_timeout, cancel.clone());

        let fetch: Arc<dyn FetchClient> = match tools.fetch_backend {
            FetchBackend::Cli => Arc::new(HubCli::new(&tools.fetch_client, runner.clone())),
            FetchBackend::Http => Arc::new(HubHttp::new(
                &tools.hub_endpoint,
                config.limits.task_timeout,
                cancel.clone(),
            )?),
        };

        Ok(Self {
            vcs: Arc::new(GitCli::new(&tools.git, runner.clone())),
            installer: Arc::new(PipInstaller::new(&tools.python, runner.clone())),
            fetch,
            server: Arc::new(PythonServer::new(&tools.python, runner)),
        })
    }
}
