//! In-memory collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::models::DownloadPlan;

use super::{FetchClient, PackageInstaller, ServerLauncher, ServerProcess, ServerSpec, VcsClient};

/// Fetch client whose per-repo results are scripted up front. Unscripted repos succeed.
pub struct ScriptedFetchClient {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    calls: Mutex<HashMap<String, usize>>,
    available: AtomicBool,
    wipe_on_failure: AtomicBool,
    missing_destination: AtomicUsize,
    unavailable_downloads: AtomicUsize,
    reject_login: AtomicBool,
    logins: Mutex<Vec<String>>,
}

impl ScriptedFetchClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            wipe_on_failure: AtomicBool::new(false),
            missing_destination: AtomicUsize::new(0),
            unavailable_downloads: AtomicUsize::new(0),
            reject_login: AtomicBool::new(false),
            logins: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, repo: &str, results: Vec<bool>) {
        self.scripts.lock().insert(repo.to_string(), results.into());
    }

    pub fn calls_for(&self, repo: &str) -> usize {
        self.calls.lock().get(repo).copied().unwrap_or(0)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn wipe_destination_on_failure(&self) {
        self.wipe_on_failure.store(true, Ordering::SeqCst);
    }

    pub fn missing_destination_calls(&self) -> usize {
        self.missing_destination.load(Ordering::SeqCst)
    }

    pub fn downloads_while_unavailable(&self) -> usize {
        self.unavailable_downloads.load(Ordering::SeqCst)
    }

    pub fn reject_login(&self) {
        self.reject_login.store(true, Ordering::SeqCst);
    }

    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().clone()
    }
}

impl FetchClient for ScriptedFetchClient {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn login(&self, token: &str) -> Result<()> {
        self.logins.lock().push(token.to_string());
        if self.reject_login.load(Ordering::SeqCst) {
            return Err(anyhow!("invalid token"));
        }
        Ok(())
    }

    fn download(&self, plan: &DownloadPlan) -> Result<()> {
        *self.calls.lock().entry(plan.repo.clone()).or_insert(0) += 1;
        if !plan.destination.is_dir() {
            self.missing_destination.fetch_add(1, Ordering::SeqCst);
        }
        if !self.is_available() {
            self.unavailable_downloads.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("fetch client not installed"));
        }

        let succeed = self
            .scripts
            .lock()
            .get_mut(&plan.repo)
            .and_then(VecDeque::pop_front)
            .unwrap_or(true);
        if succeed {
            fs::write(plan.target_path(), b"weights")?;
            Ok(())
        } else {
            if self.wipe_on_failure.load(Ordering::SeqCst) {
                let _ = fs::remove_dir_all(&plan.destination);
            }
            Err(anyhow!("scripted failure for {}", plan.repo))
        }
    }
}

/// Records every call; clones create `<dest>/.git` so later steps see a checkout.
#[derive(Default)]
pub struct RecordingVcs {
    calls: Mutex<Vec<String>>,
    fail_url: Option<String>,
}

impl RecordingVcs {
    pub fn failing_on(url: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_url: Some(url.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl VcsClient for RecordingVcs {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        self.calls.lock().push(format!("clone {}", dest.display()));
        if self.fail_url.as_deref() == Some(url) {
            return Err(anyhow!("could not read from remote {url}"));
        }
        fs::create_dir_all(dest.join(".git"))?;
        Ok(())
    }

    fn update(&self, dest: &Path) -> Result<()> {
        self.calls.lock().push(format!("update {}", dest.display()));
        Ok(())
    }

    fn checkout(&self, dest: &Path, reference: &str) -> Result<()> {
        self.calls
            .lock()
            .push(format!("checkout {} {reference}", dest.display()));
        Ok(())
    }
}

/// Records installs. Can fail every requirements file, and can make a
/// [`ScriptedFetchClient`] available when its package gets installed.
#[derive(Default)]
pub struct RecordingInstaller {
    calls: Mutex<Vec<String>>,
    fail_requirements: AtomicBool,
    provides_client: Option<(Arc<ScriptedFetchClient>, Duration)>,
}

impl RecordingInstaller {
    pub fn failing_requirements() -> Self {
        Self {
            fail_requirements: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Installing packages takes `delay`, then marks `client` available.
    #[must_use]
    pub fn provides(mut self, client: Arc<ScriptedFetchClient>, delay: Duration) -> Self {
        self.provides_client = Some((client, delay));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl PackageInstaller for RecordingInstaller {
    fn install_requirements(&self, requirements: &Path) -> Result<()> {
        self.calls
            .lock()
            .push(format!("requirements {}", requirements.display()));
        if self.fail_requirements.load(Ordering::SeqCst) {
            return Err(anyhow!("resolution impossible for {}", requirements.display()));
        }
        Ok(())
    }

    fn install_packages(&self, packages: &[String]) -> Result<()> {
        if let Some((client, delay)) = &self.provides_client {
            std::thread::sleep(*delay);
            client.set_available(true);
        }
        self.calls
            .lock()
            .push(format!("packages {}", packages.join(" ")));
        Ok(())
    }
}

type StartHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct FakeServer {
    started: Mutex<Vec<ServerSpec>>,
    exit_code: Option<i32>,
    refuse: bool,
    on_start: Option<StartHook>,
}

impl FakeServer {
    pub fn exiting_with(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Runs `hook` inside every `start` call.
    #[must_use]
    pub fn on_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn started(&self) -> Vec<ServerSpec> {
        self.started.lock().clone()
    }
}

impl ServerLauncher for FakeServer {
    fn start(&self, spec: &ServerSpec) -> Result<Box<dyn ServerProcess>> {
        self.started.lock().push(spec.clone());
        if let Some(hook) = &self.on_start {
            hook();
        }
        if self.refuse {
            return Err(anyhow!("permission denied"));
        }
        Ok(Box::new(FinishedServer(self.exit_code)))
    }
}

struct FinishedServer(Option<i32>);

impl ServerProcess for FinishedServer {
    fn wait(&mut self) -> Result<Option<i32>> {
        Ok(self.0)
    }
}
