use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use tracing::debug;

use crate::models::DownloadPlan;
use crate::tasks::CancelFlag;

use super::process::{locate, ProcessRunner};

/// Client for the model hub assets are fetched from.
pub trait FetchClient: Send + Sync {
    fn is_available(&self) -> bool;

    /// Authenticates later downloads with `token`.
    fn login(&self, token: &str) -> Result<()>;

    /// Fetches `plan.file` from `plan.repo` into `plan.destination`.
    fn download(&self, plan: &DownloadPlan) -> Result<()>;
}

/// Environment variable the hub client reads its credential from.
const TOKEN_ENV: &str = "HF_TOKEN";

/// The hub's own command-line client, run as a subprocess.
///
/// The token only ever reaches the child through its environment, never argv.
#[derive(Debug)]
pub struct HubCli {
    program: String,
    runner: ProcessRunner,
    token: Mutex<Option<String>>,
}

impl HubCli {
    pub fn new(program: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            program: program.into(),
            runner,
            token: Mutex::new(None),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(token) = self.token.lock().as_deref() {
            command.env(TOKEN_ENV, token);
        }
        command
    }
}

impl FetchClient for HubCli {
    fn is_available(&self) -> bool {
        locate(&self.program).is_some()
    }

    fn login(&self, token: &str) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.arg("whoami").env(TOKEN_ENV, token);
        let account = self
            .runner
            .run(&mut command, &format!("{} whoami", self.program))
            .context("hub rejected the credential token")?;
        debug!(account = account.lines().next().unwrap_or_default(), "hub token accepted");
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn download(&self, plan: &DownloadPlan) -> Result<()> {
        let mut command = self.command();
        command
            .args(["download", &plan.repo, &plan.file, "--local-dir"])
            .arg(&plan.destination);
        if let Some(revision) = &plan.revision {
            command.args(["--revision", revision]);
        }
        self.runner
            .run(
                &mut command,
                &format!("{} download {} {}", self.program, plan.repo, plan.file),
            )
            .map(|_| ())
    }
}

/// Direct HTTPS downloads from the hub's `resolve` endpoint.
pub struct HubHttp {
    endpoint: String,
    client: Client,
    token: Mutex<Option<String>>,
    cancel: CancelFlag,
}

impl HubHttp {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Option<Duration>,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let mut builder =
            Client::builder().user_agent(concat!("gen-bootstrap/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("create http client")?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            token: Mutex::new(None),
            cancel,
        })
    }
}

impl FetchClient for HubHttp {
    fn is_available(&self) -> bool {
        true
    }

    fn login(&self, token: &str) -> Result<()> {
        let uri = format!("{}/api/whoami-v2", self.endpoint);
        self.client
            .get(&uri)
            .bearer_auth(token)
            .send()
            .with_context(|| format!("request {uri}"))?
            .error_for_status()
            .context("hub rejected the credential token")?;
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn download(&self, plan: &DownloadPlan) -> Result<()> {
        let uri = plan.resolve_uri(&self.endpoint);
        let mut request = self.client.get(&uri);
        if let Some(token) = self.token.lock().clone() {
            request = request.bearer_auth(token);
        }
        let mut response = request
            .send()
            .with_context(|| format!("request {uri}"))?
            .error_for_status()
            .with_context(|| format!("download {uri}"))?;

        let target = plan.target_path();
        let staging = staging_path(&target);
        let written = write_stream(&mut response, &staging, &self.cancel)?;
        fs::rename(&staging, &target)
            .with_context(|| format!("move download into place at {}", target.display()))?;
        debug!(source = %plan.source_id(), bytes = written, "download written");
        Ok(())
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

fn write_stream<R: Read>(reader: &mut R, path: &Path, cancel: &CancelFlag) -> Result<u64> {
    let mut file = File::create(path).context("create staging file")?;
    let mut downloaded = 0u64;
    const CHUNK_SIZE: usize = 64 * 1024;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(anyhow!("download cancelled by interrupt"));
        }
        let read = reader.read(&mut buffer).context("read download chunk")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .context("write download chunk")?;
        downloaded += read as u64;
    }
    file.flush().context("flush staging file")?;
    Ok(downloaded)
}
