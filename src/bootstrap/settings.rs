use std::{
    collections::HashSet,
    fmt, fs, io,
    num::{NonZeroU32, NonZeroUsize},
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::external::ServerSpec;
use crate::models::{build_download_plan, DownloadPlan, RetryPolicy};

const MANIFEST_FILE: &str = "manifest.json";
const PLUGIN_DIR: &str = "custom_nodes";

pub const CONFIG_ENV: &str = "BOOTSTRAP_CONFIG";
const MAX_JOBS_ENV: &str = "BOOTSTRAP_MAX_JOBS";
const MAX_RETRIES_ENV: &str = "BOOTSTRAP_MAX_RETRIES";
const BASE_SLEEP_ENV: &str = "BOOTSTRAP_BASE_SLEEP_SECS";
const FETCH_CLIENT_TIMEOUT_ENV: &str = "BOOTSTRAP_FETCH_CLIENT_TIMEOUT_SECS";
const TASK_TIMEOUT_ENV: &str = "BOOTSTRAP_TASK_TIMEOUT_SECS";
const WORKSPACE_ENV: &str = "BOOTSTRAP_WORKSPACE";
const TOKEN_ENVS: [&str; 2] = ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"];

static PLUGIN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^/:]+?)(?:\.git)?/*$").expect("plugin name pattern is valid"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory could be determined; set BOOTSTRAP_CONFIG")]
    NoConfigDir,
    #[error("failed reading manifest {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("manifest {path:?} could not be parsed")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{name}={value:?} is not a valid number")]
    InvalidOverride { name: &'static str, value: String },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("cannot derive a plugin name from {0:?}; set `name`")]
    UnnamedPlugin(String),
    #[error("plugin {0:?} is listed more than once")]
    DuplicatePlugin(String),
    #[error("download {0:?} is listed more than once")]
    DuplicateDownload(String),
}

/// On-disk description of what to bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Manifest {
    pub workspace: PathBuf,
    pub repository: RepositoryEntry,
    pub plugins: Vec<PluginEntry>,
    pub packages: Vec<String>,
    pub downloads: Vec<DownloadEntry>,
    pub server: ServerEntry,
    pub tools: ToolsEntry,
    pub limits: LimitsEntry,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            repository: RepositoryEntry::default(),
            plugins: Vec::new(),
            packages: Vec::new(),
            downloads: Vec::new(),
            server: ServerEntry::default(),
            tools: ToolsEntry::default(),
            limits: LimitsEntry::default(),
        }
    }
}

impl Manifest {
    /// Used when no manifest file exists: the server, two common plugins and one checkpoint.
    pub fn builtin() -> Self {
        Self {
            plugins: vec![
                PluginEntry::from_url("https://github.com/ltdrdata/ComfyUI-Manager.git"),
                PluginEntry::from_url(
                    "https://github.com/Kosinkadink/ComfyUI-VideoHelperSuite.git",
                ),
            ],
            downloads: vec![DownloadEntry {
                repo: "Comfy-Org/stable-diffusion-v1-5-archive".into(),
                file: "v1-5-pruned-emaonly-fp16.safetensors".into(),
                destination: PathBuf::from("models/checkpoints"),
                revision: None,
                sha256: None,
                gated: false,
            }],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RepositoryEntry {
    pub url: String,
    pub dir: PathBuf,
}

impl Default for RepositoryEntry {
    fn default() -> Self {
        Self {
            url: "https://github.com/comfyanonymous/ComfyUI.git".into(),
            dir: PathBuf::from("ComfyUI"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntry {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

impl PluginEntry {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            reference: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEntry {
    pub repo: String,
    pub file: String,
    pub destination: PathBuf,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Needs an authenticated hub session.
    #[serde(default)]
    pub gated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerEntry {
    pub entry_point: PathBuf,
    pub listen: String,
    pub port: u16,
    pub flags: Vec<String>,
}

impl Default for ServerEntry {
    fn default() -> Self {
        Self {
            entry_point: PathBuf::from("main.py"),
            listen: "0.0.0.0".into(),
            port: 8188,
            flags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FetchBackend {
    #[default]
    Cli,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsEntry {
    pub git: String,
    pub python: String,
    pub fetch_client: String,
    pub fetch_client_package: String,
    pub fetch_backend: FetchBackend,
    pub hub_endpoint: String,
}

impl Default for ToolsEntry {
    fn default() -> Self {
        Self {
            git: "git".into(),
            python: "python3".into(),
            fetch_client: "huggingface-cli".into(),
            fetch_client_package: "huggingface_hub[cli]".into(),
            fetch_backend: FetchBackend::Cli,
            hub_endpoint: "https://huggingface.co".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitsEntry {
    pub max_jobs: usize,
    pub max_retries: u32,
    pub base_sleep_seconds: u64,
    pub fetch_client_ready_timeout_seconds: u64,
    /// `0` disables the per-task timeout.
    pub task_timeout_seconds: u64,
}

impl Default for LimitsEntry {
    fn default() -> Self {
        Self {
            max_jobs: 4,
            max_retries: 3,
            base_sleep_seconds: 2,
            fetch_client_ready_timeout_seconds: 30,
            task_timeout_seconds: 3600,
        }
    }
}

/// Validated limits. A zero job or attempt count cannot get past [`Config`] construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_jobs: NonZeroUsize,
    pub retry: RetryPolicy,
    pub fetch_client_ready_timeout: Duration,
    pub task_timeout: Option<Duration>,
}

/// Hub credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// A plugin with its name and checkout directory worked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub name: String,
    pub url: String,
    pub reference: Option<String>,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub manifest: Manifest,
    pub limits: Limits,
    pub token: Option<Token>,
    /// Manifest file the configuration came from; `None` for the built-in default.
    pub source: Option<PathBuf>,
    plugins: Vec<Plugin>,
}

impl Config {
    /// Validates `manifest` after applying overrides looked up through `env`.
    pub fn from_manifest_with(
        mut manifest: Manifest,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        apply_overrides(&mut manifest, env)?;

        let limits = &manifest.limits;
        let max_jobs = NonZeroUsize::new(limits.max_jobs).ok_or(ConfigError::Zero("maxJobs"))?;
        let max_retries =
            NonZeroU32::new(limits.max_retries).ok_or(ConfigError::Zero("maxRetries"))?;
        let limits = Limits {
            max_jobs,
            retry: RetryPolicy::new(max_retries, Duration::from_secs(limits.base_sleep_seconds)),
            fetch_client_ready_timeout: Duration::from_secs(
                limits.fetch_client_ready_timeout_seconds,
            ),
            task_timeout: (limits.task_timeout_seconds > 0)
                .then(|| Duration::from_secs(limits.task_timeout_seconds)),
        };

        let repo_dir = manifest.workspace.join(&manifest.repository.dir);
        let plugins = resolve_plugins(&manifest.plugins, &repo_dir.join(PLUGIN_DIR))?;
        check_downloads(&manifest.downloads, &repo_dir)?;

        let token = TOKEN_ENVS
            .iter()
            .filter_map(|name| env(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .map(Token);

        Ok(Self {
            manifest,
            limits,
            token,
            source: None,
            plugins,
        })
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.manifest.workspace.join(&self.manifest.repository.dir)
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Download plans with their `gated` flag. Relative destinations live under the repository.
    pub fn download_plans(&self) -> Vec<(DownloadPlan, bool)> {
        let root = self.repo_dir();
        self.manifest
            .downloads
            .iter()
            .map(|entry| (build_download_plan(entry, &root), entry.gated))
            .collect()
    }

    pub fn server_spec(&self) -> ServerSpec {
        let repo_dir = self.repo_dir();
        let server = &self.manifest.server;
        ServerSpec {
            entry_point: repo_dir.join(&server.entry_point),
            working_dir: repo_dir,
            listen: server.listen.clone(),
            port: server.port,
            flags: server.flags.clone(),
        }
    }
}

/// Loads the manifest from `$BOOTSTRAP_CONFIG` or the user config directory,
/// falling back to [`Manifest::builtin`] when no file exists.
pub fn load() -> Result<Config, ConfigError> {
    let env = |name: &str| std::env::var(name).ok();
    let path = match env(CONFIG_ENV).filter(|value| !value.is_empty()) {
        Some(path) => PathBuf::from(path),
        None => resolve_manifest_path()?,
    };
    let manifest = load_manifest(&path)?;
    let found = manifest.is_some();
    let mut config = Config::from_manifest_with(manifest.unwrap_or_else(Manifest::builtin), &env)?;
    if found {
        config.source = Some(path);
    }
    Ok(config)
}

fn resolve_manifest_path() -> Result<PathBuf, ConfigError> {
    let project_dirs =
        ProjectDirs::from("com", "GenBootstrap", "gen-bootstrap").ok_or(ConfigError::NoConfigDir)?;
    Ok(project_dirs.config_dir().join(MANIFEST_FILE))
}

fn load_manifest(path: &Path) -> Result<Option<Manifest>, ConfigError> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "no manifest found; using the built-in default"
        );
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "manifest loaded");
    Ok(Some(manifest))
}

fn apply_overrides(
    manifest: &mut Manifest,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let limits = &mut manifest.limits;
    if let Some(value) = parse_override(env, MAX_JOBS_ENV)? {
        limits.max_jobs = value;
    }
    if let Some(value) = parse_override(env, MAX_RETRIES_ENV)? {
        limits.max_retries = value;
    }
    if let Some(value) = parse_override(env, BASE_SLEEP_ENV)? {
        limits.base_sleep_seconds = value;
    }
    if let Some(value) = parse_override(env, FETCH_CLIENT_TIMEOUT_ENV)? {
        limits.fetch_client_ready_timeout_seconds = value;
    }
    if let Some(value) = parse_override(env, TASK_TIMEOUT_ENV)? {
        limits.task_timeout_seconds = value;
    }
    if let Some(workspace) = env(WORKSPACE_ENV).filter(|value| !value.is_empty()) {
        manifest.workspace = PathBuf::from(workspace);
    }
    Ok(())
}

fn parse_override<T: std::str::FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = env(name) else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidOverride {
            name,
            value: raw.clone(),
        })
}

/// `https://github.com/org/Some-Plugin.git` -> `Some-Plugin`
pub fn plugin_name(url: &str) -> Option<String> {
    PLUGIN_NAME_RE
        .captures(url.trim())
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .filter(|name| !name.is_empty())
}

fn resolve_plugins(
    entries: &[PluginEntry],
    plugin_root: &Path,
) -> Result<Vec<Plugin>, ConfigError> {
    let mut seen = HashSet::new();
    let mut plugins = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = match &entry.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => plugin_name(&entry.url)
                .ok_or_else(|| ConfigError::UnnamedPlugin(entry.url.clone()))?,
        };
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicatePlugin(name));
        }
        plugins.push(Plugin {
            dir: plugin_root.join(&name),
            name,
            url: entry.url.clone(),
            reference: entry.reference.clone(),
        });
    }
    Ok(plugins)
}

fn check_downloads(entries: &[DownloadEntry], root: &Path) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for entry in entries {
        let id = build_download_plan(entry, root).task_id();
        if !seen.insert(id.clone()) {
            return Err(ConfigError::DuplicateDownload(id));
        }
    }
    Ok(())
}
