use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bootstrap::DownloadEntry;

const DEFAULT_REVISION: &str = "main";

/// One model asset to fetch: `file` from hub repository `repo`, placed under `destination`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPlan {
    pub repo: String,
    pub file: String,
    pub revision: Option<String>,
    pub destination: PathBuf,
    pub sha256: Option<String>,
}

impl DownloadPlan {
    /// `repo/file`, the name the hub knows the asset by.
    #[must_use]
    pub fn source_id(&self) -> String {
        format!("{}/{}", self.repo, self.file)
    }

    #[must_use]
    pub fn task_id(&self) -> String {
        format!("{}:{} -> {}", self.repo, self.file, self.destination.display())
    }

    /// Where the fetched file lands. Hub files may live in subfolders, which are kept.
    #[must_use]
    pub fn target_path(&self) -> PathBuf {
        self.destination.join(&self.file)
    }

    #[must_use]
    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or(DEFAULT_REVISION)
    }

    #[must_use]
    pub fn resolve_uri(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            endpoint.trim_end_matches('/'),
            self.repo,
            self.revision(),
            self.file
        )
    }

    /// Creates the destination (and any subfolder of the target). Safe to repeat.
    pub fn prepare_destination(&self) -> Result<()> {
        let target = self.target_path();
        let dir = target.parent().unwrap_or(&self.destination);
        fs::create_dir_all(dir)
            .with_context(|| format!("create destination directory {}", dir.display()))
    }
}

/// Builds the plan for a configured entry. Relative destinations resolve against `root`.
pub fn plan_for(entry: &DownloadEntry, root: &Path) -> DownloadPlan {
    let destination = if entry.destination.is_absolute() {
        entry.destination.clone()
    } else {
        root.join(&entry.destination)
    };
    DownloadPlan {
        repo: entry.repo.clone(),
        file: entry.file.clone(),
        revision: entry.revision.clone(),
        destination,
        sha256: entry.sha256.as_ref().map(|sum| sum.to_ascii_lowercase()),
    }
}
