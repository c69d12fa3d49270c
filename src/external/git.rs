//! Version-control client.
//!
//! [`VcsClient`] is the seam the acquisition phase talks to; [`GitCli`] is the
//! production implementation that shells out to `git`.

use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

use super::process::ProcessRunner;

pub trait VcsClient: Send + Sync {
    /// `git clone <url> <dest>`.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    /// Fast-forwards an existing checkout from its upstream.
    fn update(&self, dest: &Path) -> Result<()>;

    /// Checks out a branch, tag or commit in an existing checkout.
    fn checkout(&self, dest: &Path, reference: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    runner: ProcessRunner,
}

impl GitCli {
    pub fn new(program: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }
}

impl VcsClient for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(["clone", "--recurse-submodules", url])
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0");
        self.runner
            .run(&mut command, &format!("git clone {url}"))
            .map(|_| ())
    }

    fn update(&self, dest: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .arg("-C")
            .arg(dest)
            .args(["pull", "--ff-only"])
            .env("GIT_TERMINAL_PROMPT", "0");
        self.runner
            .run(&mut command, &format!("git pull in {}", dest.display()))
            .map(|_| ())
    }

    fn checkout(&self, dest: &Path, reference: &str) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.arg("-C").arg(dest).args(["checkout", reference]);
        self.runner
            .run(&mut command, &format!("git checkout {reference}"))
            .map(|_| ())
    }
}

pub fn is_checkout(dest: &Path) -> bool {
    dest.join(".git").exists()
}

/// Clones `url` into `dest`, or updates the checkout already there.
///
/// Returns a short description of what happened for the outcome record.
pub fn clone_or_update(
    vcs: &dyn VcsClient,
    url: &str,
    dest: &Path,
    reference: Option<&str>,
) -> Result<String> {
    let mut detail = if is_checkout(dest) {
        vcs.update(dest)?;
        format!("updated {}", dest.display())
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create parent directory {}", parent.display()))?;
        }
        vcs.clone_repo(url, dest)?;
        format!("cloned into {}", dest.display())
    };

    if let Some(reference) = reference {
        vcs.checkout(dest, reference)?;
        detail.push_str(&format!(" at {reference}"));
    }
    Ok(detail)
}
