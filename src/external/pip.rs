use std::path::Path;
use std::process::Command;

use anyhow::Result;

use super::process::ProcessRunner;

pub trait PackageInstaller: Send + Sync {
    fn install_requirements(&self, requirements: &Path) -> Result<()>;

    fn install_packages(&self, packages: &[String]) -> Result<()>;
}

/// `python -m pip install ...`
#[derive(Debug, Clone)]
pub struct PipInstaller {
    python: String,
    runner: ProcessRunner,
}

impl PipInstaller {
    pub fn new(python: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            python: python.into(),
            runner,
        }
    }

    fn pip(&self) -> Command {
        let mut command = Command::new(&self.python);
        command.args([
            "-m",
            "pip",
            "install",
            "--no-input",
            "--disable-pip-version-check",
        ]);
        command
    }
}

impl PackageInstaller for PipInstaller {
    fn install_requirements(&self, requirements: &Path) -> Result<()> {
        let mut command = self.pip();
        command.arg("-r").arg(requirements);
        self.runner
            .run(
                &mut command,
                &format!("pip install -r {}", requirements.display()),
            )
            .map(|_| ())
    }

    fn install_packages(&self, packages: &[String]) -> Result<()> {
        let mut command = self.pip();
        command.args(packages);
        self.runner
            .run(&mut command, &format!("pip install {}", packages.join(" ")))
            .map(|_| ())
    }
}
