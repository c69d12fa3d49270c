use std::path::PathBuf;
use std::process::{Child, Command};

use anyhow::{Context, Result};

use super::process::ProcessRunner;

/// How the generation server is started once bootstrapping is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub entry_point: PathBuf,
    pub working_dir: PathBuf,
    pub listen: String,
    pub port: u16,
    pub flags: Vec<String>,
}

impl ServerSpec {
    pub fn is_present(&self) -> bool {
        self.entry_point.is_file()
    }
}

pub trait ServerLauncher: Send + Sync {
    fn start(&self, spec: &ServerSpec) -> Result<Box<dyn ServerProcess>>;
}

/// A started server. `wait` blocks until it exits and returns its exit code.
pub trait ServerProcess: Send {
    fn wait(&mut self) -> Result<Option<i32>>;
}

#[derive(Debug, Clone)]
pub struct PythonServer {
    python: String,
    runner: ProcessRunner,
}

impl PythonServer {
    pub fn new(python: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            python: python.into(),
            runner: runner.without_timeout(),
        }
    }
}

impl ServerLauncher for PythonServer {
    fn start(&self, spec: &ServerSpec) -> Result<Box<dyn ServerProcess>> {
        let child = Command::new(&self.python)
            .arg(&spec.entry_point)
            .args(["--listen", &spec.listen, "--port", &spec.port.to_string()])
            .args(&spec.flags)
            .current_dir(&spec.working_dir)
            .spawn()
            .with_context(|| {
                format!(
                    "failed to start {} {}",
                    self.python,
                    spec.entry_point.display()
                )
            })?;
        Ok(Box::new(RunningServer {
            child,
            runner: self.runner.clone(),
        }))
    }
}

struct RunningServer {
    child: Child,
    runner: ProcessRunner,
}

impl ServerProcess for RunningServer {
    fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.runner.wait(&mut self.child, "server")?;
        Ok(status.code())
    }
}
