use std::fmt;

use anyhow::Result;
use serde::Serialize;

use crate::phases::Phase;

/// Identifier of a task, unique within its phase. Never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Clone,
    Install,
    Download,
}

impl TaskKind {
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            TaskKind::Clone => Phase::Acquire,
            TaskKind::Install => Phase::Install,
            TaskKind::Download => Phase::Download,
        }
    }
}

pub type Operation = Box<dyn FnOnce() -> Result<String> + Send + 'static>;

/// One schedulable unit of work.
///
/// The operation runs exactly once. Downloads carry their retry loop inside the
/// operation (see [`crate::models::RetryingFetcher`]); clones and installs are
/// single-attempt.
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    operation: Operation,
}

impl Task {
    pub fn new<F>(id: impl Into<String>, kind: TaskKind, operation: F) -> Self
    where
        F: FnOnce() -> Result<String> + Send + 'static,
    {
        Self {
            id: TaskId::new(id),
            kind,
            operation: Box::new(operation),
        }
    }

    pub(crate) fn into_parts(self) -> (TaskId, TaskKind, Operation) {
        (self.id, self.kind, self.operation)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
