use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::task::{TaskId, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Ok,
    Fail,
}

/// Final result of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: Status,
    pub detail: String,
}

impl OutcomeRecord {
    pub fn ok(task_id: TaskId, kind: TaskKind, detail: impl Into<String>) -> Self {
        Self {
            task_id,
            kind,
            status: Status::Ok,
            detail: detail.into(),
        }
    }

    pub fn fail(task_id: TaskId, kind: TaskKind, detail: impl Into<String>) -> Self {
        Self {
            task_id,
            kind,
            status: Status::Fail,
            detail: detail.into(),
        }
    }
}

/// Append-only success and failure collections shared by concurrently running workers.
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog {
    successes: Arc<Mutex<Vec<OutcomeRecord>>>,
    failures: Arc<Mutex<Vec<OutcomeRecord>>>,
}

impl OutcomeLog {
    pub fn record(&self, record: OutcomeRecord) {
        match record.status {
            Status::Ok => self.successes.lock().push(record),
            Status::Fail => self.failures.lock().push(record),
        }
    }

    pub fn snapshot(&self) -> PoolReport {
        PoolReport {
            successes: self.successes.lock().clone(),
            failures: self.failures.lock().clone(),
        }
    }
}

/// Outcomes of one pool run, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub successes: Vec<OutcomeRecord>,
    pub failures: Vec<OutcomeRecord>,
}

impl PoolReport {
    pub fn outcome(&self, task_id: &str) -> Option<&OutcomeRecord> {
        self.successes
            .iter()
            .chain(self.failures.iter())
            .find(|record| record.task_id.as_str() == task_id)
    }

    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: PoolReport) {
        self.successes.extend(other.successes);
        self.failures.extend(other.failures);
    }
}
