use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn, Span};

use super::cancel::CancelFlag;
use super::outcome::{OutcomeLog, OutcomeRecord, PoolReport};
use super::task::Task;

/// Counting semaphore bounding how many tasks run at once.
///
/// Permits are tokens in a bounded channel: acquiring takes one out, dropping the
/// [`Permit`] puts it back. Clones share the same permits, so a single budget
/// handed to several pools bounds them together.
#[derive(Debug, Clone)]
pub struct JobBudget {
    limit: NonZeroUsize,
    release: Sender<()>,
    take: Receiver<()>,
}

impl JobBudget {
    pub fn new(limit: NonZeroUsize) -> Self {
        let (release, take) = bounded(limit.get());
        for _ in 0..limit.get() {
            let _ = release.try_send(());
        }
        Self {
            limit,
            release,
            take,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    pub fn in_use(&self) -> usize {
        self.limit.get() - self.take.len()
    }

    /// Blocks until a permit is free.
    pub fn acquire(&self) -> Permit<'_> {
        // Both channel ends live in `self`, so `recv` cannot observe a disconnect.
        let _ = self.take.recv();
        Permit { budget: self }
    }
}

pub struct Permit<'a> {
    budget: &'a JobBudget,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.budget.release.try_send(());
    }
}

/// Runs independent tasks on a fixed set of workers fed from a FIFO queue.
///
/// Tasks start in submission order; completion order is whatever the tasks make
/// it. A failed or panicking task is recorded and never stops the others.
#[derive(Debug, Clone)]
pub struct TaskPool {
    budget: JobBudget,
    cancel: CancelFlag,
}

impl TaskPool {
    pub fn new(max_jobs: NonZeroUsize) -> Self {
        Self::with_budget(JobBudget::new(max_jobs))
    }

    pub fn with_budget(budget: JobBudget) -> Self {
        Self {
            budget,
            cancel: CancelFlag::new(),
        }
    }

    #[must_use]
    pub fn cancel_on(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_jobs(&self) -> usize {
        self.budget.limit()
    }

    /// Runs every task to a terminal state and returns their outcomes.
    pub fn run(&self, tasks: Vec<Task>) -> PoolReport {
        if tasks.is_empty() {
            return PoolReport::default();
        }

        let workers = self.budget.limit().min(tasks.len());
        let (sender, receiver) = unbounded();
        for task in tasks {
            let _ = sender.send(task);
        }
        drop(sender);

        let log = OutcomeLog::default();
        let span = Span::current();
        thread::scope(|scope| {
            for _ in 0..workers {
                let receiver = receiver.clone();
                let log = &log;
                let span = span.clone();
                scope.spawn(move || {
                    let _entered = span.enter();
                    self.worker_loop(receiver, log)
                });
            }
        });

        log.snapshot()
    }

    fn worker_loop(&self, receiver: Receiver<Task>, log: &OutcomeLog) {
        for task in receiver.iter() {
            let (id, kind, operation) = task.into_parts();
            let _permit = self.budget.acquire();

            if self.cancel.is_cancelled() {
                debug!(task = %id, "skipping task after interrupt");
                log.record(OutcomeRecord::fail(id, kind, "cancelled before start"));
                continue;
            }

            debug!(task = %id, "task started");
            let started = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(operation));
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(detail)) => {
                    info!(task = %id, elapsed_ms, "task succeeded");
                    log.record(OutcomeRecord::ok(id, kind, detail));
                }
                Ok(Err(error)) => {
                    warn!(task = %id, elapsed_ms, "task failed: {error:#}");
                    log.record(OutcomeRecord::fail(id, kind, format!("{error:#}")));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task = %id, elapsed_ms, "task panicked: {message}");
                    log.record(OutcomeRecord::fail(
                        id,
                        kind,
                        format!("task panicked: {message}"),
                    ));
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
