use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::external::FetchClient;
use crate::tasks::CancelFlag;

use super::download::DownloadPlan;
use super::metadata::verify_sha256;

pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

pub const DEFAULT_MAX_ATTEMPTS: NonZeroU32 = match NonZeroU32::new(3) {
    Some(attempts) => attempts,
    None => panic!("attempt count must be non-zero"),
};
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Bounded attempts with deterministic exponential backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: NonZeroU32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Every wait a task that never succeeds goes through, in order.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts()).map(|n| self.delay_after(n)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub number: u32,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
#[error(
    "fetch of {source_id} into {} failed after {attempts} attempt(s): {last_error}",
    .destination.display()
)]
pub struct FetchError {
    pub source_id: String,
    pub destination: PathBuf,
    pub attempts: u32,
    pub last_error: String,
    pub history: Vec<Attempt>,
}

/// Fetches one asset through a [`FetchClient`], retrying failed attempts.
pub struct RetryingFetcher {
    client: Arc<dyn FetchClient>,
    policy: RetryPolicy,
    sleeper: Sleeper,
    cancel: CancelFlag,
}

impl RetryingFetcher {
    pub fn new(client: Arc<dyn FetchClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            sleeper: Arc::new(std::thread::sleep),
            cancel: CancelFlag::new(),
        }
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns the wall time of the successful attempt.
    pub fn fetch(&self, plan: &DownloadPlan) -> Result<Duration, FetchError> {
        let source_id = plan.source_id();
        let max_attempts = self.policy.max_attempts();
        let mut history: Vec<Attempt> = Vec::new();

        for number in 1..=max_attempts {
            let started_at = OffsetDateTime::now_utc();
            let clock = Instant::now();
            info!(source = %source_id, attempt = number, max_attempts, "fetch attempt started");

            let result = self.attempt(plan);
            let elapsed = clock.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;

            match result {
                Ok(()) => {
                    info!(source = %source_id, attempt = number, elapsed_ms, "fetch succeeded");
                    return Ok(elapsed);
                }
                Err(error) => {
                    let message = format!("{error:#}");
                    warn!(
                        source = %source_id,
                        destination = %plan.destination.display(),
                        attempt = number,
                        elapsed_ms,
                        "fetch attempt failed: {message}"
                    );
                    history.push(Attempt {
                        number,
                        started_at,
                        elapsed,
                        error: Some(message),
                    });
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            if number < max_attempts {
                let delay = self.policy.delay_after(number);
                info!(source = %source_id, "retrying in {}s", delay.as_secs_f64());
                (self.sleeper)(delay);
            }
        }

        let last_error = history
            .last()
            .and_then(|attempt| attempt.error.clone())
            .unwrap_or_default();
        Err(FetchError {
            source_id,
            destination: plan.destination.clone(),
            attempts: history.len() as u32,
            last_error,
            history,
        })
    }

    fn attempt(&self, plan: &DownloadPlan) -> Result<()> {
        plan.prepare_destination()?;
        self.client.download(plan)?;
        if let Some(expected) = &plan.sha256 {
            verify_sha256(&plan.target_path(), expected)?;
        }
        Ok(())
    }
}
