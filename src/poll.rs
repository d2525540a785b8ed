//! Polling a remote job until it reaches a terminal status
//!
//! The poller is a fixed-interval loop around a caller-supplied fetch
//! function. It stops on the first terminal status, on cancellation, when
//! the attempt ceiling or deadline is reached, on the first non-transient
//! fetch failure, or after a run of consecutive transient fetch failures.
//! Cancellation is only observed between fetches.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::error::{Error, Result};
use crate::types::JobRecord;

/// Progress of one polling run
#[derive(Clone, Debug)]
pub struct PollState {
    /// Fetches performed so far, successful or not
    pub attempts: u32,
    /// Failed fetches since the last successful one
    pub consecutive_failures: u32,
    /// Most recently observed snapshot
    pub last: Option<JobRecord>,
    started: Instant,
}

impl PollState {
    fn new() -> Self {
        Self {
            attempts: 0,
            consecutive_failures: 0,
            last: None,
            started: Instant::now(),
        }
    }

    /// Time since polling started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Status of the most recent snapshot
    pub fn last_status(&self) -> Option<&str> {
        self.last.as_ref().map(|job| job.status.as_str())
    }
}

/// Fixed-interval job status poller
#[derive(Clone, Debug, Default)]
pub struct TaskStatusPoller {
    config: PollConfig,
}

impl TaskStatusPoller {
    /// Create a poller
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    /// Polling configuration in use
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll until a terminal status and return the final snapshot
    pub async fn poll<F, Fut>(&self, fetch: F, cancel: &CancellationToken) -> Result<JobRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JobRecord>>,
    {
        self.poll_with(fetch, cancel, |_| {}).await
    }

    /// Like [`poll`](Self::poll), calling `observe` after every successful fetch
    pub async fn poll_with<F, Fut, O>(
        &self,
        mut fetch: F,
        cancel: &CancellationToken,
        mut observe: O,
    ) -> Result<JobRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JobRecord>>,
        O: FnMut(&PollState),
    {
        let mut state = PollState::new();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(deadline) = self.config.deadline
                && state.elapsed() >= deadline
            {
                return Err(self.deadline_error(&state));
            }

            state.attempts += 1;
            match fetch().await {
                Ok(job) => {
                    state.consecutive_failures = 0;
                    let terminal = job.is_terminal(&self.config);
                    debug!(attempt = state.attempts, status = %job.status, terminal, "polled job status");
                    state.last = Some(job.clone());
                    observe(&state);
                    if terminal {
                        info!(
                            job_id = %job.id,
                            status = %job.status,
                            attempts = state.attempts,
                            "job reached terminal status"
                        );
                        return Ok(job);
                    }
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if !e.is_transient() => {
                    warn!(attempt = state.attempts, error = %e, "job status fetch failed permanently");
                    return Err(e);
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    warn!(
                        attempt = state.attempts,
                        consecutive_failures = state.consecutive_failures,
                        error = %e,
                        "job status fetch failed"
                    );
                    if state.consecutive_failures >= self.config.max_consecutive_fetch_failures {
                        return Err(Error::PollFetch {
                            attempts: state.consecutive_failures,
                            message: e.to_string(),
                        });
                    }
                }
            }

            if let Some(max) = self.config.max_attempts
                && state.attempts >= max
            {
                return Err(Error::PollExhausted {
                    attempts: state.attempts,
                    last_status: state.last_status().map(String::from),
                });
            }

            let delay = match self.config.deadline {
                Some(deadline) => self
                    .config
                    .interval
                    .min(deadline.saturating_sub(state.elapsed())),
                None => self.config.interval,
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn deadline_error(&self, state: &PollState) -> Error {
        Error::PollDeadline {
            elapsed: state.elapsed(),
            last_status: state.last_status().map(String::from),
        }
    }
}
