//! Tracks a set of batches until every one reaches a terminal status.
//!
//! Each pass checks every pending batch (concurrently, on scoped threads),
//! moves terminal ones to the finished set and sleeps for the interval if
//! anything is still pending. The sleep is sliced so a `CancellationToken`
//! or deadline is noticed within `SLEEP_GRANULARITY`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::error::BatchError;
use super::traits::BatchApi;
use super::types::{BatchHandle, BatchStatus, PollEvent, PollOutcome};

const SLEEP_GRANULARITY: Duration = Duration::from_millis(100);

/// Consecutive failed status checks tolerated per batch before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Shared flag for stopping a poll from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

enum Wake {
    Elapsed,
    Cancelled,
    DeadlinePassed,
}

pub struct BatchPoller {
    api: Arc<dyn BatchApi>,
    interval: Duration,
    timeout: Option<Duration>,
    max_consecutive_failures: u32,
}

impl BatchPoller {
    pub fn new(api: Arc<dyn BatchApi>, interval: Duration) -> Self {
        Self {
            api,
            interval,
            timeout: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    /// Give up with `BatchError::TimedOut` once `timeout` has passed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    /// Block until every batch in `batch_ids` is terminal.
    ///
    /// Duplicate ids are tracked once. A failed status check leaves the batch
    /// pending; after `max_consecutive_failures` failures in a row for the
    /// same batch, that error is returned. Cancellation and the deadline
    /// return the handles that had already finished.
    pub fn poll_until_terminal(
        &self,
        batch_ids: &[String],
        cancel: &CancellationToken,
        progress: Option<&dyn Fn(PollEvent)>,
    ) -> Result<PollOutcome, BatchError> {
        let emit = |event: PollEvent| {
            if let Some(f) = progress {
                f(event);
            }
        };

        let mut seen = HashSet::new();
        let mut pending: Vec<String> = batch_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let total = pending.len();

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut finished: Vec<BatchHandle> = Vec::with_capacity(total);
        let mut last_status: HashMap<String, BatchStatus> = HashMap::new();
        let mut failures: HashMap<String, u32> = HashMap::new();
        let mut passes = 0u32;

        info!(batches = total, interval_secs = self.interval.as_secs(), "Polling batches");

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                warn!(pending = pending.len(), "Polling cancelled");
                return Err(BatchError::Cancelled {
                    pending: pending.len(),
                    finished,
                });
            }

            passes += 1;
            let mut still_pending = Vec::with_capacity(pending.len());

            for (id, result) in self.check_all(&pending) {
                match result {
                    Ok(handle) => {
                        failures.remove(&id);
                        if last_status.insert(id.clone(), handle.status) != Some(handle.status) {
                            debug!(batch_id = %id, status = %handle.status, "Batch status changed");
                            emit(PollEvent::StatusChanged {
                                batch_id: id.clone(),
                                status: handle.status,
                            });
                        }
                        if handle.is_terminal() {
                            info!(batch_id = %id, status = %handle.status, "Batch reached terminal status");
                            finished.push(handle);
                        } else {
                            still_pending.push(id);
                        }
                    }
                    Err(e) => {
                        let count = failures.entry(id.clone()).or_insert(0);
                        *count += 1;
                        warn!(
                            batch_id = %id,
                            attempt = *count,
                            error = %e,
                            "Batch status check failed"
                        );
                        if *count >= self.max_consecutive_failures {
                            return Err(e);
                        }
                        still_pending.push(id);
                    }
                }
            }

            pending = still_pending;
            emit(PollEvent::PassCompleted {
                pass: passes,
                pending: pending.len(),
                finished: finished.len(),
            });

            if pending.is_empty() {
                break;
            }

            match self.sleep(cancel, deadline) {
                Wake::Elapsed => {}
                Wake::Cancelled => {
                    warn!(pending = pending.len(), "Polling cancelled");
                    return Err(BatchError::Cancelled {
                        pending: pending.len(),
                        finished,
                    });
                }
                Wake::DeadlinePassed => {
                    warn!(pending = pending.len(), "Polling deadline passed");
                    return Err(BatchError::TimedOut {
                        pending: pending.len(),
                        finished,
                    });
                }
            }
        }

        emit(PollEvent::Finished { total, passes });
        Ok(PollOutcome {
            handles: finished,
            passes,
        })
    }

    /// One status check per id. Ids are checked concurrently when there is
    /// more than one.
    fn check_all(&self, ids: &[String]) -> Vec<(String, Result<BatchHandle, BatchError>)> {
        if let [id] = ids {
            return vec![(id.clone(), self.api.retrieve_batch(id))];
        }

        let api = &self.api;
        std::thread::scope(|s| {
            let workers: Vec<_> = ids
                .iter()
                .map(|id| s.spawn(move || api.retrieve_batch(id)))
                .collect();

            ids.iter()
                .zip(workers)
                .map(|(id, worker)| {
                    let result = worker.join().unwrap_or_else(|_| {
                        Err(BatchError::HttpClient(format!(
                            "status check for {id} panicked"
                        )))
                    });
                    (id.clone(), result)
                })
                .collect()
        })
    }

    fn sleep(&self, cancel: &CancellationToken, deadline: Option<Instant>) -> Wake {
        let wake_at = Instant::now() + self.interval;
        loop {
            if cancel.is_cancelled() {
                return Wake::Cancelled;
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Wake::DeadlinePassed;
            }
            if now >= wake_at {
                return Wake::Elapsed;
            }
            std::thread::sleep(SLEEP_GRANULARITY.min(wake_at - now));
        }
    }
}
