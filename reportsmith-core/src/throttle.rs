//! Client-side throttle for external calls.
//!
//! Each external dependency (one evidence provider, the language model) gets its
//! own [`Throttle`] so a slow or strict service never starves the others. A
//! throttle combines two limits:
//!
//! - at most `max_concurrent` holders of a [`ThrottlePermit`] at once, and
//! - at least `min_spacing` between successive grants.
//!
//! Permits are RAII guards: they are released when dropped, which covers the
//! success, error and cancellation paths alike (a cancelled future drops its
//! permit with it).

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::ThrottleConfig;
use crate::error::ThrottleError;

/// Concurrency cap plus fixed-interval gate for one resource key.
#[derive(Debug)]
pub struct Throttle {
    key: String,
    max_concurrent: usize,
    min_spacing: Duration,
    semaphore: Arc<Semaphore>,
    /// When the most recent permit was granted.
    last_grant: Mutex<Option<Instant>>,
}

/// Proof of holding one slot of a [`Throttle`]. Released on drop.
#[derive(Debug)]
pub struct ThrottlePermit {
    key: String,
    _permit: OwnedSemaphorePermit,
}

impl ThrottlePermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Throttle {
    /// Create a throttle. A `max_concurrent` of zero is treated as one.
    pub fn new(key: impl Into<String>, config: ThrottleConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            key: key.into(),
            max_concurrent,
            min_spacing: config.min_spacing(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            last_grant: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// Wait for a free slot and for the spacing gate, then grant a permit.
    ///
    /// Fails only when `cancel` fires first. Dropping the returned future is
    /// equivalent and leaves no trace on the throttle.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<ThrottlePermit, ThrottleError> {
        let cancelled = || ThrottleError::Cancelled {
            key: self.key.clone(),
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            // The semaphore is private and never closed.
            permit = self.semaphore.clone().acquire_owned() => permit.map_err(|_| cancelled())?,
        };

        // The spacing slot is booked only once the wait is over, so a waiter
        // dropped mid-sleep does not push back later grants.
        while let Some(ready_at) = self.try_book_slot() {
            trace!(
                key = %self.key,
                wait_ms = ready_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Throttle spacing wait"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }

        Ok(ThrottlePermit {
            key: self.key.clone(),
            _permit: permit,
        })
    }

    /// Run `operation` while holding a permit.
    ///
    /// The permit is held for the operation's own scope only and is released
    /// whether it succeeds, fails, or is cancelled.
    pub async fn run<F>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<F::Output, ThrottleError>
    where
        F: Future,
    {
        let _permit = self.acquire(cancel).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ThrottleError::Cancelled { key: self.key.clone() }),
            output = operation => Ok(output),
        }
    }

    /// Record a grant now if the spacing since the last grant has elapsed,
    /// otherwise return the instant at which it will have.
    fn try_book_slot(&self) -> Option<Instant> {
        let mut last = self
            .last_grant
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(previous) = *last {
            let ready_at = previous + self.min_spacing;
            if ready_at > now {
                return Some(ready_at);
            }
        }
        *last = Some(now);
        None
    }
}
