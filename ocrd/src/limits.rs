//! Resource limiting for protecting engine capacity.
//!
//! Every recognition runs a separate engine process. This module bounds how many of those run at
//! once and how many requests may queue behind them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::LimitsConfig;
use crate::errors::{Error, Result};

/// Controls concurrent recognition capacity.
///
/// This limiter implements a bounded queue with configurable concurrency,
/// waiting capacity, and timeout. When limits are exceeded, requests
/// receive HTTP 429 (Too Many Requests).
#[derive(Debug)]
pub struct RecognitionLimiter {
    /// Semaphore controlling max concurrent recognitions
    semaphore: Arc<Semaphore>,
    capacity: usize,
    /// Current number of requests waiting for a permit
    waiting_count: AtomicUsize,
    /// Maximum allowed waiting requests (None = unlimited)
    max_waiting: Option<usize>,
    /// Maximum time to wait for a permit
    max_wait: Duration,
}

impl RecognitionLimiter {
    /// Creates a new recognition limiter from configuration.
    ///
    /// If `max_concurrent_recognitions` is 0, returns `None` (unlimited).
    /// If `max_waiting_recognitions` is 0, unlimited waiting is allowed.
    pub fn new(config: &LimitsConfig) -> Option<Self> {
        if config.max_concurrent_recognitions == 0 {
            return None;
        }

        Some(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_recognitions)),
            capacity: config.max_concurrent_recognitions,
            waiting_count: AtomicUsize::new(0),
            max_waiting: if config.max_waiting_recognitions == 0 {
                None
            } else {
                Some(config.max_waiting_recognitions)
            },
            max_wait: config.max_wait,
        })
    }

    /// Attempts to acquire a permit for one recognition.
    ///
    /// Returns `Err(TooManyRequests)` if the waiting queue is full or the timeout expires before
    /// a slot becomes available.
    pub async fn acquire(&self) -> Result<RecognitionPermit> {
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }

        let waiting = WaitingSlot::join(&self.waiting_count);
        if let Some(max_waiting) = self.max_waiting
            && waiting.position >= max_waiting
        {
            return Err(busy());
        }

        // A slot may have been freed while joining the queue
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }
        if self.max_wait.is_zero() {
            return Err(busy());
        }

        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(RecognitionPermit { _permit: permit }),
            Ok(Err(_)) => Err(Error::TooManyRequests {
                message: "Recognition service temporarily unavailable.".to_string(),
            }),
            Err(_) => {
                tracing::debug!(max_wait = ?self.max_wait, "Gave up waiting for a recognition slot");
                Err(Error::TooManyRequests {
                    message: "Timed out waiting for a recognition slot. Please retry later.".to_string(),
                })
            }
        }
    }

    fn try_acquire(&self) -> Option<RecognitionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| RecognitionPermit { _permit: permit })
    }

    /// Recognitions currently holding a slot.
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

fn busy() -> Error {
    Error::TooManyRequests {
        message: "Too many recognitions in progress. Please retry later.".to_string(),
    }
}

/// Place in the waiting queue, released on drop.
struct WaitingSlot<'a> {
    count: &'a AtomicUsize,
    /// Requests already waiting when this one joined
    position: usize,
}

impl<'a> WaitingSlot<'a> {
    fn join(count: &'a AtomicUsize) -> Self {
        let position = count.fetch_add(1, Ordering::SeqCst);
        Self { count, position }
    }
}

impl Drop for WaitingSlot<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// RAII guard that releases the recognition slot when dropped.
#[must_use]
pub struct RecognitionPermit {
    _permit: OwnedSemaphorePermit,
}
