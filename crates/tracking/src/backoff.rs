// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bounded exponential backoff for polling a condition from a worker thread.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Longest uninterrupted sleep; cancellation is observed at this granularity.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    Canceled,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Overall budget across all attempts.
    pub timeout: Duration,
}

impl Backoff {
    /// The schedule used while waiting for chunk files: 20 ms growing by 1.5x
    /// up to 5 s per attempt.
    pub const fn chunk_file(timeout: Duration) -> Self {
        Self {
            initial: Duration::from_millis(20),
            multiplier: 1.5,
            max_delay: Duration::from_millis(5000),
            timeout,
        }
    }

    /// Unbounded sequence of per-attempt delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let multiplier = self.multiplier.max(1.0);
        let max_delay = self.max_delay;
        std::iter::successors(Some(self.initial.min(max_delay)), move |delay| {
            Some(delay.mul_f64(multiplier).min(max_delay))
        })
    }

    /// Calls `ready` until it returns true, sleeping between attempts.
    ///
    /// The condition is always checked at least once, and once more right
    /// before giving up.
    pub fn poll<F>(&self, mut ready: F, cancel: &CancellationToken) -> PollOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        for delay in self.delays() {
            if cancel.is_cancelled() {
                return PollOutcome::Canceled;
            }
            if ready() {
                return PollOutcome::Ready;
            }
            let now = Instant::now();
            if now >= deadline {
                return PollOutcome::TimedOut;
            }
            if !sleep_unless_canceled(delay.min(deadline - now), cancel) {
                return PollOutcome::Canceled;
            }
        }
        PollOutcome::TimedOut
    }
}

/// Returns `false` if the token fired during the sleep.
fn sleep_unless_canceled(duration: Duration, cancel: &CancellationToken) -> bool {
    let end = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= end {
            return true;
        }
        std::thread::sleep((end - now).min(SLEEP_SLICE));
    }
}
