//! Sliding window request counter.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowResult {
    /// True if the request was counted
    pub is_allowed: bool,
    /// Grants still available in the current window
    pub remaining_in_window: u32,
    /// Milliseconds until the oldest grant leaves the window; zero when allowed
    pub retry_after_ms: u64,
}

/// Caps the number of grants within a trailing window.
///
/// Expired timestamps are pruned on every access.
pub struct SlidingWindowCounter {
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    max_requests: u32,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindowCounter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            state: Mutex::new(WindowState {
                max_requests,
                timestamps: VecDeque::new(),
            }),
        }
    }

    /// Count one request if the window has room
    pub fn try_increment(&self) -> SlidingWindowResult {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.prune(&mut state.timestamps, now);

        if state.timestamps.len() as u32 >= state.max_requests {
            let retry_after_ms = state
                .timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window)
                .as_millis() as u64;

            return SlidingWindowResult {
                is_allowed: false,
                remaining_in_window: 0,
                retry_after_ms,
            };
        }

        state.timestamps.push_back(now);
        SlidingWindowResult {
            is_allowed: true,
            remaining_in_window: state.max_requests - state.timestamps.len() as u32,
            retry_after_ms: 0,
        }
    }

    /// Grants currently inside the window
    pub fn current_count(&self) -> u32 {
        let mut state = self.state.lock();
        self.prune(&mut state.timestamps, Instant::now());
        state.timestamps.len() as u32
    }

    pub fn max_requests(&self) -> u32 {
        self.state.lock().max_requests
    }

    /// Change the cap; grants already in the window are kept
    pub fn set_max_requests(&self, max_requests: u32) {
        self.state.lock().max_requests = max_requests;
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
