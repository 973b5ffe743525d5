// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Capped exponential backoff for reconnect attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Default growth factor between attempts.
pub const DEFAULT_MULTIPLIER: u32 = 2;
/// Default ceiling on the delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 8000;

/// Backoff schedule: `initial * multiplier^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt number `attempt` (1-based).
    ///
    /// Attempt 0 means "no failure yet" and yields no delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let mut delay = self.initial_delay_ms;
        for _ in 1..attempt {
            if delay >= self.max_delay_ms {
                break;
            }
            delay = delay.saturating_mul(u64::from(self.multiplier));
        }
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
