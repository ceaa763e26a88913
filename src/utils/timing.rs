// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::time::Duration;

use serde::Serialize;

/// Returns a non-decreasing duration since a process-wide anchor instant.
///
/// All driver timings are expressed as offsets from this anchor so that
/// accumulation arithmetic never observes wall-clock adjustments.
pub fn monotonic_now() -> Duration {
    use std::sync::OnceLock;

    static ANCHOR: OnceLock<std::time::Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(std::time::Instant::now);
    anchor.elapsed()
}

/// Accumulated wall-clock time for one measured activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimedValue {
    elapsed: Duration,
}

impl TimedValue {
    pub const fn new() -> Self {
        Self {
            elapsed: Duration::ZERO,
        }
    }

    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Adds the time elapsed since `start`, a value previously obtained
    /// from [`monotonic_now`].
    pub fn accumulate_since(&mut self, start: Duration) {
        self.accumulate(monotonic_now().saturating_sub(start));
    }

    pub fn accumulate(&mut self, duration: Duration) {
        self.elapsed = self.elapsed.saturating_add(duration);
    }
}
