//! Per-alert debounce between "logic satisfied" and "dispatch".

use chrono::{DateTime, Utc};

use crate::condition::state::AlertRuntime;
use crate::condition::{Alert, FireMode};

/// Whether an alert whose logic is satisfied may fire on the bar opening at
/// `latest_bar`. Timestamps are compared exactly.
pub fn should_fire(alert: &Alert, runtime: &AlertRuntime, latest_bar: i64) -> bool {
    match alert.fire_mode {
        // No sub-bar debounce exists yet; ticks fire at most once per bar too.
        FireMode::PerBar | FireMode::PerClose | FireMode::PerTick => runtime.last_fired_at != Some(latest_bar),
    }
}

pub fn record_fired(runtime: &mut AlertRuntime, latest_bar: i64, now: DateTime<Utc>) {
    runtime.last_fired_at = Some(latest_bar);
    runtime.last_triggered_at = Some(now);
    runtime.trigger_count += 1;
}
