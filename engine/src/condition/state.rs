use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A playbook entry that evaluated true and keeps counting as satisfied for
/// a window after that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatchState {
    Time {
        triggered_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
    Bars {
        triggered_bar_index: i64,
        valid_for_bars: u32,
    },
}

impl LatchState {
    pub fn is_valid(&self, bar_index: i64, now: DateTime<Utc>) -> bool {
        match self {
            Self::Time { valid_until, .. } => now <= *valid_until,
            Self::Bars {
                triggered_bar_index,
                valid_for_bars,
            } => {
                let elapsed = bar_index - triggered_bar_index;
                (0..=i64::from(*valid_for_bars)).contains(&elapsed)
            }
        }
    }
}

/// Latches keyed by playbook entry id.
pub type LatchMap = HashMap<String, LatchState>;

/// Mutable per-alert state carried across ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRuntime {
    #[serde(default)]
    pub latches: LatchMap,
    /// Open time of the bar the alert last fired on.
    pub last_fired_at: Option<i64>,
    #[serde(default)]
    pub trigger_count: u64,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Consecutive evaluations with at least one unresolvable operand.
    #[serde(default)]
    pub missing_streak: u32,
    #[serde(default)]
    pub warned_unresolvable: bool,
}
