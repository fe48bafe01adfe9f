use chrono::{DateTime, Duration, Utc};

use super::eval::evaluate;
use super::state::{LatchMap, LatchState};
use super::{Alert, AlertLogic, Condition, GateLogic, Logic, Playbook, PlaybookEntry, ValidityUnit};
use crate::error::MissingValue;
use crate::market::snapshot::EvaluationSnapshot;

/// Result of one pass over an alert's trigger logic.
#[derive(Debug, Clone, Default)]
pub struct PlaybookOutcome {
    pub triggered: bool,
    pub satisfied: Vec<String>,
    pub failed: Vec<String>,
    /// Latch map to store back; replaces the one passed in.
    pub latches: LatchMap,
    /// Entries whose condition could not be resolved this pass.
    pub missing: Vec<(String, MissingValue)>,
}

/// Evaluate the alert's flat condition list or playbook.
pub fn evaluate_logic(
    snapshot: &EvaluationSnapshot,
    alert: &Alert,
    latches: &LatchMap,
    now: DateTime<Utc>,
) -> PlaybookOutcome {
    match &alert.logic {
        AlertLogic::Conditions { conditions, logic } => evaluate_flat(snapshot, conditions, *logic),
        AlertLogic::Playbook(pb) => evaluate_playbook(snapshot, pb, latches, now),
    }
}

fn evaluate_flat(snapshot: &EvaluationSnapshot, conditions: &[Condition], logic: Logic) -> PlaybookOutcome {
    let mut out = PlaybookOutcome::default();
    for (i, condition) in conditions.iter().enumerate() {
        let id = i.to_string();
        let result = evaluate(snapshot, condition);
        if let Some(reason) = result.missing {
            out.missing.push((id.clone(), reason));
        }
        if result.satisfied {
            out.satisfied.push(id);
        } else {
            out.failed.push(id);
        }
    }
    out.triggered = !conditions.is_empty()
        && match logic {
            Logic::And => out.failed.is_empty(),
            Logic::Or => !out.satisfied.is_empty(),
        };
    out
}

/// Walk the entries in priority order, honouring latches, then fold and gate.
pub fn evaluate_playbook(
    snapshot: &EvaluationSnapshot,
    playbook: &Playbook,
    latches: &LatchMap,
    now: DateTime<Utc>,
) -> PlaybookOutcome {
    let mut entries: Vec<&PlaybookEntry> = playbook.entries.iter().filter(|e| e.enabled).collect();
    entries.sort_by_key(|e| e.priority);

    let bar_index = snapshot.bar_index().unwrap_or(i64::MIN);
    let bar_time = snapshot
        .bar_time()
        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        .unwrap_or(now);

    let mut out = PlaybookOutcome::default();
    let mut chain: Option<bool> = None;

    for entry in entries {
        let satisfied = match latches.get(&entry.id) {
            Some(latch) if latch.is_valid(bar_index, now) => {
                out.latches.insert(entry.id.clone(), latch.clone());
                true
            }
            _ => {
                let result = evaluate(snapshot, &entry.condition);
                if let Some(reason) = result.missing {
                    out.missing.push((entry.id.clone(), reason));
                }
                if result.satisfied && entry.validity > 0 {
                    out.latches
                        .insert(entry.id.clone(), new_latch(entry, bar_index, bar_time));
                }
                result.satisfied
            }
        };

        if satisfied {
            out.satisfied.push(entry.id.clone());
        } else {
            out.failed.push(entry.id.clone());
        }

        chain = Some(match chain {
            None => satisfied,
            Some(acc) => match entry.connector {
                Logic::And => acc && satisfied,
                Logic::Or => acc || satisfied,
            },
        });
    }

    let folded = chain.unwrap_or(false);
    out.triggered = match playbook.gate {
        GateLogic::All => folded,
        GateLogic::Any => folded || !out.satisfied.is_empty(),
    };
    out
}

fn new_latch(entry: &PlaybookEntry, bar_index: i64, bar_time: DateTime<Utc>) -> LatchState {
    match entry.validity_unit {
        ValidityUnit::Bars => LatchState::Bars {
            triggered_bar_index: bar_index,
            valid_for_bars: entry.validity,
        },
        ValidityUnit::Minutes => LatchState::Time {
            triggered_at: bar_time,
            valid_until: bar_time + Duration::minutes(i64::from(entry.validity)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_utils::{close_above, flat_alert, rsi_below};
    use crate::market::indicators::IndicatorSpec;
    use crate::market::models::{Candle, Timeframe};
    use crate::market::snapshot::Frame;
    use chrono::TimeZone;

    const HOUR: i64 = 3_600;

    /// Snapshot whose last 1h bar has index `bar`, closing at `close`, RSI = `rsi`.
    fn snapshot_at(bar: i64, close: f64, rsi: f64) -> EvaluationSnapshot {
        let tf = Timeframe::parse("1h").unwrap();
        let candles = vec![Candle {
            time: bar * HOUR,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }];
        let mut frame = Frame::new(tf, candles);
        frame.indicators.insert(
            IndicatorSpec::new("RSI").with_param("period", 14.0),
            [("RSI".to_string(), rsi)].into_iter().collect(),
        );
        EvaluationSnapshot::new("BTCUSDT", frame)
    }

    fn entry(id: &str, priority: i32, connector: Logic, condition: Condition) -> PlaybookEntry {
        PlaybookEntry {
            id: id.into(),
            priority,
            enabled: true,
            connector,
            validity: 0,
            validity_unit: ValidityUnit::Bars,
            condition,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_latch_persists_for_validity_window() {
        let mut a = entry("a", 1, Logic::And, rsi_below(30.0));
        a.validity = 3;
        let pb = Playbook {
            entries: vec![a],
            gate: GateLogic::All,
        };

        let first = evaluate_playbook(&snapshot_at(10, 100.0, 25.0), &pb, &LatchMap::new(), now());
        assert!(first.triggered);
        let mut latches = first.latches;

        for bar in [11, 12, 13] {
            let out = evaluate_playbook(&snapshot_at(bar, 100.0, 55.0), &pb, &latches, now());
            assert!(out.triggered, "bar {bar} should still be latched");
            latches = out.latches;
        }

        let out = evaluate_playbook(&snapshot_at(14, 100.0, 55.0), &pb, &latches, now());
        assert!(!out.triggered);
        assert!(out.latches.is_empty());
    }

    #[test]
    fn test_latched_entry_is_not_extended() {
        let mut a = entry("a", 1, Logic::And, rsi_below(30.0));
        a.validity = 2;
        let pb = Playbook {
            entries: vec![a],
            gate: GateLogic::All,
        };
        let first = evaluate_playbook(&snapshot_at(10, 100.0, 25.0), &pb, &LatchMap::new(), now());
        // Condition still true at 11, but the latch from bar 10 is reused.
        let second = evaluate_playbook(&snapshot_at(11, 100.0, 25.0), &pb, &first.latches, now());
        assert_eq!(
            second.latches.get("a"),
            Some(&LatchState::Bars {
                triggered_bar_index: 10,
                valid_for_bars: 2
            })
        );
    }

    #[test]
    fn test_false_evaluation_drops_latch() {
        let pb = Playbook {
            entries: vec![entry("a", 1, Logic::And, rsi_below(30.0))],
            gate: GateLogic::All,
        };
        let mut latches = LatchMap::new();
        latches.insert(
            "a".into(),
            LatchState::Bars {
                triggered_bar_index: 1,
                valid_for_bars: 1,
            },
        );
        let out = evaluate_playbook(&snapshot_at(10, 100.0, 50.0), &pb, &latches, now());
        assert!(out.latches.is_empty());
        assert_eq!(out.failed, vec!["a".to_string()]);
    }

    #[test]
    fn test_time_latch() {
        let mut a = entry("a", 1, Logic::And, rsi_below(30.0));
        a.validity = 90;
        a.validity_unit = ValidityUnit::Minutes;
        let pb = Playbook {
            entries: vec![a],
            gate: GateLogic::All,
        };
        let t10 = Utc.timestamp_opt(10 * HOUR, 0).unwrap();
        let first = evaluate_playbook(&snapshot_at(10, 100.0, 25.0), &pb, &LatchMap::new(), t10);
        let held = evaluate_playbook(
            &snapshot_at(11, 100.0, 60.0),
            &pb,
            &first.latches,
            t10 + Duration::minutes(80),
        );
        assert!(held.triggered);
        let expired = evaluate_playbook(
            &snapshot_at(12, 100.0, 60.0),
            &pb,
            &held.latches,
            t10 + Duration::minutes(120),
        );
        assert!(!expired.triggered);
    }

    fn two_entry(gate: GateLogic) -> Playbook {
        Playbook {
            entries: vec![
                entry("a", 1, Logic::And, rsi_below(30.0)),
                entry("b", 2, Logic::And, close_above(100.0)),
            ],
            gate,
        }
    }

    #[test]
    fn test_gate_all_requires_fold() {
        let pb = two_entry(GateLogic::All);
        let both = evaluate_playbook(&snapshot_at(1, 101.0, 25.0), &pb, &LatchMap::new(), now());
        assert!(both.triggered);
        let only_a = evaluate_playbook(&snapshot_at(1, 99.0, 25.0), &pb, &LatchMap::new(), now());
        assert!(!only_a.triggered);
        assert_eq!(only_a.satisfied, vec!["a".to_string()]);
        assert_eq!(only_a.failed, vec!["b".to_string()]);
    }

    #[test]
    fn test_gate_any_fires_on_individual_entry() {
        // AND chain is false, but ANY also accepts a single satisfied entry.
        let pb = two_entry(GateLogic::Any);
        let only_a = evaluate_playbook(&snapshot_at(1, 99.0, 25.0), &pb, &LatchMap::new(), now());
        assert!(only_a.triggered);
        let only_b = evaluate_playbook(&snapshot_at(1, 101.0, 50.0), &pb, &LatchMap::new(), now());
        assert!(only_b.triggered);
        let none = evaluate_playbook(&snapshot_at(1, 99.0, 50.0), &pb, &LatchMap::new(), now());
        assert!(!none.triggered);
    }

    #[test]
    fn test_or_connector_folds() {
        let pb = Playbook {
            entries: vec![
                entry("a", 1, Logic::And, rsi_below(30.0)),
                entry("b", 2, Logic::Or, close_above(100.0)),
            ],
            gate: GateLogic::All,
        };
        let out = evaluate_playbook(&snapshot_at(1, 101.0, 50.0), &pb, &LatchMap::new(), now());
        assert!(out.triggered);
    }

    #[test]
    fn test_priority_order_and_disabled_entries() {
        let mut disabled = entry("z", 0, Logic::And, close_above(1_000.0));
        disabled.enabled = false;
        let pb = Playbook {
            entries: vec![
                entry("late", 5, Logic::And, close_above(100.0)),
                disabled,
                entry("early", 1, Logic::And, rsi_below(30.0)),
                entry("tie", 5, Logic::Or, close_above(100.0)),
            ],
            gate: GateLogic::All,
        };
        let out = evaluate_playbook(&snapshot_at(1, 101.0, 25.0), &pb, &LatchMap::new(), now());
        assert_eq!(out.satisfied, vec!["early", "late", "tie"]);
        assert!(out.failed.is_empty());
        assert!(out.triggered);
    }

    #[test]
    fn test_first_entry_seeds_chain_regardless_of_connector() {
        // A leading OR must not be folded against an implicit `true`.
        let pb = Playbook {
            entries: vec![entry("a", 1, Logic::Or, rsi_below(30.0))],
            gate: GateLogic::All,
        };
        let out = evaluate_playbook(&snapshot_at(1, 100.0, 50.0), &pb, &LatchMap::new(), now());
        assert!(!out.triggered);
    }

    #[test]
    fn test_flat_logic() {
        let mut alert = flat_alert("x", "BTCUSDT", "1h", vec![rsi_below(30.0), close_above(100.0)]);
        let snap = snapshot_at(1, 99.0, 25.0);
        let and = evaluate_logic(&snap, &alert, &LatchMap::new(), now());
        assert!(!and.triggered);
        assert_eq!(and.satisfied, vec!["0".to_string()]);

        if let AlertLogic::Conditions { logic, .. } = &mut alert.logic {
            *logic = Logic::Or;
        }
        let or = evaluate_logic(&snap, &alert, &LatchMap::new(), now());
        assert!(or.triggered);
    }

    #[test]
    fn test_missing_values_reported() {
        let alert = flat_alert("x", "BTCUSDT", "1h", vec![{
            let mut c = rsi_below(30.0);
            if let crate::condition::Subject::Indicator { spec, .. } = &mut c.subject {
                *spec = IndicatorSpec::new("RSI").with_param("period", 7.0);
            }
            c
        }]);
        let out = evaluate_logic(&snapshot_at(1, 100.0, 25.0), &alert, &LatchMap::new(), now());
        assert!(!out.triggered);
        assert_eq!(out.missing.len(), 1);
    }
}
