//! Shared evaluation scheduler.
//!
//! Every tick the registry is grouped by (symbol, timeframe). Each group
//! fetches candles once, computes the union of its alerts' indicators once,
//! and evaluates every alert against that one snapshot.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rayon::prelude::*;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::condition::playbook::{evaluate_logic, PlaybookOutcome};
use crate::condition::registry::{self, AlertRegistry, GroupKey, RegisteredAlert};
use crate::condition::state::AlertRuntime;
use crate::condition::Alert;
use crate::config::{Config, MISSING_VALUE_WARN_AFTER};
use crate::dispatch::{Distributor, TriggerEvent};
use crate::error::MissingData;
use crate::fire;
use crate::market::indicators::{IndicatorEngine, IndicatorSpec};
use crate::market::models::Timeframe;
use crate::market::resample::resample;
use crate::market::snapshot::{EvaluationSnapshot, Frame};
use crate::market::source::MarketData;
use crate::metrics as m;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub timeframes: Vec<Timeframe>,
    pub group_timeout: Duration,
    pub max_concurrent_groups: usize,
    pub candle_limit: usize,
    pub max_inflight_dispatches: usize,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.eval_interval,
            timeframes: cfg.eval_timeframes.clone(),
            group_timeout: cfg.group_timeout,
            max_concurrent_groups: cfg.max_concurrent_groups.max(1),
            candle_limit: cfg.candle_limit,
            max_inflight_dispatches: cfg.max_inflight_dispatches.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub groups: usize,
    pub groups_failed: usize,
    pub triggers: usize,
    pub skipped_alerts: usize,
}

pub struct Scheduler {
    registry: AlertRegistry,
    market: Arc<dyn MarketData>,
    indicators: Arc<dyn IndicatorEngine>,
    distributor: Arc<Distributor>,
    settings: SchedulerSettings,
    /// Shared by every tick, so detached dispatches still count against it.
    dispatch_slots: Arc<Semaphore>,
    /// Groups already reported as outside the scanned timeframes.
    unscanned_warned: Mutex<HashSet<GroupKey>>,
}

impl Scheduler {
    pub fn new(
        registry: AlertRegistry,
        market: Arc<dyn MarketData>,
        indicators: Arc<dyn IndicatorEngine>,
        distributor: Arc<Distributor>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            market,
            indicators,
            distributor,
            dispatch_slots: Arc::new(Semaphore::new(settings.max_inflight_dispatches.max(1))),
            settings,
            unscanned_warned: Mutex::new(HashSet::new()),
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let started = Instant::now();
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let timeframes: Vec<String> = self.settings.timeframes.iter().map(|tf| tf.to_string()).collect();
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            timeframes = %timeframes.join(","),
            max_concurrent_groups = self.settings.max_concurrent_groups,
            "scheduler_started"
        );

        loop {
            interval.tick().await;
            metrics::gauge!(m::UPTIME_SECONDS).set(started.elapsed().as_secs_f64());
            self.tick(Utc::now()).await;
        }
    }

    /// One evaluation cycle. Each group spends at most `group_timeout` on
    /// evaluation and `group_timeout` waiting for its dispatches; deliveries
    /// still retrying after that keep running detached from the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let tick_start = Instant::now();
        metrics::counter!(m::TICKS_TOTAL).increment(1);

        let (alert_count, sub_count) = registry::counts(&self.registry).await;
        metrics::gauge!(m::ACTIVE_ALERTS).set(alert_count as f64);
        metrics::gauge!(m::ACTIVE_SUBSCRIPTIONS).set(sub_count as f64);

        let mut report = TickReport::default();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_groups));
        let mut set: JoinSet<Result<usize, MissingData>> = JoinSet::new();

        for (key, alerts) in registry::groups(&self.registry).await {
            if !self.settings.timeframes.contains(&key.timeframe) {
                report.skipped_alerts += alerts.len();
                self.warn_unscanned(&key, alerts.len());
                continue;
            }
            report.groups += 1;

            let semaphore = semaphore.clone();
            let market = self.market.clone();
            let indicators = self.indicators.clone();
            let distributor = self.distributor.clone();
            let dispatch_slots = self.dispatch_slots.clone();
            let limit = self.settings.candle_limit;
            let timeout = self.settings.group_timeout;

            set.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return Ok(0);
                };
                let started = Instant::now();
                let result = tokio::time::timeout(
                    timeout,
                    evaluate_group(market.as_ref(), indicators.as_ref(), &key, &alerts, limit, now),
                )
                .await
                .unwrap_or(Err(MissingData::Timeout(timeout)));
                metrics::histogram!(m::GROUP_EVAL_DURATION).record(started.elapsed().as_secs_f64());
                drop(permit);

                let fired = match result {
                    Ok(fired) => fired,
                    Err(e) => {
                        tracing::warn!(
                            symbol = %key.symbol,
                            timeframe = %key.timeframe,
                            alerts = alerts.len(),
                            error = %e,
                            "group_skipped"
                        );
                        return Err(e);
                    }
                };
                metrics::counter!(m::GROUPS_EVALUATED).increment(1);

                let count = fired.len();
                let handles: Vec<_> = fired
                    .into_iter()
                    .map(|(alert, event)| {
                        let distributor = distributor.clone();
                        let slots = dispatch_slots.clone();
                        tokio::spawn(async move {
                            let Ok(_permit) = slots.acquire_owned().await else {
                                return;
                            };
                            distributor.dispatch(&alert, event).await;
                        })
                    })
                    .collect();

                match tokio::time::timeout(timeout, join_all(handles)).await {
                    Ok(results) => {
                        for e in results.into_iter().filter_map(|r| r.err()) {
                            tracing::error!(symbol = %key.symbol, error = %e, "dispatch_task_panicked");
                        }
                    }
                    Err(_) => {
                        metrics::counter!(m::DISPATCHES_DETACHED).increment(count as u64);
                        tracing::warn!(
                            symbol = %key.symbol,
                            timeframe = %key.timeframe,
                            triggers = count,
                            budget_secs = timeout.as_secs(),
                            "dispatch_detached_from_tick"
                        );
                    }
                }
                Ok(count)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(count)) => report.triggers += count,
                Ok(Err(e)) => {
                    report.groups_failed += 1;
                    metrics::counter!(m::GROUP_FAILURES, "reason" => failure_reason(&e)).increment(1);
                }
                Err(e) => {
                    report.groups_failed += 1;
                    metrics::counter!(m::GROUP_FAILURES, "reason" => "panic").increment(1);
                    tracing::error!(error = %e, "group_task_panicked");
                }
            }
        }

        let elapsed = tick_start.elapsed();
        metrics::histogram!(m::TICK_DURATION).record(elapsed.as_secs_f64());
        tracing::debug!(
            groups = report.groups,
            groups_failed = report.groups_failed,
            triggers = report.triggers,
            elapsed_ms = elapsed.as_millis() as u64,
            "scheduler_tick_complete"
        );
        report
    }

    fn warn_unscanned(&self, key: &GroupKey, alerts: usize) {
        let mut warned = self.unscanned_warned.lock().unwrap_or_else(|e| e.into_inner());
        if warned.insert(key.clone()) {
            tracing::warn!(
                symbol = %key.symbol,
                timeframe = %key.timeframe,
                alerts,
                "timeframe_not_scanned"
            );
        }
    }
}

fn failure_reason(e: &MissingData) -> &'static str {
    match e {
        MissingData::Fetch(_) => "fetch",
        MissingData::Empty => "empty",
        MissingData::Timeout(_) => "timeout",
    }
}

// ---------------------------------------------------------------------------
// Group evaluation
// ---------------------------------------------------------------------------

/// Fetch, compute and evaluate one group. Returns the alerts that fired
/// together with their trigger events; runtime state is updated in place.
pub async fn evaluate_group(
    market: &dyn MarketData,
    indicators: &dyn IndicatorEngine,
    key: &GroupKey,
    alerts: &[RegisteredAlert],
    candle_limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<(Arc<Alert>, TriggerEvent)>, MissingData> {
    let candles = market
        .recent_candles(&key.symbol, &key.timeframe, candle_limit)
        .await
        .map_err(MissingData::Fetch)?;
    metrics::counter!(m::MARKET_FETCHES).increment(1);
    if candles.is_empty() {
        return Err(MissingData::Empty);
    }

    let snapshot = build_snapshot(indicators, key, alerts, candles);
    let Some(bar) = snapshot.last_candle().copied() else {
        return Err(MissingData::Empty);
    };

    let fired: Vec<(Arc<Alert>, TriggerEvent)> = alerts
        .par_iter()
        .filter_map(|entry| {
            let mut runtime = entry.runtime();
            let mut outcome = evaluate_logic(&snapshot, &entry.alert, &runtime.latches, now);
            runtime.latches = std::mem::take(&mut outcome.latches);
            runtime.last_evaluated_at = Some(now);
            track_missing(&entry.alert, &mut runtime, &outcome);

            if !outcome.triggered {
                return None;
            }
            if !fire::should_fire(&entry.alert, &runtime, bar.time) {
                metrics::counter!(m::FIRES_SUPPRESSED).increment(1);
                return None;
            }
            fire::record_fired(&mut runtime, bar.time, now);
            metrics::counter!(m::TRIGGERS_TOTAL).increment(1);
            tracing::info!(
                alert_id = %entry.alert.id,
                symbol = %key.symbol,
                timeframe = %key.timeframe,
                bar_time = bar.time,
                trigger_count = runtime.trigger_count,
                "alert_triggered"
            );
            Some((entry.alert.clone(), TriggerEvent::new(&entry.alert, &bar, &outcome, now)))
        })
        .collect();

    Ok(fired)
}

/// Base frame plus every resampled frame the group needs, with each distinct
/// (timeframe, indicator) computed exactly once.
fn build_snapshot(
    indicators: &dyn IndicatorEngine,
    key: &GroupKey,
    alerts: &[RegisteredAlert],
    candles: Vec<crate::market::models::Candle>,
) -> EvaluationSnapshot {
    let mut timeframes: HashSet<Timeframe> = HashSet::new();
    let mut required: HashSet<(Timeframe, IndicatorSpec)> = HashSet::new();
    for entry in alerts {
        timeframes.extend(entry.alert.required_timeframes());
        required.extend(entry.alert.required_indicators());
    }

    let mut snapshot = EvaluationSnapshot::new(key.symbol.clone(), Frame::new(key.timeframe, candles));
    let base_candles = snapshot.base_frame().map(|f| f.candles.clone()).unwrap_or_default();
    for tf in timeframes.into_iter().filter(|tf| *tf != key.timeframe) {
        match resample(&base_candles, &key.timeframe, &tf) {
            Some(rows) => snapshot.insert_frame(Frame::new(tf, rows)),
            None => tracing::debug!(
                symbol = %key.symbol,
                base = %key.timeframe,
                timeframe = %tf,
                "timeframe_not_resamplable"
            ),
        }
    }

    let computed: Vec<(Timeframe, IndicatorSpec, _)> = required
        .into_par_iter()
        .filter_map(|(tf, spec)| {
            let frame = snapshot.frame(&tf)?;
            let columns = indicators.compute(&frame.candles, &spec)?;
            Some((tf, spec, columns))
        })
        .collect();
    metrics::counter!(m::INDICATOR_COMPUTATIONS).increment(computed.len() as u64);

    for (tf, spec, columns) in computed {
        if let Some(frame) = snapshot.frame_mut(&tf) {
            frame.indicators.insert(spec, columns);
        }
    }
    snapshot
}

fn track_missing(alert: &Alert, runtime: &mut AlertRuntime, outcome: &PlaybookOutcome) {
    if outcome.missing.is_empty() {
        runtime.missing_streak = 0;
        runtime.warned_unresolvable = false;
        return;
    }
    runtime.missing_streak += 1;
    if runtime.missing_streak >= MISSING_VALUE_WARN_AFTER && !runtime.warned_unresolvable {
        runtime.warned_unresolvable = true;
        let reasons: Vec<String> = outcome.missing.iter().map(|(id, why)| format!("{id}: {why}")).collect();
        tracing::warn!(
            alert_id = %alert.id,
            evaluations = runtime.missing_streak,
            reasons = %reasons.join("; "),
            "condition_never_resolves"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::condition::registry::new_registry;
    use crate::condition::test_utils::{close_above, flat_alert, rsi_below};
    use crate::condition::{AlertAction, Subject};
    use crate::dispatch::broker::MemoryBroker;
    use crate::dispatch::idempotency::MemoryDedupStore;
    use crate::dispatch::webhook::tests::{HangingTransport, ScriptedTransport};
    use crate::dispatch::webhook::WebhookSender;
    use crate::market::indicators::IndicatorColumns;
    use crate::market::models::Candle;
    use crate::storage::memory::MemoryStore;

    fn hourly(n: usize, close: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                time: 1_700_000_000 - 1_700_000_000 % 3_600 + i as i64 * 3_600,
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            })
            .collect()
    }

    struct FakeMarket {
        candles: Mutex<Vec<Candle>>,
        failing: HashSet<String>,
        calls: AtomicUsize,
    }

    impl FakeMarket {
        fn new(candles: Vec<Candle>) -> Self {
            Self {
                candles: Mutex::new(candles),
                failing: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn push(&self, candle: Candle) {
            self.candles.lock().unwrap().push(candle);
        }
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        async fn recent_candles(&self, symbol: &str, _tf: &Timeframe, _limit: usize) -> Result<Vec<Candle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(symbol) {
                anyhow::bail!("upstream 502 for {symbol}");
            }
            Ok(self.candles.lock().unwrap().clone())
        }
    }

    /// Returns fixed values keyed by indicator name and counts calls per spec.
    #[derive(Default)]
    struct CountingIndicators {
        values: HashMap<String, f64>,
        calls: Mutex<HashMap<IndicatorSpec, usize>>,
    }

    impl CountingIndicators {
        fn with(name: &str, value: f64) -> Self {
            let mut values = HashMap::new();
            values.insert(name.to_string(), value);
            Self {
                values,
                ..Default::default()
            }
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    impl IndicatorEngine for CountingIndicators {
        fn compute(&self, _candles: &[Candle], spec: &IndicatorSpec) -> Option<IndicatorColumns> {
            *self.calls.lock().unwrap().entry(spec.clone()).or_default() += 1;
            let value = *self.values.get(&spec.name)?;
            let mut cols = IndicatorColumns::new();
            cols.insert(spec.name.clone(), value);
            Some(cols)
        }
    }

    fn rsi_with_period(threshold: f64, period: f64) -> crate::condition::Condition {
        let mut c = rsi_below(threshold);
        c.subject = Subject::Indicator {
            spec: IndicatorSpec::new("RSI").with_param("period", period),
            component: "RSI".into(),
        };
        c
    }

    async fn registered(alerts: Vec<Alert>) -> (AlertRegistry, Vec<RegisteredAlert>) {
        let reg = new_registry();
        for a in alerts {
            registry::activate(&reg, a, None).await;
        }
        let mut all = Vec::new();
        for (_, group) in registry::groups(&reg).await {
            all.extend(group);
        }
        (reg, all)
    }

    fn btc_1h() -> GroupKey {
        GroupKey {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::parse("1h").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_500_alerts_share_one_fetch_and_one_computation_per_indicator() {
        let alerts: Vec<Alert> = (0..500)
            .map(|i| {
                let condition = match i % 3 {
                    0 => rsi_below(30.0),
                    1 => rsi_with_period(40.0, 7.0),
                    _ => close_above(50.0),
                };
                flat_alert(&format!("a{i}"), "BTCUSDT", "1h", vec![condition])
            })
            .collect();
        let (_reg, entries) = registered(alerts).await;
        assert_eq!(entries.len(), 500);

        let market = FakeMarket::new(hourly(50, 100.0));
        let indicators = CountingIndicators::with("RSI", 25.0);

        let fired = evaluate_group(&market, &indicators, &btc_1h(), &entries, 300, Utc::now())
            .await
            .unwrap();

        assert_eq!(market.calls.load(Ordering::SeqCst), 1);
        assert_eq!(indicators.total_calls(), 2);
        assert!(indicators.calls.lock().unwrap().values().all(|n| *n == 1));
        assert_eq!(fired.len(), 500);
    }

    #[tokio::test]
    async fn test_same_bar_fires_once_then_again_on_next_bar() {
        let (_reg, entries) = registered(vec![flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)])]).await;
        let market = FakeMarket::new(hourly(20, 100.0));
        let indicators = CountingIndicators::with("RSI", 25.0);
        let key = btc_1h();

        let first = evaluate_group(&market, &indicators, &key, &entries, 300, Utc::now()).await.unwrap();
        let second = evaluate_group(&market, &indicators, &key, &entries, 300, Utc::now()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let last = *market.candles.lock().unwrap().last().unwrap();
        market.push(Candle {
            time: last.time + 3_600,
            ..last
        });
        let third = evaluate_group(&market, &indicators, &key, &entries, 300, Utc::now()).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].1.bar_time, last.time + 3_600);

        let rt = entries[0].runtime();
        assert_eq!(rt.trigger_count, 2);
        assert_eq!(rt.last_fired_at, Some(last.time + 3_600));
        assert!(rt.last_evaluated_at.is_some());
    }

    #[tokio::test]
    async fn test_unresolvable_condition_warns_once() {
        let (_reg, entries) = registered(vec![flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)])]).await;
        let market = FakeMarket::new(hourly(20, 100.0));
        let indicators = CountingIndicators::default();

        for _ in 0..MISSING_VALUE_WARN_AFTER {
            let fired = evaluate_group(&market, &indicators, &btc_1h(), &entries, 300, Utc::now())
                .await
                .unwrap();
            assert!(fired.is_empty());
        }
        let rt = entries[0].runtime();
        assert_eq!(rt.missing_streak, MISSING_VALUE_WARN_AFTER);
        assert!(rt.warned_unresolvable);
    }

    #[tokio::test]
    async fn test_empty_candles_is_missing_data() {
        let (_reg, entries) = registered(vec![flat_alert("a1", "BTCUSDT", "1h", vec![close_above(1.0)])]).await;
        let market = FakeMarket::new(Vec::new());
        let indicators = CountingIndicators::default();
        let err = evaluate_group(&market, &indicators, &btc_1h(), &entries, 300, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, MissingData::Empty));
    }

    #[tokio::test]
    async fn test_higher_timeframe_condition_reads_resampled_frame() {
        let mut condition = close_above(50.0);
        condition.timeframe = crate::condition::TimeframeRef::Specific(Timeframe::parse("4h").unwrap());
        let (_reg, entries) = registered(vec![flat_alert("a1", "BTCUSDT", "1h", vec![condition])]).await;
        let market = FakeMarket::new(hourly(16, 100.0));
        let indicators = CountingIndicators::default();

        let fired = evaluate_group(&market, &indicators, &btc_1h(), &entries, 300, Utc::now())
            .await
            .unwrap();
        assert_eq!(fired.len(), 1);
    }

    struct Harness {
        scheduler: Scheduler,
        store: Arc<MemoryStore>,
        market: Arc<FakeMarket>,
    }

    async fn harness(alerts: Vec<Alert>, failing: &[&str], timeframes: &[&str]) -> Harness {
        let sender = WebhookSender::new(
            Arc::new(ScriptedTransport::new(vec![200])),
            0,
            Duration::from_millis(1),
            Duration::from_secs(1),
        );
        harness_with_sender(alerts, failing, timeframes, sender).await
    }

    async fn harness_with_sender(
        alerts: Vec<Alert>,
        failing: &[&str],
        timeframes: &[&str],
        sender: WebhookSender,
    ) -> Harness {
        let (registry, _) = registered(alerts).await;
        let store = Arc::new(MemoryStore::default());
        let distributor = Distributor::new(
            Arc::new(MemoryBroker::new(64)),
            sender,
            store.clone(),
            registry.clone(),
            Arc::new(MemoryDedupStore::default()),
            "secret".into(),
        );
        let mut market = FakeMarket::new(hourly(20, 100.0));
        market.failing = failing.iter().map(|s| s.to_string()).collect();
        let market = Arc::new(market);

        let scheduler = Scheduler::new(
            registry,
            market.clone(),
            Arc::new(CountingIndicators::with("RSI", 25.0)),
            Arc::new(distributor),
            SchedulerSettings {
                interval: Duration::from_secs(60),
                timeframes: timeframes.iter().map(|s| Timeframe::parse(s).unwrap()).collect(),
                group_timeout: Duration::from_secs(5),
                max_concurrent_groups: 2,
                candle_limit: 300,
                max_inflight_dispatches: 16,
            },
        );
        Harness { scheduler, store, market }
    }

    #[tokio::test]
    async fn test_failed_group_does_not_affect_others() {
        let mut btc = flat_alert("btc", "BTCUSDT", "1h", vec![rsi_below(30.0)]);
        btc.action = AlertAction::InApp;
        let eth = flat_alert("eth", "ETHUSDT", "1h", vec![rsi_below(30.0)]);
        let h = harness(vec![btc, eth], &["ETHUSDT"], &["1h"]).await;

        let report = h.scheduler.tick(Utc::now()).await;
        assert_eq!(report.groups, 2);
        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.triggers, 1);
        assert_eq!(h.store.triggers().len(), 1);
        assert_eq!(h.store.triggers()[0].alert_id, "btc");
        assert_eq!(h.store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_ticks_on_same_bar_dispatch_once() {
        let h = harness(vec![flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)])], &[], &["1h"]).await;
        let first = h.scheduler.tick(Utc::now()).await;
        let second = h.scheduler.tick(Utc::now()).await;
        assert_eq!(first.triggers, 1);
        assert_eq!(second.triggers, 0);
        assert_eq!(h.store.triggers().len(), 1);
        assert_eq!(h.market.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unscanned_timeframe_is_skipped() {
        let h = harness(
            vec![
                flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)]),
                flat_alert("a2", "BTCUSDT", "2h", vec![rsi_below(30.0)]),
            ],
            &[],
            &["1h"],
        )
        .await;
        let report = h.scheduler.tick(Utc::now()).await;
        assert_eq!(report.groups, 1);
        assert_eq!(report.skipped_alerts, 1);
        assert_eq!(h.market.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_webhook_does_not_stretch_tick() {
        let hook = |id: &str| {
            let mut alert = flat_alert(id, "BTCUSDT", "1h", vec![rsi_below(30.0)]);
            alert.action = AlertAction::Webhook {
                url: format!("https://{id}.test/hook"),
                secret: None,
            };
            alert
        };
        let sender = WebhookSender::new(
            Arc::new(HangingTransport),
            3,
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        let h = harness_with_sender(vec![hook("a1"), hook("a2")], &[], &["1h"], sender).await;
        let budget = h.scheduler.settings.group_timeout * 2;

        let started = tokio::time::Instant::now();
        let report = h.scheduler.tick(Utc::now()).await;
        let elapsed = started.elapsed();

        assert_eq!(report.triggers, 2);
        assert!(elapsed <= budget, "tick took {elapsed:?}, budget {budget:?}");
        assert!(elapsed < h.scheduler.settings.interval);

        // Both alerts reached the distributor even though neither webhook answers.
        let mut fired: Vec<String> = h.store.triggers().into_iter().map(|t| t.alert_id).collect();
        fired.sort();
        assert_eq!(fired, vec!["a1", "a2"]);
    }
}
