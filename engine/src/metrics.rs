use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// ---------------------------------------------------------------------------
// Metric name constants
// ---------------------------------------------------------------------------

pub const TICKS_TOTAL: &str = "alertflow_ticks_total";
pub const TICK_DURATION: &str = "alertflow_tick_duration_seconds";
pub const UPTIME_SECONDS: &str = "alertflow_uptime_seconds";
pub const GROUPS_EVALUATED: &str = "alertflow_groups_evaluated_total";
pub const GROUP_FAILURES: &str = "alertflow_group_failures_total";
pub const GROUP_EVAL_DURATION: &str = "alertflow_group_eval_duration_seconds";
pub const MARKET_FETCHES: &str = "alertflow_market_fetches_total";
pub const INDICATOR_COMPUTATIONS: &str = "alertflow_indicator_computations_total";
pub const TRIGGERS_TOTAL: &str = "alertflow_triggers_total";
pub const FIRES_SUPPRESSED: &str = "alertflow_fires_suppressed_total";
pub const TRIGGERS_DISPATCHED: &str = "alertflow_triggers_dispatched_total";
pub const DISPATCHES_DETACHED: &str = "alertflow_dispatches_detached_total";
pub const BROKER_PUBLISHED: &str = "alertflow_broker_published_total";
pub const BROKER_PUBLISH_FAILED: &str = "alertflow_broker_publish_failed_total";
pub const WEBHOOK_ATTEMPTS: &str = "alertflow_webhook_attempts_total";
pub const WEBHOOK_DELIVERED: &str = "alertflow_webhook_delivered_total";
pub const WEBHOOK_FAILED: &str = "alertflow_webhook_failed_total";
pub const BOT_TRIGGERS_QUEUED: &str = "alertflow_bot_triggers_queued_total";
pub const ACTIVE_ALERTS: &str = "alertflow_active_alerts";
pub const ACTIVE_SUBSCRIPTIONS: &str = "alertflow_active_subscriptions";
pub const TASK_RESTARTS: &str = "alertflow_task_restarts_total";

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

pub fn init() -> PrometheusHandle {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(GROUP_EVAL_DURATION.to_string()),
            &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .expect("failed to set group eval buckets")
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(TICK_DURATION.to_string()),
            &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .expect("failed to set tick buckets");

    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    describe_metrics();

    handle
}

fn describe_metrics() {
    metrics::describe_counter!(TICKS_TOTAL, "Scheduler ticks started");
    metrics::describe_histogram!(TICK_DURATION, "Wall time of one scheduler tick (seconds)");
    metrics::describe_gauge!(UPTIME_SECONDS, "Seconds since the engine started");
    metrics::describe_counter!(GROUPS_EVALUATED, "(symbol, timeframe) groups evaluated");
    metrics::describe_counter!(GROUP_FAILURES, "Groups skipped for missing data or timeout, by reason");
    metrics::describe_histogram!(GROUP_EVAL_DURATION, "Fetch + evaluate time for one group (seconds)");
    metrics::describe_counter!(MARKET_FETCHES, "Candle fetches issued to the market data source");
    metrics::describe_counter!(INDICATOR_COMPUTATIONS, "Distinct indicator computations per tick");
    metrics::describe_counter!(TRIGGERS_TOTAL, "Alerts that fired");
    metrics::describe_counter!(FIRES_SUPPRESSED, "Satisfied alerts suppressed by the per-bar debounce");
    metrics::describe_counter!(TRIGGERS_DISPATCHED, "Trigger events fanned out to subscribers");
    metrics::describe_counter!(DISPATCHES_DETACHED, "Dispatches still running when their group's budget ran out");
    metrics::describe_counter!(BROKER_PUBLISHED, "Trigger events published to the broker");
    metrics::describe_counter!(BROKER_PUBLISH_FAILED, "Broker publish failures");
    metrics::describe_counter!(WEBHOOK_ATTEMPTS, "Webhook HTTP attempts, retries included");
    metrics::describe_counter!(WEBHOOK_DELIVERED, "Webhooks acknowledged with 2xx");
    metrics::describe_counter!(WEBHOOK_FAILED, "Webhooks given up on, by reason");
    metrics::describe_counter!(BOT_TRIGGERS_QUEUED, "Bot triggers queued by the router");
    metrics::describe_gauge!(ACTIVE_ALERTS, "Alerts in the evaluation registry");
    metrics::describe_gauge!(ACTIVE_SUBSCRIPTIONS, "Active subscriptions in the registry");
    metrics::describe_counter!(TASK_RESTARTS, "Supervised task restarts, by task");
}
