pub mod bot;
pub mod broker;
pub mod idempotency;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use self::broker::{topic_for, Broker};
use self::idempotency::DedupStore;
use self::webhook::{DeliveryOutcome, WebhookSender};
use crate::condition::playbook::PlaybookOutcome;
use crate::condition::registry::{self, AlertRegistry};
use crate::condition::{Alert, AlertAction};
use crate::market::models::{Candle, Timeframe};
use crate::metrics as m;
use crate::storage::{DeliveryAudit, Notification, Store};

// ---------------------------------------------------------------------------
// Trigger event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerValue {
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

/// Published once per (alert, bar). `event_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub event_id: String,
    pub condition_id: String,
    pub alert_id: String,
    pub owner_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub triggered_at: DateTime<Utc>,
    pub bar_time: i64,
    pub trigger_value: TriggerValue,
    pub satisfied_condition_ids: Vec<String>,
    pub failed_condition_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bot_targets: Vec<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

pub fn event_id(alert_id: &str, bar_time: i64) -> String {
    format!("{alert_id}:{bar_time}")
}

impl TriggerEvent {
    pub fn new(alert: &Alert, bar: &Candle, outcome: &PlaybookOutcome, now: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id(&alert.id, bar.time),
            condition_id: alert.id.clone(),
            alert_id: alert.id.clone(),
            owner_id: alert.owner_id.clone(),
            symbol: alert.symbol.clone(),
            timeframe: alert.timeframe,
            triggered_at: now,
            bar_time: bar.time,
            trigger_value: TriggerValue {
                price: bar.close,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                volume: bar.volume,
            },
            satisfied_condition_ids: outcome.satisfied.clone(),
            failed_condition_ids: outcome.failed.clone(),
            bot_targets: Vec::new(),
            published_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriberKind {
    Webhook { url: String, secret: Option<String> },
    InApp { user_id: String },
    Bot { bot_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub subscriber_id: String,
    pub condition_id: String,
    pub kind: SubscriberKind,
    pub active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Distributor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub duplicate: bool,
    pub published: bool,
    pub webhooks_delivered: usize,
    pub webhooks_failed: usize,
    pub notifications: usize,
}

struct WebhookTarget {
    subscription_id: Option<String>,
    url: String,
    secret: String,
}

pub struct Distributor {
    broker: Arc<dyn Broker>,
    webhooks: WebhookSender,
    store: Arc<dyn Store>,
    registry: AlertRegistry,
    dedup: Arc<dyn DedupStore>,
    default_secret: String,
    dedup_ttl: Duration,
}

impl Distributor {
    pub fn new(
        broker: Arc<dyn Broker>,
        webhooks: WebhookSender,
        store: Arc<dyn Store>,
        registry: AlertRegistry,
        dedup: Arc<dyn DedupStore>,
        default_secret: String,
    ) -> Self {
        Self {
            broker,
            webhooks,
            store,
            registry,
            dedup,
            default_secret,
            dedup_ttl: Duration::from_secs(24 * 3600),
        }
    }

    /// Fan a trigger out to the broker, webhooks and notification store.
    /// A replayed event id is dropped before any side effect.
    pub async fn dispatch(&self, alert: &Alert, mut event: TriggerEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        match self.dedup.claim(&format!("dispatch:{}", event.event_id), self.dedup_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(event_id = %event.event_id, "trigger_duplicate_skipped");
                report.duplicate = true;
                return report;
            }
            // Dispatch anyway; receivers dedup on the event id.
            Err(e) => tracing::warn!(event_id = %event.event_id, error = %e, "dedup_claim_failed"),
        }

        let subscriptions = registry::active_subscriptions(&self.registry, &event.condition_id).await;

        let mut webhooks: Vec<WebhookTarget> = Vec::new();
        let mut notify: Vec<String> = Vec::new();
        let mut bots: Vec<String> = Vec::new();

        match &alert.action {
            AlertAction::Webhook { url, secret } => webhooks.push(WebhookTarget {
                subscription_id: None,
                url: url.clone(),
                secret: secret.clone().unwrap_or_else(|| self.default_secret.clone()),
            }),
            AlertAction::InApp => notify.push(alert.owner_id.clone()),
            AlertAction::Bot { bot_id } => bots.push(bot_id.clone()),
            AlertAction::None => {}
        }
        for s in &subscriptions {
            match &s.kind {
                SubscriberKind::Webhook { url, secret } => webhooks.push(WebhookTarget {
                    subscription_id: Some(s.id.clone()),
                    url: url.clone(),
                    secret: secret.clone().unwrap_or_else(|| self.default_secret.clone()),
                }),
                SubscriberKind::InApp { user_id } => notify.push(user_id.clone()),
                SubscriberKind::Bot { bot_id } => bots.push(bot_id.clone()),
            }
        }
        notify.sort();
        notify.dedup();
        bots.sort();
        bots.dedup();

        event.bot_targets = bots;
        event.published_at = Some(Utc::now());

        if let Err(e) = self.store.record_trigger(&event).await {
            tracing::warn!(event_id = %event.event_id, error = %e, "trigger_audit_failed");
        }

        report.published = self.publish(&event).await;

        let deliveries = join_all(webhooks.iter().map(|t| self.webhooks.deliver(&t.url, &t.secret, &event)));
        let notifications = join_all(notify.iter().map(|user_id| self.notify(user_id, &event)));
        let (deliveries, notifications) = tokio::join!(deliveries, notifications);

        for (target, outcome) in webhooks.iter().zip(deliveries) {
            if outcome.result.is_ok() {
                report.webhooks_delivered += 1;
            } else {
                report.webhooks_failed += 1;
            }
            self.audit_delivery(&event, target, &outcome).await;
        }
        report.notifications = notifications.into_iter().filter(|ok| *ok).count();

        let now = Utc::now();
        registry::touch_subscriptions(&self.registry, &event.condition_id, now).await;
        for s in &subscriptions {
            if let Err(e) = self.store.touch_subscription(&s.id, now).await {
                tracing::debug!(subscription_id = %s.id, error = %e, "subscription_touch_failed");
            }
        }

        metrics::counter!(m::TRIGGERS_DISPATCHED).increment(1);
        tracing::info!(
            event_id = %event.event_id,
            subscribers = subscriptions.len(),
            webhooks_delivered = report.webhooks_delivered,
            webhooks_failed = report.webhooks_failed,
            "trigger_dispatched"
        );
        report
    }

    async fn publish(&self, event: &TriggerEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(event_id = %event.event_id, error = %e, "trigger_serialize_failed");
                return false;
            }
        };
        let topic = topic_for(&event.condition_id);
        match self.broker.publish(&topic, &event.symbol, &payload).await {
            Ok(()) => {
                metrics::counter!(m::BROKER_PUBLISHED).increment(1);
                true
            }
            Err(e) => {
                metrics::counter!(m::BROKER_PUBLISH_FAILED).increment(1);
                tracing::warn!(%topic, error = %e, "broker_publish_failed");
                false
            }
        }
    }

    /// Best effort, no retry.
    async fn notify(&self, user_id: &str, event: &TriggerEvent) -> bool {
        let notification = Notification {
            user_id: user_id.to_string(),
            alert_id: event.alert_id.clone(),
            event_id: event.event_id.clone(),
            title: format!("{} alert triggered", event.symbol),
            body: format!(
                "{} {} at {:.8}",
                event.symbol, event.timeframe, event.trigger_value.price
            ),
            created_at: event.triggered_at,
        };
        match self.store.insert_notification(&notification).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "notification_insert_failed");
                false
            }
        }
    }

    async fn audit_delivery(&self, event: &TriggerEvent, target: &WebhookTarget, outcome: &DeliveryOutcome) {
        let audit = DeliveryAudit {
            event_id: event.event_id.clone(),
            alert_id: event.alert_id.clone(),
            subscription_id: target.subscription_id.clone(),
            url: target.url.clone(),
            attempts: outcome.attempts,
            status_code: outcome.status,
            delivered: outcome.result.is_ok(),
            error: outcome.result.as_ref().err().map(ToString::to_string),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_delivery(&audit).await {
            tracing::warn!(event_id = %event.event_id, error = %e, "delivery_audit_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::broker::MemoryBroker;
    use super::idempotency::MemoryDedupStore;
    use super::webhook::tests::ScriptedTransport;
    use super::*;
    use crate::condition::registry::new_registry;
    use crate::condition::test_utils::{flat_alert, rsi_below};
    use crate::storage::memory::MemoryStore;

    fn bar() -> Candle {
        Candle {
            time: 7_200,
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 105.0,
            volume: 12.0,
        }
    }

    fn outcome() -> PlaybookOutcome {
        PlaybookOutcome {
            triggered: true,
            satisfied: vec!["0".into()],
            ..Default::default()
        }
    }

    struct Harness {
        distributor: Distributor,
        store: Arc<MemoryStore>,
        broker: Arc<MemoryBroker>,
        transport: Arc<ScriptedTransport>,
        registry: AlertRegistry,
    }

    fn harness(statuses: Vec<u16>) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let broker = Arc::new(MemoryBroker::new(64));
        let transport = Arc::new(ScriptedTransport::new(statuses));
        let registry = new_registry();
        let sender = WebhookSender::new(transport.clone(), 0, Duration::from_millis(1), Duration::from_secs(1));
        let distributor = Distributor::new(
            broker.clone(),
            sender,
            store.clone(),
            registry.clone(),
            Arc::new(MemoryDedupStore::default()),
            "default-secret".into(),
        );
        Harness {
            distributor,
            store,
            broker,
            transport,
            registry,
        }
    }

    #[test]
    fn test_event_id_is_deterministic() {
        let alert = flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)]);
        let now = Utc::now();
        let e1 = TriggerEvent::new(&alert, &bar(), &outcome(), now);
        let e2 = TriggerEvent::new(&alert, &bar(), &outcome(), now + chrono::Duration::seconds(5));
        assert_eq!(e1.event_id, "a1:7200");
        assert_eq!(e1.event_id, e2.event_id);
    }

    #[test]
    fn test_event_json_shape() {
        let alert = flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)]);
        let event = TriggerEvent::new(&alert, &bar(), &outcome(), Utc::now());
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["conditionId"], "a1");
        assert_eq!(v["timeframe"], "1h");
        assert_eq!(v["triggerValue"]["price"], 105.0);
        assert_eq!(v["satisfiedConditionIds"][0], "0");
        assert!(v.get("botTargets").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_to_all_subscribers() {
        let h = harness(vec![200, 200]);
        let mut alert = flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)]);
        alert.action = AlertAction::InApp;

        for (id, kind) in [
            ("s1", SubscriberKind::Webhook { url: "https://one.test".into(), secret: Some("s".into()) }),
            ("s2", SubscriberKind::Webhook { url: "https://two.test".into(), secret: None }),
            ("s3", SubscriberKind::Bot { bot_id: "bot-9".into() }),
        ] {
            registry::subscribe(
                &h.registry,
                Subscription {
                    id: id.into(),
                    subscriber_id: format!("sub-{id}"),
                    condition_id: "a1".into(),
                    kind,
                    active: true,
                    last_triggered_at: None,
                },
            )
            .await;
        }

        let mut sub = h.broker.subscribe(broker::TopicPattern::parse("condition.*"));
        let event = TriggerEvent::new(&alert, &bar(), &outcome(), Utc::now());
        let report = h.distributor.dispatch(&alert, event).await;

        assert!(!report.duplicate);
        assert!(report.published);
        assert_eq!(report.webhooks_delivered, 2);
        assert_eq!(report.notifications, 1);
        assert_eq!(h.transport.calls().len(), 2);

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.topic, "condition.a1");
        let published: TriggerEvent = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(published.bot_targets, vec!["bot-9".to_string()]);

        assert_eq!(h.store.triggers().len(), 1);
        assert_eq!(h.store.deliveries().len(), 2);
        assert_eq!(h.store.notifications().len(), 1);
        let active = registry::active_subscriptions(&h.registry, "a1").await;
        assert!(active.iter().all(|s| s.last_triggered_at.is_some()));
    }

    #[tokio::test]
    async fn test_replayed_event_is_dropped() {
        let h = harness(vec![200]);
        let mut alert = flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)]);
        alert.action = AlertAction::Webhook {
            url: "https://hook.test".into(),
            secret: None,
        };
        let event = TriggerEvent::new(&alert, &bar(), &outcome(), Utc::now());

        let first = h.distributor.dispatch(&alert, event.clone()).await;
        let second = h.distributor.dispatch(&alert, event).await;
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(h.transport.calls().len(), 1);
        assert_eq!(h.store.triggers().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_does_not_block_other_targets() {
        let h = harness(vec![200]);
        h.transport.route("https://gone.test", 410);
        let mut alert = flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)]);
        alert.action = AlertAction::Webhook {
            url: "https://gone.test".into(),
            secret: None,
        };
        registry::subscribe(
            &h.registry,
            Subscription {
                id: "s1".into(),
                subscriber_id: "u1".into(),
                condition_id: "a1".into(),
                kind: SubscriberKind::Webhook {
                    url: "https://ok.test".into(),
                    secret: None,
                },
                active: true,
                last_triggered_at: None,
            },
        )
        .await;

        let event = TriggerEvent::new(&alert, &bar(), &outcome(), Utc::now());
        let report = h.distributor.dispatch(&alert, event).await;
        assert_eq!(report.webhooks_failed, 1);
        assert_eq!(report.webhooks_delivered, 1);

        let audits = h.store.deliveries();
        let failed = audits.iter().find(|a| !a.delivered).unwrap();
        assert_eq!(failed.status_code, Some(410));
        assert!(failed.error.as_deref().unwrap().contains("410"));
    }
}
