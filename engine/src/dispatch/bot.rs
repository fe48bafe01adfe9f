//! Bot router: one pattern subscription on `condition.*`, routed by the
//! payload's bot targets instead of a topic per bot.

use std::sync::Arc;

use anyhow::Result;
use rdkafka::Message;

use super::broker::{MemorySubscription, TopicPattern, TOPIC_PREFIX};
use super::TriggerEvent;
use crate::kafka;
use crate::metrics as m;
use crate::storage::Store;

pub fn all_conditions() -> TopicPattern {
    TopicPattern::Prefix(TOPIC_PREFIX.to_string())
}

/// Queue the event for every bot it targets. Returns how many were newly queued.
pub async fn route(store: &dyn Store, event: &TriggerEvent) -> Result<usize> {
    let mut queued = 0;
    for bot_id in &event.bot_targets {
        if store.enqueue_bot_trigger(bot_id, event).await? {
            queued += 1;
            metrics::counter!(m::BOT_TRIGGERS_QUEUED).increment(1);
            tracing::info!(bot_id = %bot_id, event_id = %event.event_id, "bot_trigger_queued");
        } else {
            tracing::debug!(bot_id = %bot_id, event_id = %event.event_id, "bot_trigger_already_queued");
        }
    }
    Ok(queued)
}

async fn handle_payload(store: &dyn Store, payload: &str) {
    let event: TriggerEvent = match serde_json::from_str(payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "trigger_deserialize_failed");
            return;
        }
    };
    if event.bot_targets.is_empty() {
        return;
    }
    if let Err(e) = route(store, &event).await {
        tracing::warn!(event_id = %event.event_id, error = %e, "bot_route_failed");
    }
}

pub async fn run_kafka(brokers: &str, store: Arc<dyn Store>) -> Result<()> {
    let consumer = kafka::consumer::create_pattern_consumer(brokers, "alertflow-bot-router", &[all_conditions()])?;
    tracing::info!("bot_router_started");

    loop {
        let message = match consumer.recv().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "kafka_recv_error");
                continue;
            }
        };
        let Some(payload) = message.payload() else {
            continue;
        };
        let Ok(payload_str) = std::str::from_utf8(payload) else {
            continue;
        };
        handle_payload(store.as_ref(), payload_str).await;
    }
}

pub async fn run_memory(mut subscription: MemorySubscription, store: Arc<dyn Store>) -> Result<()> {
    tracing::info!("bot_router_started");
    while let Some(msg) = subscription.recv().await {
        handle_payload(store.as_ref(), &msg.payload).await;
    }
    anyhow::bail!("in-memory broker closed")
}
