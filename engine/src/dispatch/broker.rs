use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::broadcast;

pub const TOPIC_PREFIX: &str = "condition.";

/// Deterministic topic for a condition id.
pub fn topic_for(condition_id: &str) -> String {
    format!("{TOPIC_PREFIX}{condition_id}")
}

/// Exact topic or `prefix*` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    Exact(String),
    Prefix(String),
}

impl TopicPattern {
    pub fn parse(s: &str) -> Self {
        match s.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(s.to_string()),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(t) => t == topic,
            Self::Prefix(p) => topic.starts_with(p.as_str()),
        }
    }

    /// librdkafka treats subscriptions starting with `^` as regexes.
    pub fn kafka_subscription(&self) -> String {
        match self {
            Self::Exact(t) => t.clone(),
            Self::Prefix(p) => format!("^{}.*", regex_escape(p)),
        }
    }
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()>;
}

// ── Kafka ──

pub struct KafkaBroker {
    producer: FutureProducer,
}

impl KafkaBroker {
    pub fn new(producer: FutureProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| anyhow::anyhow!("kafka send to {topic} failed: {err}"))?;
        Ok(())
    }
}

// ── In-process ──

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

/// Broadcast-backed broker for single-process deployments and tests.
pub struct MemoryBroker {
    tx: broadcast::Sender<BrokerMessage>,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self, pattern: TopicPattern) -> MemorySubscription {
        MemorySubscription {
            rx: self.tx.subscribe(),
            pattern,
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        // No receivers is not an error: nobody subscribed yet.
        let _ = self.tx.send(BrokerMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

pub struct MemorySubscription {
    rx: broadcast::Receiver<BrokerMessage>,
    pattern: TopicPattern,
}

impl MemorySubscription {
    /// Next message matching the pattern; `None` once the broker is gone.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.pattern.matches(&msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "broker_subscriber_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
