use anyhow::Result;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};

use crate::dispatch::broker::TopicPattern;

/// Consumer subscribed to exact topics and/or `prefix*` patterns. Pattern
/// subscriptions pick up topics created after startup.
pub fn create_pattern_consumer(brokers: &str, group_id: &str, patterns: &[TopicPattern]) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("auto.offset.reset", "latest")
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "true")
        .set("topic.metadata.refresh.interval.ms", "30000")
        .create()?;
    let subscriptions: Vec<String> = patterns.iter().map(TopicPattern::kafka_subscription).collect();
    let topics: Vec<&str> = subscriptions.iter().map(String::as_str).collect();
    consumer.subscribe(&topics)?;
    tracing::info!(group_id, ?topics, "kafka_consumer_created");
    Ok(consumer)
}
