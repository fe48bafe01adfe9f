pub mod alerts;
pub mod metrics;
pub mod status;
pub mod subscriptions;
pub mod webhooks;
