//! Error taxonomy for the evaluation and dispatch pipeline.
//!
//! Plumbing code (tasks, storage, kafka) returns `anyhow::Result`; the types
//! here are the ones callers match on.

use crate::market::models::Timeframe;

/// A malformed alert, condition or playbook. Raised at registration time so
/// that nothing malformed ever reaches the evaluator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("alert definition must be a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("unknown timeframe `{0}`")]
    UnknownTimeframe(String),

    #[error("alert has neither conditions nor a playbook")]
    EmptyLogic,

    #[error("duplicate playbook entry id `{0}`")]
    DuplicateEntry(String),

    #[error("condition {index}: {reason}")]
    Condition { index: usize, reason: String },
}

/// No usable market data for a (symbol, timeframe) group this tick.
#[derive(Debug, thiserror::Error)]
pub enum MissingData {
    #[error("market data fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),

    #[error("market data source returned no candles")]
    Empty,

    #[error("group evaluation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Diagnostic for a condition whose operands could not be resolved.
/// The condition evaluates to `false`; the group is not failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MissingValue {
    #[error("no {0} frame in snapshot")]
    Frame(Timeframe),

    #[error("no bars in frame")]
    NoBars,

    #[error("no previous bar")]
    PreviousBar,

    #[error("indicator {0} was not computed")]
    Indicator(String),

    #[error("component `{component}` of {indicator} could not be resolved")]
    Component { indicator: String, component: String },
}

/// Outcome classes of a failed webhook delivery.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    /// Network failure, 5xx or 429 after the retry budget ran out.
    #[error("delivery failed after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },

    /// 410 Gone or another non-retryable 4xx.
    #[error("delivery rejected with status {status}")]
    Terminal { status: u16, attempts: u32 },
}

/// Reasons a receiver rejects a signed webhook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature older than {max_age_secs}s")]
    Expired { max_age_secs: u64 },

    #[error("signature mismatch")]
    BadSignature,

    #[error("signed body carries no eventId")]
    MissingEventId,

    #[error("event id header `{header}` does not match signed eventId `{signed}`")]
    EventIdMismatch { header: String, signed: String },

    #[error("event {0} already processed")]
    Duplicate(String),

    #[error("dedup store unavailable: {0}")]
    Store(String),
}
