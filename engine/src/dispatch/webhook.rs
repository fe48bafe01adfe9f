//! Signed webhook delivery and the matching receiver-side verification.
//!
//! Wire contract: `POST` with the canonical JSON body, `X-Signature:
//! t=<unix>,s=<hex>` where the signature is
//! `HMAC_SHA256(secret, "<unix>.<body>")`, and `X-Event-Id: <event id>`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use super::idempotency::DedupStore;
use super::TriggerEvent;
use crate::error::{DeliveryError, VerifyError};
use crate::metrics as m;

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const EVENT_ID_HEADER: &str = "X-Event-Id";
pub const PAYLOAD_VERSION: &str = "1";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Payload + signature
// ---------------------------------------------------------------------------

/// JSON with object keys sorted at every level and no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Event payload plus `eventId`, `timestamp` and `version`.
pub fn augment(mut payload: Value, event_id: &str, timestamp: i64) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("eventId".into(), Value::String(event_id.to_string()));
        map.insert("timestamp".into(), Value::from(timestamp));
        map.insert("version".into(), Value::String(PAYLOAD_VERSION.into()));
    }
    payload
}

fn mac(secret: &str, timestamp: i64, payload: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac
}

/// Hex `HMAC_SHA256(secret, "<timestamp>.<payload>")`.
pub fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
    hex::encode(mac(secret, timestamp, payload).finalize().into_bytes())
}

pub fn signature_header(timestamp: i64, signature: &str) -> String {
    format!("t={timestamp},s={signature}")
}

pub fn parse_signature_header(header: &str) -> Result<(i64, String), VerifyError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("s", v)) => signature = Some(v.to_string()),
            _ => {}
        }
    }
    match (timestamp, signature) {
        (Some(t), Some(s)) if !s.is_empty() => Ok((t, s)),
        _ => Err(VerifyError::MalformedHeader),
    }
}

/// Check the signature header against `payload`. Timestamps further than
/// `max_age` from `now` in either direction are rejected.
pub fn verify(payload: &str, header: &str, secret: &str, max_age: Duration, now: i64) -> Result<(), VerifyError> {
    let (timestamp, signature) = parse_signature_header(header)?;
    if now.abs_diff(timestamp) > max_age.as_secs() {
        return Err(VerifyError::Expired {
            max_age_secs: max_age.as_secs(),
        });
    }
    let expected = hex::decode(signature).map_err(|_| VerifyError::BadSignature)?;
    mac(secret, timestamp, payload)
        .verify_slice(&expected)
        .map_err(|_| VerifyError::BadSignature)
}

/// Receiver side: signature, freshness, then replay protection on the
/// `eventId` inside the signed body.
pub struct WebhookVerifier {
    secret: String,
    max_age: Duration,
    dedup: Arc<dyn DedupStore>,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, max_age: Duration, dedup: Arc<dyn DedupStore>) -> Self {
        Self {
            secret: secret.into(),
            max_age,
            dedup,
        }
    }

    /// Returns the verified event id. `header_event_id` is the `X-Event-Id`
    /// value and must match the signed `eventId`.
    pub async fn verify(
        &self,
        payload: &str,
        header: &str,
        header_event_id: &str,
        now: i64,
    ) -> Result<String, VerifyError> {
        verify(payload, header, &self.secret, self.max_age, now)?;

        let event_id = signed_event_id(payload)?;
        if event_id != header_event_id {
            return Err(VerifyError::EventIdMismatch {
                header: header_event_id.to_string(),
                signed: event_id,
            });
        }

        // Remember ids for twice the accepted age; anything older fails on expiry.
        match self.dedup.claim(&format!("webhook:{event_id}"), self.max_age * 2).await {
            Ok(true) => Ok(event_id),
            Ok(false) => Err(VerifyError::Duplicate(event_id)),
            Err(e) => Err(VerifyError::Store(e.to_string())),
        }
    }
}

fn signed_event_id(payload: &str) -> Result<String, VerifyError> {
    let body: Value = serde_json::from_str(payload).map_err(|_| VerifyError::MissingEventId)?;
    body.get("eventId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(VerifyError::MissingEventId)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body`, returning the response status. `Err` means no response.
    async fn post(&self, url: &str, headers: &[(&'static str, String)], body: String) -> Result<u16>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(&self, url: &str, headers: &[(&'static str, String)], body: String) -> Result<u16> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body);
        for (name, value) in headers {
            req = req.header(*name, value.as_str());
        }
        let resp = req.send().await?;
        Ok(resp.status().as_u16())
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Delivered,
    Retryable,
    Terminal,
}

/// 2xx delivered; 410 and other 4xx except 429 terminal; everything else retryable.
fn classify(status: u16) -> Class {
    match status {
        200..=299 => Class::Delivered,
        429 => Class::Retryable,
        400..=499 => Class::Terminal,
        _ => Class::Retryable,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub attempts: u32,
    /// Status of the last response, if any arrived.
    pub status: Option<u16>,
    pub result: Result<(), DeliveryError>,
}

pub struct WebhookSender {
    transport: Arc<dyn WebhookTransport>,
    max_retries: u32,
    backoff_base: Duration,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(transport: Arc<dyn WebhookTransport>, max_retries: u32, backoff_base: Duration, timeout: Duration) -> Self {
        Self {
            transport,
            max_retries,
            backoff_base,
            timeout,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Deliver with up to `max_retries` retries. Each attempt is re-signed
    /// with a fresh timestamp.
    pub async fn deliver(&self, url: &str, secret: &str, event: &TriggerEvent) -> DeliveryOutcome {
        let base = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                return DeliveryOutcome {
                    attempts: 0,
                    status: None,
                    result: Err(DeliveryError::Transient {
                        attempts: 0,
                        reason: e.to_string(),
                    }),
                }
            }
        };

        let total = self.max_retries + 1;
        let mut status = None;
        let mut reason = String::new();

        for attempt in 1..=total {
            let timestamp = Utc::now().timestamp();
            let body = canonical_json(&augment(base.clone(), &event.event_id, timestamp));
            let headers = [
                (SIGNATURE_HEADER, signature_header(timestamp, &sign(secret, timestamp, &body))),
                (EVENT_ID_HEADER, event.event_id.clone()),
            ];

            metrics::counter!(m::WEBHOOK_ATTEMPTS).increment(1);
            let class = match tokio::time::timeout(self.timeout, self.transport.post(url, &headers, body)).await {
                Ok(Ok(code)) => {
                    status = Some(code);
                    reason = format!("status {code}");
                    classify(code)
                }
                Ok(Err(e)) => {
                    reason = e.to_string();
                    Class::Retryable
                }
                Err(_) => {
                    reason = format!("timed out after {:?}", self.timeout);
                    Class::Retryable
                }
            };

            match class {
                Class::Delivered => {
                    metrics::counter!(m::WEBHOOK_DELIVERED).increment(1);
                    tracing::debug!(url, event_id = %event.event_id, attempt, "webhook_delivered");
                    return DeliveryOutcome {
                        attempts: attempt,
                        status,
                        result: Ok(()),
                    };
                }
                Class::Terminal => {
                    let code = status.unwrap_or_default();
                    metrics::counter!(m::WEBHOOK_FAILED, "reason" => "terminal").increment(1);
                    tracing::warn!(url, event_id = %event.event_id, status = code, "webhook_rejected");
                    return DeliveryOutcome {
                        attempts: attempt,
                        status,
                        result: Err(DeliveryError::Terminal {
                            status: code,
                            attempts: attempt,
                        }),
                    };
                }
                Class::Retryable if attempt < total => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(url, attempt, ?delay, %reason, "webhook_retry_scheduled");
                    tokio::time::sleep(delay).await;
                }
                Class::Retryable => {}
            }
        }

        metrics::counter!(m::WEBHOOK_FAILED, "reason" => "exhausted").increment(1);
        tracing::warn!(url, event_id = %event.event_id, attempts = total, %reason, "webhook_retries_exhausted");
        DeliveryOutcome {
            attempts: total,
            status,
            result: Err(DeliveryError::Transient {
                attempts: total,
                reason,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::condition::playbook::PlaybookOutcome;
    use crate::condition::test_utils::{flat_alert, rsi_below};
    use crate::dispatch::idempotency::MemoryDedupStore;
    use crate::market::models::Candle;

    #[derive(Debug, Clone)]
    pub struct Call {
        pub url: String,
        pub headers: Vec<(&'static str, String)>,
        pub body: String,
        pub at: tokio::time::Instant,
    }

    /// Replies with queued statuses (the last one repeats), or a fixed status per URL.
    pub struct ScriptedTransport {
        statuses: Mutex<VecDeque<u16>>,
        routes: Mutex<HashMap<String, u16>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedTransport {
        pub fn new(statuses: Vec<u16>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                routes: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn route(&self, url: &str, status: u16) {
            self.routes.lock().unwrap().insert(url.to_string(), status);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn post(&self, url: &str, headers: &[(&'static str, String)], body: String) -> Result<u16> {
            self.calls.lock().unwrap().push(Call {
                url: url.to_string(),
                headers: headers.to_vec(),
                body,
                at: tokio::time::Instant::now(),
            });
            if let Some(status) = self.routes.lock().unwrap().get(url) {
                return Ok(*status);
            }
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().copied()
            };
            Ok(status.unwrap_or(200))
        }
    }

    pub struct HangingTransport;

    #[async_trait]
    impl WebhookTransport for HangingTransport {
        async fn post(&self, _: &str, _: &[(&'static str, String)], _: String) -> Result<u16> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(200)
        }
    }

    fn sample_event() -> TriggerEvent {
        let alert = flat_alert("a1", "BTCUSDT", "1h", vec![rsi_below(30.0)]);
        let bar = Candle {
            time: 3_600,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        };
        TriggerEvent::new(&alert, &bar, &PlaybookOutcome::default(), Utc::now())
    }

    fn header<'a>(call: &'a Call, name: &str) -> &'a str {
        call.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"d": [1, {"z": true, "y": null}], "c": "x"}});
        assert_eq!(canonical_json(&v), r#"{"a":{"c":"x","d":[1,{"y":null,"z":true}]},"b":1}"#);
    }

    #[test]
    fn test_augment_adds_envelope_fields() {
        let v = augment(json!({"symbol": "BTCUSDT"}), "a1:3600", 1_700_000_000);
        assert_eq!(v["eventId"], "a1:3600");
        assert_eq!(v["timestamp"], 1_700_000_000);
        assert_eq!(v["version"], PAYLOAD_VERSION);
    }

    #[test]
    fn test_signature_roundtrip() {
        let t = 1_700_000_000;
        let payload = r#"{"eventId":"a1:3600","price":1.5}"#;
        let header = signature_header(t, &sign("secret", t, payload));
        let max_age = Duration::from_secs(300);

        assert!(verify(payload, &header, "secret", max_age, t).is_ok());
        assert!(verify(payload, &header, "secret", max_age, t + 300).is_ok());
        assert_eq!(
            verify(payload, &header, "secret", max_age, t + 301),
            Err(VerifyError::Expired { max_age_secs: 300 })
        );
    }

    #[test]
    fn test_tampered_payload_fails() {
        let t = 1_700_000_000;
        let payload = r#"{"eventId":"a1:3600","price":1.5}"#;
        let header = signature_header(t, &sign("secret", t, payload));
        let mut bytes = payload.as_bytes().to_vec();
        bytes[20] ^= 0x01;
        let tampered = String::from_utf8(bytes).unwrap();

        let max_age = Duration::from_secs(300);
        assert_eq!(verify(&tampered, &header, "secret", max_age, t), Err(VerifyError::BadSignature));
        assert_eq!(verify(payload, &header, "other", max_age, t), Err(VerifyError::BadSignature));
    }

    #[test]
    fn test_malformed_header() {
        let max_age = Duration::from_secs(300);
        for header in ["", "t=abc,s=00", "s=00", "t=1", "t=1,s="] {
            assert_eq!(verify("{}", header, "k", max_age, 1), Err(VerifyError::MalformedHeader), "{header}");
        }
        assert_eq!(verify("{}", "t=1,s=zz", "k", max_age, 1), Err(VerifyError::BadSignature));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(204), Class::Delivered);
        assert_eq!(classify(410), Class::Terminal);
        assert_eq!(classify(400), Class::Terminal);
        assert_eq!(classify(429), Class::Retryable);
        assert_eq!(classify(503), Class::Retryable);
        assert_eq!(classify(302), Class::Retryable);
    }

    #[tokio::test]
    async fn test_delivered_request_verifies() {
        let transport = Arc::new(ScriptedTransport::new(vec![200]));
        let sender = WebhookSender::new(transport.clone(), 3, Duration::from_secs(1), Duration::from_secs(10));
        let event = sample_event();

        let outcome = sender.deliver("https://hook.test", "s3cret", &event).await;
        assert_eq!(outcome.result, Ok(()));
        assert_eq!(outcome.attempts, 1);

        let calls = transport.calls();
        let call = &calls[0];
        assert_eq!(call.url, "https://hook.test");
        assert_eq!(header(call, EVENT_ID_HEADER), "a1:3600");
        let now = Utc::now().timestamp();
        assert!(verify(&call.body, header(call, SIGNATURE_HEADER), "s3cret", Duration::from_secs(300), now).is_ok());

        let body: Value = serde_json::from_str(&call.body).unwrap();
        assert_eq!(body["eventId"], "a1:3600");
        assert_eq!(body["version"], "1");
        assert_eq!(body["symbol"], "BTCUSDT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_500_exhausts_retries_with_growing_delay() {
        let transport = Arc::new(ScriptedTransport::new(vec![500]));
        let sender = WebhookSender::new(transport.clone(), 3, Duration::from_secs(1), Duration::from_secs(10));

        let outcome = sender.deliver("https://hook.test", "k", &sample_event()).await;
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.status, Some(500));
        assert!(matches!(outcome.result, Err(DeliveryError::Transient { attempts: 4, .. })));

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
        assert_eq!(gaps, vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)]);
        assert!(gaps.windows(2).all(|g| g[1] > g[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gone_is_terminal() {
        let transport = Arc::new(ScriptedTransport::new(vec![410]));
        let sender = WebhookSender::new(transport.clone(), 3, Duration::from_secs(1), Duration::from_secs(10));
        let outcome = sender.deliver("https://hook.test", "k", &sample_event()).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result, Err(DeliveryError::Terminal { status: 410, attempts: 1 }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_delivered() {
        let transport = Arc::new(ScriptedTransport::new(vec![429, 503, 200]));
        let sender = WebhookSender::new(transport.clone(), 3, Duration::from_secs(1), Duration::from_secs(10));
        let outcome = sender.deliver("https://hook.test", "k", &sample_event()).await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let sender = WebhookSender::new(Arc::new(HangingTransport), 1, Duration::from_secs(1), Duration::from_secs(10));
        let outcome = sender.deliver("https://hook.test", "k", &sample_event()).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.status, None);
        assert!(matches!(outcome.result, Err(DeliveryError::Transient { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_verifier_rejects_replay() {
        let verifier = WebhookVerifier::new("k", Duration::from_secs(300), Arc::new(MemoryDedupStore::default()));
        let now = 1_700_000_000;
        let payload = r#"{"eventId":"a1:3600"}"#;
        let header = signature_header(now, &sign("k", now, payload));

        assert_eq!(verifier.verify(payload, &header, "a1:3600", now).await, Ok("a1:3600".into()));
        assert_eq!(
            verifier.verify(payload, &header, "a1:3600", now + 1).await,
            Err(VerifyError::Duplicate("a1:3600".into()))
        );
    }

    #[tokio::test]
    async fn test_verifier_ignores_relabelled_event_id() {
        let verifier = WebhookVerifier::new("k", Duration::from_secs(300), Arc::new(MemoryDedupStore::default()));
        let now = 1_700_000_000;
        let payload = r#"{"eventId":"a1:3600","symbol":"BTCUSDT"}"#;
        let header = signature_header(now, &sign("k", now, payload));

        assert!(verifier.verify(payload, &header, "a1:3600", now).await.is_ok());
        assert_eq!(
            verifier.verify(payload, &header, "forged-id", now + 1).await,
            Err(VerifyError::EventIdMismatch {
                header: "forged-id".into(),
                signed: "a1:3600".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_verifier_requires_signed_event_id() {
        let verifier = WebhookVerifier::new("k", Duration::from_secs(300), Arc::new(MemoryDedupStore::default()));
        let now = 1_700_000_000;
        for payload in [r#"{"symbol":"BTCUSDT"}"#, r#"{"eventId":""}"#, "not json"] {
            let header = signature_header(now, &sign("k", now, payload));
            assert_eq!(
                verifier.verify(payload, &header, "a1:3600", now).await,
                Err(VerifyError::MissingEventId),
                "{payload}"
            );
        }
    }
}
