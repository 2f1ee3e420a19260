//! Core domain models and strongly-typed identifiers.
//!
//! Defines subscriptions, in-flight delivery jobs, delivery log rows, and
//! newtype ID wrappers for compile-time type safety. Includes database
//! serialization traits for the types that cross the Postgres boundary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed subscription identifier.
///
/// Wraps a UUID to prevent mixing with webhook IDs. Assigned once at
/// registration and stable for the subscription's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID (UUID v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed webhook identifier.
///
/// One webhook ID is minted per ingested event and follows it through every
/// delivery attempt. Distinct ingests always receive distinct IDs, even for
/// identical payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID (UUID v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for WebhookId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for WebhookId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for WebhookId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// A registered webhook subscription.
///
/// `target_url` is validated as an absolute http(s) URL at create/update
/// time. `secret` is an opaque pass-through value and must never appear in
/// logs. `events` is advisory metadata; the delivery pipeline does not
/// filter on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Absolute http(s) URL that receives deliveries.
    pub target_url: String,

    /// Optional opaque secret, forwarded to downstream tooling only.
    pub secret: Option<String>,

    /// Optional event tag set. Absence means all events are accepted.
    pub events: Option<Vec<String>>,
}

/// An in-flight delivery job.
///
/// Created at ingest with `attempt = 1`, consumed by exactly one worker
/// invocation, and re-created with `attempt + 1` when a transient failure is
/// retried. Jobs cross the queue boundary as JSON and are never persisted in
/// the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Subscription this event is addressed to.
    pub subscription_id: SubscriptionId,

    /// Decoded JSON payload as received at ingest.
    pub payload: serde_json::Value,

    /// Optional `X-Event-Type` header, forwarded verbatim.
    pub event_type: Option<String>,

    /// Optional `X-Signature` header, forwarded verbatim.
    pub signature: Option<String>,

    /// Webhook identity minted at ingest.
    pub webhook_id: WebhookId,

    /// 1-based attempt counter.
    pub attempt: u32,
}

impl DeliveryJob {
    /// Returns the job for the next attempt, with the counter incremented.
    pub fn next_attempt(&self) -> Self {
        Self { attempt: self.attempt + 1, ..self.clone() }
    }
}

/// Terminal classification of a single delivery attempt.
///
/// `FailedAttempt` is non-terminal; the final row for a webhook always
/// carries `Success` or `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// Target responded with a 2xx status.
    Success,

    /// Transient failure; a retry has been scheduled.
    #[serde(rename = "Failed Attempt")]
    FailedAttempt,

    /// Permanent failure after the attempt budget was exhausted.
    Failure,
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::FailedAttempt => write!(f, "Failed Attempt"),
            Self::Failure => write!(f, "Failure"),
        }
    }
}

impl DeliveryOutcome {
    /// True for the two terminal variants.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::FailedAttempt)
    }
}

impl sqlx::Type<PgDb> for DeliveryOutcome {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryOutcome {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "Success" => Ok(Self::Success),
            "Failed Attempt" => Ok(Self::FailedAttempt),
            "Failure" => Ok(Self::Failure),
            _ => Err(format!("invalid delivery outcome: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryOutcome {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Audit record of one delivery attempt.
///
/// Immutable once written. `target_url` is a snapshot of the URL actually
/// contacted, which may differ between attempts if the subscription was
/// updated mid-flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    /// Unique identifier for this row.
    pub id: Uuid,

    /// Webhook this attempt belongs to.
    pub webhook_id: WebhookId,

    /// Subscription the webhook was addressed to.
    pub subscription_id: SubscriptionId,

    /// URL contacted by this attempt.
    pub target_url: String,

    /// When the attempt completed (UTC).
    pub timestamp: DateTime<Utc>,

    /// 1-based attempt counter.
    pub attempt_number: u32,

    /// Classification of this attempt.
    pub outcome: DeliveryOutcome,

    /// HTTP status received, if a response arrived at all.
    pub status_code: Option<i32>,

    /// Error description for failed attempts.
    pub error: Option<String>,
}

impl DeliveryLog {
    /// Builds a log row for a completed attempt of `job`.
    pub fn for_attempt(
        job: &DeliveryJob,
        target_url: &str,
        timestamp: DateTime<Utc>,
        outcome: DeliveryOutcome,
        status_code: Option<i32>,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id: job.webhook_id,
            subscription_id: job.subscription_id,
            target_url: target_url.to_string(),
            timestamp,
            attempt_number: job.attempt,
            outcome,
            status_code,
            error,
        }
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for DeliveryLog {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        Ok(Self {
            id: row.try_get("id")?,
            webhook_id: row.try_get("webhook_id")?,
            subscription_id: row.try_get("subscription_id")?,
            target_url: row.try_get("target_url")?,
            timestamp: row.try_get("timestamp")?,
            attempt_number: {
                let val: i32 = row.try_get("attempt_number")?;
                val.try_into()
                    .map_err(|_| sqlx::Error::Decode("attempt_number cannot be negative".into()))?
            },
            outcome: row.try_get("outcome")?,
            status_code: row.try_get("status_code")?,
            error: row.try_get("error")?,
        })
    }
}
