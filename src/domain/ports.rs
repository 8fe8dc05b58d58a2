use super::money::Amount;
use super::payment_intent::{ConfirmationNext, PaymentIntent, PaymentIntentId};
use super::payment_intent_event::PaymentIntentEvent;
use crate::error::{KeyServiceError, PaymentIntentError, TokenError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Opaque symmetric signing primitive, addressed by key id.
#[async_trait]
pub trait KeyService: Send + Sync {
    async fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, KeyServiceError>;
    async fn verify(
        &self,
        key_id: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), KeyServiceError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Dedup key for single-use enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplayKey {
    pub order_processing_id: String,
    pub jti: String,
}

/// The set of tokens a relay has already accepted.
///
/// `check_and_insert` must be atomic: two concurrent calls with the same key
/// can never both return `true`. Entries whose token expired at or before
/// `now` may be dropped by any call that is given `now`.
pub trait ReplayCache: Send + Sync {
    /// Returns `true` if the key was unseen and is now recorded.
    fn check_and_insert(
        &self,
        key: ReplayKey,
        expires_at: i64,
        now: i64,
    ) -> Result<bool, TokenError>;
    /// Drops entries whose token expired at or before `now`; returns how many.
    fn evict_expired(&self, now: i64) -> Result<usize, TokenError>;
    fn clear(&self) -> Result<(), TokenError>;
    fn len(&self) -> Result<usize, TokenError>;
    fn is_empty(&self) -> Result<bool, TokenError> {
        Ok(self.len()? == 0)
    }
}

/// Append-only store of payment intent events and the snapshots they produced.
///
/// The log does not check seq_nr contiguity; the aggregate's transitions own
/// that invariant.
#[async_trait]
pub trait PaymentIntentEventLog: Send + Sync {
    async fn save(
        &self,
        event: PaymentIntentEvent,
        aggregate: PaymentIntent,
    ) -> Result<(), PaymentIntentError>;
    /// The most recently appended snapshot for `id`.
    async fn find_latest(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentIntentError>;
    /// Events for `id` in append order.
    async fn events(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Vec<PaymentIntentEvent>, PaymentIntentError>;
}

/// The external payment service provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn confirm(&self, intent: &PaymentIntent)
    -> Result<ConfirmationNext, PaymentIntentError>;
    async fn capture(
        &self,
        intent: &PaymentIntent,
        amount: Amount,
    ) -> Result<(), PaymentIntentError>;
}

pub type KeyServiceRef = Arc<dyn KeyService>;
pub type ClockRef = Arc<dyn Clock>;
pub type ReplayCacheRef = Arc<dyn ReplayCache>;
pub type EventLogBox = Box<dyn PaymentIntentEventLog>;
pub type PaymentProviderBox = Box<dyn PaymentProvider>;
