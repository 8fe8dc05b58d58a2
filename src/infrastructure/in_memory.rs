use crate::domain::payment_intent::{PaymentIntent, PaymentIntentId};
use crate::domain::payment_intent_event::PaymentIntentEvent;
use crate::domain::ports::{PaymentIntentEventLog, ReplayCache, ReplayKey};
use crate::error::{PaymentIntentError, TokenError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;

/// A replay cache guarded by a single mutex.
///
/// Each entry remembers the `exp` of the token it came from. Inserts sweep
/// out expired entries once the earliest tracked `exp` has passed, so the
/// cache stays bounded by the tokens still live. Eviction is safe: an
/// expired token fails claim validation before the cache is consulted.
#[derive(Default)]
pub struct InMemoryReplayCache {
    state: Mutex<SeenTokens>,
}

#[derive(Default)]
struct SeenTokens {
    entries: HashMap<ReplayKey, i64>,
    earliest_exp: Option<i64>,
}

impl SeenTokens {
    fn evict(&mut self, now: i64) -> usize {
        if self.earliest_exp.is_none_or(|exp| exp > now) {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        self.earliest_exp = self.entries.values().copied().min();
        before - self.entries.len()
    }
}

impl InMemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SeenTokens>, TokenError> {
        self.state
            .lock()
            .map_err(|e| TokenError::Internal(format!("replay cache lock poisoned: {e}")))
    }
}

impl ReplayCache for InMemoryReplayCache {
    fn check_and_insert(
        &self,
        key: ReplayKey,
        expires_at: i64,
        now: i64,
    ) -> Result<bool, TokenError> {
        let mut seen = self.lock()?;
        seen.evict(now);
        if seen.entries.contains_key(&key) {
            return Ok(false);
        }
        seen.entries.insert(key, expires_at);
        seen.earliest_exp = Some(seen.earliest_exp.map_or(expires_at, |exp| exp.min(expires_at)));
        Ok(true)
    }

    fn evict_expired(&self, now: i64) -> Result<usize, TokenError> {
        Ok(self.lock()?.evict(now))
    }

    fn clear(&self) -> Result<(), TokenError> {
        let mut seen = self.lock()?;
        seen.entries.clear();
        seen.earliest_exp = None;
        Ok(())
    }

    fn len(&self) -> Result<usize, TokenError> {
        Ok(self.lock()?.entries.len())
    }
}

/// A thread-safe in-memory event log.
///
/// Keeps every `(event, snapshot)` pair in append order behind an
/// `Arc<RwLock<..>>`. `Clone` shares the underlying log.
#[derive(Default, Clone)]
pub struct InMemoryPaymentIntentEventLog {
    entries: Arc<RwLock<Vec<(PaymentIntentEvent, PaymentIntent)>>>,
}

impl InMemoryPaymentIntentEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event in append order, across all aggregates.
    pub async fn all_events(&self) -> Vec<PaymentIntentEvent> {
        let entries = self.entries.read().await;
        entries.iter().map(|(event, _)| event.clone()).collect()
    }
}

#[async_trait]
impl PaymentIntentEventLog for InMemoryPaymentIntentEventLog {
    async fn save(
        &self,
        event: PaymentIntentEvent,
        aggregate: PaymentIntent,
    ) -> Result<(), PaymentIntentError> {
        let mut entries = self.entries.write().await;
        entries.push((event, aggregate));
        Ok(())
    }

    async fn find_latest(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentIntentError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .find(|(_, aggregate)| aggregate.id() == id)
            .map(|(_, aggregate)| aggregate.clone()))
    }

    async fn events(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Vec<PaymentIntentEvent>, PaymentIntentError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(event, _)| &event.payment_intent_id == id)
            .map(|(event, _)| event.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::payment_method::PaymentMethodType;
    use rust_decimal_macros::dec;

    fn key(order: &str, jti: &str) -> ReplayKey {
        ReplayKey {
            order_processing_id: order.to_string(),
            jti: jti.to_string(),
        }
    }

    #[test]
    fn test_replay_cache_check_and_insert() {
        let cache = InMemoryReplayCache::new();
        assert!(cache.check_and_insert(key("op_1", "t1"), 100, 0).unwrap());
        assert!(!cache.check_and_insert(key("op_1", "t1"), 100, 0).unwrap());
        assert!(cache.check_and_insert(key("op_1", "t2"), 100, 0).unwrap());
        assert!(cache.check_and_insert(key("op_2", "t1"), 100, 0).unwrap());
        assert_eq!(cache.len().unwrap(), 3);
    }

    #[test]
    fn test_replay_cache_eviction() {
        let cache = InMemoryReplayCache::new();
        cache.check_and_insert(key("op_1", "old"), 50, 0).unwrap();
        cache.check_and_insert(key("op_1", "new"), 150, 0).unwrap();

        assert_eq!(cache.evict_expired(100).unwrap(), 1);
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.evict_expired(100).unwrap(), 0);
        assert!(!cache.check_and_insert(key("op_1", "new"), 150, 100).unwrap());
    }

    #[test]
    fn test_replay_cache_sweeps_on_insert() {
        let cache = InMemoryReplayCache::new();
        for now in 0..1_000 {
            let jti = format!("t{now}");
            assert!(cache.check_and_insert(key("op_1", &jti), now + 10, now).unwrap());
            assert!(cache.len().unwrap() <= 11);
        }

        // entries still live at `now` are kept
        assert!(!cache.check_and_insert(key("op_1", "t999"), 1_009, 1_000).unwrap());
    }

    #[test]
    fn test_replay_cache_clear() {
        let cache = InMemoryReplayCache::new();
        cache.check_and_insert(key("op_1", "t1"), 100, 0).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
        assert!(cache.check_and_insert(key("op_1", "t1"), 100, 0).unwrap());
    }

    #[test]
    fn test_replay_cache_reports_poisoned_lock() {
        let cache = Arc::new(InMemoryReplayCache::new());
        let poisoner = Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.state.lock().unwrap();
            panic!("poison the replay cache");
        })
        .join();

        assert!(matches!(cache.len(), Err(TokenError::Internal(_))));
        assert!(matches!(
            cache.check_and_insert(key("op_1", "t1"), 100, 0),
            Err(TokenError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_event_log_latest_entry_wins() {
        let log = InMemoryPaymentIntentEventLog::new();
        let (event, intent) = PaymentIntent::generate(
            PaymentIntentId::new("pi_1").unwrap(),
            vec![PaymentMethodType::Card],
            Amount::new(dec!(120)).unwrap(),
        )
        .unwrap();
        log.save(event, intent.clone()).await.unwrap();

        let (event, next) = intent
            .require_payment_method(PaymentMethodType::Card)
            .unwrap();
        log.save(event, next.clone()).await.unwrap();

        let latest = log.find_latest(intent.id()).await.unwrap().unwrap();
        assert_eq!(latest, next);

        let events = log.events(intent.id()).await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.seq_nr).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let unknown = PaymentIntentId::new("pi_404").unwrap();
        assert!(log.find_latest(&unknown).await.unwrap().is_none());
        assert!(log.events(&unknown).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_event_log_keeps_aggregates_apart() {
        let log = InMemoryPaymentIntentEventLog::new();
        for id in ["pi_a", "pi_b"] {
            let (event, intent) = PaymentIntent::generate(
                PaymentIntentId::new(id).unwrap(),
                vec![PaymentMethodType::Card],
                Amount::new(dec!(1)).unwrap(),
            )
            .unwrap();
            log.save(event, intent).await.unwrap();
        }

        let a = PaymentIntentId::new("pi_a").unwrap();
        assert_eq!(log.find_latest(&a).await.unwrap().unwrap().id(), &a);
        assert_eq!(log.all_events().await.len(), 2);
    }
}
