use super::codec::TokenCodec;
use crate::domain::ports::{ClockRef, ReplayCacheRef, ReplayKey};
use crate::domain::token::SignedToken;
use crate::error::TokenError;
use tracing::{info, warn};

/// Verifies tokens in transit and lets each one through at most once.
pub struct RelayGuard {
    codec: TokenCodec,
    replay_cache: ReplayCacheRef,
    clock: ClockRef,
}

impl RelayGuard {
    /// Creates a relay guard.
    ///
    /// # Arguments
    ///
    /// * `codec` - Codec holding the keys tokens must be signed with
    /// * `replay_cache` - Set of tokens already let through; share it between guards of one relay
    /// * `clock` - Reference time for expiry checks and eviction
    pub fn new(codec: TokenCodec, replay_cache: ReplayCacheRef, clock: ClockRef) -> Self {
        Self {
            codec,
            replay_cache,
            clock,
        }
    }

    /// Decodes and validates `raw`, then records it as used.
    ///
    /// A token already seen for the same order fails with
    /// [`TokenError::AlreadyUsed`], even under concurrent calls.
    pub async fn verify(&self, raw: &str) -> Result<SignedToken, TokenError> {
        let token = self.codec.decode(raw).await?;
        let claims = token.claims();
        let now = self.clock.now();
        claims.validate(now)?;

        let key = ReplayKey {
            order_processing_id: claims.order_processing_id.clone(),
            jti: claims.jti.clone(),
        };
        let fresh = self
            .replay_cache
            .check_and_insert(key, claims.exp, now.timestamp())?;
        if !fresh {
            warn!(
                jti = %claims.jti,
                order_processing_id = %claims.order_processing_id,
                "rejected replayed token"
            );
            return Err(TokenError::AlreadyUsed {
                order_processing_id: claims.order_processing_id.clone(),
                jti: claims.jti.clone(),
            });
        }

        info!(
            jti = %claims.jti,
            order_processing_id = %claims.order_processing_id,
            "relayed token"
        );
        Ok(token)
    }

    /// Forgets every token seen so far.
    pub fn reset(&self) -> Result<(), TokenError> {
        self.replay_cache.clear()
    }

    /// Drops tokens that have expired; returns how many were dropped.
    ///
    /// `verify` already sweeps expired entries as it goes, so this is only
    /// needed to reclaim memory on a relay that has gone quiet.
    pub fn evict_expired(&self) -> Result<usize, TokenError> {
        self.replay_cache.evict_expired(self.clock.now().timestamp())
    }

    /// Number of tokens currently remembered.
    pub fn tracked(&self) -> Result<usize, TokenError> {
        self.replay_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token::{ConfirmedClaims, Header};
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::hmac_key_service::HmacKeyService;
    use crate::infrastructure::in_memory::InMemoryReplayCache;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(Arc::new(HmacKeyService::with_key("k1", "local-dev-secret")))
    }

    fn guard_at(now: i64) -> RelayGuard {
        RelayGuard::new(
            codec(),
            Arc::new(InMemoryReplayCache::new()),
            Arc::new(FixedClock::at_timestamp(now).unwrap()),
        )
    }

    async fn raw_token(jti: &str, exp: i64) -> String {
        let claims = ConfirmedClaims {
            iss: "coupons.svc".to_string(),
            aud: "order-processing".to_string(),
            sub: "user_123".to_string(),
            iat: Some(NOW),
            exp,
            jti: jti.to_string(),
            order_processing_id: "op_1".to_string(),
            capabilities: BTreeSet::from(["coupons:redeem".to_string()]),
            constraints: BTreeMap::new(),
        };
        codec()
            .encode(Header::new("k1"), claims)
            .await
            .unwrap()
            .raw()
            .to_string()
    }

    #[tokio::test]
    async fn test_second_use_is_rejected() {
        let guard = guard_at(NOW);
        let raw = raw_token("cpt_1", NOW + 300).await;

        let token = guard.verify(&raw).await.unwrap();
        assert_eq!(token.claims().jti, "cpt_1");
        assert!(matches!(
            guard.verify(&raw).await,
            Err(TokenError::AlreadyUsed { jti, .. }) if jti == "cpt_1"
        ));

        let other = raw_token("cpt_2", NOW + 300).await;
        assert!(guard.verify(&other).await.is_ok());
        assert_eq!(guard.tracked().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_tokens_are_not_tracked() {
        let guard = guard_at(NOW);
        let expired = raw_token("cpt_1", NOW - 1).await;
        assert!(matches!(
            guard.verify(&expired).await,
            Err(TokenError::Expired { .. })
        ));
        assert!(matches!(
            guard.verify("not-a-token").await,
            Err(TokenError::InvalidToken(_))
        ));
        assert_eq!(guard.tracked().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_allows_reuse() {
        let guard = guard_at(NOW);
        let raw = raw_token("cpt_1", NOW + 300).await;
        guard.verify(&raw).await.unwrap();

        guard.reset().unwrap();
        assert_eq!(guard.tracked().unwrap(), 0);
        assert!(guard.verify(&raw).await.is_ok());
    }

    #[tokio::test]
    async fn test_evict_expired_uses_clock() {
        let cache = Arc::new(InMemoryReplayCache::new());
        let early = RelayGuard::new(
            codec(),
            cache.clone(),
            Arc::new(FixedClock::at_timestamp(NOW).unwrap()),
        );
        early.verify(&raw_token("cpt_short", NOW + 10).await).await.unwrap();
        early.verify(&raw_token("cpt_long", NOW + 300).await).await.unwrap();

        let later = RelayGuard::new(
            codec(),
            cache,
            Arc::new(FixedClock::at_timestamp(NOW + 60).unwrap()),
        );
        assert_eq!(later.evict_expired().unwrap(), 1);
        assert_eq!(later.tracked().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_verify_sweeps_expired_tokens() {
        let cache = Arc::new(InMemoryReplayCache::new());
        let early = RelayGuard::new(
            codec(),
            cache.clone(),
            Arc::new(FixedClock::at_timestamp(NOW).unwrap()),
        );
        for n in 0..50 {
            let raw = raw_token(&format!("cpt_{n}"), NOW + 10).await;
            early.verify(&raw).await.unwrap();
        }
        assert_eq!(early.tracked().unwrap(), 50);

        let later = RelayGuard::new(
            codec(),
            cache,
            Arc::new(FixedClock::at_timestamp(NOW + 60).unwrap()),
        );
        later
            .verify(&raw_token("cpt_late", NOW + 300).await)
            .await
            .unwrap();
        assert_eq!(later.tracked().unwrap(), 1);
    }
}
