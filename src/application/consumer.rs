use crate::domain::ports::ClockRef;
use crate::domain::token::SignedToken;
use crate::error::TokenError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const DEFAULT_DOMAIN: &str = "consumer";

#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    /// Label for the consuming service. Blank means [`DEFAULT_DOMAIN`].
    pub domain: String,
}

/// Outcome of a successful consumption, detached from the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumeResult {
    pub domain: String,
    pub order_processing_id: String,
    pub token_id: String,
    pub constraints: BTreeMap<String, String>,
    pub processed_at: DateTime<Utc>,
}

/// Applies capability and constraint policy to an already verified token.
pub struct Consumer {
    domain: String,
    clock: ClockRef,
}

impl Consumer {
    /// Creates a consumer.
    ///
    /// # Arguments
    ///
    /// * `options` - Domain label reported in results; blank means [`DEFAULT_DOMAIN`]
    /// * `clock` - Source of `processed_at`
    pub fn new(options: ConsumerOptions, clock: ClockRef) -> Self {
        let domain = match options.domain.trim() {
            "" => DEFAULT_DOMAIN.to_string(),
            domain => domain.to_string(),
        };
        Self { domain, clock }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Checks `token` against the capability and constraint keys a handler
    /// needs, and returns a detached copy of what it may act on.
    ///
    /// The token must already be decoded and validated. Single use is not
    /// enforced here, so repeated calls with one token give the same result.
    ///
    /// # Arguments
    ///
    /// * `token` - Verified token
    /// * `required_capability` - Capability that must appear verbatim
    /// * `required_constraints` - Constraint keys that must map to a non-empty value; empty keys are skipped
    pub fn consume(
        &self,
        token: &SignedToken,
        required_capability: &str,
        required_constraints: &[String],
    ) -> Result<ConsumeResult, TokenError> {
        let claims = token.claims();
        if required_capability.is_empty() || !claims.has_capability(required_capability) {
            warn!(
                domain = %self.domain,
                jti = %claims.jti,
                capability = required_capability,
                "missing capability"
            );
            return Err(TokenError::MissingCapability(
                required_capability.to_string(),
            ));
        }

        for key in required_constraints.iter().filter(|k| !k.is_empty()) {
            let present = claims
                .constraints
                .get(key)
                .is_some_and(|value| !value.is_empty());
            if !present {
                warn!(domain = %self.domain, jti = %claims.jti, constraint = %key, "missing constraint");
                return Err(TokenError::MissingConstraint(key.clone()));
            }
        }

        info!(
            domain = %self.domain,
            jti = %claims.jti,
            order_processing_id = %claims.order_processing_id,
            "consumed token"
        );
        Ok(ConsumeResult {
            domain: self.domain.clone(),
            order_processing_id: claims.order_processing_id.clone(),
            token_id: claims.jti.clone(),
            constraints: claims.constraints.clone(),
            processed_at: self.clock.now(),
        })
    }
}
