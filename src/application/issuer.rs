use super::codec::TokenCodec;
use crate::domain::ports::ClockRef;
use crate::domain::token::{ConfirmedClaims, Header, SignedToken};
use crate::error::TokenError;
use chrono::Duration;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Lifetime in seconds given to tokens when neither the options nor the
/// request set one.
pub const DEFAULT_TTL_SECS: i64 = 300;

const TOKEN_ID_PREFIX: &str = "cpt_";

#[derive(Debug, Clone)]
pub struct IssuerOptions {
    pub issuer: String,
    pub audience: String,
    pub key_id: String,
    pub default_ttl: Duration,
}

/// What the caller wants a token for.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub subject: String,
    pub order_processing_id: String,
    pub capabilities: Vec<String>,
    pub constraints: BTreeMap<String, String>,
    /// Falls back to the issuer's default when unset or not positive.
    pub ttl: Option<Duration>,
    /// Generated when unset.
    pub token_id: Option<String>,
}

/// Mints confirmed tokens for one issuer/audience pair.
pub struct Issuer {
    codec: TokenCodec,
    options: IssuerOptions,
    clock: ClockRef,
}

impl Issuer {
    /// Creates an issuer bound to one signing key.
    ///
    /// # Arguments
    ///
    /// * `codec` - Codec used to sign the minted tokens
    /// * `options` - Issuer, audience and key id; a non-positive `default_ttl` becomes 300 seconds
    /// * `clock` - Source of `iat` and `exp`
    ///
    /// Fails with `InvalidConfiguration` when any identifier is blank.
    pub fn new(
        codec: TokenCodec,
        mut options: IssuerOptions,
        clock: ClockRef,
    ) -> Result<Self, TokenError> {
        let required = [
            ("issuer", &options.issuer),
            ("audience", &options.audience),
            ("key id", &options.key_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(TokenError::InvalidConfiguration(format!(
                    "{name} must not be empty"
                )));
            }
        }
        if options.default_ttl <= Duration::zero() {
            options.default_ttl = Duration::seconds(DEFAULT_TTL_SECS);
        }
        Ok(Self {
            codec,
            options,
            clock,
        })
    }

    pub fn options(&self) -> &IssuerOptions {
        &self.options
    }

    /// Builds, validates and signs a token for `request`.
    ///
    /// # Arguments
    ///
    /// * `request` - Subject, order and capabilities to grant
    ///
    /// Fails with `MissingField` for an empty subject, order id or capability
    /// list, and with `InvalidConfiguration` when the lifetime runs past the
    /// representable range.
    pub async fn issue_confirmed_token(
        &self,
        request: &IssueRequest,
    ) -> Result<SignedToken, TokenError> {
        if request.subject.is_empty() {
            return Err(TokenError::MissingField("subject"));
        }
        if request.order_processing_id.is_empty() {
            return Err(TokenError::MissingField("order_processing_id"));
        }
        if request.capabilities.is_empty() {
            return Err(TokenError::MissingField("capabilities"));
        }

        let ttl = request
            .ttl
            .filter(|ttl| *ttl > Duration::zero())
            .unwrap_or(self.options.default_ttl);
        let jti = match &request.token_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => generate_token_id(),
        };

        let now = self.clock.now();
        let exp = now.checked_add_signed(ttl).ok_or_else(|| {
            TokenError::InvalidConfiguration(format!(
                "ttl of {}s is out of range",
                ttl.num_seconds()
            ))
        })?;
        let claims = ConfirmedClaims {
            iss: self.options.issuer.clone(),
            aud: self.options.audience.clone(),
            sub: request.subject.clone(),
            iat: Some(now.timestamp()),
            exp: exp.timestamp(),
            jti,
            order_processing_id: request.order_processing_id.clone(),
            capabilities: request.capabilities.iter().cloned().collect::<BTreeSet<_>>(),
            constraints: request.constraints.clone(),
        };
        claims.validate(now)?;

        let token = self
            .codec
            .encode(Header::new(self.options.key_id.clone()), claims)
            .await?;
        info!(
            jti = %token.claims().jti,
            order_processing_id = %token.claims().order_processing_id,
            exp = token.claims().exp,
            "issued confirmed token"
        );
        Ok(token)
    }
}

fn generate_token_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("{TOKEN_ID_PREFIX}{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::hmac_key_service::HmacKeyService;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    fn options() -> IssuerOptions {
        IssuerOptions {
            issuer: "coupons.svc".to_string(),
            audience: "order-processing".to_string(),
            key_id: "k1".to_string(),
            default_ttl: Duration::zero(),
        }
    }

    fn issuer() -> Issuer {
        let codec = TokenCodec::new(Arc::new(HmacKeyService::with_key("k1", "local-dev-secret")));
        Issuer::new(
            codec,
            options(),
            Arc::new(FixedClock::at_timestamp(NOW).unwrap()),
        )
        .unwrap()
    }

    fn request() -> IssueRequest {
        IssueRequest {
            subject: "user_123".to_string(),
            order_processing_id: "op_1".to_string(),
            capabilities: vec!["coupons:redeem".to_string()],
            ..IssueRequest::default()
        }
    }

    #[test]
    fn test_new_validates_options() {
        let codec = TokenCodec::new(Arc::new(HmacKeyService::new()));
        let clock = Arc::new(FixedClock::at_timestamp(NOW).unwrap());
        let result = Issuer::new(
            codec,
            IssuerOptions {
                audience: " ".to_string(),
                ..options()
            },
            clock,
        );
        assert!(matches!(result, Err(TokenError::InvalidConfiguration(_))));
        assert_eq!(
            issuer().options().default_ttl,
            Duration::seconds(DEFAULT_TTL_SECS)
        );
    }

    #[tokio::test]
    async fn test_issue_fills_claims() {
        let token = issuer().issue_confirmed_token(&request()).await.unwrap();
        let claims = token.claims();

        assert_eq!(claims.iss, "coupons.svc");
        assert_eq!(claims.aud, "order-processing");
        assert_eq!(claims.iat, Some(NOW));
        assert_eq!(claims.exp, NOW + 300);
        assert!(claims.jti.starts_with("cpt_"));
        assert_eq!(claims.jti.len(), 4 + 32);
        assert_eq!(token.header().kid, "k1");
    }

    #[tokio::test]
    async fn test_issue_honours_request_ttl_and_token_id() {
        let req = IssueRequest {
            ttl: Some(Duration::seconds(30)),
            token_id: Some("cpt_fixed".to_string()),
            ..request()
        };
        let token = issuer().issue_confirmed_token(&req).await.unwrap();
        assert_eq!(token.claims().exp, NOW + 30);
        assert_eq!(token.claims().jti, "cpt_fixed");

        let req = IssueRequest {
            ttl: Some(Duration::seconds(-5)),
            ..request()
        };
        let token = issuer().issue_confirmed_token(&req).await.unwrap();
        assert_eq!(token.claims().exp, NOW + 300);
    }

    #[tokio::test]
    async fn test_issue_rejects_ttl_past_calendar_range() {
        let req = IssueRequest {
            ttl: Some(Duration::MAX),
            ..request()
        };
        let err = issuer().issue_confirmed_token(&req).await.unwrap_err();
        assert!(matches!(err, TokenError::InvalidConfiguration(_)));
        assert!(!err.is_retryable());

        let codec = TokenCodec::new(Arc::new(HmacKeyService::with_key("k1", "local-dev-secret")));
        let huge_default = Issuer::new(
            codec,
            IssuerOptions {
                default_ttl: Duration::MAX,
                ..options()
            },
            Arc::new(FixedClock::at_timestamp(NOW).unwrap()),
        )
        .unwrap();
        assert!(matches!(
            huge_default.issue_confirmed_token(&request()).await,
            Err(TokenError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_generated_token_ids_are_distinct() {
        let issuer = issuer();
        let a = issuer.issue_confirmed_token(&request()).await.unwrap();
        let b = issuer.issue_confirmed_token(&request()).await.unwrap();
        assert_ne!(a.claims().jti, b.claims().jti);
    }

    #[tokio::test]
    async fn test_issue_requires_fields() {
        let issuer = issuer();
        let cases = [
            (
                IssueRequest {
                    subject: String::new(),
                    ..request()
                },
                "subject",
            ),
            (
                IssueRequest {
                    order_processing_id: String::new(),
                    ..request()
                },
                "order_processing_id",
            ),
            (
                IssueRequest {
                    capabilities: vec![],
                    ..request()
                },
                "capabilities",
            ),
        ];
        for (req, field) in cases {
            assert!(matches!(
                issuer.issue_confirmed_token(&req).await,
                Err(TokenError::MissingField(f)) if f == field
            ));
        }
    }
}
