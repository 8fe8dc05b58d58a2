use crate::error::TokenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Signing algorithm advertised in every header.
pub const ALG_HMAC_SHA256: &str = "HS256";
/// Token type advertised in every header.
pub const TYP_JWT: &str = "JWT";
/// Tolerated clock drift between issuer and verifier, in seconds.
pub const CLOCK_SKEW_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub alg: String,
    #[serde(default)]
    pub typ: String,
    #[serde(default)]
    pub kid: String,
}

impl Header {
    /// A header for `kid` with the fixed algorithm and type.
    pub fn new(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_HMAC_SHA256.to_string(),
            typ: TYP_JWT.to_string(),
            kid: kid.into(),
        }
    }
}

/// Claims carried by a confirmed token.
///
/// Field order is the serialization order. Capabilities and constraints are
/// sorted collections so the same claims always serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedClaims {
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub jti: String,
    #[serde(default)]
    pub order_processing_id: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, String>,
}

impl ConfirmedClaims {
    /// Structural and time-based checks.
    ///
    /// Pure: the only input besides the claims is `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), TokenError> {
        let required = [
            ("iss", &self.iss),
            ("aud", &self.aud),
            ("sub", &self.sub),
            ("jti", &self.jti),
            ("order_processing_id", &self.order_processing_id),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(TokenError::MissingClaim(name));
            }
        }
        if self.exp <= 0 {
            return Err(TokenError::MissingClaim("exp"));
        }

        let now = now.timestamp();
        if let Some(iat) = self.iat
            && now < iat - CLOCK_SKEW_LEEWAY_SECS
        {
            return Err(TokenError::ClockSkew { iat, now });
        }
        if now >= self.exp {
            return Err(TokenError::Expired { exp: self.exp });
        }
        if self.capabilities.is_empty() {
            return Err(TokenError::NoCapabilities);
        }
        Ok(())
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// A token as it travels between roles.
///
/// Only the codec builds one, after signing or after a successful
/// verification; the fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    raw: String,
    header: Header,
    claims: ConfirmedClaims,
}

impl SignedToken {
    pub(crate) fn new(raw: String, header: Header, claims: ConfirmedClaims) -> Self {
        Self {
            raw,
            header,
            claims,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn claims(&self) -> &ConfirmedClaims {
        &self.claims
    }
}
