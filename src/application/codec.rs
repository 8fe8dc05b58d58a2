use crate::domain::ports::KeyServiceRef;
use crate::domain::token::{ALG_HMAC_SHA256, ConfirmedClaims, Header, SignedToken, TYP_JWT};
use crate::error::TokenError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::debug;

/// Encodes and decodes the three-segment signed token format.
///
/// `b64url(header) "." b64url(claims) "." b64url(signature)`, unpadded.
/// The signature covers the first two segments exactly as they appear on the
/// wire.
#[derive(Clone)]
pub struct TokenCodec {
    key_service: KeyServiceRef,
}

impl TokenCodec {
    /// Creates a codec.
    ///
    /// # Arguments
    ///
    /// * `key_service` - Signs and verifies segments under the header's `kid`
    pub fn new(key_service: KeyServiceRef) -> Self {
        Self { key_service }
    }

    /// Serializes and signs `claims`.
    ///
    /// Blank `alg` and `typ` default to `HS256` and `JWT`. Anything other
    /// than those is rejected with `InvalidHeader`, as is a missing `kid`.
    pub async fn encode(
        &self,
        mut header: Header,
        claims: ConfirmedClaims,
    ) -> Result<SignedToken, TokenError> {
        if header.alg.is_empty() {
            header.alg = ALG_HMAC_SHA256.to_string();
        }
        if header.typ.is_empty() {
            header.typ = TYP_JWT.to_string();
        }
        check_algorithm(&header)?;
        if header.kid.is_empty() {
            return Err(TokenError::InvalidHeader("kid is required".to_string()));
        }

        let header_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signing_input = format!("{header_segment}.{claims_segment}");

        let signature = self
            .key_service
            .sign(&header.kid, signing_input.as_bytes())
            .await?;
        let raw = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature));

        debug!(kid = %header.kid, jti = %claims.jti, "encoded token");
        Ok(SignedToken::new(raw, header, claims))
    }

    /// Parses and verifies `raw`.
    ///
    /// Does not look at time-based claims; see [`ConfirmedClaims::validate`].
    pub async fn decode(&self, raw: &str) -> Result<SignedToken, TokenError> {
        let segments: Vec<&str> = raw.split('.').collect();
        let [header_segment, claims_segment, signature_segment] = segments[..] else {
            return Err(TokenError::InvalidToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header_bytes = decode_segment("header", header_segment)?;
        let claims_bytes = decode_segment("claims", claims_segment)?;
        let signature = decode_segment("signature", signature_segment)?;

        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|e| TokenError::InvalidToken(format!("header: {e}")))?;
        if header.kid.is_empty() {
            return Err(TokenError::InvalidToken("header kid is missing".to_string()));
        }

        let signing_input = &raw[..header_segment.len() + 1 + claims_segment.len()];
        self.key_service
            .verify(&header.kid, signing_input.as_bytes(), &signature)
            .await?;
        check_algorithm(&header)?;

        let claims: ConfirmedClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|e| TokenError::InvalidToken(format!("claims: {e}")))?;

        debug!(kid = %header.kid, jti = %claims.jti, "decoded token");
        Ok(SignedToken::new(raw.to_string(), header, claims))
    }
}

fn check_algorithm(header: &Header) -> Result<(), TokenError> {
    if header.alg != ALG_HMAC_SHA256 {
        return Err(TokenError::InvalidHeader(format!(
            "unsupported alg {:?}",
            header.alg
        )));
    }
    if header.typ != TYP_JWT {
        return Err(TokenError::InvalidHeader(format!(
            "unsupported typ {:?}",
            header.typ
        )));
    }
    Ok(())
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::InvalidToken(format!("{name} segment: {e}")))
}
