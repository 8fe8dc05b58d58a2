use crate::domain::ports::KeyService;
use crate::error::KeyServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

/// A key service backed by HMAC-SHA256 secrets held in memory.
///
/// Stands in for a KMS in local runs and tests. `Clone` shares the key table.
#[derive(Default, Clone)]
pub struct HmacKeyService {
    keys: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl HmacKeyService {
    /// A service with no keys; register them with [`Self::register_key`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A service pre-loaded with a single key.
    pub fn with_key(key_id: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        let mut keys = HashMap::new();
        keys.insert(key_id.into(), secret.as_ref().to_vec());
        Self {
            keys: Arc::new(RwLock::new(keys)),
        }
    }

    /// Adds or replaces the secret for `key_id`.
    pub async fn register_key(&self, key_id: impl Into<String>, secret: impl AsRef<[u8]>) {
        let mut keys = self.keys.write().await;
        keys.insert(key_id.into(), secret.as_ref().to_vec());
    }

    async fn mac(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        let keys = self.keys.read().await;
        let secret = keys
            .get(key_id)
            .ok_or_else(|| KeyServiceError::UnknownKey(key_id.to_string()))?;
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| KeyServiceError::Backend(format!("invalid secret: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[async_trait]
impl KeyService for HmacKeyService {
    async fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        self.mac(key_id, data).await
    }

    async fn verify(
        &self,
        key_id: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), KeyServiceError> {
        let expected = self.mac(key_id, data).await?;
        if expected.len() != signature.len() {
            return Err(KeyServiceError::SignatureMismatch);
        }
        if bool::from(expected.as_slice().ct_eq(signature)) {
            Ok(())
        } else {
            Err(KeyServiceError::SignatureMismatch)
        }
    }
}
