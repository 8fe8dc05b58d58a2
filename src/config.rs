use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Environment variable naming the signing key.
pub const ENV_KMS_KEY_ID: &str = "CTR_KMS_KEY_ID";
/// Environment variable holding the shared HMAC secret.
pub const ENV_KMS_SECRET: &str = "CTR_KMS_SECRET";

pub const DEFAULT_KEY_ID: &str = "mock-key";
pub const DEFAULT_SECRET: &str = "local-dev-secret";
pub const MIN_SECRET_LEN: usize = 8;

/// Key service settings shared by every CLI subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsConfig {
    pub key_id: String,
    pub secret: String,
}

impl KmsConfig {
    /// Blank values fall back to the local development defaults.
    pub fn new(key_id: &str, secret: &str) -> Result<Self> {
        let key_id = match key_id.trim() {
            "" => DEFAULT_KEY_ID,
            key_id => key_id,
        };
        let secret = if secret.is_empty() {
            DEFAULT_SECRET
        } else {
            secret
        };
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "{ENV_KMS_SECRET} must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        Ok(Self {
            key_id: key_id.to_string(),
            secret: secret.to_string(),
        })
    }
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            key_id: DEFAULT_KEY_ID.to_string(),
            secret: DEFAULT_SECRET.to_string(),
        }
    }
}

/// Splits a comma separated list, trimming items and skipping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses comma separated `key=value` pairs. Later keys overwrite earlier ones.
pub fn parse_assignments(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut assignments = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::Config(format!(
                "constraint {pair:?} must use key=value format"
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config("constraint key cannot be empty".to_string()));
        }
        assignments.insert(key.to_string(), value.trim().to_string());
    }
    Ok(assignments)
}
