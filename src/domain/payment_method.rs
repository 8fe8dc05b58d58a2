use crate::error::PaymentIntentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodType {
    Card,
    Wallet,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodType::Card => "card",
            PaymentMethodType::Wallet => "wallet",
        }
    }
}

impl fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethodType {
    type Err = PaymentIntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "card" => Ok(PaymentMethodType::Card),
            "wallet" => Ok(PaymentMethodType::Wallet),
            other => Err(PaymentIntentError::InvalidPaymentMethod(format!(
                "unsupported payment method type {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub exp_month: u8,
    pub exp_year: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDetails {
    pub authorization_url: String,
}

/// A concrete payment method.
///
/// The type tag and the type-specific payload are one value, so a card tag
/// can never travel with wallet details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaymentMethod {
    Card(CardDetails),
    Wallet(WalletDetails),
}

impl PaymentMethod {
    pub fn method_type(&self) -> PaymentMethodType {
        match self {
            PaymentMethod::Card(_) => PaymentMethodType::Card,
            PaymentMethod::Wallet(_) => PaymentMethodType::Wallet,
        }
    }

    /// Checks the type-specific payload.
    pub fn validate(&self) -> Result<(), PaymentIntentError> {
        match self {
            PaymentMethod::Card(card) => {
                if card.number.trim().is_empty() {
                    return Err(PaymentIntentError::InvalidPaymentMethod(
                        "card number is empty".to_string(),
                    ));
                }
                if !(1..=12).contains(&card.exp_month) {
                    return Err(PaymentIntentError::InvalidPaymentMethod(
                        "card exp month must be between 1 and 12".to_string(),
                    ));
                }
                if card.exp_year == 0 {
                    return Err(PaymentIntentError::InvalidPaymentMethod(
                        "card exp year is empty".to_string(),
                    ));
                }
                Ok(())
            }
            PaymentMethod::Wallet(wallet) => {
                if wallet.authorization_url.trim().is_empty() {
                    return Err(PaymentIntentError::InvalidPaymentMethod(
                        "wallet authorization url is empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}
