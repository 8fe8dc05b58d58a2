use crate::domain::money::Amount;
use crate::domain::payment_intent::{ConfirmationNext, PaymentIntent};
use crate::domain::ports::PaymentProvider;
use crate::error::PaymentIntentError;
use async_trait::async_trait;
use tracing::debug;

/// A payment provider that answers from a fixed script.
///
/// Used by the CLI demo flow and by tests to steer the service down a
/// particular branch.
#[derive(Debug, Clone)]
pub struct ScriptedPaymentProvider {
    next: ConfirmationNext,
    confirm_error: Option<String>,
    capture_error: Option<String>,
}

impl ScriptedPaymentProvider {
    pub fn new(next: ConfirmationNext) -> Self {
        Self {
            next,
            confirm_error: None,
            capture_error: None,
        }
    }

    pub fn failing_confirm(mut self, message: impl Into<String>) -> Self {
        self.confirm_error = Some(message.into());
        self
    }

    pub fn failing_capture(mut self, message: impl Into<String>) -> Self {
        self.capture_error = Some(message.into());
        self
    }
}

impl Default for ScriptedPaymentProvider {
    fn default() -> Self {
        Self::new(ConfirmationNext::Processing)
    }
}

#[async_trait]
impl PaymentProvider for ScriptedPaymentProvider {
    async fn confirm(
        &self,
        intent: &PaymentIntent,
    ) -> Result<ConfirmationNext, PaymentIntentError> {
        debug!(id = %intent.id(), next = ?self.next, "scripted confirm");
        match &self.confirm_error {
            Some(message) => Err(PaymentIntentError::Provider(message.clone())),
            None => Ok(self.next),
        }
    }

    async fn capture(
        &self,
        intent: &PaymentIntent,
        amount: Amount,
    ) -> Result<(), PaymentIntentError> {
        debug!(id = %intent.id(), %amount, "scripted capture");
        match &self.capture_error {
            Some(message) => Err(PaymentIntentError::Provider(message.clone())),
            None => Ok(()),
        }
    }
}
