use super::money::Amount;
use super::payment_intent::{CaptureMethod, FailureReason, PaymentIntentId};
use super::payment_method::{PaymentMethod, PaymentMethodType};
use serde::{Deserialize, Serialize};

/// One fact in a payment intent's history.
///
/// Every transition emits exactly one event with the same `seq_nr` as the
/// aggregate it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentEvent {
    pub payment_intent_id: PaymentIntentId,
    pub seq_nr: u64,
    #[serde(flatten)]
    pub kind: PaymentIntentEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentIntentEventKind {
    RequiresPaymentMethodType {
        payment_method_types: Vec<PaymentMethodType>,
        amount: Amount,
    },
    RequiresPaymentMethod {
        payment_method_type: PaymentMethodType,
        amount: Amount,
    },
    RequiresConfirmation {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
        amount: Amount,
    },
    RequiresAction {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
        amount: Amount,
    },
    RequiresCapture {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
        amount: Amount,
    },
    Processing {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
        amount: Amount,
    },
    Succeeded {
        payment_method: PaymentMethod,
        amount: Amount,
    },
    /// A retryable failure; the intent goes back to collecting a method.
    Failed {
        payment_method_type: PaymentMethodType,
        payment_method: PaymentMethod,
        amount: Amount,
        reason: FailureReason,
    },
    Canceled {
        payment_method: PaymentMethod,
        amount: Amount,
        reason: FailureReason,
    },
}

impl PaymentIntentEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentIntentEventKind::RequiresPaymentMethodType { .. } => {
                "requires_payment_method_type"
            }
            PaymentIntentEventKind::RequiresPaymentMethod { .. } => "requires_payment_method",
            PaymentIntentEventKind::RequiresConfirmation { .. } => "requires_confirmation",
            PaymentIntentEventKind::RequiresAction { .. } => "requires_action",
            PaymentIntentEventKind::RequiresCapture { .. } => "requires_capture",
            PaymentIntentEventKind::Processing { .. } => "processing",
            PaymentIntentEventKind::Succeeded { .. } => "succeeded",
            PaymentIntentEventKind::Failed { .. } => "failed",
            PaymentIntentEventKind::Canceled { .. } => "canceled",
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            PaymentIntentEventKind::RequiresPaymentMethodType { amount, .. }
            | PaymentIntentEventKind::RequiresPaymentMethod { amount, .. }
            | PaymentIntentEventKind::RequiresConfirmation { amount, .. }
            | PaymentIntentEventKind::RequiresAction { amount, .. }
            | PaymentIntentEventKind::RequiresCapture { amount, .. }
            | PaymentIntentEventKind::Processing { amount, .. }
            | PaymentIntentEventKind::Succeeded { amount, .. }
            | PaymentIntentEventKind::Failed { amount, .. }
            | PaymentIntentEventKind::Canceled { amount, .. } => *amount,
        }
    }
}
