use super::money::Amount;
use super::payment_intent_event::{PaymentIntentEvent, PaymentIntentEventKind};
use super::payment_method::{PaymentMethod, PaymentMethodType};
use crate::error::PaymentIntentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentIntentId(String);

impl PaymentIntentId {
    /// Wraps a caller-supplied identifier.
    ///
    /// # Arguments
    ///
    /// * `id` - Any non-blank string; stored as given
    pub fn new(id: impl Into<String>) -> Result<Self, PaymentIntentError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PaymentIntentError::InvalidId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentIntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Automatic,
    Manual,
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMethod::Automatic => f.write_str("automatic"),
            CaptureMethod::Manual => f.write_str("manual"),
        }
    }
}

impl FromStr for CaptureMethod {
    type Err = PaymentIntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "automatic" => Ok(CaptureMethod::Automatic),
            "manual" => Ok(CaptureMethod::Manual),
            other => Err(PaymentIntentError::InvalidPaymentMethod(format!(
                "unsupported capture method {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ConfirmationFailed,
    ActionFailed,
    CaptureFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ConfirmationFailed => f.write_str("confirmation_failed"),
            FailureReason::ActionFailed => f.write_str("action_failed"),
            FailureReason::CaptureFailed => f.write_str("capture_failed"),
        }
    }
}

/// What the payment provider says should happen after confirmation.
///
/// Values coming from outside the process are parsed with `FromStr`; an
/// unknown value is rejected there and never reaches the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationNext {
    Processing,
    RequiresAction,
    RequiresCapture,
}

impl FromStr for ConfirmationNext {
    type Err = PaymentIntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "processing" => Ok(ConfirmationNext::Processing),
            "requires_action" => Ok(ConfirmationNext::RequiresAction),
            "requires_capture" => Ok(ConfirmationNext::RequiresCapture),
            other => Err(PaymentIntentError::UnknownConfirmationResult(
                other.to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentIntentState {
    RequiresPaymentMethodType {
        payment_method_types: Vec<PaymentMethodType>,
    },
    RequiresPaymentMethod {
        payment_method_type: PaymentMethodType,
        last_failure_reason: Option<FailureReason>,
    },
    RequiresConfirmation {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
    },
    RequiresAction {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
    },
    RequiresCapture {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
    },
    Processing {
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
    },
    Succeeded {
        payment_method: PaymentMethod,
    },
    Canceled {
        payment_method: PaymentMethod,
        reason: FailureReason,
    },
}

impl PaymentIntentState {
    pub fn status(&self) -> &'static str {
        match self {
            PaymentIntentState::RequiresPaymentMethodType { .. } => "requires_payment_method_type",
            PaymentIntentState::RequiresPaymentMethod { .. } => "requires_payment_method",
            PaymentIntentState::RequiresConfirmation { .. } => "requires_confirmation",
            PaymentIntentState::RequiresAction { .. } => "requires_action",
            PaymentIntentState::RequiresCapture { .. } => "requires_capture",
            PaymentIntentState::Processing { .. } => "processing",
            PaymentIntentState::Succeeded { .. } => "succeeded",
            PaymentIntentState::Canceled { .. } => "canceled",
        }
    }
}

/// The event and aggregate produced by one transition.
pub type Transition = (PaymentIntentEvent, PaymentIntent);

/// Event-sourced payment intent aggregate.
///
/// Every command takes `&self` and either returns the next aggregate together
/// with the single event describing the step, or an error. The receiver is
/// never modified, so a rejected command leaves nothing to roll back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    id: PaymentIntentId,
    seq_nr: u64,
    amount: Amount,
    #[serde(flatten)]
    state: PaymentIntentState,
}

impl PaymentIntent {
    /// Creates a payment intent waiting for the buyer to pick a method type.
    pub fn generate(
        id: PaymentIntentId,
        payment_method_types: Vec<PaymentMethodType>,
        amount: Amount,
    ) -> Result<Transition, PaymentIntentError> {
        if payment_method_types.is_empty() {
            return Err(PaymentIntentError::EmptyMethodTypes);
        }
        let seq_nr = 1;
        let event = PaymentIntentEvent {
            payment_intent_id: id.clone(),
            seq_nr,
            kind: PaymentIntentEventKind::RequiresPaymentMethodType {
                payment_method_types: payment_method_types.clone(),
                amount,
            },
        };
        let aggregate = PaymentIntent {
            id,
            seq_nr,
            amount,
            state: PaymentIntentState::RequiresPaymentMethodType {
                payment_method_types,
            },
        };
        Ok((event, aggregate))
    }

    pub fn id(&self) -> &PaymentIntentId {
        &self.id
    }

    pub fn seq_nr(&self) -> u64 {
        self.seq_nr
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn state(&self) -> &PaymentIntentState {
        &self.state
    }

    /// Wire name of the current state, e.g. `requires_capture`.
    pub fn status(&self) -> &'static str {
        self.state.status()
    }

    /// True once the intent has succeeded or been canceled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            PaymentIntentState::Succeeded { .. } | PaymentIntentState::Canceled { .. }
        )
    }

    pub fn payment_method(&self) -> Option<&PaymentMethod> {
        match &self.state {
            PaymentIntentState::RequiresConfirmation { payment_method, .. }
            | PaymentIntentState::RequiresAction { payment_method, .. }
            | PaymentIntentState::RequiresCapture { payment_method, .. }
            | PaymentIntentState::Processing { payment_method, .. }
            | PaymentIntentState::Succeeded { payment_method }
            | PaymentIntentState::Canceled { payment_method, .. } => Some(payment_method),
            PaymentIntentState::RequiresPaymentMethodType { .. }
            | PaymentIntentState::RequiresPaymentMethod { .. } => None,
        }
    }

    pub fn capture_method(&self) -> Option<CaptureMethod> {
        self.confirmed().map(|(_, capture_method)| capture_method)
    }

    /// Selects the payment method type the buyer will pay with.
    pub fn require_payment_method(
        &self,
        payment_method_type: PaymentMethodType,
    ) -> Result<Transition, PaymentIntentError> {
        let PaymentIntentState::RequiresPaymentMethodType {
            payment_method_types,
        } = &self.state
        else {
            return Err(self.invalid_transition("require_payment_method"));
        };
        if !payment_method_types.contains(&payment_method_type) {
            return Err(PaymentIntentError::MethodTypeNotAllowed(payment_method_type));
        }

        Ok(self.advance(
            PaymentIntentState::RequiresPaymentMethod {
                payment_method_type,
                last_failure_reason: None,
            },
            PaymentIntentEventKind::RequiresPaymentMethod {
                payment_method_type,
                amount: self.amount,
            },
        ))
    }

    /// Attaches concrete payment details of the selected type.
    pub fn require_confirmation(
        &self,
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
    ) -> Result<Transition, PaymentIntentError> {
        let PaymentIntentState::RequiresPaymentMethod {
            payment_method_type,
            ..
        } = &self.state
        else {
            return Err(self.invalid_transition("require_confirmation"));
        };
        if payment_method.method_type() != *payment_method_type {
            return Err(PaymentIntentError::MethodTypeMismatch {
                expected: *payment_method_type,
                actual: payment_method.method_type(),
            });
        }
        payment_method.validate()?;

        Ok(self.advance(
            PaymentIntentState::RequiresConfirmation {
                payment_method: payment_method.clone(),
                capture_method,
            },
            PaymentIntentEventKind::RequiresConfirmation {
                payment_method,
                capture_method,
                amount: self.amount,
            },
        ))
    }

    /// Routes the provider's confirmation verdict to the matching transition.
    pub fn apply_confirmation_result(
        &self,
        next: ConfirmationNext,
    ) -> Result<Transition, PaymentIntentError> {
        if !matches!(self.state, PaymentIntentState::RequiresConfirmation { .. }) {
            return Err(self.invalid_transition("apply_confirmation_result"));
        }
        match next {
            ConfirmationNext::Processing => self.start_processing(),
            ConfirmationNext::RequiresAction => self.require_action(),
            ConfirmationNext::RequiresCapture => self.require_capture(),
        }
    }

    /// Parks the intent until the buyer completes an out-of-band action.
    pub fn require_action(&self) -> Result<Transition, PaymentIntentError> {
        let PaymentIntentState::RequiresConfirmation {
            payment_method,
            capture_method,
        } = &self.state
        else {
            return Err(self.invalid_transition("require_action"));
        };

        Ok(self.advance(
            PaymentIntentState::RequiresAction {
                payment_method: payment_method.clone(),
                capture_method: *capture_method,
            },
            PaymentIntentEventKind::RequiresAction {
                payment_method: payment_method.clone(),
                capture_method: *capture_method,
                amount: self.amount,
            },
        ))
    }

    /// Waits for an explicit capture. Manual capture only.
    pub fn require_capture(&self) -> Result<Transition, PaymentIntentError> {
        let (payment_method, capture_method) = match &self.state {
            PaymentIntentState::RequiresConfirmation {
                payment_method,
                capture_method,
            }
            | PaymentIntentState::RequiresAction {
                payment_method,
                capture_method,
            } => (payment_method, *capture_method),
            _ => return Err(self.invalid_transition("require_capture")),
        };
        if capture_method != CaptureMethod::Manual {
            return Err(PaymentIntentError::CaptureMethodMismatch {
                operation: "require_capture",
                capture_method,
            });
        }

        Ok(self.advance(
            PaymentIntentState::RequiresCapture {
                payment_method: payment_method.clone(),
                capture_method,
            },
            PaymentIntentEventKind::RequiresCapture {
                payment_method: payment_method.clone(),
                capture_method,
                amount: self.amount,
            },
        ))
    }

    /// Hands the payment to the provider for settlement.
    ///
    /// From `RequiresAction` this is the automatic-capture path; from
    /// `RequiresCapture` it is the manual capture itself.
    pub fn start_processing(&self) -> Result<Transition, PaymentIntentError> {
        let (payment_method, capture_method) = match &self.state {
            PaymentIntentState::RequiresConfirmation {
                payment_method,
                capture_method,
            } => (payment_method, *capture_method),
            PaymentIntentState::RequiresAction {
                payment_method,
                capture_method,
            } => {
                if *capture_method != CaptureMethod::Automatic {
                    return Err(PaymentIntentError::CaptureMethodMismatch {
                        operation: "start_processing",
                        capture_method: *capture_method,
                    });
                }
                (payment_method, *capture_method)
            }
            PaymentIntentState::RequiresCapture {
                payment_method,
                capture_method,
            } => {
                if *capture_method != CaptureMethod::Manual {
                    return Err(PaymentIntentError::CaptureMethodMismatch {
                        operation: "start_processing",
                        capture_method: *capture_method,
                    });
                }
                (payment_method, *capture_method)
            }
            _ => return Err(self.invalid_transition("start_processing")),
        };

        Ok(self.advance(
            PaymentIntentState::Processing {
                payment_method: payment_method.clone(),
                capture_method,
            },
            PaymentIntentEventKind::Processing {
                payment_method: payment_method.clone(),
                capture_method,
                amount: self.amount,
            },
        ))
    }

    /// Marks a processing payment as settled.
    pub fn complete(&self) -> Result<Transition, PaymentIntentError> {
        let PaymentIntentState::Processing { payment_method, .. } = &self.state else {
            return Err(self.invalid_transition("complete"));
        };

        Ok(self.advance(
            PaymentIntentState::Succeeded {
                payment_method: payment_method.clone(),
            },
            PaymentIntentEventKind::Succeeded {
                payment_method: payment_method.clone(),
                amount: self.amount,
            },
        ))
    }

    /// Records a failure after confirmation started.
    ///
    /// A retryable failure sends the intent back to `RequiresPaymentMethod`
    /// for the same method type; otherwise the intent is canceled for good.
    pub fn fail(
        &self,
        reason: FailureReason,
        retryable: bool,
    ) -> Result<Transition, PaymentIntentError> {
        let Some((payment_method, _)) = self.confirmed() else {
            return Err(self.invalid_transition("fail"));
        };

        if retryable {
            let payment_method_type = payment_method.method_type();
            Ok(self.advance(
                PaymentIntentState::RequiresPaymentMethod {
                    payment_method_type,
                    last_failure_reason: Some(reason),
                },
                PaymentIntentEventKind::Failed {
                    payment_method_type,
                    payment_method: payment_method.clone(),
                    amount: self.amount,
                    reason,
                },
            ))
        } else {
            Ok(self.advance(
                PaymentIntentState::Canceled {
                    payment_method: payment_method.clone(),
                    reason,
                },
                PaymentIntentEventKind::Canceled {
                    payment_method: payment_method.clone(),
                    amount: self.amount,
                    reason,
                },
            ))
        }
    }

    // Method and capture method for the states between confirmation and
    // settlement.
    fn confirmed(&self) -> Option<(&PaymentMethod, CaptureMethod)> {
        match &self.state {
            PaymentIntentState::RequiresConfirmation {
                payment_method,
                capture_method,
            }
            | PaymentIntentState::RequiresAction {
                payment_method,
                capture_method,
            }
            | PaymentIntentState::RequiresCapture {
                payment_method,
                capture_method,
            }
            | PaymentIntentState::Processing {
                payment_method,
                capture_method,
            } => Some((payment_method, *capture_method)),
            _ => None,
        }
    }

    fn advance(&self, state: PaymentIntentState, kind: PaymentIntentEventKind) -> Transition {
        let seq_nr = self.seq_nr + 1;
        let event = PaymentIntentEvent {
            payment_intent_id: self.id.clone(),
            seq_nr,
            kind,
        };
        let aggregate = PaymentIntent {
            id: self.id.clone(),
            seq_nr,
            amount: self.amount,
            state,
        };
        (event, aggregate)
    }

    fn invalid_transition(&self, operation: &'static str) -> PaymentIntentError {
        PaymentIntentError::InvalidTransition {
            operation,
            status: self.status(),
        }
    }
}
