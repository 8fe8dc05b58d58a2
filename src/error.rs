use crate::domain::payment_intent::CaptureMethod;
use crate::domain::payment_method::PaymentMethodType;
use thiserror::Error;

/// Coarse classification of token failures.
///
/// Callers branch on the class rather than on individual variants: only
/// `Internal` failures are worth retrying with the same input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    MalformedInput,
    SignatureInvalid,
    Expired,
    PolicyViolation,
    AlreadyUsed,
    Internal,
}

/// Failures raised by the key service port.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyServiceError {
    #[error("unknown key id: {0}")]
    UnknownKey(String),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("key service failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("unknown key id: {0}")]
    UnknownKey(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("claim {0} is required")]
    MissingClaim(&'static str),
    #[error("iat ({iat}) is in the future (now {now})")]
    ClockSkew { iat: i64, now: i64 },
    #[error("token expired at {exp}")]
    Expired { exp: i64 },
    #[error("capabilities must contain at least one entry")]
    NoCapabilities,
    #[error("token {jti} already used for order {order_processing_id}")]
    AlreadyUsed {
        order_processing_id: String,
        jti: String,
    },
    #[error("capability {0:?} not present in token")]
    MissingCapability(String),
    #[error("constraint {0} missing or empty")]
    MissingConstraint(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl TokenError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TokenError::InvalidToken(_)
            | TokenError::InvalidHeader(_)
            | TokenError::MissingField(_)
            | TokenError::MissingClaim(_)
            | TokenError::NoCapabilities
            | TokenError::Serialization(_)
            | TokenError::InvalidConfiguration(_) => ErrorClass::MalformedInput,
            TokenError::SignatureMismatch | TokenError::UnknownKey(_) => {
                ErrorClass::SignatureInvalid
            }
            TokenError::ClockSkew { .. } | TokenError::Expired { .. } => ErrorClass::Expired,
            TokenError::MissingCapability(_) | TokenError::MissingConstraint(_) => {
                ErrorClass::PolicyViolation
            }
            TokenError::AlreadyUsed { .. } => ErrorClass::AlreadyUsed,
            TokenError::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Internal
    }
}

impl From<KeyServiceError> for TokenError {
    fn from(err: KeyServiceError) -> Self {
        match err {
            KeyServiceError::UnknownKey(kid) => TokenError::UnknownKey(kid),
            KeyServiceError::SignatureMismatch => TokenError::SignatureMismatch,
            KeyServiceError::Backend(msg) => TokenError::Internal(msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum PaymentIntentError {
    #[error("invalid payment intent id")]
    InvalidId,
    #[error("payment method types must not be empty")]
    EmptyMethodTypes,
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("payment method type {0} is not allowed")]
    MethodTypeNotAllowed(PaymentMethodType),
    #[error("payment method type mismatch: expected {expected}, got {actual}")]
    MethodTypeMismatch {
        expected: PaymentMethodType,
        actual: PaymentMethodType,
    },
    #[error("invalid payment method: {0}")]
    InvalidPaymentMethod(String),
    #[error("{operation} is not allowed with capture method {capture_method}")]
    CaptureMethodMismatch {
        operation: &'static str,
        capture_method: CaptureMethod,
    },
    #[error("{operation} is not allowed in status {status}")]
    InvalidTransition {
        operation: &'static str,
        status: &'static str,
    },
    #[error("unknown confirmation result: {0}")]
    UnknownConfirmationResult(String),
    #[error("payment intent {0} not found")]
    NotFound(String),
    #[error("payment intent {0} already exists")]
    AlreadyExists(String),
    #[error("payment provider error: {0}")]
    Provider(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    PaymentIntent(#[from] PaymentIntentError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
