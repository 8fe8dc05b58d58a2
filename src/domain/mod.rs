//! Domain layer: token and payment intent types, the payment intent state
//! machine, and the ports the application layer depends on.

pub mod money;
pub mod payment_intent;
pub mod payment_intent_event;
pub mod payment_method;
pub mod ports;
pub mod token;
