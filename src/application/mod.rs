//! Application layer: the token roles (codec, issuer, relay, consumer) and
//! the payment intent use cases. Everything here talks to infrastructure only
//! through the ports in `domain::ports`.

pub mod codec;
pub mod consumer;
pub mod issuer;
pub mod payment_intents;
pub mod relay;
