#![allow(dead_code)]

use capability_relay::application::codec::TokenCodec;
use capability_relay::application::issuer::{IssueRequest, Issuer, IssuerOptions};
use capability_relay::application::relay::RelayGuard;
use capability_relay::domain::payment_method::{CardDetails, PaymentMethod};
use capability_relay::infrastructure::clock::FixedClock;
use capability_relay::infrastructure::hmac_key_service::HmacKeyService;
use capability_relay::infrastructure::in_memory::InMemoryReplayCache;
use chrono::Duration;
use std::sync::Arc;

pub const NOW: i64 = 1_700_000_000;
pub const KEY_ID: &str = "mock-key";
pub const SECRET: &str = "local-dev-secret";

pub fn clock(now: i64) -> Arc<FixedClock> {
    Arc::new(FixedClock::at_timestamp(now).unwrap())
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(Arc::new(HmacKeyService::with_key(KEY_ID, SECRET)))
}

pub fn issuer_at(now: i64) -> Issuer {
    Issuer::new(
        codec(),
        IssuerOptions {
            issuer: "coupons.svc".to_string(),
            audience: "order-processing".to_string(),
            key_id: KEY_ID.to_string(),
            default_ttl: Duration::minutes(5),
        },
        clock(now),
    )
    .unwrap()
}

pub fn guard_at(now: i64) -> RelayGuard {
    RelayGuard::new(codec(), Arc::new(InMemoryReplayCache::new()), clock(now))
}

pub fn request(order_processing_id: &str) -> IssueRequest {
    IssueRequest {
        subject: "user_123".to_string(),
        order_processing_id: order_processing_id.to_string(),
        capabilities: vec!["coupons:redeem".to_string()],
        constraints: [("max_discount".to_string(), "500".to_string())].into(),
        ..IssueRequest::default()
    }
}

pub fn card() -> PaymentMethod {
    PaymentMethod::Card(CardDetails {
        number: "4242424242424242".to_string(),
        exp_month: 12,
        exp_year: 2030,
    })
}
