mod common;

use capability_relay::application::consumer::{Consumer, ConsumerOptions};
use capability_relay::error::{ErrorClass, TokenError};
use common::{NOW, clock, guard_at, issuer_at, request};
use std::sync::Arc;

#[tokio::test]
async fn test_issue_relay_consume() {
    let token = issuer_at(NOW)
        .issue_confirmed_token(&request("op_1"))
        .await
        .unwrap();

    let relayed = guard_at(NOW).verify(token.raw()).await.unwrap();
    assert_eq!(relayed.claims(), token.claims());

    let consumer = Consumer::new(
        ConsumerOptions {
            domain: "coupons".to_string(),
        },
        clock(NOW),
    );
    let result = consumer
        .consume(&relayed, "coupons:redeem", &["max_discount".to_string()])
        .unwrap();
    assert_eq!(result.order_processing_id, "op_1");
    assert_eq!(result.token_id, token.claims().jti);
    assert_eq!(result.constraints["max_discount"], "500");
}

#[tokio::test]
async fn test_expiry_boundary_at_relay() {
    let token = issuer_at(NOW)
        .issue_confirmed_token(&request("op_1"))
        .await
        .unwrap();
    let exp = token.claims().exp;

    assert!(guard_at(exp - 1).verify(token.raw()).await.is_ok());
    let err = guard_at(exp).verify(token.raw()).await.unwrap_err();
    assert!(matches!(err, TokenError::Expired { .. }));
    assert_eq!(err.class(), ErrorClass::Expired);
}

#[tokio::test]
async fn test_token_from_the_future_is_rejected() {
    let token = issuer_at(NOW + 120)
        .issue_confirmed_token(&request("op_1"))
        .await
        .unwrap();

    let err = guard_at(NOW).verify(token.raw()).await.unwrap_err();
    assert!(matches!(err, TokenError::ClockSkew { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_replay_is_scoped_to_order_and_token_id() {
    let issuer = issuer_at(NOW);
    let guard = guard_at(NOW);

    let first = issuer.issue_confirmed_token(&request("op_1")).await.unwrap();
    guard.verify(first.raw()).await.unwrap();

    let err = guard.verify(first.raw()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::AlreadyUsed);
    assert!(!err.is_retryable());

    // a fresh token for the same order is accepted
    let second = issuer.issue_confirmed_token(&request("op_1")).await.unwrap();
    guard.verify(second.raw()).await.unwrap();

    // the same jti for another order is a different key
    let mut other_order = request("op_2");
    other_order.token_id = Some(first.claims().jti.clone());
    let third = issuer.issue_confirmed_token(&other_order).await.unwrap();
    guard.verify(third.raw()).await.unwrap();

    assert_eq!(guard.tracked().unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_relay_accepts_exactly_once() {
    let token = issuer_at(NOW)
        .issue_confirmed_token(&request("op_1"))
        .await
        .unwrap();
    let guard = Arc::new(guard_at(NOW));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let guard = Arc::clone(&guard);
        let raw = token.raw().to_string();
        handles.push(tokio::spawn(async move { guard.verify(&raw).await }));
    }

    let mut accepted = 0;
    let mut replayed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(TokenError::AlreadyUsed { .. }) => replayed += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(replayed, 31);
}

#[tokio::test]
async fn test_policy_rejection_is_not_a_replay() {
    let token = issuer_at(NOW)
        .issue_confirmed_token(&request("op_1"))
        .await
        .unwrap();
    let consumer = Consumer::new(ConsumerOptions::default(), clock(NOW));

    let err = consumer
        .consume(&token, "payments:refund", &[])
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PolicyViolation);
    assert_eq!(consumer.domain(), "consumer");
}
