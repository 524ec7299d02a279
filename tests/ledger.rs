use std::sync::Arc;

use chrono::{Duration, Utc};
use clipledger::db::MemoryStore;
use clipledger::ledger::{
    GrantMode, GrantOutcome, Ledger, LedgerError, RefundOutcome, ReserveOutcome, Tier,
};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

fn credits(value: &str) -> Decimal {
    value.parse().unwrap()
}

async fn funded_ledger(balance: &str) -> (Ledger, Uuid) {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let user_id = Uuid::new_v4();
    ledger.open_account(user_id).await.unwrap();
    ledger
        .grant(
            user_id,
            &format!("evt_seed_{user_id}"),
            credits(balance),
            GrantMode::Add,
            Utc::now(),
        )
        .await
        .unwrap();
    (ledger, user_id)
}

// key: ledger-tests -> concurrent reserves never overdraw
#[tokio::test]
async fn concurrent_reserves_never_exceed_balance() {
    let (ledger, user_id) = funded_ledger("1.0").await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .reserve(user_id, Uuid::new_v4(), credits("0.3"), json!({}))
                .await
        }));
    }

    let mut reserved = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(ReserveOutcome::Reserved { .. }) => reserved += 1,
            Err(LedgerError::InsufficientCredits { .. }) => rejected += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(reserved, 3);
    assert_eq!(rejected, 17);
    assert_eq!(ledger.balance(user_id).await.unwrap(), credits("0.1"));
    assert!(ledger.audit(user_id).await.unwrap().consistent);
}

#[tokio::test]
async fn reserve_with_same_token_debits_once() {
    let (ledger, user_id) = funded_ledger("2").await;
    let token = Uuid::new_v4();

    let first = ledger
        .reserve(user_id, token, credits("0.8"), json!({}))
        .await
        .unwrap();
    let second = ledger
        .reserve(user_id, token, credits("0.8"), json!({}))
        .await
        .unwrap();

    assert_eq!(first, ReserveOutcome::Reserved { balance: credits("1.2") });
    assert_eq!(second, ReserveOutcome::AlreadyReserved { balance: credits("1.2") });
}

#[tokio::test]
async fn insufficient_reserve_leaves_balance() {
    let (ledger, user_id) = funded_ledger("0.5").await;

    let err = ledger
        .reserve(user_id, Uuid::new_v4(), credits("0.8"), json!({}))
        .await
        .unwrap_err();

    match err {
        LedgerError::InsufficientCredits {
            required,
            available,
        } => {
            assert_eq!(required, credits("0.8"));
            assert_eq!(available, credits("0.5"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ledger.balance(user_id).await.unwrap(), credits("0.5"));
}

#[tokio::test]
async fn reserve_without_account_is_not_found() {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let err = ledger
        .reserve(Uuid::new_v4(), Uuid::new_v4(), credits("0.4"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound));
}

// key: ledger-tests -> refund idempotence
#[tokio::test]
async fn refund_twice_equals_refund_once() {
    let (ledger, user_id) = funded_ledger("1.0").await;
    let token = Uuid::new_v4();
    ledger
        .reserve(user_id, token, credits("0.4"), json!({}))
        .await
        .unwrap();

    let first = ledger
        .refund(user_id, token, credits("0.4"), json!({}))
        .await
        .unwrap();
    let second = ledger
        .refund(user_id, token, credits("0.4"), json!({}))
        .await
        .unwrap();

    assert_eq!(first, RefundOutcome::Refunded { balance: credits("1.0") });
    assert_eq!(second, RefundOutcome::AlreadyRefunded { balance: credits("1.0") });

    let account = ledger.account(user_id).await.unwrap().unwrap();
    assert_eq!(account.credits_used, Decimal::ZERO);
}

#[tokio::test]
async fn refund_without_reservation_is_rejected() {
    let (ledger, user_id) = funded_ledger("1.0").await;
    let err = ledger
        .refund(user_id, Uuid::new_v4(), credits("0.4"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoSuchReservation));
    assert_eq!(ledger.balance(user_id).await.unwrap(), credits("1.0"));
}

// key: ledger-tests -> grant idempotence keyed by billing event
#[tokio::test]
async fn grant_twice_equals_grant_once() {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let user_id = Uuid::new_v4();

    let first = ledger
        .grant(user_id, "evt_42", credits("20"), GrantMode::Add, Utc::now())
        .await
        .unwrap();
    let second = ledger
        .grant(user_id, "evt_42", credits("20"), GrantMode::Add, Utc::now())
        .await
        .unwrap();

    assert_eq!(first, GrantOutcome::Applied { balance: credits("20") });
    assert_eq!(second, GrantOutcome::AlreadyApplied { balance: credits("20") });
    assert_eq!(ledger.transactions(user_id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn set_monthly_replaces_balance_and_opens_period() {
    let (ledger, user_id) = funded_ledger("3").await;
    let renewed_at = Utc::now();

    let outcome = ledger
        .grant(
            user_id,
            "evt_sub",
            credits("30"),
            GrantMode::SetMonthly { tier: Tier::Pro },
            renewed_at,
        )
        .await
        .unwrap();

    assert_eq!(outcome, GrantOutcome::Applied { balance: credits("30") });
    let account = ledger.account(user_id).await.unwrap().unwrap();
    assert_eq!(account.tier, Tier::Pro);
    assert_eq!(account.monthly_credits, credits("30"));
    assert_eq!(account.current_period_start, Some(renewed_at));
    assert_eq!(account.current_period_end, Some(renewed_at + Duration::days(30)));
    assert!(ledger.audit(user_id).await.unwrap().consistent);
}

#[tokio::test]
async fn out_of_order_renewal_is_stale() {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let user_id = Uuid::new_v4();
    let now = Utc::now();

    ledger
        .grant(
            user_id,
            "evt_march",
            credits("100"),
            GrantMode::SetMonthly {
                tier: Tier::Business,
            },
            now,
        )
        .await
        .unwrap();
    let late = ledger
        .grant(
            user_id,
            "evt_february",
            credits("10"),
            GrantMode::SetMonthly {
                tier: Tier::Starter,
            },
            now - Duration::days(30),
        )
        .await
        .unwrap();

    assert_eq!(late, GrantOutcome::Stale { balance: credits("100") });
    assert_eq!(ledger.balance(user_id).await.unwrap(), credits("100"));
    assert!(ledger.audit(user_id).await.unwrap().consistent);
}

#[tokio::test]
async fn additive_grant_requires_positive_amount() {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let err = ledger
        .grant(Uuid::new_v4(), "evt_zero", Decimal::ZERO, GrantMode::Add, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
}

// key: ledger-tests -> log sum tracks balance across mixed traffic
#[tokio::test]
async fn audit_stays_consistent_through_mixed_operations() {
    let (ledger, user_id) = funded_ledger("5").await;

    for index in 0..4 {
        let token = Uuid::new_v4();
        ledger
            .reserve(user_id, token, credits("0.9"), json!({ "n": index }))
            .await
            .unwrap();
        if index % 2 == 0 {
            ledger
                .refund(user_id, token, credits("0.9"), json!({}))
                .await
                .unwrap();
        }
    }
    ledger
        .grant(user_id, "evt_topup", credits("1.5"), GrantMode::Add, Utc::now())
        .await
        .unwrap();

    let audit = ledger.audit(user_id).await.unwrap();
    assert_eq!(audit.balance, credits("4.7"));
    assert_eq!(audit.log_sum, credits("4.7"));
    assert!(audit.consistent);
}
