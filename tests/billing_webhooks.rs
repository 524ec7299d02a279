use std::sync::Arc;

use chrono::{Duration, Utc};
use clipledger::billing::{
    sign_payload, BillingService, CheckoutError, CheckoutSettings, StripeAdapter, TierCatalog,
    WebhookError, WebhookOutcome,
};
use clipledger::db::MemoryStore;
use clipledger::ledger::{GrantOutcome, Ledger, Tier};
use httpmock::prelude::*;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "whsec_integration";

fn tiers() -> TierCatalog {
    TierCatalog::new()
        .with_tier(Tier::Starter, Decimal::from(10), Some("price_starter"))
        .with_tier(Tier::Pro, Decimal::from(30), Some("price_pro"))
        .with_tier(Tier::Business, Decimal::from(100), None)
}

fn settings() -> CheckoutSettings {
    CheckoutSettings {
        app_url: "https://app.example.com/".to_string(),
        credit_unit_price_cents: 100,
        currency: "usd".to_string(),
    }
}

fn service_with(base_url: &str) -> (BillingService, Ledger) {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let adapter = StripeAdapter::new(
        base_url,
        Some("sk_test_123".to_string()),
        Some(WEBHOOK_SECRET.to_string()),
        Duration::seconds(300),
    )
    .unwrap();
    let service = BillingService::new(ledger.clone(), Arc::new(adapter), tiers(), settings());
    (service, ledger)
}

fn service() -> (BillingService, Ledger) {
    service_with("http://127.0.0.1:9")
}

fn event(id: &str, event_type: &str, object: Value) -> Vec<u8> {
    json!({
        "id": id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": object }
    })
    .to_string()
    .into_bytes()
}

fn signed(raw: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET, raw, Utc::now().timestamp())
}

// key: webhook-tests -> one-time credit purchase
#[tokio::test]
async fn credits_purchase_is_granted_once() {
    let (service, ledger) = service();
    let user_id = Uuid::new_v4();
    let raw = event(
        "evt_credits_1",
        "checkout.session.completed",
        json!({ "metadata": { "user_id": user_id.to_string(), "type": "credits", "credit_amount": "25" } }),
    );

    let first = service.handle_webhook(&raw, &signed(&raw)).await.unwrap();
    assert_eq!(
        first,
        WebhookOutcome::Granted {
            user_id,
            outcome: GrantOutcome::Applied {
                balance: Decimal::from(25)
            },
        }
    );

    let redelivered = service.handle_webhook(&raw, &signed(&raw)).await.unwrap();
    assert_eq!(
        redelivered,
        WebhookOutcome::Granted {
            user_id,
            outcome: GrantOutcome::AlreadyApplied {
                balance: Decimal::from(25)
            },
        }
    );
    assert_eq!(ledger.balance(user_id).await.unwrap(), Decimal::from(25));
}

#[tokio::test]
async fn tampered_body_is_rejected_without_grant() {
    let (service, ledger) = service();
    let user_id = Uuid::new_v4();
    let raw = event(
        "evt_tamper",
        "checkout.session.completed",
        json!({ "metadata": { "user_id": user_id.to_string(), "type": "credits", "credit_amount": "5" } }),
    );
    let signature = signed(&raw);
    let tampered = String::from_utf8(raw)
        .unwrap()
        .replace("\"5\"", "\"500\"")
        .into_bytes();

    let err = service.handle_webhook(&tampered, &signature).await.unwrap_err();
    assert!(matches!(err, WebhookError::Rejected(_)));
    assert_eq!(ledger.balance(user_id).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn replayed_old_signature_is_rejected() {
    let (service, ledger) = service();
    let user_id = Uuid::new_v4();
    let raw = event(
        "evt_old",
        "checkout.session.completed",
        json!({ "metadata": { "user_id": user_id.to_string(), "type": "credits", "credit_amount": "5" } }),
    );
    let signature = sign_payload(WEBHOOK_SECRET, &raw, Utc::now().timestamp() - 3600);

    let err = service.handle_webhook(&raw, &signature).await.unwrap_err();
    assert!(matches!(err, WebhookError::Rejected(_)));
    assert_eq!(ledger.balance(user_id).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn missing_webhook_secret_rejects_everything() {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let adapter =
        StripeAdapter::new("http://127.0.0.1:9", None, None, Duration::seconds(300)).unwrap();
    let service = BillingService::new(ledger, Arc::new(adapter), tiers(), settings());
    let raw = event("evt_x", "checkout.session.completed", json!({}));

    let err = service.handle_webhook(&raw, &signed(&raw)).await.unwrap_err();
    assert!(matches!(err, WebhookError::Rejected(_)));
}

// key: webhook-tests -> subscriptions
#[tokio::test]
async fn subscription_checkout_sets_tier_allotment() {
    let (service, ledger) = service();
    let user_id = Uuid::new_v4();
    let raw = event(
        "evt_sub_start",
        "checkout.session.completed",
        json!({ "mode": "subscription", "metadata": { "user_id": user_id.to_string(), "tier": "pro" } }),
    );

    let outcome = service.handle_webhook(&raw, &signed(&raw)).await.unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Granted {
            outcome: GrantOutcome::Applied { .. },
            ..
        }
    ));

    let account = ledger.account(user_id).await.unwrap().unwrap();
    assert_eq!(account.tier, Tier::Pro);
    assert_eq!(account.credits_remaining, Decimal::from(30));
    assert_eq!(account.monthly_credits, Decimal::from(30));
    assert!(account.current_period_end.is_some());
}

#[tokio::test]
async fn renewal_invoice_resets_balance() {
    let (service, ledger) = service();
    let user_id = Uuid::new_v4();
    let start = json!({
        "id": "evt_sub_a",
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp() - 86_400,
        "data": { "object": { "metadata": { "user_id": user_id.to_string(), "tier": "starter" } } }
    })
    .to_string()
    .into_bytes();
    service.handle_webhook(&start, &signed(&start)).await.unwrap();
    assert_eq!(ledger.balance(user_id).await.unwrap(), Decimal::from(10));

    let renewal = event(
        "evt_invoice_b",
        "invoice.paid",
        json!({
            "billing_reason": "subscription_cycle",
            "metadata": {},
            "subscription_details": { "metadata": { "user_id": user_id.to_string(), "tier": "business" } }
        }),
    );
    let outcome = service
        .handle_webhook(&renewal, &signed(&renewal))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::Granted {
            user_id,
            outcome: GrantOutcome::Applied {
                balance: Decimal::from(100)
            },
        }
    );
    let account = ledger.account(user_id).await.unwrap().unwrap();
    assert_eq!(account.tier, Tier::Business);
    assert_eq!(account.credits_used, Decimal::ZERO);
}

#[tokio::test]
async fn first_invoice_is_not_a_renewal() {
    let (service, ledger) = service();
    let user_id = Uuid::new_v4();
    let raw = event(
        "evt_invoice_first",
        "invoice.paid",
        json!({
            "billing_reason": "subscription_create",
            "subscription_details": { "metadata": { "user_id": user_id.to_string(), "tier": "pro" } }
        }),
    );

    let outcome = service.handle_webhook(&raw, &signed(&raw)).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    assert!(ledger.account(user_id).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_event_is_acknowledged_and_ignored() {
    let (service, _) = service();
    let raw = event("evt_misc", "customer.updated", json!({ "id": "cus_1" }));

    let outcome = service.handle_webhook(&raw, &signed(&raw)).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
}

#[tokio::test]
async fn malformed_metadata_is_ignored() {
    let (service, _) = service();
    let bad_user = event(
        "evt_bad_user",
        "checkout.session.completed",
        json!({ "metadata": { "user_id": "not-a-uuid", "type": "credits", "credit_amount": "5" } }),
    );
    let bad_amount = event(
        "evt_bad_amount",
        "checkout.session.completed",
        json!({ "metadata": { "user_id": Uuid::new_v4().to_string(), "type": "credits", "credit_amount": "-3" } }),
    );

    for raw in [bad_user, bad_amount] {
        let outcome = service.handle_webhook(&raw, &signed(&raw)).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }
}

// key: checkout-tests -> session creation
#[tokio::test]
async fn credits_checkout_posts_form_to_stripe() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/checkout/sessions")
            .header("Authorization", "Bearer sk_test_123")
            .body_contains("mode=payment")
            .body_contains("metadata%5Btype%5D=credits")
            .body_contains("metadata%5Bcredit_amount%5D=12")
            .body_contains("line_items%5B0%5D%5Bprice_data%5D%5Bunit_amount%5D=100");
        then.status(200).json_body(json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.com/c/pay/cs_test_1"
        }));
    });

    let (service, _) = service_with(&server.base_url());
    let session = service
        .create_credits_checkout(Uuid::new_v4(), "buyer@example.com", 12)
        .await
        .unwrap();

    assert_eq!(session.id, "cs_test_1");
    assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_1");
    mock.assert();
}

#[tokio::test]
async fn subscription_checkout_uses_tier_price() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/checkout/sessions")
            .body_contains("mode=subscription")
            .body_contains("line_items%5B0%5D%5Bprice%5D=price_pro")
            .body_contains("subscription_data%5Bmetadata%5D%5Btier%5D=pro");
        then.status(200).json_body(json!({
            "id": "cs_test_2",
            "url": "https://checkout.stripe.com/c/pay/cs_test_2"
        }));
    });

    let (service, _) = service_with(&server.base_url());
    let session = service
        .create_subscription_checkout(Uuid::new_v4(), "buyer@example.com", Tier::Pro)
        .await
        .unwrap();

    assert_eq!(session.id, "cs_test_2");
    mock.assert();
}

#[tokio::test]
async fn checkout_input_is_validated_before_calling_stripe() {
    let (service, _) = service();

    let zero = service
        .create_credits_checkout(Uuid::new_v4(), "buyer@example.com", 0)
        .await
        .unwrap_err();
    assert!(matches!(zero, CheckoutError::InvalidRequest(_)));

    let free = service
        .create_subscription_checkout(Uuid::new_v4(), "buyer@example.com", Tier::Free)
        .await
        .unwrap_err();
    assert!(matches!(free, CheckoutError::InvalidRequest(_)));

    let unpriced = service
        .create_subscription_checkout(Uuid::new_v4(), "buyer@example.com", Tier::Business)
        .await
        .unwrap_err();
    assert!(matches!(unpriced, CheckoutError::NotConfigured(_)));
}

#[tokio::test]
async fn stripe_error_surfaces_as_provider_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/v1/checkout/sessions");
        then.status(402).json_body(json!({ "error": { "message": "card declined" } }));
    });

    let (service, _) = service_with(&server.base_url());
    let err = service
        .create_credits_checkout(Uuid::new_v4(), "buyer@example.com", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Provider(_)));
}
