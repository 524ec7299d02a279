use std::sync::Arc;

use chrono::{Duration, Utc};
use clipledger::db::{GenerationStore, PgStore};
use clipledger::generations::{GenerationProgress, GenerationRecord, GenerationStatus};
use clipledger::ledger::{
    GrantMode, GrantOutcome, Ledger, LedgerError, RefundOutcome, ReserveOutcome, Tier,
};
use clipledger::providers::ProviderKind;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn credits(value: &str) -> Decimal {
    value.parse().unwrap()
}

async fn funded(ledger: &Ledger, amount: &str) -> Uuid {
    let user_id = Uuid::new_v4();
    ledger.open_account(user_id).await.unwrap();
    ledger
        .grant(
            user_id,
            &format!("evt_seed_{user_id}"),
            credits(amount),
            GrantMode::Add,
            Utc::now(),
        )
        .await
        .unwrap();
    user_id
}

fn record(user_id: Uuid, reservation_id: Uuid, generation_id: &str) -> GenerationRecord {
    let now = Utc::now();
    GenerationRecord {
        generation_id: generation_id.to_string(),
        reservation_id,
        user_id,
        provider: ProviderKind::Veo,
        model: "veo-3".to_string(),
        prompt: "glacier".to_string(),
        status: GenerationStatus::Starting,
        credits_reserved: credits("2.7"),
        cost_to_operator: credits("2.4"),
        video_url: None,
        error_message: None,
        refunded_at: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

fn progress(status: GenerationStatus) -> GenerationProgress {
    GenerationProgress {
        status,
        video_url: None,
        error_message: None,
        completed_at: None,
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_reserve_and_refund_are_guarded(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = Ledger::new(Arc::new(PgStore::new(pool.clone())));
    let user_id = funded(&ledger, "1.0").await;
    let token = Uuid::new_v4();

    let reserved = ledger
        .reserve(user_id, token, credits("0.8"), json!({ "model": "gen-4" }))
        .await
        .unwrap();
    assert_eq!(reserved, ReserveOutcome::Reserved { balance: credits("0.2") });

    let replay = ledger
        .reserve(user_id, token, credits("0.8"), json!({}))
        .await
        .unwrap();
    assert_eq!(replay, ReserveOutcome::AlreadyReserved { balance: credits("0.2") });

    let overdraft = ledger
        .reserve(user_id, Uuid::new_v4(), credits("0.8"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(overdraft, LedgerError::InsufficientCredits { .. }));

    let refunded = ledger
        .refund(user_id, token, credits("0.8"), json!({}))
        .await
        .unwrap();
    assert_eq!(refunded, RefundOutcome::Refunded { balance: credits("1.0") });
    let again = ledger
        .refund(user_id, token, credits("0.8"), json!({}))
        .await
        .unwrap();
    assert_eq!(again, RefundOutcome::AlreadyRefunded { balance: credits("1.0") });

    assert!(ledger.audit(user_id).await.unwrap().consistent);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_concurrent_reserves_stay_non_negative(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = Ledger::new(Arc::new(PgStore::new(pool.clone())));
    let user_id = funded(&ledger, "1.0").await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .reserve(user_id, Uuid::new_v4(), credits("0.4"), json!({}))
                .await
        }));
    }
    let mut reserved = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            reserved += 1;
        }
    }

    assert_eq!(reserved, 2);
    assert_eq!(ledger.balance(user_id).await.unwrap(), credits("0.2"));
    assert!(ledger.audit(user_id).await.unwrap().consistent);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_grants_are_idempotent_and_stale_renewals_logged(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = Ledger::new(Arc::new(PgStore::new(pool.clone())));
    let user_id = Uuid::new_v4();
    let now = Utc::now();

    let applied = ledger
        .grant(
            user_id,
            "evt_pg_1",
            credits("30"),
            GrantMode::SetMonthly { tier: Tier::Pro },
            now,
        )
        .await
        .unwrap();
    assert_eq!(applied, GrantOutcome::Applied { balance: credits("30") });

    let duplicate = ledger
        .grant(
            user_id,
            "evt_pg_1",
            credits("30"),
            GrantMode::SetMonthly { tier: Tier::Pro },
            now,
        )
        .await
        .unwrap();
    assert_eq!(duplicate, GrantOutcome::AlreadyApplied { balance: credits("30") });

    let stale = ledger
        .grant(
            user_id,
            "evt_pg_0",
            credits("10"),
            GrantMode::SetMonthly {
                tier: Tier::Starter,
            },
            now - Duration::days(30),
        )
        .await
        .unwrap();
    assert_eq!(stale, GrantOutcome::Stale { balance: credits("30") });

    let account = ledger.account(user_id).await.unwrap().unwrap();
    assert_eq!(account.tier, Tier::Pro);
    let stale_entry = ledger
        .transactions(user_id, 10)
        .await
        .unwrap()
        .into_iter()
        .find(|entry| entry.reference == "evt_pg_0")
        .unwrap();
    assert_eq!(stale_entry.amount, Decimal::ZERO);
    assert_eq!(stale_entry.metadata["stale"], true);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_generation_status_is_monotonic(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = Arc::new(PgStore::new(pool.clone()));
    let ledger = Ledger::new(store.clone());
    let user_id = funded(&ledger, "5").await;
    let reservation_id = Uuid::new_v4();
    ledger
        .reserve(user_id, reservation_id, credits("2.7"), json!({}))
        .await
        .unwrap();

    let generation_id = "models/veo-3.0-generate-001/operations/op-pg";
    store
        .insert_generation(&record(user_id, reservation_id, generation_id))
        .await
        .unwrap();

    let processing = store
        .update_progress(generation_id, &progress(GenerationStatus::Processing))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processing.status, GenerationStatus::Processing);
    let requeued = store
        .update_progress(generation_id, &progress(GenerationStatus::Starting))
        .await
        .unwrap();
    assert!(requeued.is_none());

    let failed = store
        .update_progress(
            generation_id,
            &GenerationProgress {
                status: GenerationStatus::Failed,
                video_url: None,
                error_message: Some("blocked".to_string()),
                completed_at: Some(Utc::now()),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, GenerationStatus::Failed);

    let late_success = store
        .update_progress(
            generation_id,
            &GenerationProgress {
                status: GenerationStatus::Succeeded,
                video_url: Some("https://late.example/v.mp4".to_string()),
                error_message: None,
                completed_at: Some(Utc::now()),
            },
        )
        .await
        .unwrap();
    assert!(late_success.is_none());

    let pending = store.failed_unrefunded(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(store.mark_refunded(generation_id, Utc::now()).await.unwrap());
    assert!(!store.mark_refunded(generation_id, Utc::now()).await.unwrap());

    let duplicate = store
        .insert_generation(&record(user_id, reservation_id, generation_id))
        .await;
    assert!(duplicate.is_err());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_orphans_exclude_linked_and_refunded_reservations(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = Arc::new(PgStore::new(pool.clone()));
    let ledger = Ledger::new(store.clone());
    let user_id = funded(&ledger, "10").await;

    let linked = Uuid::new_v4();
    let refunded = Uuid::new_v4();
    let orphan = Uuid::new_v4();
    for token in [linked, refunded, orphan] {
        ledger
            .reserve(user_id, token, credits("2.7"), json!({}))
            .await
            .unwrap();
    }
    store
        .insert_generation(&record(user_id, linked, "op-linked"))
        .await
        .unwrap();
    ledger
        .refund(user_id, refunded, credits("2.7"), json!({}))
        .await
        .unwrap();

    let orphans = ledger
        .orphaned_reservations(Utc::now() + Duration::seconds(5), 10)
        .await
        .unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].reservation_id, orphan);
    assert_eq!(orphans[0].amount, credits("2.7"));
}
