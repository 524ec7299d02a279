use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{postgres::PgRow, Executor, Postgres, Row};
use uuid::Uuid;

use super::StoreError;
use crate::ledger::{LedgerTransaction, OrphanedReservation, TransactionKind};

#[derive(Debug, Clone)]
pub struct NewLedgerTransaction<'a> {
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference: &'a str,
    pub metadata: &'a Value,
}

// key: ledger-db -> append with idempotency key
/// Appends an entry. Returns `None` when `(kind, reference)` was already recorded.
pub async fn append<'c, E>(
    executor: E,
    entry: NewLedgerTransaction<'_>,
) -> Result<Option<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO ledger_transactions (
            transaction_id,
            user_id,
            kind,
            amount,
            balance_after,
            reference,
            metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (kind, reference) DO NOTHING
        RETURNING transaction_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.user_id)
    .bind(entry.kind.as_str())
    .bind(entry.amount)
    .bind(entry.balance_after)
    .bind(entry.reference)
    .bind(entry.metadata)
    .fetch_optional(executor)
    .await
}

pub async fn find<'c, E>(
    executor: E,
    kind: TransactionKind,
    reference: &str,
) -> Result<Option<LedgerTransaction>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        SELECT transaction_id, user_id, kind, amount, balance_after, reference, metadata, created_at
        FROM ledger_transactions
        WHERE kind = $1 AND reference = $2
        "#,
    )
    .bind(kind.as_str())
    .bind(reference)
    .fetch_optional(executor)
    .await?;

    row.map(|row| map_row(&row)).transpose()
}

pub async fn list_for_user<'c, E>(
    executor: E,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<LedgerTransaction>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT transaction_id, user_id, kind, amount, balance_after, reference, metadata, created_at
        FROM ledger_transactions
        WHERE user_id = $1
        ORDER BY created_at DESC, transaction_id
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.iter().map(map_row).collect()
}

pub async fn sum_for_user<'c, E>(executor: E, user_id: Uuid) -> Result<Decimal, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let sum: Option<Decimal> =
        sqlx::query_scalar("SELECT SUM(amount) FROM ledger_transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(executor)
            .await?;
    Ok(sum.unwrap_or(Decimal::ZERO))
}

pub async fn orphaned_reservations<'c, E>(
    executor: E,
    created_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<OrphanedReservation>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT r.user_id, r.reference, r.amount, r.created_at
        FROM ledger_transactions r
        WHERE r.kind = 'reserve'
          AND r.created_at < $1
          AND NOT EXISTS (
              SELECT 1 FROM ledger_transactions f
              WHERE f.kind = 'refund' AND f.reference = r.reference
          )
          AND NOT EXISTS (
              SELECT 1 FROM generations g
              WHERE g.reservation_id::text = r.reference
          )
        ORDER BY r.created_at
        LIMIT $2
        "#,
    )
    .bind(created_before)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            let reference: String = row.get("reference");
            let amount: Decimal = row.get("amount");
            Ok(OrphanedReservation {
                user_id: row.get("user_id"),
                reservation_id: Uuid::parse_str(&reference)
                    .map_err(|err| StoreError::Corrupt(format!("reservation `{reference}`: {err}")))?,
                amount: -amount,
                created_at: row.get("created_at"),
            })
        })
        .collect()
}

fn map_row(row: &PgRow) -> Result<LedgerTransaction, StoreError> {
    let kind: String = row.get("kind");
    Ok(LedgerTransaction {
        transaction_id: row.get("transaction_id"),
        user_id: row.get("user_id"),
        kind: kind.parse().map_err(StoreError::Corrupt)?,
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        reference: row.get("reference"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    })
}
