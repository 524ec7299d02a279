use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Executor, Postgres, Row};
use uuid::Uuid;

use super::StoreError;
use crate::ledger::{CreditAccount, Tier};

const ACCOUNT_COLUMNS: &str = r#"
    user_id,
    credits_remaining,
    tier,
    monthly_credits,
    credits_used,
    current_period_start,
    current_period_end,
    last_renewal_at,
    created_at,
    updated_at
"#;

// key: credit-accounts-db -> signup hook
pub async fn ensure_account<'c, E>(executor: E, user_id: Uuid) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("INSERT INTO credit_accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn get_account<'c, E>(
    executor: E,
    user_id: Uuid,
) -> Result<Option<CreditAccount>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM credit_accounts WHERE user_id = $1");
    let row = sqlx::query(&sql)
        .bind(user_id)
        .fetch_optional(executor)
        .await?;

    row.map(|row| map_row(&row)).transpose()
}

pub async fn current_balance<'c, E>(executor: E, user_id: Uuid) -> Result<Option<Decimal>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar("SELECT credits_remaining FROM credit_accounts WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

/// Compare-and-decrement. Returns the new balance, or `None` when the account is missing or
/// holds less than `amount`.
pub async fn try_debit<'c, E>(
    executor: E,
    user_id: Uuid,
    amount: Decimal,
) -> Result<Option<Decimal>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        UPDATE credit_accounts
        SET
            credits_remaining = credits_remaining - $2,
            credits_used = credits_used + $2,
            updated_at = NOW()
        WHERE user_id = $1
          AND credits_remaining >= $2
        RETURNING credits_remaining
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .fetch_optional(executor)
    .await
}

pub async fn credit<'c, E>(
    executor: E,
    user_id: Uuid,
    amount: Decimal,
    reduce_usage: bool,
) -> Result<Option<Decimal>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        UPDATE credit_accounts
        SET
            credits_remaining = credits_remaining + $2,
            credits_used = CASE WHEN $3 THEN GREATEST(credits_used - $2, 0) ELSE credits_used END,
            updated_at = NOW()
        WHERE user_id = $1
        RETURNING credits_remaining
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(reduce_usage)
    .fetch_optional(executor)
    .await
}

/// Row-locks the account for a set-monthly renewal and returns `(balance, last_renewal_at)`.
pub async fn lock_for_renewal<'c, E>(
    executor: E,
    user_id: Uuid,
) -> Result<Option<(Decimal, Option<DateTime<Utc>>)>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "SELECT credits_remaining, last_renewal_at FROM credit_accounts WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|row| (row.get("credits_remaining"), row.get("last_renewal_at"))))
}

pub async fn apply_renewal<'c, E>(
    executor: E,
    user_id: Uuid,
    tier: Tier,
    allotment: Decimal,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<Decimal, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        UPDATE credit_accounts
        SET
            credits_remaining = $3,
            monthly_credits = $3,
            credits_used = 0,
            tier = $2,
            current_period_start = $4,
            current_period_end = $5,
            last_renewal_at = $4,
            updated_at = NOW()
        WHERE user_id = $1
        RETURNING credits_remaining
        "#,
    )
    .bind(user_id)
    .bind(tier.as_str())
    .bind(allotment)
    .bind(period_start)
    .bind(period_end)
    .fetch_one(executor)
    .await
}

fn map_row(row: &PgRow) -> Result<CreditAccount, StoreError> {
    let tier: String = row.get("tier");
    Ok(CreditAccount {
        user_id: row.get("user_id"),
        credits_remaining: row.get("credits_remaining"),
        tier: tier.parse().map_err(StoreError::Corrupt)?,
        monthly_credits: row.get("monthly_credits"),
        credits_used: row.get("credits_used"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        last_renewal_at: row.get("last_renewal_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
