use axum::{
    extract::{Extension, Query},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Ledger, LedgerTransaction, Tier};
use crate::error::AppResult;
use crate::extractor::AuthUser;

const MAX_TRANSACTIONS: i64 = 200;

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub user_id: Uuid,
    pub credits_remaining: Decimal,
    pub tier: Tier,
    pub monthly_credits: Decimal,
    pub credits_used: Decimal,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

/// key: ledger-api -> balance for the caller, opening the account on first read
pub async fn get_credits(
    Extension(ledger): Extension<Ledger>,
    user: AuthUser,
) -> AppResult<Json<CreditsResponse>> {
    let account = match ledger.account(user.user_id).await? {
        Some(account) => account,
        None => ledger.open_account(user.user_id).await?,
    };
    Ok(Json(CreditsResponse {
        user_id: account.user_id,
        credits_remaining: account.credits_remaining,
        tier: account.tier,
        monthly_credits: account.monthly_credits,
        credits_used: account.credits_used,
        current_period_end: account.current_period_end,
    }))
}

pub async fn list_transactions(
    Extension(ledger): Extension<Ledger>,
    user: AuthUser,
    Query(query): Query<TransactionsQuery>,
) -> AppResult<Json<Vec<LedgerTransaction>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, MAX_TRANSACTIONS);
    Ok(Json(ledger.transactions(user.user_id, limit).await?))
}
