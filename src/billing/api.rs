use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{BillingService, WebhookOutcome};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::ledger::Tier;

#[derive(Debug, Deserialize)]
pub struct CreditsCheckoutRequest {
    pub email: String,
    pub credit_amount: u32,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionCheckoutRequest {
    pub email: String,
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// key: billing-api -> checkout endpoints
pub async fn create_credits_checkout(
    Extension(billing): Extension<BillingService>,
    user: AuthUser,
    Json(payload): Json<CreditsCheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let session = billing
        .create_credits_checkout(user.user_id, &payload.email, payload.credit_amount)
        .await?;
    Ok(Json(CheckoutResponse { url: session.url }))
}

pub async fn create_subscription_checkout(
    Extension(billing): Extension<BillingService>,
    user: AuthUser,
    Json(payload): Json<SubscriptionCheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let tier: Tier = payload.tier.parse().map_err(AppError::BadRequest)?;
    let session = billing
        .create_subscription_checkout(user.user_id, &payload.email, tier)
        .await?;
    Ok(Json(CheckoutResponse { url: session.url }))
}

/// key: billing-api -> stripe webhook, verified against the raw body
pub async fn stripe_webhook(
    Extension(billing): Extension<BillingService>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing signature".into()))?;

    match billing.handle_webhook(&body, signature).await? {
        WebhookOutcome::Granted { user_id, outcome } => {
            info!(%user_id, ?outcome, "billing webhook applied");
        }
        WebhookOutcome::Ignored { reason } => {
            info!(%reason, "billing webhook acknowledged without changes");
        }
    }
    Ok(Json(json!({ "received": true })))
}
