use axum::{
    routing::{get, post},
    Router,
};

use crate::{billing, generations, ledger};

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/generations",
            get(generations::api::list_generations).post(generations::api::create_generation),
        )
        .route(
            "/api/generations/:id",
            get(generations::api::get_generation),
        )
        .route("/api/models", get(generations::api::list_models))
        .route("/api/credits", get(ledger::api::get_credits))
        .route(
            "/api/credits/transactions",
            get(ledger::api::list_transactions),
        )
        .route(
            "/api/checkout/credits",
            post(billing::create_credits_checkout),
        )
        .route(
            "/api/checkout/subscription",
            post(billing::create_subscription_checkout),
        )
        .route("/api/webhooks/stripe", post(billing::stripe_webhook))
}
