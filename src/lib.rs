pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod generations;
pub mod ledger;
pub mod providers;
pub mod routes;

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use billing::{BillingService, CheckoutSettings, PaymentProvider, TierCatalog};
use db::{CreditStore, GenerationStore};
use generations::{GenerationOrchestrator, StatusReconciler};
use ledger::Ledger;
use providers::ProviderRegistry;

/// key: app-services -> shared handles injected into handlers
#[derive(Clone)]
pub struct Services {
    pub ledger: Ledger,
    pub orchestrator: GenerationOrchestrator,
    pub reconciler: StatusReconciler,
    pub billing: BillingService,
}

impl Services {
    pub fn new(
        credits: Arc<dyn CreditStore>,
        generations: Arc<dyn GenerationStore>,
        providers: ProviderRegistry,
        payments: Arc<dyn PaymentProvider>,
        tiers: TierCatalog,
        checkout: CheckoutSettings,
        poll_interval_seconds: u64,
    ) -> Self {
        let ledger = Ledger::new(credits);
        let orchestrator = GenerationOrchestrator::new(
            ledger.clone(),
            generations.clone(),
            providers.clone(),
            poll_interval_seconds,
        );
        let reconciler = StatusReconciler::new(ledger.clone(), generations, providers);
        let billing = BillingService::new(ledger.clone(), payments, tiers, checkout);
        Self {
            ledger,
            orchestrator,
            reconciler,
            billing,
        }
    }
}

async fn root() -> &'static str {
    "clipledger API"
}

/// Application router without the metrics layer.
pub fn app(services: &Services) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(routes::api_routes())
        .layer(Extension(services.ledger.clone()))
        .layer(Extension(services.orchestrator.clone()))
        .layer(Extension(services.reconciler.clone()))
        .layer(Extension(services.billing.clone()))
}
