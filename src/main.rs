use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use clipledger::billing::{CheckoutSettings, StripeAdapter, TierCatalog};
use clipledger::db::PgStore;
use clipledger::generations::{spawn_reconciler, ReconcilerSettings};
use clipledger::providers::ProviderRegistry;
use clipledger::{app, config, Services};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let store = Arc::new(PgStore::new(pool.clone()));
    let providers = ProviderRegistry::from_env()?;
    let payments = Arc::new(StripeAdapter::from_env()?);
    let services = Services::new(
        store.clone(),
        store,
        providers,
        payments,
        TierCatalog::from_env(),
        CheckoutSettings::from_env(),
        *config::POLL_INTERVAL_SECS,
    );

    if *config::RECONCILER_ENABLED {
        spawn_reconciler(services.reconciler.clone(), ReconcilerSettings::from_env());
    } else {
        tracing::info!("background reconciler disabled");
    }

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let router = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(app(&services))
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
