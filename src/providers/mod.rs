//! Adapters for the external video-generation backends.
//!
//! Every backend speaks its own status vocabulary and output shape; adapters translate
//! both into [`PollResult`] so the orchestrator and reconciler never branch on provider.

pub mod models;
pub mod replicate;
pub mod runway;
pub mod veo;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config;

pub use models::{catalog, lookup, JobStatus, ModelSpec, PollResult, ProviderKind};
pub use replicate::ReplicateProvider;
pub use runway::RunwayProvider;
pub use veo::VeoProvider;

/// Opaque job identifier assigned by the backend.
pub type ProviderJobId = String;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
    #[error("provider {0} is not configured")]
    NotConfigured(ProviderKind),
}

/// key: video-provider -> uniform submit/poll contract
#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    async fn submit(&self, prompt: &str, model: &ModelSpec)
        -> Result<ProviderJobId, ProviderError>;
    async fn poll(&self, job_id: &str) -> Result<PollResult, ProviderError>;
    /// Pulls the video URL out of a raw job payload.
    fn extract_output(&self, raw: &Value) -> Option<String>;
}

/// key: video-provider -> kind to adapter lookup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn VideoProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn VideoProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn VideoProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn VideoProvider>, ProviderError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or(ProviderError::NotConfigured(kind))
    }

    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    /// Registers every backend whose credentials are present in the environment.
    pub fn from_env() -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(*config::PROVIDER_TIMEOUT_SECS);
        let mut registry = Self::new();

        if let Some(token) = config::REPLICATE_API_TOKEN.clone() {
            registry.register(Arc::new(ReplicateProvider::new(
                config::REPLICATE_API_URL.as_str(),
                token,
                timeout,
            )?));
        }
        if let Some(key) = config::RUNWAY_API_KEY.clone() {
            registry.register(Arc::new(RunwayProvider::new(
                config::RUNWAY_API_URL.as_str(),
                key,
                config::RUNWAY_API_VERSION.as_str(),
                timeout,
            )?));
        }
        if let Some(key) = config::VEO_API_KEY.clone() {
            registry.register(Arc::new(VeoProvider::new(
                config::VEO_API_URL.as_str(),
                key,
                timeout,
            )?));
        }

        info!(providers = ?registry.configured(), "video providers configured");
        Ok(registry)
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Decodes a JSON body, turning non-2xx responses into [`ProviderError::Rejected`].
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<Value>().await?)
}

/// A success without a usable URL cannot be delivered, so it is reported as a failure.
pub(crate) fn finish(
    status: JobStatus,
    output_url: Option<String>,
    error_detail: Option<String>,
) -> PollResult {
    match (status, output_url) {
        (JobStatus::Succeeded, None) => PollResult {
            status: JobStatus::Failed,
            output_url: None,
            error_detail: Some("provider reported success without a video url".to_string()),
        },
        (JobStatus::Succeeded, Some(url)) => PollResult {
            status,
            output_url: Some(url),
            error_detail: None,
        },
        (JobStatus::Failed, _) => PollResult {
            status,
            output_url: None,
            error_detail: Some(
                error_detail.unwrap_or_else(|| "provider reported failure".to_string()),
            ),
        },
        (status, _) => PollResult {
            status,
            output_url: None,
            error_detail: None,
        },
    }
}
