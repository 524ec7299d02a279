use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::models::{
    GenerationHandle, GenerationHistory, GenerationRecord, GenerationStats, GenerationStatus,
};
use super::GenerationError;
use crate::db::GenerationStore;
use crate::ledger::{Ledger, LedgerError};
use crate::providers::{self, ProviderRegistry};

pub const MAX_PROMPT_CHARS: usize = 2000;
pub const MAX_HISTORY_RECORDS: i64 = 50;

/// key: generation-orchestrator -> reserve, submit, record
#[derive(Clone)]
pub struct GenerationOrchestrator {
    ledger: Ledger,
    store: Arc<dyn GenerationStore>,
    providers: ProviderRegistry,
    poll_interval_seconds: u64,
}

impl GenerationOrchestrator {
    pub fn new(
        ledger: Ledger,
        store: Arc<dyn GenerationStore>,
        providers: ProviderRegistry,
        poll_interval_seconds: u64,
    ) -> Self {
        Self {
            ledger,
            store,
            providers,
            poll_interval_seconds,
        }
    }

    pub async fn submit(
        &self,
        user_id: Uuid,
        prompt: &str,
        model_id: &str,
    ) -> Result<GenerationHandle, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(GenerationError::InvalidRequest(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        let model = providers::lookup(model_id).ok_or_else(|| {
            GenerationError::InvalidRequest(format!("unknown model `{model_id}`"))
        })?;
        let provider = self
            .providers
            .get(model.provider)
            .map_err(|err| GenerationError::ProviderUnavailable(err.to_string()))?;

        // key: generation-orchestrator -> reservation precedes the paid call
        let reservation_id = Uuid::new_v4();
        let metadata = json!({ "model": model.id, "provider": model.provider });
        match self
            .ledger
            .reserve(user_id, reservation_id, model.credits, metadata)
            .await
        {
            Ok(_) => {}
            Err(LedgerError::InsufficientCredits {
                required,
                available,
            }) => {
                return Err(GenerationError::InsufficientCredits {
                    required,
                    available,
                })
            }
            Err(LedgerError::AccountNotFound) => {
                return Err(GenerationError::InsufficientCredits {
                    required: model.credits,
                    available: Decimal::ZERO,
                })
            }
            Err(LedgerError::InvalidAmount(reason)) => {
                return Err(GenerationError::InvalidRequest(reason))
            }
            Err(err) => {
                warn!(?err, %user_id, model = model.id, "credit reservation failed");
                return Err(GenerationError::StoreUnavailable(err.to_string()));
            }
        }

        let job_id = match provider.submit(prompt, model).await {
            Ok(job_id) => job_id,
            Err(err) => {
                warn!(?err, %user_id, %reservation_id, provider = %model.provider, "provider submission failed");
                let metadata = json!({ "reason": "submission_failed", "model": model.id });
                if let Err(refund_err) = self
                    .ledger
                    .refund(user_id, reservation_id, model.credits, metadata)
                    .await
                {
                    // left for the orphaned-reservation sweep
                    error!(?refund_err, %user_id, %reservation_id, "compensating refund failed");
                }
                return Err(GenerationError::ProviderUnavailable(err.to_string()));
            }
        };

        let now = Utc::now();
        let record = GenerationRecord {
            generation_id: job_id,
            reservation_id,
            user_id,
            provider: model.provider,
            model: model.id.to_string(),
            prompt: prompt.to_string(),
            status: GenerationStatus::Starting,
            credits_reserved: model.credits,
            cost_to_operator: model.operator_cost,
            video_url: None,
            error_message: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        if let Err(err) = self.store.insert_generation(&record).await {
            error!(
                ?err,
                %user_id,
                %reservation_id,
                generation_id = %record.generation_id,
                "failed to persist generation record; reservation left for the sweep"
            );
            return Err(GenerationError::StoreUnavailable(err.to_string()));
        }

        info!(
            %user_id,
            generation_id = %record.generation_id,
            model = model.id,
            credits = %model.credits,
            "generation submitted"
        );

        Ok(GenerationHandle {
            generation_id: record.generation_id,
            status: record.status,
            estimated_duration_seconds: model.estimated_duration_seconds,
            poll_interval_seconds: self.poll_interval_seconds,
            provider: model.provider,
            model: record.model,
            credits_reserved: record.credits_reserved,
        })
    }

    // key: generation-orchestrator -> history with spend stats
    pub async fn history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<GenerationHistory, GenerationError> {
        let limit = limit.clamp(1, MAX_HISTORY_RECORDS);
        let videos = self
            .store
            .list_for_user(user_id, limit)
            .await
            .map_err(|err| GenerationError::StoreUnavailable(err.to_string()))?;
        let stats = GenerationStats::from_records(&videos);
        Ok(GenerationHistory { videos, stats })
    }
}
