use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{GenerationProgress, GenerationRecord, GenerationStatus};
use super::GenerationError;
use crate::db::GenerationStore;
use crate::ledger::{Ledger, RefundOutcome};
use crate::providers::ProviderRegistry;

/// key: status-reconciler -> provider state into records and refunds
#[derive(Clone)]
pub struct StatusReconciler {
    ledger: Ledger,
    store: Arc<dyn GenerationStore>,
    providers: ProviderRegistry,
}

impl StatusReconciler {
    pub fn new(ledger: Ledger, store: Arc<dyn GenerationStore>, providers: ProviderRegistry) -> Self {
        Self {
            ledger,
            store,
            providers,
        }
    }

    pub async fn poll(&self, generation_id: &str) -> Result<GenerationRecord, GenerationError> {
        let record = self.load(generation_id).await?;
        Ok(self.reconcile(record).await)
    }

    /// Same as [`poll`](Self::poll) but hides records owned by someone else.
    pub async fn poll_owned(
        &self,
        user_id: Uuid,
        generation_id: &str,
    ) -> Result<GenerationRecord, GenerationError> {
        let record = self.load(generation_id).await?;
        if record.user_id != user_id {
            return Err(GenerationError::NotFound);
        }
        Ok(self.reconcile(record).await)
    }

    async fn load(&self, generation_id: &str) -> Result<GenerationRecord, GenerationError> {
        self.store
            .generation(generation_id)
            .await
            .map_err(|err| GenerationError::StoreUnavailable(err.to_string()))?
            .ok_or(GenerationError::NotFound)
    }

    // key: status-reconciler -> single record step
    async fn reconcile(&self, record: GenerationRecord) -> GenerationRecord {
        if record.status.is_terminal() {
            if record.needs_refund() {
                return self.settle_failure(record).await;
            }
            return record;
        }

        let provider = match self.providers.get(record.provider) {
            Ok(provider) => provider,
            Err(err) => {
                warn!(?err, generation_id = %record.generation_id, "cannot poll generation");
                return record;
            }
        };

        let result = match provider.poll(&record.generation_id).await {
            Ok(result) => result,
            Err(err) => {
                warn!(?err, generation_id = %record.generation_id, provider = %record.provider, "provider poll failed");
                return record;
            }
        };

        let status = GenerationStatus::from(result.status);
        if status.rank() <= record.status.rank() {
            debug!(
                generation_id = %record.generation_id,
                current = %record.status,
                observed = %status,
                "generation unchanged or observation stale"
            );
            return record;
        }

        let progress = GenerationProgress {
            status,
            video_url: result.output_url,
            error_message: result.error_detail,
            completed_at: status.is_terminal().then(Utc::now),
        };

        let updated = match self
            .store
            .update_progress(&record.generation_id, &progress)
            .await
        {
            Ok(Some(updated)) => updated,
            // a concurrent poll finalized it first
            Ok(None) => match self.store.generation(&record.generation_id).await {
                Ok(Some(current)) => current,
                _ => apply(record, &progress),
            },
            Err(err) => {
                error!(?err, generation_id = %record.generation_id, %status, "failed to persist generation status");
                apply(record, &progress)
            }
        };

        if updated.status.is_terminal() {
            info!(
                generation_id = %updated.generation_id,
                user_id = %updated.user_id,
                status = %updated.status,
                "generation finished"
            );
        }

        if updated.needs_refund() {
            return self.settle_failure(updated).await;
        }
        updated
    }

    /// Refunds a failed generation and stamps `refunded_at`. The ledger guard makes
    /// repeated calls for one reservation a no-op.
    async fn settle_failure(&self, mut record: GenerationRecord) -> GenerationRecord {
        let metadata = json!({
            "reason": "generation_failed",
            "generation_id": record.generation_id,
            "model": record.model,
        });
        let outcome = self
            .ledger
            .refund(
                record.user_id,
                record.reservation_id,
                record.credits_reserved,
                metadata,
            )
            .await;

        match outcome {
            Ok(RefundOutcome::Refunded { .. }) | Ok(RefundOutcome::AlreadyRefunded { .. }) => {
                let now = Utc::now();
                if let Err(err) = self.store.mark_refunded(&record.generation_id, now).await {
                    error!(?err, generation_id = %record.generation_id, "failed to mark generation refunded");
                } else {
                    record.refunded_at = Some(now);
                }
            }
            Err(err) => {
                error!(
                    ?err,
                    generation_id = %record.generation_id,
                    user_id = %record.user_id,
                    "refund for failed generation did not complete"
                );
            }
        }
        record
    }

    /// Polls non-terminal records not touched since `updated_before`. Returns how many were polled.
    pub async fn poll_in_flight(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<usize> {
        let records = self.store.in_flight(updated_before, limit).await?;
        let count = records.len();
        for record in records {
            self.reconcile(record).await;
        }
        Ok(count)
    }

    /// Refunds reservations that never got a generation record.
    pub async fn refund_orphans(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<usize> {
        let orphans = self
            .ledger
            .orphaned_reservations(created_before, limit)
            .await?;
        let mut refunded = 0;
        for orphan in orphans {
            let metadata = json!({ "reason": "orphaned_reservation" });
            match self
                .ledger
                .refund(orphan.user_id, orphan.reservation_id, orphan.amount, metadata)
                .await
            {
                Ok(RefundOutcome::Refunded { .. }) => {
                    info!(
                        user_id = %orphan.user_id,
                        reservation_id = %orphan.reservation_id,
                        amount = %orphan.amount,
                        "refunded orphaned reservation"
                    );
                    refunded += 1;
                }
                Ok(RefundOutcome::AlreadyRefunded { .. }) => {}
                Err(err) => warn!(
                    ?err,
                    reservation_id = %orphan.reservation_id,
                    "failed to refund orphaned reservation"
                ),
            }
        }
        Ok(refunded)
    }

    /// Retries refunds for failed records whose earlier refund did not land.
    pub async fn retry_refunds(&self, limit: i64) -> anyhow::Result<usize> {
        let records = self.store.failed_unrefunded(limit).await?;
        let mut settled = 0;
        for record in records {
            if self.settle_failure(record).await.refunded_at.is_some() {
                settled += 1;
            }
        }
        Ok(settled)
    }
}

fn apply(mut record: GenerationRecord, progress: &GenerationProgress) -> GenerationRecord {
    record.status = progress.status;
    if progress.video_url.is_some() {
        record.video_url = progress.video_url.clone();
    }
    if progress.error_message.is_some() {
        record.error_message = progress.error_message.clone();
    }
    if progress.completed_at.is_some() {
        record.completed_at = progress.completed_at;
    }
    record.updated_at = Utc::now();
    record
}
