use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    credit_accounts, generations, ledger_transactions, CreditStore, GenerationStore, GrantRequest,
    GrantResult, RefundRequest, RefundResult, ReserveRequest, ReserveResult, StoreError,
    StoreResult,
};
use crate::generations::{GenerationProgress, GenerationRecord};
use crate::ledger::{
    CreditAccount, GrantMode, LedgerTransaction, OrphanedReservation, TransactionKind,
};
use ledger_transactions::NewLedgerTransaction;

/// Length of the credit period opened by a set-monthly grant.
pub const RENEWAL_PERIOD_DAYS: i64 = 30;

/// key: store-postgres -> sqlx-backed ledger and generation records
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditStore for PgStore {
    async fn open_account(&self, user_id: Uuid) -> StoreResult<CreditAccount> {
        credit_accounts::ensure_account(&self.pool, user_id).await?;
        credit_accounts::get_account(&self.pool, user_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("account {user_id} vanished after insert")))
    }

    async fn account(&self, user_id: Uuid) -> StoreResult<Option<CreditAccount>> {
        credit_accounts::get_account(&self.pool, user_id).await
    }

    async fn reserve(&self, request: &ReserveRequest) -> StoreResult<ReserveResult> {
        let reference = request.reservation_id.to_string();
        let mut tx = self.pool.begin().await?;

        if ledger_transactions::find(&mut *tx, TransactionKind::Reserve, &reference)
            .await?
            .is_some()
        {
            let balance = credit_accounts::current_balance(&mut *tx, request.user_id)
                .await?
                .unwrap_or(Decimal::ZERO);
            tx.rollback().await?;
            return Ok(ReserveResult::AlreadyReserved { balance });
        }

        let Some(balance) =
            credit_accounts::try_debit(&mut *tx, request.user_id, request.amount).await?
        else {
            let available = credit_accounts::current_balance(&mut *tx, request.user_id).await?;
            tx.rollback().await?;
            return Ok(match available {
                Some(available) => ReserveResult::Insufficient { available },
                None => ReserveResult::AccountMissing,
            });
        };

        let appended = ledger_transactions::append(
            &mut *tx,
            NewLedgerTransaction {
                user_id: request.user_id,
                kind: TransactionKind::Reserve,
                amount: -request.amount,
                balance_after: balance,
                reference: &reference,
                metadata: &request.metadata,
            },
        )
        .await?;

        if appended.is_none() {
            // lost the race to a concurrent reserve with the same token
            tx.rollback().await?;
            let balance = credit_accounts::current_balance(&self.pool, request.user_id)
                .await?
                .unwrap_or(Decimal::ZERO);
            return Ok(ReserveResult::AlreadyReserved { balance });
        }

        tx.commit().await?;
        Ok(ReserveResult::Reserved { balance })
    }

    async fn refund(&self, request: &RefundRequest) -> StoreResult<RefundResult> {
        let reference = request.reservation_id.to_string();
        let mut tx = self.pool.begin().await?;

        let reservation =
            ledger_transactions::find(&mut *tx, TransactionKind::Reserve, &reference).await?;
        let Some(reservation) = reservation.filter(|entry| entry.user_id == request.user_id) else {
            tx.rollback().await?;
            return Ok(RefundResult::NoReservation);
        };

        if ledger_transactions::find(&mut *tx, TransactionKind::Refund, &reference)
            .await?
            .is_some()
        {
            let balance = credit_accounts::current_balance(&mut *tx, request.user_id)
                .await?
                .unwrap_or(Decimal::ZERO);
            tx.rollback().await?;
            return Ok(RefundResult::AlreadyRefunded { balance });
        }

        let reserved = -reservation.amount;
        if request.amount > reserved {
            tx.rollback().await?;
            return Ok(RefundResult::ExceedsReservation { reserved });
        }

        let Some(balance) =
            credit_accounts::credit(&mut *tx, request.user_id, request.amount, true).await?
        else {
            tx.rollback().await?;
            return Ok(RefundResult::NoReservation);
        };

        let appended = ledger_transactions::append(
            &mut *tx,
            NewLedgerTransaction {
                user_id: request.user_id,
                kind: TransactionKind::Refund,
                amount: request.amount,
                balance_after: balance,
                reference: &reference,
                metadata: &request.metadata,
            },
        )
        .await?;

        if appended.is_none() {
            tx.rollback().await?;
            let balance = credit_accounts::current_balance(&self.pool, request.user_id)
                .await?
                .unwrap_or(Decimal::ZERO);
            return Ok(RefundResult::AlreadyRefunded { balance });
        }

        tx.commit().await?;
        Ok(RefundResult::Refunded { balance })
    }

    async fn grant(&self, request: &GrantRequest) -> StoreResult<GrantResult> {
        let reference = request.billing_event_id.as_str();
        let mut tx = self.pool.begin().await?;

        credit_accounts::ensure_account(&mut *tx, request.user_id).await?;

        if ledger_transactions::find(&mut *tx, TransactionKind::Grant, reference)
            .await?
            .is_some()
        {
            let balance = credit_accounts::current_balance(&mut *tx, request.user_id)
                .await?
                .unwrap_or(Decimal::ZERO);
            tx.rollback().await?;
            return Ok(GrantResult::AlreadyApplied { balance });
        }

        let (delta, balance, stale) = match &request.mode {
            GrantMode::Add => {
                let balance =
                    credit_accounts::credit(&mut *tx, request.user_id, request.amount, false)
                        .await?
                        .ok_or_else(|| {
                            StoreError::Corrupt(format!("account {} missing", request.user_id))
                        })?;
                (request.amount, balance, false)
            }
            GrantMode::SetMonthly { tier } => {
                let (previous, last_renewal_at) =
                    credit_accounts::lock_for_renewal(&mut *tx, request.user_id)
                        .await?
                        .ok_or_else(|| {
                            StoreError::Corrupt(format!("account {} missing", request.user_id))
                        })?;

                if last_renewal_at.map_or(false, |last| last >= request.event_at) {
                    (Decimal::ZERO, previous, true)
                } else {
                    let period_end = request.event_at + Duration::days(RENEWAL_PERIOD_DAYS);
                    let balance = credit_accounts::apply_renewal(
                        &mut *tx,
                        request.user_id,
                        *tier,
                        request.amount,
                        request.event_at,
                        period_end,
                    )
                    .await?;
                    (balance - previous, balance, false)
                }
            }
        };

        let metadata = if stale {
            let mut metadata = request.metadata.clone();
            if let Some(object) = metadata.as_object_mut() {
                object.insert("stale".to_string(), json!(true));
            }
            metadata
        } else {
            request.metadata.clone()
        };

        let appended = ledger_transactions::append(
            &mut *tx,
            NewLedgerTransaction {
                user_id: request.user_id,
                kind: TransactionKind::Grant,
                amount: delta,
                balance_after: balance,
                reference,
                metadata: &metadata,
            },
        )
        .await?;

        if appended.is_none() {
            tx.rollback().await?;
            let balance = credit_accounts::current_balance(&self.pool, request.user_id)
                .await?
                .unwrap_or(Decimal::ZERO);
            return Ok(GrantResult::AlreadyApplied { balance });
        }

        tx.commit().await?;
        Ok(if stale {
            GrantResult::Stale { balance }
        } else {
            GrantResult::Applied { balance }
        })
    }

    async fn transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<LedgerTransaction>> {
        ledger_transactions::list_for_user(&self.pool, user_id, limit).await
    }

    async fn ledger_sum(&self, user_id: Uuid) -> StoreResult<Decimal> {
        Ok(ledger_transactions::sum_for_user(&self.pool, user_id).await?)
    }

    async fn orphaned_reservations(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<OrphanedReservation>> {
        ledger_transactions::orphaned_reservations(&self.pool, created_before, limit).await
    }
}

#[async_trait]
impl GenerationStore for PgStore {
    async fn insert_generation(&self, record: &GenerationRecord) -> StoreResult<()> {
        generations::insert(&self.pool, record).await
    }

    async fn generation(&self, generation_id: &str) -> StoreResult<Option<GenerationRecord>> {
        generations::get(&self.pool, generation_id).await
    }

    async fn update_progress(
        &self,
        generation_id: &str,
        progress: &GenerationProgress,
    ) -> StoreResult<Option<GenerationRecord>> {
        generations::update_progress(&self.pool, generation_id, progress).await
    }

    async fn mark_refunded(&self, generation_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(generations::mark_refunded(&self.pool, generation_id, at).await?)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<GenerationRecord>> {
        generations::list_for_user(&self.pool, user_id, limit).await
    }

    async fn in_flight(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<GenerationRecord>> {
        generations::in_flight(&self.pool, updated_before, limit).await
    }

    async fn failed_unrefunded(&self, limit: i64) -> StoreResult<Vec<GenerationRecord>> {
        generations::failed_unrefunded(&self.pool, limit).await
    }
}
