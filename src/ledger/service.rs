use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{
    CreditAccount, GrantMode, GrantOutcome, LedgerAudit, LedgerTransaction, OrphanedReservation,
    RefundOutcome, ReserveOutcome,
};
use super::LedgerError;
use crate::db::{
    CreditStore, GrantRequest, GrantResult, RefundRequest, RefundResult, ReserveRequest,
    ReserveResult,
};

/// key: credit-ledger -> the only writer of account balances
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn CreditStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    /// Signup hook. Idempotent.
    pub async fn open_account(&self, user_id: Uuid) -> Result<CreditAccount, LedgerError> {
        Ok(self.store.open_account(user_id).await?)
    }

    pub async fn account(&self, user_id: Uuid) -> Result<Option<CreditAccount>, LedgerError> {
        Ok(self.store.account(user_id).await?)
    }

    /// Latest committed balance. Unknown users read as zero.
    pub async fn balance(&self, user_id: Uuid) -> Result<Decimal, LedgerError> {
        Ok(self
            .store
            .account(user_id)
            .await?
            .map(|account| account.credits_remaining)
            .unwrap_or(Decimal::ZERO))
    }

    // key: credit-ledger -> reserve
    pub async fn reserve(
        &self,
        user_id: Uuid,
        reservation_id: Uuid,
        amount: Decimal,
        metadata: Value,
    ) -> Result<ReserveOutcome, LedgerError> {
        ensure_positive(amount)?;

        let result = self
            .store
            .reserve(&ReserveRequest {
                user_id,
                reservation_id,
                amount,
                metadata,
            })
            .await?;

        match result {
            ReserveResult::Reserved { balance } => {
                info!(%user_id, %reservation_id, %amount, %balance, "credits reserved");
                Ok(ReserveOutcome::Reserved { balance })
            }
            ReserveResult::AlreadyReserved { balance } => {
                info!(%user_id, %reservation_id, "reservation already recorded");
                Ok(ReserveOutcome::AlreadyReserved { balance })
            }
            ReserveResult::Insufficient { available } => Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            }),
            ReserveResult::AccountMissing => Err(LedgerError::AccountNotFound),
        }
    }

    // key: credit-ledger -> refund
    pub async fn refund(
        &self,
        user_id: Uuid,
        reservation_id: Uuid,
        amount: Decimal,
        metadata: Value,
    ) -> Result<RefundOutcome, LedgerError> {
        ensure_positive(amount)?;

        let result = self
            .store
            .refund(&RefundRequest {
                user_id,
                reservation_id,
                amount,
                metadata,
            })
            .await?;

        match result {
            RefundResult::Refunded { balance } => {
                info!(%user_id, %reservation_id, %amount, %balance, "reservation refunded");
                Ok(RefundOutcome::Refunded { balance })
            }
            RefundResult::AlreadyRefunded { balance } => {
                info!(%user_id, %reservation_id, "refund already recorded");
                Ok(RefundOutcome::AlreadyRefunded { balance })
            }
            RefundResult::NoReservation => Err(LedgerError::NoSuchReservation),
            RefundResult::ExceedsReservation { reserved } => Err(LedgerError::InvalidAmount(
                format!("refund {amount} exceeds reserved {reserved}"),
            )),
        }
    }

    // key: credit-ledger -> grant
    pub async fn grant(
        &self,
        user_id: Uuid,
        billing_event_id: &str,
        amount: Decimal,
        mode: GrantMode,
        event_at: DateTime<Utc>,
    ) -> Result<GrantOutcome, LedgerError> {
        match mode {
            GrantMode::Add => ensure_positive(amount)?,
            GrantMode::SetMonthly { .. } if amount < Decimal::ZERO => {
                return Err(LedgerError::InvalidAmount(format!(
                    "monthly allotment {amount} is negative"
                )))
            }
            GrantMode::SetMonthly { .. } => {}
        }
        if billing_event_id.trim().is_empty() {
            return Err(LedgerError::InvalidAmount(
                "billing event id is empty".to_string(),
            ));
        }

        let metadata = match &mode {
            GrantMode::Add => json!({ "mode": mode.label() }),
            GrantMode::SetMonthly { tier } => json!({ "mode": mode.label(), "tier": tier }),
        };

        let result = self
            .store
            .grant(&GrantRequest {
                user_id,
                billing_event_id: billing_event_id.to_string(),
                amount,
                mode: mode.clone(),
                event_at,
                metadata,
            })
            .await?;

        let outcome = match result {
            GrantResult::Applied { balance } => {
                info!(%user_id, billing_event_id, mode = mode.label(), %amount, %balance, "credits granted");
                GrantOutcome::Applied { balance }
            }
            GrantResult::AlreadyApplied { balance } => {
                info!(%user_id, billing_event_id, "billing event already applied");
                GrantOutcome::AlreadyApplied { balance }
            }
            GrantResult::Stale { balance } => {
                warn!(%user_id, billing_event_id, %event_at, "ignoring renewal older than the last applied one");
                GrantOutcome::Stale { balance }
            }
        };
        Ok(outcome)
    }

    pub async fn transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        Ok(self.store.transactions(user_id, limit).await?)
    }

    pub async fn orphaned_reservations(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrphanedReservation>, LedgerError> {
        Ok(self
            .store
            .orphaned_reservations(created_before, limit)
            .await?)
    }

    /// Compares the stored balance with the sum of the user's log entries.
    pub async fn audit(&self, user_id: Uuid) -> Result<LedgerAudit, LedgerError> {
        let balance = self.balance(user_id).await?;
        let log_sum = self.store.ledger_sum(user_id).await?;
        let consistent = balance == log_sum;
        if !consistent {
            warn!(%user_id, %balance, %log_sum, "ledger drift detected");
        }
        Ok(LedgerAudit {
            user_id,
            balance,
            log_sum,
            consistent,
        })
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}
