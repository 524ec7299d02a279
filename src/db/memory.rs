use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    postgres::RENEWAL_PERIOD_DAYS, CreditStore, GenerationStore, GrantRequest, GrantResult,
    RefundRequest, RefundResult, ReserveRequest, ReserveResult, StoreError, StoreResult,
};
use crate::generations::{GenerationProgress, GenerationRecord};
use crate::ledger::{
    CreditAccount, GrantMode, LedgerTransaction, OrphanedReservation, TransactionKind,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, CreditAccount>,
    transactions: Vec<LedgerTransaction>,
    generations: HashMap<String, GenerationRecord>,
}

impl State {
    fn find(&self, kind: TransactionKind, reference: &str) -> Option<&LedgerTransaction> {
        self.transactions
            .iter()
            .find(|entry| entry.kind == kind && entry.reference == reference)
    }

    fn balance(&self, user_id: Uuid) -> Decimal {
        self.accounts
            .get(&user_id)
            .map(|account| account.credits_remaining)
            .unwrap_or(Decimal::ZERO)
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        &mut self,
        user_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        balance_after: Decimal,
        reference: String,
        metadata: Value,
        now: DateTime<Utc>,
    ) {
        self.transactions.push(LedgerTransaction {
            transaction_id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            balance_after,
            reference,
            metadata,
            created_at: now,
        });
    }
}

/// key: store-memory -> single critical section over accounts, log and records
///
/// Each operation takes the one lock for its whole duration, which gives the same
/// all-or-nothing behaviour as the Postgres transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn open_account(&self, user_id: Uuid) -> StoreResult<CreditAccount> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| CreditAccount::new(user_id, Utc::now()));
        Ok(account.clone())
    }

    async fn account(&self, user_id: Uuid) -> StoreResult<Option<CreditAccount>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&user_id).cloned())
    }

    async fn reserve(&self, request: &ReserveRequest) -> StoreResult<ReserveResult> {
        let reference = request.reservation_id.to_string();
        let mut state = self.state.lock().await;

        if state.find(TransactionKind::Reserve, &reference).is_some() {
            return Ok(ReserveResult::AlreadyReserved {
                balance: state.balance(request.user_id),
            });
        }

        let now = Utc::now();
        let Some(account) = state.accounts.get_mut(&request.user_id) else {
            return Ok(ReserveResult::AccountMissing);
        };
        if account.credits_remaining < request.amount {
            return Ok(ReserveResult::Insufficient {
                available: account.credits_remaining,
            });
        }
        account.credits_remaining -= request.amount;
        account.credits_used += request.amount;
        account.updated_at = now;
        let balance = account.credits_remaining;

        state.append(
            request.user_id,
            TransactionKind::Reserve,
            -request.amount,
            balance,
            reference,
            request.metadata.clone(),
            now,
        );
        Ok(ReserveResult::Reserved { balance })
    }

    async fn refund(&self, request: &RefundRequest) -> StoreResult<RefundResult> {
        let reference = request.reservation_id.to_string();
        let mut state = self.state.lock().await;

        let reserved = match state.find(TransactionKind::Reserve, &reference) {
            Some(entry) if entry.user_id == request.user_id => -entry.amount,
            _ => return Ok(RefundResult::NoReservation),
        };
        if state.find(TransactionKind::Refund, &reference).is_some() {
            return Ok(RefundResult::AlreadyRefunded {
                balance: state.balance(request.user_id),
            });
        }
        if request.amount > reserved {
            return Ok(RefundResult::ExceedsReservation { reserved });
        }

        let now = Utc::now();
        let Some(account) = state.accounts.get_mut(&request.user_id) else {
            return Ok(RefundResult::NoReservation);
        };
        account.credits_remaining += request.amount;
        account.credits_used = (account.credits_used - request.amount).max(Decimal::ZERO);
        account.updated_at = now;
        let balance = account.credits_remaining;

        state.append(
            request.user_id,
            TransactionKind::Refund,
            request.amount,
            balance,
            reference,
            request.metadata.clone(),
            now,
        );
        Ok(RefundResult::Refunded { balance })
    }

    async fn grant(&self, request: &GrantRequest) -> StoreResult<GrantResult> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        state
            .accounts
            .entry(request.user_id)
            .or_insert_with(|| CreditAccount::new(request.user_id, now));

        if state
            .find(TransactionKind::Grant, &request.billing_event_id)
            .is_some()
        {
            return Ok(GrantResult::AlreadyApplied {
                balance: state.balance(request.user_id),
            });
        }

        let account = state
            .accounts
            .get_mut(&request.user_id)
            .ok_or_else(|| StoreError::Corrupt(format!("account {} missing", request.user_id)))?;
        let previous = account.credits_remaining;

        let stale = match &request.mode {
            GrantMode::Add => {
                account.credits_remaining += request.amount;
                false
            }
            GrantMode::SetMonthly { tier } => {
                if account
                    .last_renewal_at
                    .map_or(false, |last| last >= request.event_at)
                {
                    true
                } else {
                    account.credits_remaining = request.amount;
                    account.monthly_credits = request.amount;
                    account.credits_used = Decimal::ZERO;
                    account.tier = *tier;
                    account.current_period_start = Some(request.event_at);
                    account.current_period_end =
                        Some(request.event_at + Duration::days(RENEWAL_PERIOD_DAYS));
                    account.last_renewal_at = Some(request.event_at);
                    false
                }
            }
        };
        if !stale {
            account.updated_at = now;
        }
        let balance = account.credits_remaining;

        let mut metadata = request.metadata.clone();
        if stale {
            if let Some(object) = metadata.as_object_mut() {
                object.insert("stale".to_string(), json!(true));
            }
        }

        state.append(
            request.user_id,
            TransactionKind::Grant,
            balance - previous,
            balance,
            request.billing_event_id.clone(),
            metadata,
            now,
        );

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
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|entry| entry.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn ledger_sum(&self, user_id: Uuid) -> StoreResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.amount)
            .sum())
    }

    async fn orphaned_reservations(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<OrphanedReservation>> {
        let state = self.state.lock().await;
        let mut orphans = Vec::new();
        for entry in state.transactions.iter() {
            if orphans.len() >= limit.max(0) as usize {
                break;
            }
            if entry.kind != TransactionKind::Reserve || entry.created_at >= created_before {
                continue;
            }
            if state.find(TransactionKind::Refund, &entry.reference).is_some() {
                continue;
            }
            let linked = state
                .generations
                .values()
                .any(|record| record.reservation_id.to_string() == entry.reference);
            if linked {
                continue;
            }
            let reservation_id = Uuid::parse_str(&entry.reference).map_err(|err| {
                StoreError::Corrupt(format!("reservation `{}`: {err}", entry.reference))
            })?;
            orphans.push(OrphanedReservation {
                user_id: entry.user_id,
                reservation_id,
                amount: -entry.amount,
                created_at: entry.created_at,
            });
        }
        Ok(orphans)
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn insert_generation(&self, record: &GenerationRecord) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let duplicate = state.generations.contains_key(&record.generation_id)
            || state
                .generations
                .values()
                .any(|existing| existing.reservation_id == record.reservation_id);
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "generation `{}`",
                record.generation_id
            )));
        }
        state
            .generations
            .insert(record.generation_id.clone(), record.clone());
        Ok(())
    }

    async fn generation(&self, generation_id: &str) -> StoreResult<Option<GenerationRecord>> {
        let state = self.state.lock().await;
        Ok(state.generations.get(generation_id).cloned())
    }

    async fn update_progress(
        &self,
        generation_id: &str,
        progress: &GenerationProgress,
    ) -> StoreResult<Option<GenerationRecord>> {
        let mut state = self.state.lock().await;
        let Some(record) = state.generations.get_mut(generation_id) else {
            return Ok(None);
        };
        if record.status.is_terminal() || progress.status.rank() < record.status.rank() {
            return Ok(None);
        }
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
        Ok(Some(record.clone()))
    }

    async fn mark_refunded(&self, generation_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.generations.get_mut(generation_id) {
            Some(record) if record.needs_refund() => {
                record.refunded_at = Some(at);
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<GenerationRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .generations
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn in_flight(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<GenerationRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .generations
            .values()
            .filter(|record| !record.status.is_terminal() && record.updated_at < updated_before)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn failed_unrefunded(&self, limit: i64) -> StoreResult<Vec<GenerationRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .generations
            .values()
            .filter(|record| record.needs_refund())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}
