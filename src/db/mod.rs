//! Storage seams for the ledger and generation records.
//!
//! Every balance mutation is a single atomic primitive on the store: the Postgres
//! implementation runs a conditional `UPDATE` and the log append in one transaction,
//! the in-memory implementation performs both inside one critical section. Callers
//! never read a balance, compute, and write it back.

pub mod credit_accounts;
pub mod generations;
pub mod ledger_transactions;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::generations::{GenerationProgress, GenerationRecord};
use crate::ledger::{CreditAccount, GrantMode, LedgerTransaction, OrphanedReservation};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("duplicate key: {0}")]
    Duplicate(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveResult {
    Reserved { balance: Decimal },
    AlreadyReserved { balance: Decimal },
    Insufficient { available: Decimal },
    AccountMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundResult {
    Refunded { balance: Decimal },
    AlreadyRefunded { balance: Decimal },
    NoReservation,
    ExceedsReservation { reserved: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantResult {
    Applied { balance: Decimal },
    AlreadyApplied { balance: Decimal },
    Stale { balance: Decimal },
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub user_id: Uuid,
    pub reservation_id: Uuid,
    pub amount: Decimal,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub user_id: Uuid,
    pub reservation_id: Uuid,
    pub amount: Decimal,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub user_id: Uuid,
    pub billing_event_id: String,
    pub amount: Decimal,
    pub mode: GrantMode,
    pub event_at: DateTime<Utc>,
    pub metadata: Value,
}

/// key: store-credit -> accounts + append-only transaction log
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Creates the account with a zero balance if it does not exist yet.
    async fn open_account(&self, user_id: Uuid) -> StoreResult<CreditAccount>;
    async fn account(&self, user_id: Uuid) -> StoreResult<Option<CreditAccount>>;
    async fn reserve(&self, request: &ReserveRequest) -> StoreResult<ReserveResult>;
    async fn refund(&self, request: &RefundRequest) -> StoreResult<RefundResult>;
    async fn grant(&self, request: &GrantRequest) -> StoreResult<GrantResult>;
    async fn transactions(&self, user_id: Uuid, limit: i64)
        -> StoreResult<Vec<LedgerTransaction>>;
    async fn ledger_sum(&self, user_id: Uuid) -> StoreResult<Decimal>;
    /// Reserve entries older than `created_before` with neither a refund nor a generation record.
    async fn orphaned_reservations(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<OrphanedReservation>>;
}

/// key: store-generation -> write-once records with monotonic status
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn insert_generation(&self, record: &GenerationRecord) -> StoreResult<()>;
    async fn generation(&self, generation_id: &str) -> StoreResult<Option<GenerationRecord>>;
    /// Applies the change only while the stored status is non-terminal.
    async fn update_progress(
        &self,
        generation_id: &str,
        progress: &GenerationProgress,
    ) -> StoreResult<Option<GenerationRecord>>;
    async fn mark_refunded(&self, generation_id: &str, at: DateTime<Utc>) -> StoreResult<bool>;
    async fn list_for_user(&self, user_id: Uuid, limit: i64)
        -> StoreResult<Vec<GenerationRecord>>;
    async fn in_flight(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<GenerationRecord>>;
    async fn failed_unrefunded(&self, limit: i64) -> StoreResult<Vec<GenerationRecord>>;
}
