pub mod api;
pub mod models;
pub mod service;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::db::StoreError;

pub use models::{
    CreditAccount, GrantMode, GrantOutcome, LedgerAudit, LedgerTransaction, OrphanedReservation,
    RefundOutcome, ReserveOutcome, Tier, TransactionKind,
};
pub use service::Ledger;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Decimal, available: Decimal },
    #[error("no reservation recorded for this token")]
    NoSuchReservation,
    #[error("credit account not found")]
    AccountNotFound,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
