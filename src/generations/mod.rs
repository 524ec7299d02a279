pub mod api;
pub mod models;
pub mod orchestrator;
pub mod reconciler;
pub mod scheduler;

use rust_decimal::Decimal;
use thiserror::Error;

pub use models::{
    GenerationHandle, GenerationHistory, GenerationProgress, GenerationRecord, GenerationStats,
    GenerationStatus,
};
pub use orchestrator::{GenerationOrchestrator, MAX_HISTORY_RECORDS, MAX_PROMPT_CHARS};
pub use reconciler::StatusReconciler;
pub use scheduler::{
    process_tick as run_reconciler_tick, spawn as spawn_reconciler, ReconcilerSettings,
    TickReport,
};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Decimal, available: Decimal },
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("generation not found")]
    NotFound,
}
