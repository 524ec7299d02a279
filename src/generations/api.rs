use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::models::{GenerationHandle, GenerationHistory, GenerationRecord, GenerationStatus};
use super::{GenerationOrchestrator, StatusReconciler, MAX_HISTORY_RECORDS};
use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::providers::{self, ModelSpec};

#[derive(Debug, Deserialize)]
pub struct CreateGenerationRequest {
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct GenerationStatusResponse {
    pub generation_id: String,
    pub status: GenerationStatus,
    pub model: String,
    pub credits_reserved: Decimal,
    pub video_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<GenerationRecord> for GenerationStatusResponse {
    fn from(record: GenerationRecord) -> Self {
        Self {
            generation_id: record.generation_id,
            status: record.status,
            model: record.model,
            credits_reserved: record.credits_reserved,
            video_url: record.video_url,
            error: record.error_message,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// key: generations-api -> rest endpoints
pub async fn create_generation(
    Extension(orchestrator): Extension<GenerationOrchestrator>,
    user: AuthUser,
    Json(payload): Json<CreateGenerationRequest>,
) -> AppResult<(StatusCode, Json<GenerationHandle>)> {
    let handle = orchestrator
        .submit(user.user_id, &payload.prompt, &payload.model)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// Ids containing `/` (long-running operation names) must be percent-encoded by the caller.
pub async fn get_generation(
    Extension(reconciler): Extension<StatusReconciler>,
    user: AuthUser,
    Path(generation_id): Path<String>,
) -> AppResult<Json<GenerationStatusResponse>> {
    let record = reconciler.poll_owned(user.user_id, &generation_id).await?;
    Ok(Json(record.into()))
}

pub async fn list_generations(
    Extension(orchestrator): Extension<GenerationOrchestrator>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<GenerationHistory>> {
    let history = orchestrator
        .history(user.user_id, query.limit.unwrap_or(MAX_HISTORY_RECORDS))
        .await?;
    Ok(Json(history))
}

pub async fn list_models() -> Json<&'static [ModelSpec]> {
    Json(providers::catalog())
}
