use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::billing::{CheckoutError, WebhookError};
use crate::generations::GenerationError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Decimal, available: Decimal },
    #[error("not found")]
    NotFound,
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self);
        }

        let body = match &self {
            AppError::InsufficientCredits {
                required,
                available,
            } => json!({
                "error": self.to_string(),
                "required": required,
                "available": available,
            }),
            AppError::Unavailable(_) => json!({ "error": self.to_string(), "retryable": true }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::InvalidRequest(reason) => AppError::BadRequest(reason),
            GenerationError::InsufficientCredits {
                required,
                available,
            } => AppError::InsufficientCredits {
                required,
                available,
            },
            GenerationError::NotFound => AppError::NotFound,
            err @ (GenerationError::ProviderUnavailable(_)
            | GenerationError::StoreUnavailable(_)) => AppError::Unavailable(err.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => AppError::InsufficientCredits {
                required,
                available,
            },
            LedgerError::AccountNotFound | LedgerError::NoSuchReservation => AppError::NotFound,
            LedgerError::InvalidAmount(reason) => AppError::BadRequest(reason),
            LedgerError::Store(err) => AppError::Unavailable(err.to_string()),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::InvalidRequest(reason) => AppError::BadRequest(reason),
            err @ CheckoutError::NotConfigured(_) => AppError::Unavailable(err.to_string()),
            CheckoutError::Provider(reason) => AppError::BadGateway(reason),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Rejected(reason) => AppError::BadRequest(reason),
            WebhookError::Transient(reason) => AppError::Message(reason),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
