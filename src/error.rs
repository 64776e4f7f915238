use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

// Every rejection the API can produce, so callers can tell the kinds apart.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error("payment gateway: {0}")]
    UpstreamPayment(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Validation(_) => "validation",
            AppError::UpstreamPayment(_) => "upstream_payment",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamPayment(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // internal detail stays in the logs, not in the response body
        if let AppError::Database(ref err) = self {
            tracing::error!("database error: {err}");
        }
        if let AppError::Internal(ref err) = self {
            tracing::error!("internal error: {err:#}");
        }

        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
