use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::token::TokenError;

/// Failures surfaced to the HTTP layer. A duplicate scan is NOT one of
/// these: it is a normal attribution outcome handled in the routes.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed token or signature mismatch. One variant on purpose: the
    /// response must not reveal which.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid identifier")]
    BadIdentifier,

    /// Transient store failure. The scan decision is unresolved; the client
    /// may retry.
    #[error("Store unavailable")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::BadIdentifier => AppError::BadIdentifier,
            TokenError::Invalid => AppError::InvalidToken,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidToken | AppError::BadIdentifier => StatusCode::BAD_REQUEST,
            AppError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
