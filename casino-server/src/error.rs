use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ledger::LedgerError;
use serde::Serialize;

/// Shown to the user when a round fails after money may have moved.
pub const ROUND_FAILED_MESSAGE: &str = "Something went wrong, your balance may be affected";

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

// Ledger failures mapped onto HTTP responses
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::AlreadyExists { .. } => StatusCode::OK,
        LedgerError::InsufficientFunds { .. }
        | LedgerError::InvalidAmount(_)
        | LedgerError::UnknownCurrency(_) => StatusCode::BAD_REQUEST,
        LedgerError::Blacklisted(_) => StatusCode::FORBIDDEN,
        LedgerError::SessionActive { .. } => StatusCode::CONFLICT,
        LedgerError::StoreUnavailable(_) | LedgerError::Corrupt(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if self.0.is_store_failure() {
            tracing::error!("Ledger store failure: {}", self.0);
        }
        error_response(status, self.0.to_string())
    }
}
