//! Application-wide error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Price oracle error: {0}")]
    Oracle(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt stored value: {0}")]
    Decode(String),

    #[error(transparent)]
    Domain(#[from] vcoin_core::Error),
}

pub type Result<T> = std::result::Result<T, SettlementError>;

impl SettlementError {
    pub fn status_code(&self) -> StatusCode {
        use vcoin_core::Error as Core;

        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Oracle(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Domain(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            // Only reachable with amounts far outside any real ledger.
            Self::Domain(Core::ArithmeticOverflow) => StatusCode::BAD_REQUEST,
            Self::Domain(
                Core::ProjectNotOpen(_)
                | Core::InvalidInvestmentTransition { .. }
                | Core::InvalidStatusTransition { .. }
                | Core::NotReversible(_)
                | Core::PendingInvestment(_),
            ) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
}

impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let code = match &self {
            Self::Domain(e) => Some(e.code()),
            _ => None,
        };
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
                code,
            }),
        )
            .into_response()
    }
}
