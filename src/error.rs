use crate::metadata::ProviderKind;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Failure of a single metadata provider call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider} API error ({status}): {message}")]
pub struct ProviderError {
    /// Provider that failed.
    pub provider: ProviderKind,
    /// HTTP status, or [`ProviderError::TRANSPORT_STATUS`] when no response arrived.
    pub status: u16,
    /// Provider's own error message when it sent one, else the transport message.
    pub message: String,
}

impl ProviderError {
    /// Synthetic status for timeouts, DNS and connection failures.
    pub const TRANSPORT_STATUS: u16 = 0;

    /// Error for a non-2xx response.
    pub fn http(provider: ProviderKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            provider,
            status,
            message: message.into(),
        }
    }

    /// Error for a request that never produced a response.
    pub fn transport(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::http(provider, Self::TRANSPORT_STATUS, message)
    }

    /// Whether the failure happened below HTTP.
    pub fn is_transport(&self) -> bool {
        self.status == Self::TRANSPORT_STATUS
    }
}

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed caller input.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// No usable provider credential.
    #[error("{0}")]
    NotConfigured(String),

    /// One provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Every configured provider failed.
    #[error("All metadata providers failed: {}", join_provider_errors(.0))]
    SearchUnavailable(Vec<ProviderError>),

    /// Backing store failure.
    #[error("Database error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_provider_errors(errors: &[ProviderError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    /// Build a field-level validation error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code, safe to expose to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation { .. } => "validation_error",
            AppError::NotConfigured(_) => "not_configured",
            AppError::Provider(_) => "provider_error",
            AppError::SearchUnavailable(_) => "search_unavailable",
            AppError::Persistence(_) => "persistence_error",
            AppError::Io(_) | AppError::Config(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation { .. } | AppError::NotConfigured(_) => StatusCode::BAD_REQUEST,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients. Server-side failures keep their detail in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(_) | AppError::Validation { .. } | AppError::NotConfigured(_) => {
                self.to_string()
            }
            AppError::Provider(e) => format!("{} request failed", e.provider),
            AppError::SearchUnavailable(_) => "Search failed".to_string(),
            AppError::Persistence(_) => "Failed to access library".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request error");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        let body = json!({
            "error": self.public_message(),
            "code": self.code(),
        });

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
