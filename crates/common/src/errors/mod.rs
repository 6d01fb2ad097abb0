//! Error types for Harvester services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,

    // Authorization errors (3xxx)
    Forbidden,
    AccountMismatch,

    // Resource errors (4xxx)
    NotFound,
    ConnectorNotFound,
    JobNotFound,
    RunNotFound,
    DiscoveredFileNotFound,

    // Conflict / state errors (5xxx)
    Conflict,
    DiscoveredFileExists,
    CheckRunExists,
    CheckRunDisabled,
    InvalidRunState,
    ConnectorDisabled,
    CapabilityMissing,
    UnsupportedOperation,
    UnknownAdapter,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    QueueError,
    StorageError,
    DispatchError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::AccountMismatch => 3002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::ConnectorNotFound => 4002,
            ErrorCode::JobNotFound => 4003,
            ErrorCode::RunNotFound => 4004,
            ErrorCode::DiscoveredFileNotFound => 4005,

            // Conflicts / state (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::DiscoveredFileExists => 5002,
            ErrorCode::CheckRunExists => 5003,
            ErrorCode::CheckRunDisabled => 5004,
            ErrorCode::InvalidRunState => 5005,
            ErrorCode::ConnectorDisabled => 5006,
            ErrorCode::CapabilityMissing => 5007,
            ErrorCode::UnsupportedOperation => 5008,
            ErrorCode::UnknownAdapter => 5009,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::QueueError => 8002,
            ErrorCode::StorageError => 8003,
            ErrorCode::DispatchError => 8004,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Account mismatch")]
    AccountMismatch,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Connector not found: {id}")]
    ConnectorNotFound { id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Run not found: {id}")]
    RunNotFound { id: String },

    #[error("Discovered file not found: {id}")]
    DiscoveredFileNotFound { id: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    #[error("Discovered file already exists for run {run_id} with reference code {reference_code}")]
    DiscoveredFileExists { run_id: String, reference_code: String },

    #[error("CheckRun already exists for chequerun {chequerun_id}")]
    CheckRunExists { chequerun_id: i64 },

    #[error("CheckRun for chequerun {chequerun_id} is disabled")]
    CheckRunDisabled { chequerun_id: i64 },

    // Run lifecycle errors
    #[error("Run {id} in status {status} does not allow {transition}")]
    InvalidRunState {
        id: String,
        status: String,
        transition: String,
    },

    #[error("This connector is not enabled yet")]
    ConnectorDisabled,

    #[error("This connection doesn't support the operation: {operation}")]
    CapabilityMissing { operation: String },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Unknown adapter: {code}")]
    UnknownAdapter { code: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Dispatch error: {message}")]
    DispatchError { message: String },

    #[error("Upstream service error: {message}")]
    Upstream { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::AccountMismatch => ErrorCode::AccountMismatch,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::ConnectorNotFound { .. } => ErrorCode::ConnectorNotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::RunNotFound { .. } => ErrorCode::RunNotFound,
            AppError::DiscoveredFileNotFound { .. } => ErrorCode::DiscoveredFileNotFound,
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::DiscoveredFileExists { .. } => ErrorCode::DiscoveredFileExists,
            AppError::CheckRunExists { .. } => ErrorCode::CheckRunExists,
            AppError::CheckRunDisabled { .. } => ErrorCode::CheckRunDisabled,
            AppError::InvalidRunState { .. } => ErrorCode::InvalidRunState,
            AppError::ConnectorDisabled => ErrorCode::ConnectorDisabled,
            AppError::CapabilityMissing { .. } => ErrorCode::CapabilityMissing,
            AppError::UnsupportedOperation { .. } => ErrorCode::UnsupportedOperation,
            AppError::UnknownAdapter { .. } => ErrorCode::UnknownAdapter,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::StorageError { .. } => ErrorCode::StorageError,
            AppError::DispatchError { .. } => ErrorCode::DispatchError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::MissingField { .. } |
            AppError::InvalidFormat { .. } |
            AppError::ConnectorDisabled |
            AppError::CapabilityMissing { .. } |
            AppError::UnsupportedOperation { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. } |
            AppError::AccountMismatch => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } |
            AppError::ConnectorNotFound { .. } |
            AppError::JobNotFound { .. } |
            AppError::RunNotFound { .. } |
            AppError::DiscoveredFileNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Duplicate { .. } |
            AppError::DiscoveredFileExists { .. } |
            AppError::CheckRunExists { .. } |
            AppError::CheckRunDisabled { .. } |
            AppError::InvalidRunState { .. } => StatusCode::CONFLICT,

            // 500 Internal Server Error
            AppError::UnknownAdapter { .. } |
            AppError::Database(_) |
            AppError::DatabaseConnection { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Upstream { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::QueueError { .. } |
            AppError::StorageError { .. } |
            AppError::DispatchError { .. } |
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None, // Should be filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::RunNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::RunNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_precondition_messages() {
        assert_eq!(
            AppError::ConnectorDisabled.to_string(),
            "This connector is not enabled yet"
        );
        let err = AppError::CapabilityMissing {
            operation: "invoice.download".into(),
        };
        assert_eq!(
            err.to_string(),
            "This connection doesn't support the operation: invoice.download"
        );
        let err = AppError::UnsupportedOperation {
            operation: "fax.send".into(),
        };
        assert_eq!(err.to_string(), "Unsupported operation: fax.send");
    }

    #[test]
    fn test_conflict_errors() {
        let err = AppError::CheckRunExists { chequerun_id: 42 };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_client_error());

        let err = AppError::DiscoveredFileExists {
            run_id: "r1".into(),
            reference_code: "REF-A".into(),
        };
        assert_eq!(err.code(), ErrorCode::DiscoveredFileExists);
    }

    #[test]
    fn test_server_error() {
        let err = AppError::UnknownAdapter { code: "acme".into() };
        assert_eq!(err.to_string(), "Unknown adapter: acme");
        assert!(err.is_server_error());
    }
}
