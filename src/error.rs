//! # Error Handling
//!
//! This module defines the application's error types and how they're converted
//! to HTTP responses.
//!
//! ## Error Categories:
//! - **InvalidAudio**: The uploaded clip is unusable for the pipeline (422 errors)
//! - **ArtifactNotFound**: A model/scaler file is missing at startup (500 errors, fatal)
//! - **Internal**: Server-side problems (500 errors)
//! - **BadRequest**: Client sent invalid data (400 errors)
//! - **NotFound**: Requested resource doesn't exist (404 errors)
//! - **ConfigError**: Configuration problems (500 errors)
//! - **ValidationError**: Data validation failed (400 errors)
//!
//! ## Why custom errors:
//! The two domain variants carry a hard contract: `InvalidAudio` is the only
//! error a client can recover from by sending different input, and
//! `ArtifactNotFound` must abort process startup rather than let the server
//! run without its artifacts. Everything else maps to generic responses that
//! never leak internal detail.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::InvalidAudio("audio too short after trimming".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Uploaded audio failed pipeline validation (e.g., shorter than 0.1s after
    /// silence trimming). Recoverable only by the caller sending different input.
    InvalidAudio(String),

    /// A model or scaler artifact file is missing. Raised once, at predictor
    /// construction - the process should fail to start instead of serving
    /// without its artifacts.
    ArtifactNotFound(String),

    /// Internal server errors (inference failures, I/O issues, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidAudio(msg) => write!(f, "Invalid audio: {}", msg),
            AppError::ArtifactNotFound(msg) => write!(f, "Artifact not found: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

// Lets AppError cross into anyhow at the startup boundary
impl std::error::Error for AppError {}

/// Converts application errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - InvalidAudio → 422 (Unprocessable Entity - the upload decoded but can't be classified)
/// - ArtifactNotFound/Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "invalid_audio",
///     "message": "audio too short after trimming silence (< 0.1s)",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        // Map each error type to HTTP status code, error type, and message.
        // Internal/ArtifactNotFound/ConfigError messages are replaced with a
        // generic body so server-side detail never leaks to clients.
        let (status, error_type, message) = match self {
            AppError::InvalidAudio(msg) => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,  // 422
                "invalid_audio",
                msg.clone(),
            ),
            AppError::ArtifactNotFound(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "artifact_not_found",
                "Internal server error".to_string(),
            ),
            AppError::Internal(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                "Internal server error".to_string(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                "Internal server error".to_string(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
        };

        // Build the HTTP response with JSON body
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// ## Usage:
/// Unexpected failures inside the pipeline (decode errors, I/O) bubble up as
/// anyhow errors and become generic internal errors at the HTTP boundary.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Automatic conversion from JSON parsing errors to AppError.
///
/// ## Why BadRequest:
/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they should result in a 400 (Bad Request) response, not a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Automatic conversion from configuration errors to AppError.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - Required environment variables are missing
/// - Configuration values fail validation
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Automatic conversion from candle tensor/inference errors to AppError.
///
/// ## When this happens:
/// - A feature matrix with the wrong shape reaches the model (upstream bug)
/// - Weight loading fails for a corrupt artifact
///
/// These are programming-contract violations or broken artifacts - never
/// recoverable at request time, so they surface as internal errors.
impl From<candle_core::Error> for AppError {
    fn from(err: candle_core::Error) -> Self {
        AppError::Internal(format!("inference error: {}", err))
    }
}

/// Automatic conversion from I/O errors to AppError.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Usage Example:
/// ```rust
/// fn load_scaler() -> AppResult<StandardScaler> {
///     // Equivalent to: fn load_scaler() -> Result<StandardScaler, AppError>
///     StandardScaler::load("model/scaler.json")
/// }
/// ```
pub type AppResult<T> = Result<T, AppError>;
