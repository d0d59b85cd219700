//! HTTP response types and utilities
//!
//! Every endpoint answers with the same [`ApiResponse`] envelope, and
//! [`handle_error`] is the single place where domain errors become status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

use crate::errors::{AppError, AppResult};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String, details: Option<HashMap<String, String>>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            details,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Helper function to convert AppResult to HTTP response
pub fn handle_result<T>(result: AppResult<T>) -> Response
where
    T: Serialize,
{
    respond_with(StatusCode::OK, result)
}

/// Like [`handle_result`] but answers `201 Created` on success
pub fn created<T>(result: AppResult<T>) -> Response
where
    T: Serialize,
{
    respond_with(StatusCode::CREATED, result)
}

fn respond_with<T: Serialize>(status: StatusCode, result: AppResult<T>) -> Response {
    match result {
        Ok(data) => (status, Json(ApiResponse::success(data))).into_response(),
        Err(error) => handle_error(error),
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> Response {
    let (status, message, details) = match &error {
        AppError::Validation { message } => (StatusCode::BAD_REQUEST, message.clone(), None),
        AppError::NotFound { resource, id } => (
            StatusCode::NOT_FOUND,
            format!("{} with id '{}' not found", resource, id),
            None,
        ),
        AppError::Conflict {
            destination_key,
            live_stream_id,
        } => (
            StatusCode::CONFLICT,
            format!("Destination key '{}' is already live", destination_key),
            Some(HashMap::from([
                ("destination_key".to_string(), destination_key.clone()),
                ("live_stream_id".to_string(), live_stream_id.to_string()),
            ])),
        ),
        AppError::ResourceMissing { resource, message } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("{} unavailable: {}", resource, message),
            None,
        ),
        AppError::Process(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Broadcast process failed: {}", e),
            None,
        ),
        AppError::Database(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Database operation failed".to_string(),
            None,
        ),
        AppError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Data access failed".to_string(),
            None,
        ),
        AppError::Configuration { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Configuration error: {}", message),
            None,
        ),
        AppError::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal error: {}", message),
            None,
        ),
    };

    if status.is_server_error() {
        error!("Request failed: {}", error);
    }

    (status, Json(ApiResponse::error(message, details))).into_response()
}
