//! Error types for the image optimizer

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum OptimizerError {
    Validation(String),
    Fetch(Box<reqwest::Error>),
    Upstream(u16),
    /// Source body exceeded the byte limit
    SourceTooLarge(u64),
    Image(Box<image::ImageError>),
    Cache(image_cache::CacheError),
    Internal(String),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            OptimizerError::Fetch(err) => write!(f, "Fetch error: {}", err),
            OptimizerError::Upstream(status) => {
                write!(f, "Source server returned status {}", status)
            }
            OptimizerError::SourceTooLarge(limit) => {
                write!(f, "Source image exceeds {} bytes", limit)
            }
            OptimizerError::Image(err) => write!(f, "Image error: {}", err),
            OptimizerError::Cache(err) => write!(f, "Cache error: {}", err),
            OptimizerError::Internal(msg) => write!(f, "Internal error: {}", msg),
            OptimizerError::Io(err) => write!(f, "IO error: {}", err),
            OptimizerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for OptimizerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OptimizerError::Fetch(err) => Some(err.as_ref()),
            OptimizerError::Image(err) => Some(err.as_ref()),
            OptimizerError::Cache(err) => Some(err),
            OptimizerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl IntoResponse for OptimizerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            OptimizerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            other => {
                tracing::error!(error = %other, "Failed to process image");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process image".to_string(),
                )
            }
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

impl From<reqwest::Error> for OptimizerError {
    fn from(err: reqwest::Error) -> Self {
        OptimizerError::Fetch(Box::new(err))
    }
}

impl From<image::ImageError> for OptimizerError {
    fn from(err: image::ImageError) -> Self {
        OptimizerError::Image(Box::new(err))
    }
}

impl From<image_cache::CacheError> for OptimizerError {
    fn from(err: image_cache::CacheError) -> Self {
        OptimizerError::Cache(err)
    }
}

impl From<std::io::Error> for OptimizerError {
    fn from(err: std::io::Error) -> Self {
        OptimizerError::Io(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for OptimizerError {
    fn from(err: tokio::task::JoinError) -> Self {
        OptimizerError::Internal(format!("Background task failed: {}", err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for OptimizerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        OptimizerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
