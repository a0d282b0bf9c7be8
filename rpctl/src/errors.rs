//! Error types and HTTP response conversion.
//!
//! The main [`Error`] enum covers the runtime's error cases and implements
//! [`IntoResponse`], producing the canonical wire shape every client of the
//! provider understands:
//!
//! ```json
//! { "error": { "code": "NotFound", "message": "...", "target": "..." } }
//! ```
//!
//! Status mapping: validation errors are 400, missing resources 404, write
//! races and duplicate registrations 409, ETag preconditions 412, and
//! everything uncategorized 500. Worker-side coercion of controller errors
//! into terminal operation results goes through [`Error::to_error_details`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::resources::{InvalidOperationType, InvalidResourceId};

/// Canonical, wire-stable error codes.
pub mod codes {
    pub const BAD_REQUEST: &str = "BadRequest";
    pub const INTERNAL: &str = "Internal";
    pub const NOT_FOUND: &str = "NotFound";
    pub const CONFLICT: &str = "Conflict";
    pub const INVALID_RESOURCE_TYPE: &str = "InvalidResourceType";
    pub const INVALID_AUTHENTICATION_INFO: &str = "InvalidAuthenticationInfo";
    pub const PRECONDITION_FAILED: &str = "PreconditionFailed";
    pub const OPERATION_CANCELED: &str = "OperationCanceled";
    pub const INVALID_API_VERSION_PARAMETER: &str = "InvalidApiVersionParameter";
    pub const INVALID_REQUEST_CONTENT: &str = "InvalidRequestContent";
    pub const INVALID_PROPERTIES: &str = "InvalidProperties";
    pub const PAYLOAD_VALIDATION_FAILED: &str = "HttpRequestPayloadAPISpecValidationFailed";
}

/// Structured error payload, nested under `"error"` on the wire and stored
/// verbatim on failed operation-status records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(
        rename = "additionalInfo",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub additional_info: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetails>,
}

impl ErrorDetails {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            target: None,
            additional_info: Vec::new(),
            details: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Canonical error response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// The `top` query parameter was not an integer
    #[error("'top' query parameter is not a valid integer: {raw:?}")]
    InvalidTopQueryParam { raw: String },

    /// The `top` query parameter was outside the allowed window
    #[error("'top' query parameter must be between {min} and {max}")]
    TopQueryParamOutOfBounds { min: usize, max: usize },

    /// Missing or malformed `api-version`
    #[error("{message}")]
    InvalidApiVersion { message: String },

    /// Malformed resource id
    #[error(transparent)]
    ResourceId(#[from] InvalidResourceId),

    /// Malformed or unknown operation type
    #[error(transparent)]
    OperationType(#[from] InvalidOperationType),

    /// No controller registered for a resource type
    #[error("unsupported resource type: {type_name}")]
    UnsupportedResourceType { type_name: String },

    /// Requested resource not found
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Duplicate registration or concurrent write
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// ETag precondition not met
    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// Principal not permitted
    #[error("not permitted: {message}")]
    Forbidden { message: String },

    /// Object store error
    #[error(transparent)]
    Store(#[from] sluice::StoreError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] sluice::QueueError),

    /// Generic internal service error
    #[error("failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. }
            | Error::InvalidTopQueryParam { .. }
            | Error::TopQueryParamOutOfBounds { .. }
            | Error::InvalidApiVersion { .. }
            | Error::ResourceId(_)
            | Error::OperationType(_)
            | Error::UnsupportedResourceType { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::Store(store_err) => match store_err {
                sluice::StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                sluice::StoreError::Concurrency { .. } => StatusCode::CONFLICT,
                sluice::StoreError::Codec(_) => StatusCode::BAD_REQUEST,
                sluice::StoreError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Queue(_) | Error::Internal { .. } | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The canonical code carried in the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::BadRequest { .. }
            | Error::InvalidTopQueryParam { .. }
            | Error::TopQueryParamOutOfBounds { .. } => codes::BAD_REQUEST,
            Error::InvalidApiVersion { .. } => codes::INVALID_API_VERSION_PARAMETER,
            Error::ResourceId(_) => codes::BAD_REQUEST,
            Error::OperationType(_) | Error::UnsupportedResourceType { .. } => {
                codes::INVALID_RESOURCE_TYPE
            }
            Error::NotFound { .. } => codes::NOT_FOUND,
            Error::Conflict { .. } => codes::CONFLICT,
            Error::PreconditionFailed { .. } => codes::PRECONDITION_FAILED,
            Error::Forbidden { .. } => codes::INVALID_AUTHENTICATION_INFO,
            Error::Store(store_err) => match store_err {
                sluice::StoreError::NotFound(_) => codes::NOT_FOUND,
                sluice::StoreError::Concurrency { .. } => codes::CONFLICT,
                sluice::StoreError::Codec(_) => codes::INVALID_REQUEST_CONTENT,
                sluice::StoreError::Other(_) => codes::INTERNAL,
            },
            Error::Queue(_) | Error::Internal { .. } | Error::Other(_) => codes::INTERNAL,
        }
    }

    /// Whether the error is the caller's fault. Client errors are terminal
    /// for an async operation; everything else is coerced to `Internal`.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns a user-safe error message, without leaking internal
    /// implementation details.
    pub fn user_message(&self) -> String {
        match self {
            Error::Internal { .. } | Error::Other(_) | Error::Queue(_) => {
                "Internal server error".to_string()
            }
            Error::Store(sluice::StoreError::Other(_)) => "Internal server error".to_string(),
            Error::Store(sluice::StoreError::NotFound(id)) => format!("{id} not found"),
            other => other.to_string(),
        }
    }

    /// Coerce into the error payload recorded on a failed operation.
    /// Client errors keep their message under `BadRequest`; everything else
    /// collapses to `Internal`.
    pub fn to_error_details(&self) -> ErrorDetails {
        if self.is_client_error() {
            ErrorDetails::new(codes::BAD_REQUEST, self.to_string())
        } else {
            ErrorDetails::new(codes::INTERNAL, self.to_string())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::Other(_) | Error::Queue(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Store(sluice::StoreError::Other(_)) => {
                tracing::error!("Store error: {:#}", self);
            }
            Error::Store(sluice::StoreError::Concurrency { .. })
            | Error::Conflict { .. }
            | Error::PreconditionFailed { .. } => {
                tracing::warn!("Write conflict: {}", self);
            }
            Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails::new(self.error_code(), self.user_message()),
        };
        (self.status_code(), axum::response::Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
