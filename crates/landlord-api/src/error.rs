use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use landlord_compute::ComputeError;
use landlord_domain::{admissible_targets, DomainError};
use landlord_store::StoreError;
use serde::Serialize;
use serde_json::json;

/// Machine-readable error codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    Concurrency,
    InvalidTransition,
    InvalidSpec,
    ProviderUnknown,
    WorkflowNotFound,
    ExecutionNotFound,
    UnsupportedVersion,
    Internal,
}

/// Error envelope: `{error_code, error_message, supported_values?}`.
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub supported_values: Option<Vec<String>>,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            code: ErrorCode::NotFound,
            message: msg.into(),
            supported_values: None,
        }
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::CONFLICT,
            code: ErrorCode::AlreadyExists,
            message: msg.into(),
            supported_values: None,
        }
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::CONFLICT,
            code: ErrorCode::Concurrency,
            message: msg.into(),
            supported_values: None,
        }
    }

    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            code: ErrorCode::InvalidSpec,
            message: msg.into(),
            supported_values: None,
        }
    }

    pub fn invalid_transition(msg: impl Into<String>, supported: Vec<String>) -> Self {
        ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: ErrorCode::InvalidTransition,
            message: msg.into(),
            supported_values: Some(supported),
        }
    }

    pub fn provider_unknown(msg: impl Into<String>, supported: Vec<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            code: ErrorCode::ProviderUnknown,
            message: msg.into(),
            supported_values: Some(supported),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: ErrorCode::Internal,
            message: msg.into(),
            supported_values: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error_code": self.code,
            "error_message": self.message,
        });
        if let Some(values) = self.supported_values {
            body["supported_values"] = json!(values);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TenantNotFound(_) => ApiError::not_found(e.to_string()),
            StoreError::NameTaken(_) => ApiError::already_exists(e.to_string()),
            StoreError::Concurrency { .. } => ApiError::concurrency(e.to_string()),
            StoreError::Serialization(_) | StoreError::Internal(_) => {
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidTransition { from, .. } => ApiError::invalid_transition(
                e.to_string(),
                admissible_targets(from)
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            _ => ApiError::invalid_spec(e.to_string()),
        }
    }
}

impl From<ComputeError> for ApiError {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::ProviderUnknown(_) => ApiError::provider_unknown(e.to_string(), vec![]),
            ComputeError::InvalidConfig(_) => ApiError::invalid_spec(e.to_string()),
            ComputeError::OperationFailed(_) | ComputeError::Internal(_) => {
                ApiError::internal(e.to_string())
            }
        }
    }
}
