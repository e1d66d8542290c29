use lambda_http::http::StatusCode;
use thiserror::Error;

/// Missing or malformed environment configuration. Fatal at cold start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Failures surfaced by a [`crate::store::Repository`] or object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item already exists: {0}")]
    AlreadyExists(String),
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("failed to (de)serialize item: {0}")]
    Serialization(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) | AppError::Store(StoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Conflict(_) | AppError::Store(StoreError::AlreadyExists(_)) => {
                StatusCode::CONFLICT
            }
            AppError::Config(_) | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable kind used as the `error` field of JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "ConfigurationError",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::BadRequest(_) => "InvalidRequest",
            AppError::Validation(_) => "ValidationFailed",
            AppError::NotFound(_) | AppError::Store(StoreError::NotFound(_)) => "NotFound",
            AppError::Conflict(_) | AppError::Store(StoreError::AlreadyExists(_)) => "Conflict",
            AppError::Store(_) => "StorageError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::BadRequest(format!("Invalid request body: {}", e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
