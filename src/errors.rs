use crate::models::FieldErrors;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(FieldErrors),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INVALID_TRANSITION: {entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },
    #[error("PERSISTENCE: {0}")]
    Persistence(String),
    #[error("INVALID_IMPORT: {0}")]
    InvalidImport(String),
    #[error("EXTERNAL_SERVICE: {0}")]
    ExternalService(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::ExternalService(value.to_string())
    }
}

impl From<FieldErrors> for AppError {
    fn from(value: FieldErrors) -> Self {
        Self::Validation(value)
    }
}

pub type AppResult<T> = Result<T, AppError>;
