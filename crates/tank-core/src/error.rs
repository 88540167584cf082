use thiserror::Error;

use crate::query::QueryError;

#[derive(Debug, Error)]
pub enum TankError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    #[error("{table} record '{key}' already exists")]
    Conflict { table: &'static str, key: String },
    #[error("{table} record '{key}' not found")]
    NotFound { table: &'static str, key: String },
}

/// The only distinctions the store draws for its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Conflict,
    NotFound,
    Unknown,
}

impl TankError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TankError::Conflict { .. } => ErrorClass::Conflict,
            TankError::NotFound { .. } => ErrorClass::NotFound,
            _ => ErrorClass::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, TankError>;
