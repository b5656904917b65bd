//! Error taxonomy shared by every service module.
//!
//! Validation errors are user-facing and non-fatal, remote errors wrap
//! document-store failures, and unauthorized errors abort the operation
//! with a specific message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PosError {
    /// Missing or invalid input (empty order, bad PIN format, ...).
    #[error("{0}")]
    Validation(String),

    /// Document store or local storage failure.
    #[error("remote store error: {0}")]
    Remote(String),

    /// Wrong PIN, too many attempts, action not allowed for this user.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PosResult<T> = Result<T, PosError>;

impl PosError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<rusqlite::Error> for PosError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Remote(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            PosError::validation("Select a customer").to_string(),
            "Select a customer"
        );
        assert_eq!(
            PosError::not_found("Shift").to_string(),
            "Shift not found"
        );
        assert!(PosError::remote("disk full")
            .to_string()
            .contains("disk full"));
    }

    #[test]
    fn test_sqlite_error_maps_to_remote() {
        let err: PosError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, PosError::Remote(_)));
    }
}
