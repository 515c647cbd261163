//! Handler errors

use super::channel::{FileStoreError, OutboundError};
use crate::capabilities::CapabilityError;
use crate::storage::StorageError;
use crate::views;
use thiserror::Error;

/// Errors raised by handlers and timer callbacks
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
    #[error("File store error: {0}")]
    Files(#[from] FileStoreError),
    #[error("Outbound error: {0}")]
    Outbound(#[from] OutboundError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Text shown to the user instead of the failed handler's reply
    #[must_use]
    pub fn apology(&self) -> &'static str {
        match self {
            Self::Capability(CapabilityError::InferenceUnavailable(_)) => views::MODEL_UNAVAILABLE,
            Self::Capability(CapabilityError::InvalidInput(_)) => views::INVALID_INPUT,
            _ => views::GENERIC_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apology_by_kind() {
        let unavailable = HandlerError::from(CapabilityError::InferenceUnavailable("x".into()));
        assert_eq!(unavailable.apology(), views::MODEL_UNAVAILABLE);

        let storage = HandlerError::from(StorageError::Poisoned);
        assert_eq!(storage.apology(), views::GENERIC_FAILURE);
    }
}
