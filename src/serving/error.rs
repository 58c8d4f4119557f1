use crate::storage::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("unknown click token")]
    UnknownToken,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<LedgerError> for ServeError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Other(inner) => ServeError::Internal(inner),
            other => ServeError::Internal(other.into()),
        }
    }
}
