//! Service-level error: what ledger, workflow and document calls return.

use std::time::Duration;

use thiserror::Error;

use stockkeep_core::DomainError;

use crate::store::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Deterministic, user-actionable failure. Nothing was written.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Opaque storage failure (connection loss, lock timeout, unexpected
    /// constraint). Nothing was written; retrying is the caller's decision.
    #[error("internal storage failure: {0}")]
    Store(StoreError),

    /// The operation did not finish in time and was rolled back.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ServiceError {
    /// True for failures a caller should show to the user as-is.
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, ServiceError::Domain(_))
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateStockPair {
                item_id,
                location_id,
            } => ServiceError::Domain(DomainError::DuplicateStockPair {
                item_id,
                location_id,
            }),
            StoreError::DuplicateCode(code) => ServiceError::Domain(DomainError::DuplicateCode(code)),
            other => ServiceError::Store(other),
        }
    }
}
