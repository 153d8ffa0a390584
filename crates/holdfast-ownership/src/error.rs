//! Ownership-layer error types.

use holdfast_types::error::HoldfastError;
use holdfast_wire::WireError;
use thiserror::Error;

/// Ownership error type wrapping the shared and wire errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    /// A wrapped HoldfastError.
    #[error(transparent)]
    Holdfast(#[from] HoldfastError),

    /// Malformed wire data from a peer.
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl OwnershipError {
    /// Local invariant violations: a caller or protocol bug rather than a
    /// runtime condition. Everything else is an anomaly worth a warning.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            OwnershipError::Holdfast(
                HoldfastError::InvalidState { .. } | HoldfastError::SelfSubscription { .. }
            )
        )
    }
}

/// Alias for ownership results.
pub type OwnershipResult<T> = Result<T, OwnershipError>;
