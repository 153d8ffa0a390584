//! Shared error types for the Holdfast system.

use thiserror::Error;

/// Top-level error type shared across Holdfast crates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HoldfastError {
    /// An operation was attempted in a state that forbids it. Always a local
    /// logic error in the caller.
    #[error("Resource '{resource}' is in an invalid state: {reason}")]
    InvalidState {
        /// The resource the operation targeted.
        resource: String,
        /// What was wrong.
        reason: String,
    },

    /// Neither the resource nor its super resource has an owner to ask.
    #[error("Resource cannot be requested, no path to an owner: {0}")]
    NotRequestable(String),

    /// A lookup (acknowledgment correlation, subscription, resource) failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A peer tried to subscribe to a resource it owns.
    #[error("Peer {peer} cannot subscribe to '{resource}', it is the owner")]
    SelfSubscription {
        /// The resource.
        resource: String,
        /// The offending peer.
        peer: String,
    },

    /// The packet transport refused a send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HoldfastError {
    /// Shorthand for [`HoldfastError::InvalidState`].
    pub fn invalid_state(resource: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }
}

/// Alias for Result with HoldfastError.
pub type HoldfastResult<T> = Result<T, HoldfastError>;
