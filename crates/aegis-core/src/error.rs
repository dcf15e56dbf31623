//! Caller-visible error taxonomy for policy operations.
//!
//! Every operation on the engine surfaces one of four base kinds:
//!
//! | Kind | Retryable | Typical cause |
//! |------|-----------|---------------|
//! | `PermissionDenied` | no | caller lacks a required role or permission |
//! | `InvalidArgument` | no | malformed identity, out-of-range value, unknown name |
//! | `IllegalState` | no | operation not valid in the current ownership/provisioning state |
//! | `NotFound` | no | no such admin or owner (mutation paths only; reads return zero values) |
//!
//! `AlreadyExists` and `RemovalPending` are refinements used by admin
//! activation; callers that only dispatch on the base kind see them as
//! `IllegalState` via [`PolicyError::kind`].

use thiserror::Error;

/// Result alias used across the policy crates.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors surfaced to callers of the policy engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The caller lacks the role or permission required for an operation.
    #[error("permission denied for {operation}: {reason}")]
    PermissionDenied {
        /// The operation that was attempted.
        operation: String,
        /// Why the caller was rejected.
        reason: String,
    },

    /// A caller-supplied value was malformed or out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending value.
        message: String,
    },

    /// The operation is not valid in the current provisioning or ownership
    /// state. The message names the conflicting state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description naming the conflicting state.
        message: String,
    },

    /// No admin or owner matches the given identity.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// An admin is already active for the component and user.
    #[error("admin already active: {component} for user {user}")]
    AlreadyExists {
        /// The component that is already active.
        component: String,
        /// The owning user id.
        user: i32,
    },

    /// The component is mid-deactivation and cannot be re-activated until
    /// its removal completes.
    #[error("removal pending for {component} on user {user}")]
    RemovalPending {
        /// The component being removed.
        component: String,
        /// The owning user id.
        user: i32,
    },
}

/// The base kind of a [`PolicyError`], for callers that dispatch on kind
/// rather than variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller lacks a required role or permission.
    PermissionDenied,
    /// Malformed or out-of-range argument.
    InvalidArgument,
    /// Operation invalid in the current state.
    IllegalState,
    /// No such admin or owner.
    NotFound,
}

impl PolicyError {
    /// Builds a `PermissionDenied` error.
    pub fn permission_denied(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Builds an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Builds an `IllegalState` error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Builds a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns the base kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::IllegalState { .. }
            | Self::AlreadyExists { .. }
            | Self::RemovalPending { .. } => ErrorKind::IllegalState,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}
