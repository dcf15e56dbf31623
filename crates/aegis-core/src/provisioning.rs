//! Per-user enrollment lifecycle state machine.
//!
//! # Valid Transitions
//!
//! | From | To |
//! |------|----|
//! | `Unmanaged` | any other state |
//! | `SetupIncomplete` | `SetupFinalized` |
//! | `SetupComplete` | `SetupFinalized` |
//! | `ProfileComplete` | `Unmanaged` |
//! | `SetupFinalized` | (terminal) |
//!
//! `ProfileComplete` marks a primary user that is itself unmanaged but has
//! a managed profile; when the profile goes away the user returns to
//! `Unmanaged`. An elevated bootstrap caller may force
//! `Unmanaged → SetupFinalized` directly via [`validate_forced_finalize`],
//! which checks only that the current state is exactly `Unmanaged`.
//! Everything else is an invalid transition.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PolicyError;

/// Enrollment lifecycle state of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// Not enrolled.
    #[default]
    Unmanaged,
    /// Enrollment started; initial setup has not completed.
    SetupIncomplete,
    /// Enrollment started after initial setup completed.
    SetupComplete,
    /// The user is unmanaged but a managed profile of it exists.
    ProfileComplete,
    /// Enrollment finalized. Terminal.
    SetupFinalized,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unmanaged => "unmanaged",
            Self::SetupIncomplete => "setup-incomplete",
            Self::SetupComplete => "setup-complete",
            Self::ProfileComplete => "profile-complete",
            Self::SetupFinalized => "setup-finalized",
        };
        f.write_str(name)
    }
}

/// Attempted an invalid provisioning transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid provisioning transition from {from} to {to}")]
pub struct InvalidTransition {
    /// The current state.
    pub from: ProvisioningState,
    /// The requested state.
    pub to: ProvisioningState,
}

impl From<InvalidTransition> for PolicyError {
    fn from(err: InvalidTransition) -> Self {
        Self::illegal_state(err.to_string())
    }
}

impl ProvisioningState {
    /// Returns `true` if the table permits moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Unmanaged => next != Self::Unmanaged,
            Self::SetupIncomplete | Self::SetupComplete => next == Self::SetupFinalized,
            Self::ProfileComplete => next == Self::Unmanaged,
            Self::SetupFinalized => false,
        }
    }
}

/// Validates a transition against the table.
///
/// # Errors
///
/// Returns [`InvalidTransition`] naming both states when the table forbids
/// the move.
pub fn validate_transition(
    from: ProvisioningState,
    to: ProvisioningState,
) -> Result<(), InvalidTransition> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// Validates the elevated bootstrap jump straight to `SetupFinalized`.
///
/// Bypasses the table but is only legal while the current state is exactly
/// `Unmanaged`.
///
/// # Errors
///
/// Returns [`InvalidTransition`] if the current state is anything else.
pub fn validate_forced_finalize(from: ProvisioningState) -> Result<(), InvalidTransition> {
    if from == ProvisioningState::Unmanaged {
        Ok(())
    } else {
        Err(InvalidTransition {
            from,
            to: ProvisioningState::SetupFinalized,
        })
    }
}
