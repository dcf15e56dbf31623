//! Admin records and the profile/parent policy split.
//!
//! An admin governing a managed profile may additionally impose a subset of
//! policies on the profile's parent user. That second record shares the
//! admin's identity and is modeled as a tagged sum rather than a nullable
//! back-pointer:
//!
//! ```text
//! Standalone(profile)  --ensure_parent()-->  WithParent { profile, parent }
//! ```
//!
//! The upgrade happens at most once and is never reversed; the parent half
//! is never listed as a top-level admin.

use serde::{Deserialize, Serialize};

use crate::identity::AdminIdentity;
use crate::policy::PolicyRecord;

/// Which half of an admin's record an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyScope {
    /// The admin's own (profile-facing) record.
    Profile,
    /// The parent-facing record of a profile admin.
    Parent,
}

/// The policy record(s) of one admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdminRecord {
    /// An admin with no parent-facing policies.
    Standalone(PolicyRecord),
    /// A profile admin that has declared parent-facing policies.
    WithParent {
        /// The profile-facing record.
        profile: PolicyRecord,
        /// The parent-facing record.
        parent: PolicyRecord,
    },
}

impl Default for AdminRecord {
    fn default() -> Self {
        Self::Standalone(PolicyRecord::default())
    }
}

impl AdminRecord {
    /// The profile-facing record.
    #[must_use]
    pub fn profile(&self) -> &PolicyRecord {
        match self {
            Self::Standalone(p) | Self::WithParent { profile: p, .. } => p,
        }
    }

    /// Mutable access to the profile-facing record.
    pub fn profile_mut(&mut self) -> &mut PolicyRecord {
        match self {
            Self::Standalone(p) | Self::WithParent { profile: p, .. } => p,
        }
    }

    /// The parent-facing record, if one was ever created.
    #[must_use]
    pub fn parent(&self) -> Option<&PolicyRecord> {
        match self {
            Self::Standalone(_) => None,
            Self::WithParent { parent, .. } => Some(parent),
        }
    }

    /// Returns the record for `scope`; `None` for [`PolicyScope::Parent`]
    /// on a standalone admin.
    #[must_use]
    pub fn policy(&self, scope: PolicyScope) -> Option<&PolicyRecord> {
        match scope {
            PolicyScope::Profile => Some(self.profile()),
            PolicyScope::Parent => self.parent(),
        }
    }

    /// Returns `true` if a parent-facing record exists.
    #[must_use]
    pub const fn has_parent(&self) -> bool {
        matches!(self, Self::WithParent { .. })
    }

    /// Returns the parent-facing record, creating it on first use.
    ///
    /// Upgrades `Standalone` to `WithParent` exactly once; subsequent calls
    /// return the existing record.
    pub fn ensure_parent(&mut self) -> &mut PolicyRecord {
        if let Self::Standalone(profile) = self {
            let profile = std::mem::take(profile);
            *self = Self::WithParent {
                profile,
                parent: PolicyRecord::default(),
            };
        }
        match self {
            Self::WithParent { parent, .. } => parent,
            Self::Standalone(_) => unreachable!("upgraded above"),
        }
    }

    /// Mutable record for `scope`, creating the parent half on demand.
    pub fn policy_mut(&mut self, scope: PolicyScope) -> &mut PolicyRecord {
        match scope {
            PolicyScope::Profile => self.profile_mut(),
            PolicyScope::Parent => self.ensure_parent(),
        }
    }
}

/// One registered admin: identity plus declared policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    /// The admin's identity triple.
    pub identity: AdminIdentity,
    /// The admin's policy record(s).
    pub record: AdminRecord,
}

impl Admin {
    /// Creates an admin with an empty standalone record.
    #[must_use]
    pub fn new(identity: AdminIdentity) -> Self {
        Self {
            identity,
            record: AdminRecord::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ComponentName, UserId};
    use crate::password::PasswordQuality;

    fn identity() -> AdminIdentity {
        AdminIdentity::new(
            ComponentName::new("com.example.mdm", ".Admin").unwrap(),
            UserId(10),
            10_123,
        )
    }

    #[test]
    fn parent_is_absent_until_first_use() {
        let mut admin = Admin::new(identity());
        assert!(!admin.record.has_parent());
        assert!(admin.record.policy(PolicyScope::Parent).is_none());

        admin.record.ensure_parent().min_password_length = 6;
        assert!(admin.record.has_parent());
        assert_eq!(
            admin.record.policy(PolicyScope::Parent).unwrap().min_password_length,
            6
        );
    }

    #[test]
    fn upgrade_preserves_profile_record() {
        let mut admin = Admin::new(identity());
        admin.record.profile_mut().password_quality = PasswordQuality::Complex;
        admin.record.ensure_parent();
        assert_eq!(
            admin.record.profile().password_quality,
            PasswordQuality::Complex
        );
    }

    #[test]
    fn ensure_parent_is_one_shot() {
        let mut admin = Admin::new(identity());
        admin.record.ensure_parent().min_password_length = 8;
        // A second call must return the same record, not a fresh one.
        assert_eq!(admin.record.ensure_parent().min_password_length, 8);
    }
}
