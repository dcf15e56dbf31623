//! Device-owner and profile-owner governance.
//!
//! Ownership is process-wide state, persisted separately from per-user
//! snapshots: at most one device owner, at most one profile owner per
//! user, and a device owner is mutually exclusive with a profile owner on
//! its own user. Entries are created at enrollment and cleared exactly
//! once; there is no reassignment without an intervening clear.
//!
//! Designation preconditions are checked in a fixed order and the first
//! failure wins, each surfaced as its own [`OwnershipError`] variant. The
//! engine re-checks them under the policy lock immediately before
//! committing, so two racing designations cannot both pass.

use std::collections::BTreeSet;

use aegis_core::error::PolicyError;
use aegis_core::identity::{ComponentName, UserId};
use aegis_core::restrictions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who is asking for a designation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    /// The caller's uid.
    pub uid: u32,
    /// Caller holds elevated platform privilege.
    pub elevated: bool,
    /// Caller is the unprivileged bootstrap channel (local debug shell).
    pub bootstrap_shell: bool,
}

impl CallerContext {
    /// An elevated platform caller.
    #[must_use]
    pub const fn elevated(uid: u32) -> Self {
        Self {
            uid,
            elevated: true,
            bootstrap_shell: false,
        }
    }

    /// The bootstrap shell.
    #[must_use]
    pub const fn shell(uid: u32) -> Self {
        Self {
            uid,
            elevated: false,
            bootstrap_shell: true,
        }
    }

    /// An ordinary caller.
    #[must_use]
    pub const fn app(uid: u32) -> Self {
        Self {
            uid,
            elevated: false,
            bootstrap_shell: false,
        }
    }
}

/// Environment facts a designation is judged against, gathered by the
/// engine under the policy lock.
#[derive(Debug, Clone, Copy)]
pub struct DesignationContext {
    /// Target user is running.
    pub user_running: bool,
    /// Initial setup has completed (device-wide for device owners, per
    /// target user for profile owners).
    pub setup_complete: bool,
    /// Total number of users on the device.
    pub user_count: usize,
    /// Accounts incompatible with management.
    pub incompatible_accounts: usize,
    /// Platform variant permits device-owner designation once per device
    /// lifetime.
    pub single_pairing: bool,
    /// The caller.
    pub caller: CallerContext,
}

/// Precondition failures, in check order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OwnershipError {
    /// A device owner is already designated.
    #[error("device owner already set to {component}")]
    DeviceOwnerAlreadySet {
        /// The existing device owner.
        component: ComponentName,
    },

    /// The target user already has a profile owner.
    #[error("user {user} already has profile owner {component}")]
    ProfileOwnerAlreadySet {
        /// The target user.
        user: UserId,
        /// The existing profile owner.
        component: ComponentName,
    },

    /// The device owner lives on the target user.
    #[error("user {user} is the device owner's user")]
    DeviceOwnerOnUser {
        /// The target user.
        user: UserId,
    },

    /// The target user is not running.
    #[error("user {user} is not running")]
    UserNotRunning {
        /// The target user.
        user: UserId,
    },

    /// The single-pairing variant forbids a second pairing.
    #[error("device has already been paired")]
    AlreadyPaired,

    /// Initial setup has completed and the caller has no privilege that
    /// overrides it.
    #[error("initial setup has already completed")]
    SetupCompleted,

    /// The bootstrap shell may only designate on a pristine device.
    #[error(
        "bootstrap designation rejected: setup complete with {users} user(s) and {accounts} incompatible account(s)"
    )]
    BootstrapRejected {
        /// User count at the time of the call.
        users: usize,
        /// Incompatible account count.
        accounts: usize,
    },
}

impl From<OwnershipError> for PolicyError {
    fn from(err: OwnershipError) -> Self {
        Self::illegal_state(err.to_string())
    }
}

/// One owner designation with its applied-baseline record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerEntry {
    /// The owning admin component.
    pub component: ComponentName,
    /// The user the owner was designated for.
    pub user: UserId,
    /// Baseline restriction names applied by designation or a later
    /// platform upgrade; used to apply only the delta, never re-applying
    /// a restriction the owner has since revoked.
    #[serde(default)]
    pub applied_baseline: BTreeSet<String>,
}

/// Process-wide ownership state; also the persisted form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// The device owner, if designated.
    #[serde(default)]
    pub device_owner: Option<OwnerEntry>,
    /// Profile owners, at most one per user.
    #[serde(default)]
    pub profile_owners: Vec<OwnerEntry>,
    /// Latch for the single-pairing variant; set on first device-owner
    /// designation and never cleared.
    #[serde(default)]
    pub device_paired: bool,
}

impl OwnershipRecord {
    /// The device owner entry.
    #[must_use]
    pub fn device_owner(&self) -> Option<&OwnerEntry> {
        self.device_owner.as_ref()
    }

    /// The profile owner for `user`.
    #[must_use]
    pub fn profile_owner(&self, user: UserId) -> Option<&OwnerEntry> {
        self.profile_owners.iter().find(|entry| entry.user == user)
    }

    /// Whether `component` is the device owner for `user`.
    #[must_use]
    pub fn is_device_owner(&self, component: &ComponentName, user: UserId) -> bool {
        self.device_owner
            .as_ref()
            .is_some_and(|entry| entry.component == *component && entry.user == user)
    }

    /// Whether `component` is the profile owner of `user`.
    #[must_use]
    pub fn is_profile_owner(&self, component: &ComponentName, user: UserId) -> bool {
        self.profile_owner(user)
            .is_some_and(|entry| entry.component == *component)
    }

    /// Whether `component` holds either owner role for `user`.
    #[must_use]
    pub fn is_owner(&self, component: &ComponentName, user: UserId) -> bool {
        self.is_device_owner(component, user) || self.is_profile_owner(component, user)
    }

    /// Runs the device-owner precondition chain; first failure wins.
    ///
    /// # Errors
    ///
    /// The first failing [`OwnershipError`] in check order.
    pub fn check_device_owner_preconditions(
        &self,
        user: UserId,
        ctx: &DesignationContext,
    ) -> Result<(), OwnershipError> {
        if let Some(existing) = &self.device_owner {
            return Err(OwnershipError::DeviceOwnerAlreadySet {
                component: existing.component.clone(),
            });
        }
        if let Some(existing) = self.profile_owner(user) {
            return Err(OwnershipError::ProfileOwnerAlreadySet {
                user,
                component: existing.component.clone(),
            });
        }
        if !ctx.user_running {
            return Err(OwnershipError::UserNotRunning { user });
        }
        if ctx.single_pairing && self.device_paired {
            return Err(OwnershipError::AlreadyPaired);
        }
        Self::check_caller_gate(ctx)
    }

    fn check_caller_gate(ctx: &DesignationContext) -> Result<(), OwnershipError> {
        if ctx.caller.elevated {
            return Ok(());
        }
        if ctx.caller.bootstrap_shell {
            if !ctx.setup_complete {
                return Ok(());
            }
            if ctx.user_count == 1 && ctx.incompatible_accounts == 0 {
                return Ok(());
            }
            return Err(OwnershipError::BootstrapRejected {
                users: ctx.user_count,
                accounts: ctx.incompatible_accounts,
            });
        }
        if ctx.setup_complete {
            return Err(OwnershipError::SetupCompleted);
        }
        Ok(())
    }

    /// Designates the device owner after [`Self::
    /// check_device_owner_preconditions`] has passed. Returns the baseline
    /// restriction names to apply to the owning admin (the delta against
    /// anything applied before).
    pub fn designate_device_owner(
        &mut self,
        component: ComponentName,
        user: UserId,
    ) -> Vec<&'static str> {
        let delta: Vec<&'static str> = restrictions::baseline_delta(
            restrictions::DEFAULT_ENABLED_FOR_DEVICE_OWNER,
            &BTreeSet::new(),
        );
        self.device_owner = Some(OwnerEntry {
            component,
            user,
            applied_baseline: delta.iter().map(|s| (*s).to_string()).collect(),
        });
        self.device_paired = true;
        delta
    }

    /// Runs the profile-owner precondition chain; first failure wins.
    ///
    /// # Errors
    ///
    /// The first failing [`OwnershipError`] in check order.
    pub fn check_profile_owner_preconditions(
        &self,
        user: UserId,
        ctx: &DesignationContext,
    ) -> Result<(), OwnershipError> {
        if let Some(existing) = self.profile_owner(user) {
            return Err(OwnershipError::ProfileOwnerAlreadySet {
                user,
                component: existing.component.clone(),
            });
        }
        if self.device_owner.as_ref().is_some_and(|e| e.user == user) {
            return Err(OwnershipError::DeviceOwnerOnUser { user });
        }
        if !ctx.user_running {
            return Err(OwnershipError::UserNotRunning { user });
        }
        Self::check_caller_gate(ctx)
    }

    /// Designates a profile owner after preconditions passed. Returns the
    /// managed-profile baseline delta to apply to the owning admin.
    pub fn designate_profile_owner(
        &mut self,
        component: ComponentName,
        user: UserId,
        managed_profile: bool,
    ) -> Vec<&'static str> {
        let baseline: &[&'static str] = if managed_profile {
            restrictions::DEFAULT_ENABLED_FOR_PROFILE_OWNER
        } else {
            &[]
        };
        let delta: Vec<&'static str> = restrictions::baseline_delta(baseline, &BTreeSet::new());
        self.profile_owners.push(OwnerEntry {
            component,
            user,
            applied_baseline: delta.iter().map(|s| (*s).to_string()).collect(),
        });
        delta
    }

    /// Applies a platform-upgrade extension of a baseline: returns the
    /// delta not yet applied to the entry and records it as applied.
    pub fn apply_baseline_upgrade(
        entry: &mut OwnerEntry,
        baseline: &'static [&'static str],
    ) -> Vec<&'static str> {
        let delta = restrictions::baseline_delta(baseline, &entry.applied_baseline);
        for name in &delta {
            entry.applied_baseline.insert((*name).to_string());
        }
        delta
    }

    /// Clears the device owner. Idempotent: a second (or concurrent
    /// forced-removal) clear finds nothing and returns `None`.
    pub fn clear_device_owner(&mut self) -> Option<OwnerEntry> {
        self.device_owner.take()
    }

    /// Clears the profile owner of `user`. Idempotent.
    pub fn clear_profile_owner(&mut self, user: UserId) -> Option<OwnerEntry> {
        let i = self
            .profile_owners
            .iter()
            .position(|entry| entry.user == user)?;
        Some(self.profile_owners.remove(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(package: &str) -> ComponentName {
        ComponentName::new(package, ".Admin").unwrap()
    }

    fn pristine_ctx() -> DesignationContext {
        DesignationContext {
            user_running: true,
            setup_complete: false,
            user_count: 1,
            incompatible_accounts: 0,
            single_pairing: false,
            caller: CallerContext::app(10_001),
        }
    }

    #[test]
    fn precondition_order_first_failure_wins() {
        let mut record = OwnershipRecord::default();
        record.designate_device_owner(component("com.do"), UserId(0));
        record.profile_owners.push(OwnerEntry {
            component: component("com.po"),
            user: UserId(0),
            applied_baseline: BTreeSet::new(),
        });

        // Both "device owner set" and "profile owner set" hold; the
        // device-owner check must be reported first.
        let err = record
            .check_device_owner_preconditions(UserId(0), &pristine_ctx())
            .unwrap_err();
        assert!(matches!(err, OwnershipError::DeviceOwnerAlreadySet { .. }));
    }

    #[test]
    fn device_owner_blocked_by_profile_owner_and_vice_versa() {
        let mut record = OwnershipRecord::default();
        record.profile_owners.push(OwnerEntry {
            component: component("com.po"),
            user: UserId(0),
            applied_baseline: BTreeSet::new(),
        });
        let err = record
            .check_device_owner_preconditions(UserId(0), &pristine_ctx())
            .unwrap_err();
        assert!(matches!(err, OwnershipError::ProfileOwnerAlreadySet { .. }));

        let mut record = OwnershipRecord::default();
        record.designate_device_owner(component("com.do"), UserId(0));
        let err = record
            .check_profile_owner_preconditions(UserId(0), &pristine_ctx())
            .unwrap_err();
        assert_eq!(err, OwnershipError::DeviceOwnerOnUser { user: UserId(0) });
    }

    #[test]
    fn stopped_user_is_rejected() {
        let record = OwnershipRecord::default();
        let ctx = DesignationContext {
            user_running: false,
            ..pristine_ctx()
        };
        assert_eq!(
            record.check_device_owner_preconditions(UserId(10), &ctx),
            Err(OwnershipError::UserNotRunning { user: UserId(10) })
        );
    }

    #[test]
    fn single_pairing_latch() {
        let mut record = OwnershipRecord::default();
        record.designate_device_owner(component("com.do"), UserId(0));
        record.clear_device_owner();

        let ctx = DesignationContext {
            single_pairing: true,
            ..pristine_ctx()
        };
        assert_eq!(
            record.check_device_owner_preconditions(UserId(0), &ctx),
            Err(OwnershipError::AlreadyPaired)
        );
    }

    #[test]
    fn bootstrap_shell_gate() {
        let record = OwnershipRecord::default();
        let shell = CallerContext::shell(2000);

        // Pristine device: allowed.
        let ctx = DesignationContext {
            caller: shell,
            ..pristine_ctx()
        };
        assert!(record.check_device_owner_preconditions(UserId(0), &ctx).is_ok());

        // Setup complete but single user, no accounts: still allowed.
        let ctx = DesignationContext {
            caller: shell,
            setup_complete: true,
            ..pristine_ctx()
        };
        assert!(record.check_device_owner_preconditions(UserId(0), &ctx).is_ok());

        // Setup complete with a second user: rejected.
        let ctx = DesignationContext {
            caller: shell,
            setup_complete: true,
            user_count: 2,
            ..pristine_ctx()
        };
        assert_eq!(
            record.check_device_owner_preconditions(UserId(0), &ctx),
            Err(OwnershipError::BootstrapRejected {
                users: 2,
                accounts: 0
            })
        );
    }

    #[test]
    fn app_caller_blocked_after_setup_unless_elevated() {
        let record = OwnershipRecord::default();
        let ctx = DesignationContext {
            setup_complete: true,
            ..pristine_ctx()
        };
        assert_eq!(
            record.check_device_owner_preconditions(UserId(0), &ctx),
            Err(OwnershipError::SetupCompleted)
        );

        let ctx = DesignationContext {
            setup_complete: true,
            caller: CallerContext::elevated(1000),
            ..pristine_ctx()
        };
        assert!(record.check_device_owner_preconditions(UserId(0), &ctx).is_ok());
    }

    #[test]
    fn baseline_upgrade_applies_only_the_delta() {
        let mut record = OwnershipRecord::default();
        let applied = record.designate_profile_owner(component("com.po"), UserId(10), true);
        assert_eq!(applied, restrictions::DEFAULT_ENABLED_FOR_PROFILE_OWNER);

        // A platform upgrade extends the baseline with one new name; only
        // that name comes back, even though the owner may have revoked the
        // originals in the meantime.
        let upgraded: &[&'static str] = &[
            restrictions::names::NO_WALLPAPER,
            restrictions::names::NO_BLUETOOTH_SHARING,
            restrictions::names::NO_USB_FILE_TRANSFER,
        ];
        let entry = record.profile_owners.last_mut().unwrap();
        let delta = OwnershipRecord::apply_baseline_upgrade(entry, upgraded);
        assert_eq!(delta, vec![restrictions::names::NO_USB_FILE_TRANSFER]);

        // Re-running the upgrade applies nothing.
        let entry = record.profile_owners.last_mut().unwrap();
        assert!(OwnershipRecord::apply_baseline_upgrade(entry, upgraded).is_empty());
    }

    #[test]
    fn clearing_is_idempotent() {
        let mut record = OwnershipRecord::default();
        record.designate_device_owner(component("com.do"), UserId(0));
        assert!(record.clear_device_owner().is_some());
        assert!(record.clear_device_owner().is_none());
        assert!(record.clear_profile_owner(UserId(10)).is_none());
    }
}
