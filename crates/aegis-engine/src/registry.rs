//! Admin activation and two-phase removal.
//!
//! Activation validates the component against the directory (resolvable,
//! internal storage, not an instant app) and appends the admin to the
//! user's snapshot. Deactivation is asynchronous: the record is tagged
//! pending-removal under the policy lock, the disable notification goes
//! out after release, and the record is purged only when the notification
//! completes (or the bounded timeout forces it). Re-activation while the
//! tag is set fails rather than resurrecting a half-removed record.

use aegis_core::admin::Admin;
use aegis_core::error::{PolicyError, PolicyResult};
use aegis_core::identity::{AdminIdentity, ComponentName, UserId};
use tracing::{debug, info};

use crate::platform::UserDirectory;
use crate::snapshot::UserPolicySnapshot;

/// Side effects an activation asks the engine to perform after the lock
/// is released.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ActivationEffects {
    /// Package to re-enable (it was disabled-until-used).
    pub enable_package: Option<String>,
    /// Whether this was a first activation (drives the `Enabled`
    /// lifecycle notification).
    pub first_activation: bool,
}

/// Activates `component` as an admin for `user`.
///
/// # Errors
///
/// `InvalidArgument` if the component does not resolve to a valid admin
/// descriptor, is not on internal storage, or is an instant app;
/// `RemovalPending` while a deactivation is in flight; `AlreadyExists`
/// unless `refreshing`.
pub fn activate(
    directory: &dyn UserDirectory,
    snapshot: &mut UserPolicySnapshot,
    component: &ComponentName,
    user: UserId,
    refreshing: bool,
) -> PolicyResult<ActivationEffects> {
    let descriptor = directory
        .resolve_admin_descriptor(component, user)
        .ok_or_else(|| {
            PolicyError::invalid_argument(format!("cannot resolve admin {component} for {user}"))
        })?;
    if !descriptor.internal_storage {
        return Err(PolicyError::invalid_argument(format!(
            "admin {component} is not installed on internal storage"
        )));
    }
    if descriptor.instant_app {
        return Err(PolicyError::invalid_argument(format!(
            "admin {component} belongs to an instant app"
        )));
    }
    if snapshot.pending_removal.contains(component) {
        return Err(PolicyError::RemovalPending {
            component: component.flatten(),
            user: user.raw(),
        });
    }

    if let Some(existing) = snapshot.admin_mut(component) {
        if !refreshing {
            return Err(PolicyError::AlreadyExists {
                component: component.flatten(),
                user: user.raw(),
            });
        }
        // Refresh keeps declared policies; only the process identity can
        // have changed across a package update.
        existing.identity.uid = descriptor.uid;
        debug!(%component, %user, "refreshed admin descriptor");
        return Ok(ActivationEffects::default());
    }

    snapshot.push_admin(Admin::new(AdminIdentity::new(
        component.clone(),
        user,
        descriptor.uid,
    )));
    info!(%component, %user, uid = descriptor.uid, "admin activated");
    Ok(ActivationEffects {
        enable_package: descriptor
            .enabled_until_used
            .then(|| component.package().to_string()),
        first_activation: true,
    })
}

/// Phase one of deactivation: tags the admin pending-removal.
///
/// # Errors
///
/// `NotFound` if no admin is registered for `component`.
pub fn begin_deactivation(
    snapshot: &mut UserPolicySnapshot,
    component: &ComponentName,
    user: UserId,
) -> PolicyResult<()> {
    if !snapshot.has_admin(component) {
        return Err(PolicyError::not_found(format!("admin {component} on {user}")));
    }
    snapshot.pending_removal.insert(component.clone());
    debug!(%component, %user, "admin removal pending");
    Ok(())
}

/// Phase two of deactivation: purges the record. Runs whether the disable
/// notification completed or timed out; a record already purged by a
/// concurrent forced removal is not an error.
pub fn finish_deactivation(
    snapshot: &mut UserPolicySnapshot,
    component: &ComponentName,
) -> Option<Admin> {
    let removed = snapshot.remove_admin(component);
    snapshot.pending_removal.remove(component);
    if removed.is_some() {
        info!(%component, "admin removed");
    }
    removed
}

/// Forced removal (test/debug path): purges immediately, skipping the
/// lifecycle notification.
pub fn forced_remove(
    snapshot: &mut UserPolicySnapshot,
    component: &ComponentName,
) -> Option<Admin> {
    finish_deactivation(snapshot, component)
}
