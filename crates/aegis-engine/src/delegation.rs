//! Scoped capability delegation from an owner to helper packages.
//!
//! A delegation makes a non-admin package able to exercise one named
//! capability on the owner's behalf. Grants are keyed by package name but
//! validated against the package's live uid at check time, so a stale
//! grant cannot be exploited by whatever app later claims the name. The
//! legacy single-delegate setters are expressed on top of the multi-scope
//! model: grant to the new package, strip the same scope everywhere else.

use std::collections::BTreeSet;

use aegis_core::delegation::DelegationScope;
use aegis_core::error::{PolicyError, PolicyResult};
use aegis_core::identity::UserId;
use tracing::debug;

use crate::platform::UserDirectory;
use crate::snapshot::UserPolicySnapshot;

/// Post-lock notifications a delegation change produces: each package and
/// its now-current scope set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DelegationEffects {
    /// (delegate package, current scopes) pairs to notify.
    pub notifications: Vec<(String, Vec<DelegationScope>)>,
}

/// Replaces the scope set of `package` atomically.
///
/// The delegate must be installed for `user`, except when clearing all
/// scopes or when making the legacy single-scope certificate-install
/// grant (both kept callable for pre-multi-scope callers that delegate to
/// packages installed later).
///
/// # Errors
///
/// `InvalidArgument` if the package is required to be installed and is
/// not.
pub fn set_delegated_scopes(
    directory: &dyn UserDirectory,
    snapshot: &mut UserPolicySnapshot,
    user: UserId,
    package: &str,
    scopes: &[DelegationScope],
) -> PolicyResult<DelegationEffects> {
    let scopes: BTreeSet<DelegationScope> = scopes.iter().copied().collect();

    let legacy_cert_grant =
        scopes.len() == 1 && scopes.contains(&DelegationScope::CertInstall);
    let require_installed = !scopes.is_empty() && !legacy_cert_grant;
    if require_installed && !directory.is_package_installed(package, user) {
        return Err(PolicyError::invalid_argument(format!(
            "delegate package {package} is not installed for {user}"
        )));
    }

    if scopes.is_empty() {
        snapshot.delegations.remove(package);
    } else {
        snapshot.delegations.insert(package.to_string(), scopes);
    }
    let current = delegated_scopes(snapshot, package);
    debug!(package, %user, scopes = ?current, "delegation scopes replaced");
    Ok(DelegationEffects {
        notifications: vec![(package.to_string(), current)],
    })
}

/// The scopes currently granted to `package`.
#[must_use]
pub fn delegated_scopes(snapshot: &UserPolicySnapshot, package: &str) -> Vec<DelegationScope> {
    snapshot
        .delegations
        .get(package)
        .map(|scopes| scopes.iter().copied().collect())
        .unwrap_or_default()
}

/// All packages currently holding `scope`.
#[must_use]
pub fn delegates_with_scope(snapshot: &UserPolicySnapshot, scope: DelegationScope) -> Vec<String> {
    let mut packages: Vec<String> = snapshot
        .delegations
        .iter()
        .filter(|(_, scopes)| scopes.contains(&scope))
        .map(|(package, _)| package.clone())
        .collect();
    packages.sort();
    packages
}

/// Whether the live caller may exercise `scope`.
///
/// True only when the package holds the grant *and* the caller's uid
/// matches the installed uid of that package for `user`.
#[must_use]
pub fn is_delegate(
    directory: &dyn UserDirectory,
    snapshot: &UserPolicySnapshot,
    caller_package: &str,
    caller_uid: u32,
    scope: DelegationScope,
    user: UserId,
) -> bool {
    let granted = snapshot
        .delegations
        .get(caller_package)
        .is_some_and(|scopes| scopes.contains(&scope));
    granted && directory.package_uid(caller_package, user) == Some(caller_uid)
}

/// Legacy exclusive-delegate setter: grants `scope` to `package` (if any)
/// and strips it from every other delegate, preserving the old "only one
/// certificate installer" semantics.
pub fn set_exclusive_delegate(
    directory: &dyn UserDirectory,
    snapshot: &mut UserPolicySnapshot,
    user: UserId,
    package: Option<&str>,
    scope: DelegationScope,
) -> PolicyResult<DelegationEffects> {
    let mut effects = DelegationEffects::default();

    let stripped: Vec<String> = snapshot
        .delegations
        .iter()
        .filter(|(other, scopes)| Some(other.as_str()) != package && scopes.contains(&scope))
        .map(|(other, _)| other.clone())
        .collect();
    for other in stripped {
        if let Some(scopes) = snapshot.delegations.get_mut(&other) {
            scopes.remove(&scope);
            if scopes.is_empty() {
                snapshot.delegations.remove(&other);
            }
        }
        effects
            .notifications
            .push((other.clone(), delegated_scopes(snapshot, &other)));
    }

    if let Some(package) = package {
        let mut scopes = delegated_scopes(snapshot, package);
        if !scopes.contains(&scope) {
            scopes.push(scope);
            let mut granted = set_delegated_scopes(directory, snapshot, user, package, &scopes)?;
            effects.notifications.append(&mut granted.notifications);
        }
    }
    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fakes::FakeDirectory;

    fn setup() -> (FakeDirectory, UserPolicySnapshot) {
        let dir = FakeDirectory::new();
        dir.install_package("com.delegate1", UserId::SYSTEM, 10_100);
        dir.install_package("com.delegate2", UserId::SYSTEM, 10_200);
        (dir, UserPolicySnapshot::new())
    }

    #[test]
    fn grant_then_revoke_all() {
        let (dir, mut snapshot) = setup();
        set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.delegate1", &[
            DelegationScope::BlockUninstall,
        ])
        .unwrap();
        assert!(is_delegate(
            &dir,
            &snapshot,
            "com.delegate1",
            10_100,
            DelegationScope::BlockUninstall,
            UserId::SYSTEM
        ));

        set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.delegate1", &[]).unwrap();
        assert!(!is_delegate(
            &dir,
            &snapshot,
            "com.delegate1",
            10_100,
            DelegationScope::BlockUninstall,
            UserId::SYSTEM
        ));
        assert!(snapshot.delegations.is_empty());
    }

    #[test]
    fn two_delegates_can_share_a_scope() {
        let (dir, mut snapshot) = setup();
        for package in ["com.delegate1", "com.delegate2"] {
            set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, package, &[
                DelegationScope::PermissionGrant,
            ])
            .unwrap();
        }
        assert_eq!(
            delegates_with_scope(&snapshot, DelegationScope::PermissionGrant),
            vec!["com.delegate1".to_string(), "com.delegate2".to_string()]
        );
    }

    #[test]
    fn stale_uid_is_not_a_delegate() {
        let (dir, mut snapshot) = setup();
        set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.delegate1", &[
            DelegationScope::AppRestrictions,
        ])
        .unwrap();
        // Same package name, wrong uid: the grant must not apply.
        assert!(!is_delegate(
            &dir,
            &snapshot,
            "com.delegate1",
            99_999,
            DelegationScope::AppRestrictions,
            UserId::SYSTEM
        ));
    }

    #[test]
    fn uninstalled_delegate_is_rejected_except_legacy_cases() {
        let (dir, mut snapshot) = setup();
        let err = set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.ghost", &[
            DelegationScope::PackageAccess,
        ])
        .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidArgument { .. }));

        // Legacy single-scope cert grant skips the installed check.
        set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.ghost", &[
            DelegationScope::CertInstall,
        ])
        .unwrap();
        // Clearing all scopes always works.
        set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.ghost", &[]).unwrap();
    }

    #[test]
    fn scopes_are_deduplicated() {
        let (dir, mut snapshot) = setup();
        set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.delegate1", &[
            DelegationScope::EnableSystemApp,
            DelegationScope::EnableSystemApp,
        ])
        .unwrap();
        assert_eq!(
            delegated_scopes(&snapshot, "com.delegate1"),
            vec![DelegationScope::EnableSystemApp]
        );
    }

    #[test]
    fn exclusive_delegate_strips_previous_holder() {
        let (dir, mut snapshot) = setup();
        set_exclusive_delegate(
            &dir,
            &mut snapshot,
            UserId::SYSTEM,
            Some("com.delegate1"),
            DelegationScope::CertInstall,
        )
        .unwrap();
        set_exclusive_delegate(
            &dir,
            &mut snapshot,
            UserId::SYSTEM,
            Some("com.delegate2"),
            DelegationScope::CertInstall,
        )
        .unwrap();

        assert_eq!(
            delegates_with_scope(&snapshot, DelegationScope::CertInstall),
            vec!["com.delegate2".to_string()]
        );

        // Clearing with None removes the last holder too.
        set_exclusive_delegate(
            &dir,
            &mut snapshot,
            UserId::SYSTEM,
            None,
            DelegationScope::CertInstall,
        )
        .unwrap();
        assert!(delegates_with_scope(&snapshot, DelegationScope::CertInstall).is_empty());
    }

    #[test]
    fn exclusive_setter_preserves_unrelated_scopes() {
        let (dir, mut snapshot) = setup();
        set_delegated_scopes(&dir, &mut snapshot, UserId::SYSTEM, "com.delegate1", &[
            DelegationScope::CertInstall,
            DelegationScope::BlockUninstall,
        ])
        .unwrap();
        set_exclusive_delegate(
            &dir,
            &mut snapshot,
            UserId::SYSTEM,
            Some("com.delegate2"),
            DelegationScope::CertInstall,
        )
        .unwrap();

        assert_eq!(
            delegated_scopes(&snapshot, "com.delegate1"),
            vec![DelegationScope::BlockUninstall]
        );
    }
}
