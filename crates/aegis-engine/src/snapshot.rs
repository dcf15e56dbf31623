//! Per-user policy snapshots and their repository.
//!
//! A [`UserPolicySnapshot`] is the unit of persistence: everything the
//! engine tracks for one user, admins included. Admin order is insertion
//! order and is significant (it is the final tie-break for strictest-admin
//! selection), so admins live in a `Vec` with a rebuilt component index
//! beside it.

use std::collections::{BTreeSet, HashMap};

use aegis_core::admin::Admin;
use aegis_core::delegation::DelegationScope;
use aegis_core::identity::{ComponentName, UserId};
use aegis_core::provisioning::ProvisioningState;
use serde::{Deserialize, Serialize};

/// How runtime permission requests from managed apps are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Ask the user.
    #[default]
    Prompt,
    /// Grant without asking.
    AutoGrant,
    /// Deny without asking.
    AutoDeny,
}

/// Everything tracked for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPolicySnapshot {
    /// Registered admins in activation order.
    #[serde(default)]
    admins: Vec<Admin>,

    /// Component index into `admins`; rebuilt, never persisted.
    #[serde(skip)]
    index: HashMap<ComponentName, usize>,

    /// Components whose removal is in flight.
    #[serde(default)]
    pub pending_removal: BTreeSet<ComponentName>,

    /// Consecutive failed credential attempts.
    #[serde(default)]
    pub failed_password_attempts: u32,

    /// The uid whose password-reset call is authoritative until consumed.
    #[serde(default)]
    pub password_owner_uid: Option<u32>,

    /// Enrollment lifecycle state.
    #[serde(default)]
    pub provisioning_state: ProvisioningState,

    /// Runtime permission policy.
    #[serde(default)]
    pub permission_policy: PermissionPolicy,

    /// Delegate package → granted scopes.
    #[serde(default)]
    pub delegations: HashMap<String, BTreeSet<DelegationScope>>,

    /// Opaque affiliation ids declared for this user.
    #[serde(default)]
    pub affiliation_ids: BTreeSet<String>,

    /// CA certificate aliases the user has accepted.
    #[serde(default)]
    pub accepted_ca_certs: BTreeSet<String>,

    /// CA certificate aliases installed by the owner.
    #[serde(default)]
    pub owner_installed_ca_certs: BTreeSet<String>,

    /// Packages allowed to enter lock-task mode.
    #[serde(default)]
    pub lock_task_packages: Vec<String>,

    /// Status bar disabled by the owner.
    #[serde(default)]
    pub status_bar_disabled: bool,

    /// Initial setup completed for this user.
    #[serde(default)]
    pub setup_complete: bool,

    /// Last security-log retrieval, epoch ms; `0` = never.
    #[serde(default)]
    pub last_security_log_retrieval_ms: i64,

    /// Last network-log retrieval, epoch ms; `0` = never.
    #[serde(default)]
    pub last_network_log_retrieval_ms: i64,

    /// Last bug-report request, epoch ms; `0` = never.
    #[serde(default)]
    pub last_bug_report_request_ms: i64,

    /// One-shot initialization payload for a newly created managed user;
    /// consumed on first read.
    #[serde(default)]
    pub new_user_init_payload: Option<Vec<u8>>,

    /// Last persisted password-sufficiency verdict, used before any
    /// credential has been observed since boot.
    #[serde(default)]
    pub password_sufficient_checkpoint: bool,

    /// Pre-multi-scope certificate installer declaration; drained into
    /// `delegations` by [`UserPolicySnapshot::migrate_legacy`] on load.
    #[serde(default, rename = "certificate_installer", skip_serializing)]
    legacy_certificate_installer: Option<String>,
}

impl UserPolicySnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the component index and migrates legacy fields. Called
    /// once after deserialization.
    pub fn migrate_legacy(&mut self) {
        self.rebuild_index();
        if let Some(package) = self.legacy_certificate_installer.take() {
            self.delegations
                .entry(package)
                .or_default()
                .insert(DelegationScope::CertInstall);
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .admins
            .iter()
            .enumerate()
            .map(|(i, admin)| (admin.identity.component.clone(), i))
            .collect();
    }

    /// All admins in activation order.
    #[must_use]
    pub fn admins(&self) -> &[Admin] {
        &self.admins
    }

    /// Looks up an admin by component.
    #[must_use]
    pub fn admin(&self, component: &ComponentName) -> Option<&Admin> {
        self.index.get(component).map(|i| &self.admins[*i])
    }

    /// Mutable lookup by component.
    pub fn admin_mut(&mut self, component: &ComponentName) -> Option<&mut Admin> {
        let i = *self.index.get(component)?;
        Some(&mut self.admins[i])
    }

    /// Returns `true` if an admin is registered for `component`.
    #[must_use]
    pub fn has_admin(&self, component: &ComponentName) -> bool {
        self.index.contains_key(component)
    }

    /// Returns `true` if any registered admin belongs to `package`.
    #[must_use]
    pub fn has_admin_in_package(&self, package: &str) -> bool {
        self.admins
            .iter()
            .any(|a| a.identity.component.package() == package)
    }

    /// Appends an admin, preserving activation order. The caller has
    /// already ruled out duplicates.
    pub fn push_admin(&mut self, admin: Admin) {
        self.index
            .insert(admin.identity.component.clone(), self.admins.len());
        self.admins.push(admin);
    }

    /// Removes the admin for `component`, keeping the order of the rest.
    /// Returns the removed record.
    pub fn remove_admin(&mut self, component: &ComponentName) -> Option<Admin> {
        let i = self.index.remove(component)?;
        let removed = self.admins.remove(i);
        self.rebuild_index();
        self.pending_removal.remove(component);
        Some(removed)
    }
}

/// Whether a snapshot came from the store or was created empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Newly created; nothing was on disk.
    Fresh,
    /// Deserialized from the store.
    Loaded,
}

/// Lazily populated map of per-user snapshots.
///
/// Lives entirely behind the policy lock; the store handle is passed in by
/// the engine so loads can happen on first access.
#[derive(Debug, Default)]
pub struct SnapshotRepository {
    users: HashMap<UserId, UserPolicySnapshot>,
}

impl SnapshotRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot for `user`, loading it through `load` on first
    /// access. `load` returns what the store found, if anything.
    pub fn get_or_load(
        &mut self,
        user: UserId,
        load: impl FnOnce() -> Option<UserPolicySnapshot>,
    ) -> (&mut UserPolicySnapshot, LoadOutcome) {
        use std::collections::hash_map::Entry;
        match self.users.entry(user) {
            Entry::Occupied(entry) => (entry.into_mut(), LoadOutcome::Loaded),
            Entry::Vacant(entry) => match load() {
                Some(mut snapshot) => {
                    snapshot.migrate_legacy();
                    (entry.insert(snapshot), LoadOutcome::Loaded)
                },
                None => (entry.insert(UserPolicySnapshot::new()), LoadOutcome::Fresh),
            },
        }
    }

    /// The snapshot for `user`, if already resident.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<&UserPolicySnapshot> {
        self.users.get(&user)
    }

    /// Mutable access, if already resident.
    pub fn get_mut(&mut self, user: UserId) -> Option<&mut UserPolicySnapshot> {
        self.users.get_mut(&user)
    }

    /// Drops the snapshot for a removed user. The caller deletes the
    /// backing file.
    pub fn remove(&mut self, user: UserId) -> Option<UserPolicySnapshot> {
        self.users.remove(&user)
    }

    /// Users with resident snapshots.
    #[must_use]
    pub fn resident_users(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use aegis_core::identity::AdminIdentity;

    use super::*;

    fn admin(package: &str, user: i32) -> Admin {
        Admin::new(AdminIdentity::new(
            ComponentName::new(package, ".Admin").unwrap(),
            UserId(user),
            10_001,
        ))
    }

    #[test]
    fn admin_order_is_insertion_order() {
        let mut snapshot = UserPolicySnapshot::new();
        snapshot.push_admin(admin("com.a", 0));
        snapshot.push_admin(admin("com.b", 0));
        snapshot.push_admin(admin("com.c", 0));
        snapshot.remove_admin(&ComponentName::new("com.b", ".Admin").unwrap());

        let order: Vec<&str> = snapshot
            .admins()
            .iter()
            .map(|a| a.identity.component.package())
            .collect();
        assert_eq!(order, ["com.a", "com.c"]);
        // Index still resolves after the removal shifted positions.
        assert!(snapshot.admin(&ComponentName::new("com.c", ".Admin").unwrap()).is_some());
    }

    #[test]
    fn fresh_vs_loaded_outcomes() {
        let mut repo = SnapshotRepository::new();
        let (_, outcome) = repo.get_or_load(UserId(0), || None);
        assert_eq!(outcome, LoadOutcome::Fresh);

        // Resident snapshots report Loaded on re-access.
        let (_, outcome) = repo.get_or_load(UserId(0), || None);
        assert_eq!(outcome, LoadOutcome::Loaded);

        let (_, outcome) = repo.get_or_load(UserId(10), || Some(UserPolicySnapshot::new()));
        assert_eq!(outcome, LoadOutcome::Loaded);
    }

    #[test]
    fn legacy_cert_installer_migrates_into_delegations() {
        let json = r#"{"certificate_installer":"com.certs","admins":[]}"#;
        let mut snapshot: UserPolicySnapshot = serde_json::from_str(json).unwrap();
        snapshot.migrate_legacy();
        assert!(snapshot.delegations["com.certs"].contains(&DelegationScope::CertInstall));
        // The legacy field never round-trips back out.
        let out = serde_json::to_string(&snapshot).unwrap();
        assert!(!out.contains("certificate_installer"));
    }
}
