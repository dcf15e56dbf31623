//! The engine facade.
//!
//! [`PolicyEngine`] composes the registry, ownership, delegation,
//! aggregation, affiliation, and persistence components behind the single
//! policy lock. Every operation follows the same shape: acquire the lock,
//! re-check preconditions, mutate, collect [`Effects`], release, then
//! dispatch the effects (store commits, lifecycle notifications,
//! enforcement pushes) with the lock free. [`Effects`] dispatch asserts
//! the lock is not held, so a future code path that tries to notify or
//! commit from inside an atomic section fails loudly instead of
//! deadlocking against a re-entrant callback.

use std::collections::HashMap;
use std::sync::Arc;

use aegis_core::admin::PolicyScope;
use aegis_core::delegation::DelegationScope;
use aegis_core::error::{PolicyError, PolicyResult};
use aegis_core::identity::{ComponentName, UserId};
use aegis_core::password::{PasswordMetrics, PasswordQuality, PasswordRequirements};
use aegis_core::policy::{keyguard, PolicyRecord, TrustAgentConfig};
use aegis_core::provisioning::{self, ProvisioningState};
use aegis_core::restrictions;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::affiliation::{self, AffiliationTracker, NetworkEvent, SecurityEvent};
use crate::aggregator::PolicyAggregator;
use crate::config::EngineConfig;
use crate::delegation;
use crate::lock::PolicyLock;
use crate::ownership::{CallerContext, DesignationContext, OwnershipRecord};
use crate::platform::{
    AdminLifecycleEvent, CompletionHandle, EnforcementSink, LifecycleNotifier, UserDirectory,
};
use crate::registry;
use crate::snapshot::{PermissionPolicy, SnapshotRepository, UserPolicySnapshot};
use crate::store::{PersistenceStore, StoreError};

/// Which permitted-package allow-list a call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermittedListKind {
    /// Accessibility services.
    AccessibilityServices,
    /// Input methods.
    InputMethods,
    /// Notification listeners.
    NotificationListeners,
}

/// Mutable state behind the policy lock.
struct EngineState {
    repo: SnapshotRepository,
    ownership: OwnershipRecord,
    affiliation: AffiliationTracker,
    /// Live credential metrics per user; absent until the first report
    /// since boot.
    password_metrics: HashMap<UserId, PasswordMetrics>,
}

/// Side effects collected under the lock, dispatched after release.
#[derive(Default)]
struct Effects {
    persist_users: Vec<(UserId, UserPolicySnapshot)>,
    persist_ownership: Option<OwnershipRecord>,
    delete_users: Vec<UserId>,
    notifications: Vec<(ComponentName, UserId, AdminLifecycleEvent)>,
    enable_packages: Vec<(String, UserId)>,
    delegation_notices: Vec<(UserId, String, Vec<DelegationScope>)>,
    screen_lock_pushes: Vec<(UserId, i64)>,
    camera_pushes: Vec<(UserId, bool)>,
    wipe_requests: Vec<(UserId, ComponentName)>,
}

impl Effects {
    fn persist_user(&mut self, state: &EngineState, user: UserId) {
        if let Some(snapshot) = state.repo.get(user) {
            self.persist_users.push((user, snapshot.clone()));
        }
    }

    fn persist_ownership(&mut self, state: &EngineState) {
        self.persist_ownership = Some(state.ownership.clone());
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// The policy aggregation and ownership-governance engine.
pub struct PolicyEngine {
    config: EngineConfig,
    directory: Arc<dyn UserDirectory>,
    sink: Arc<dyn EnforcementSink>,
    notifier: Arc<dyn LifecycleNotifier>,
    store: PersistenceStore,
    state: PolicyLock<EngineState>,
}

impl PolicyEngine {
    /// Opens the store and brings up an engine.
    ///
    /// # Errors
    ///
    /// [`StoreError`] when the data directory cannot be opened or is
    /// locked by another instance.
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn EnforcementSink>,
        notifier: Arc<dyn LifecycleNotifier>,
    ) -> Result<Self, StoreError> {
        let store = PersistenceStore::open(config.data_dir.clone())?;
        let ownership = store.load_ownership().unwrap_or_default();
        info!(
            data_dir = %config.data_dir.display(),
            device_owner = ownership.device_owner().is_some(),
            "policy engine started"
        );
        Ok(Self {
            config,
            directory,
            sink,
            notifier,
            store,
            state: PolicyLock::new(EngineState {
                repo: SnapshotRepository::new(),
                ownership,
                affiliation: AffiliationTracker::new(),
                password_metrics: HashMap::new(),
            }),
        })
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Effects dispatch (lock must be free)
    // ------------------------------------------------------------------

    fn apply_effects(&self, effects: Effects) {
        self.state.assert_not_held();
        for (user, snapshot) in &effects.persist_users {
            if let Err(err) = self.store.save_user(*user, snapshot) {
                // In-memory state stays authoritative; retried on the
                // next mutation of this user.
                warn!(%user, error = %err, "policy snapshot commit failed");
            }
        }
        if let Some(record) = &effects.persist_ownership {
            if let Err(err) = self.store.save_ownership(record) {
                warn!(error = %err, "ownership record commit failed");
            }
        }
        for user in effects.delete_users {
            self.store.delete_user(user);
        }
        for (package, user) in effects.enable_packages {
            self.sink.enable_package(&package, user);
        }
        for (component, user, event) in effects.notifications {
            self.notifier.notify(&component, user, event, None);
        }
        for (user, package, scopes) in effects.delegation_notices {
            self.sink.notify_delegation_changed(user, &package, &scopes);
        }
        for (user, timeout_ms) in effects.screen_lock_pushes {
            self.sink.apply_screen_lock_timeout(user, timeout_ms);
        }
        for (user, disabled) in effects.camera_pushes {
            self.sink.apply_camera_disabled(user, disabled);
        }
        for (user, component) in effects.wipe_requests {
            self.sink.request_wipe(user, &component);
        }
    }

    fn ensure_loaded(&self, state: &mut EngineState, user: UserId) {
        state.repo.get_or_load(user, || self.store.load_user(user));
        for profile in self.directory.profiles_of(user) {
            state
                .repo
                .get_or_load(profile.user, || self.store.load_user(profile.user));
        }
    }

    fn ensure_all_users_loaded(&self, state: &mut EngineState) {
        for user in self.directory.users() {
            state.repo.get_or_load(user, || self.store.load_user(user));
        }
    }

    // ------------------------------------------------------------------
    // AdminRegistry operations
    // ------------------------------------------------------------------

    /// Activates `component` as an admin for `user`.
    ///
    /// # Errors
    ///
    /// See [`registry::activate`].
    pub fn activate_admin(
        &self,
        component: &ComponentName,
        user: UserId,
        refreshing: bool,
    ) -> PolicyResult<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let snapshot = state
                .repo
                .get_mut(user)
                .ok_or_else(|| PolicyError::not_found(format!("snapshot for {user}")))?;
            let activation =
                registry::activate(self.directory.as_ref(), snapshot, component, user, refreshing)?;
            if let Some(package) = activation.enable_package {
                effects.enable_packages.push((package, user));
            }
            if activation.first_activation {
                effects
                    .notifications
                    .push((component.clone(), user, AdminLifecycleEvent::Enabled));
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Deactivates an admin: pending tag, disable notification after the
    /// lock is released, purge on acknowledgment or timeout.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown admin, `PermissionDenied` when the caller
    /// is neither the admin's own uid nor elevated, `IllegalState` while
    /// the component still holds an owner role.
    pub fn deactivate_admin(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
    ) -> PolicyResult<()> {
        let completion = CompletionHandle::new();
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if state.ownership.is_owner(component, user) {
                return Err(PolicyError::illegal_state(format!(
                    "admin {component} holds an owner role for {user}; clear ownership first"
                )));
            }
            let snapshot = state
                .repo
                .get_mut(user)
                .ok_or_else(|| PolicyError::not_found(format!("snapshot for {user}")))?;
            let admin = snapshot
                .admin(component)
                .ok_or_else(|| PolicyError::not_found(format!("admin {component} on {user}")))?;
            if !caller.elevated && caller.uid != admin.identity.uid {
                return Err(PolicyError::permission_denied(
                    "deactivate_admin",
                    "caller uid does not own the admin",
                ));
            }
            registry::begin_deactivation(snapshot, component, user)?;
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);

        self.state.assert_not_held();
        self.notifier.notify(
            component,
            user,
            AdminLifecycleEvent::Disabled,
            Some(completion.clone()),
        );
        if !completion.wait_timeout(self.config.deactivation_timeout) {
            warn!(%component, %user, "disable acknowledgment timed out, purging anyway");
        }

        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            if let Some(snapshot) = state.repo.get_mut(user) {
                registry::finish_deactivation(snapshot, component);
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Forced removal (test/debug path): no lifecycle notification, but
    /// owner roles are torn down and state persists.
    pub fn forced_remove_admin(&self, component: &ComponentName, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            self.tear_down_owner_roles(&mut state, &mut effects, component, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                registry::forced_remove(snapshot, component);
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    fn tear_down_owner_roles(
        &self,
        state: &mut EngineState,
        effects: &mut Effects,
        component: &ComponentName,
        user: UserId,
    ) {
        let mut owner_cleared = false;
        if state.ownership.is_device_owner(component, user) {
            state.ownership.clear_device_owner();
            state.affiliation.security_logging_enabled = false;
            owner_cleared = true;
        }
        if state.ownership.is_profile_owner(component, user) {
            state.ownership.clear_profile_owner(user);
            owner_cleared = true;
        }
        if owner_cleared {
            if let Some(admin) = state
                .repo
                .get_mut(user)
                .and_then(|snapshot| snapshot.admin_mut(component))
            {
                admin.record.profile_mut().reset_owner_exclusive();
            }
            self.recompute_affiliation(state, effects);
            effects.persist_ownership(state);
        }
    }

    /// Active admin components for `user`, in activation order.
    #[must_use]
    pub fn active_admins(&self, user: UserId) -> Vec<ComponentName> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .map(|snapshot| {
                snapshot
                    .admins()
                    .iter()
                    .map(|a| a.identity.component.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `component` is an active admin for `user`.
    #[must_use]
    pub fn is_admin_active(&self, component: &ComponentName, user: UserId) -> bool {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .is_some_and(|snapshot| snapshot.has_admin(component))
    }

    /// Whether any active admin for `user` belongs to `package`.
    #[must_use]
    pub fn has_active_admin_in_package(&self, package: &str, user: UserId) -> bool {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .is_some_and(|snapshot| snapshot.has_admin_in_package(package))
    }

    // ------------------------------------------------------------------
    // Per-admin policy mutation
    // ------------------------------------------------------------------

    /// Resolves the caller's admin and applies `mutate` to the addressed
    /// record half, persisting afterwards.
    fn mutate_admin_policy(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        scope: PolicyScope,
        mutate: impl FnOnce(&mut PolicyRecord),
    ) -> PolicyResult<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let snapshot = state
                .repo
                .get_mut(user)
                .ok_or_else(|| PolicyError::not_found(format!("snapshot for {user}")))?;
            let admin = snapshot
                .admin_mut(component)
                .ok_or_else(|| PolicyError::not_found(format!("admin {component} on {user}")))?;
            if !caller.elevated && caller.uid != admin.identity.uid {
                return Err(PolicyError::permission_denied(
                    "set_policy",
                    "caller uid does not own the admin",
                ));
            }
            mutate(admin.record.policy_mut(scope));
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    fn scope_for(parent: bool) -> PolicyScope {
        if parent {
            PolicyScope::Parent
        } else {
            PolicyScope::Profile
        }
    }

    /// Sets the required password quality.
    pub fn set_password_quality(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        quality: PasswordQuality,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.password_quality = quality;
        })
    }

    /// Sets the minimum password length.
    pub fn set_min_password_length(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        length: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.min_password_length = length;
        })
    }

    /// Sets the minimum letter count.
    pub fn set_min_password_letters(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        count: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.min_password_letters = count;
        })
    }

    /// Sets the minimum digit count.
    pub fn set_min_password_digits(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        count: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.min_password_digits = count;
        })
    }

    /// Sets the minimum symbol count.
    pub fn set_min_password_symbols(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        count: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.min_password_symbols = count;
        })
    }

    /// Sets the minimum uppercase count.
    pub fn set_min_password_uppercase(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        count: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.min_password_uppercase = count;
        })
    }

    /// Sets the minimum lowercase count.
    pub fn set_min_password_lowercase(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        count: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.min_password_lowercase = count;
        })
    }

    /// Sets the minimum non-letter count.
    pub fn set_min_password_non_letter(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        count: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.min_password_non_letter = count;
        })
    }

    /// Sets the password history length.
    pub fn set_password_history_length(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        length: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.password_history_length = length;
        })
    }

    /// Sets the password expiration period and derives the deadline.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative timeout.
    pub fn set_password_expiration_timeout(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        timeout_ms: i64,
    ) -> PolicyResult<()> {
        if timeout_ms < 0 {
            return Err(PolicyError::invalid_argument(
                "password expiration timeout must be non-negative",
            ));
        }
        let now = now_ms();
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.password_expiration_timeout_ms = timeout_ms;
            r.password_expiration_deadline_ms = if timeout_ms > 0 { now + timeout_ms } else { 0 };
        })
    }

    /// The earliest aggregated password expiration deadline; `0` when no
    /// admin sets one.
    #[must_use]
    pub fn password_expiration(&self, user: UserId, parent: bool) -> i64 {
        self.with_aggregator(user, |agg| agg.password_expiration(user, parent))
    }

    /// Sets the maximum time to lock and pushes the new aggregate to the
    /// enforcement sink.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative timeout.
    pub fn set_max_time_to_lock(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        timeout_ms: i64,
    ) -> PolicyResult<()> {
        if timeout_ms < 0 {
            return Err(PolicyError::invalid_argument(
                "max time to lock must be non-negative",
            ));
        }
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.max_time_to_lock_ms = timeout_ms;
        })?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let aggregated = PolicyAggregator::new(
                &state.repo,
                self.directory.as_ref(),
                &self.config,
            )
            .max_time_to_lock(user, parent);
            effects.screen_lock_pushes.push((user, aggregated));
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Sets the failed-attempt limit before wipe.
    pub fn set_max_failed_passwords_for_wipe(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        limit: u32,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.max_failed_passwords_for_wipe = limit;
        })
    }

    /// Sets the strong-auth timeout.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative timeout.
    pub fn set_strong_auth_timeout(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        timeout_ms: i64,
    ) -> PolicyResult<()> {
        if timeout_ms < 0 {
            return Err(PolicyError::invalid_argument(
                "strong auth timeout must be non-negative",
            ));
        }
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.strong_auth_timeout_ms = timeout_ms;
        })
    }

    /// Sets the disabled keyguard feature bitmask.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `bits` contains undefined feature bits.
    pub fn set_keyguard_disabled_features(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        bits: u32,
    ) -> PolicyResult<()> {
        if bits & !keyguard::DISABLE_FEATURES_ALL != 0 {
            return Err(PolicyError::invalid_argument(format!(
                "unknown keyguard feature bits {:#x}",
                bits & !keyguard::DISABLE_FEATURES_ALL
            )));
        }
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.disabled_keyguard_features = bits;
        })
    }

    /// Sets the camera-disabled flag and pushes the new aggregate.
    pub fn set_camera_disabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.camera_disabled = disabled;
        })?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let aggregated =
                PolicyAggregator::new(&state.repo, self.directory.as_ref(), &self.config)
                    .camera_disabled(user);
            effects.camera_pushes.push((user, aggregated));
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Sets the screen-capture-disabled flag.
    pub fn set_screen_capture_disabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.screen_capture_disabled = disabled;
        })
    }

    /// Sets the auto-time requirement.
    pub fn set_auto_time_required(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        required: bool,
    ) -> PolicyResult<()> {
        self.require_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.auto_time_required = required;
        })
    }

    /// Sets the bluetooth-contact-sharing-disabled flag.
    pub fn set_bluetooth_contact_sharing_disabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.bluetooth_contact_sharing_disabled = disabled;
        })
    }

    /// Sets the cross-profile caller-id-disabled flag.
    pub fn set_caller_id_disabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.caller_id_disabled = disabled;
        })
    }

    /// Sets the cross-profile contacts-search-disabled flag.
    pub fn set_contacts_search_disabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.contacts_search_disabled = disabled;
        })
    }

    /// Sets the force-ephemeral-users flag (device owner only).
    pub fn set_force_ephemeral_users(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        force: bool,
    ) -> PolicyResult<()> {
        self.require_device_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.force_ephemeral_users = force;
        })
    }

    /// Sets or clears the short support message.
    pub fn set_short_support_message(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        message: Option<String>,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.short_support_message = message;
        })
    }

    /// Sets or clears the long support message.
    pub fn set_long_support_message(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        message: Option<String>,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.long_support_message = message;
        })
    }

    /// Sets the organization color (owners only).
    pub fn set_organization_color(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        color: u32,
    ) -> PolicyResult<()> {
        self.require_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.organization_color = Some(color);
        })
    }

    /// Sets or clears the organization name (owners only).
    pub fn set_organization_name(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        name: Option<String>,
    ) -> PolicyResult<()> {
        self.require_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.organization_name = name;
        })
    }

    /// Adds a cross-profile widget provider package (profile owner).
    pub fn add_cross_profile_widget_provider(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        package: String,
    ) -> PolicyResult<()> {
        self.require_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.cross_profile_widget_providers.insert(package);
        })
    }

    /// Removes a cross-profile widget provider package.
    pub fn remove_cross_profile_widget_provider(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        package: &str,
    ) -> PolicyResult<()> {
        self.require_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.cross_profile_widget_providers.remove(package);
        })
    }

    /// Replaces the keep-uninstalled package list (device owner or the
    /// keep-uninstalled-packages delegate).
    pub fn set_keep_uninstalled_packages(
        &self,
        caller: CallerContext,
        who: Option<&ComponentName>,
        caller_package: &str,
        user: UserId,
        packages: Vec<String>,
    ) -> PolicyResult<()> {
        match who {
            Some(component) => {
                self.require_device_owner(component, user)?;
                self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
                    r.keep_uninstalled_packages = packages;
                })
            },
            None => {
                let mut effects = Effects::default();
                {
                    let mut state = self.state.lock();
                    self.ensure_loaded(&mut state, user);
                    let delegated = {
                        let snapshot = state
                            .repo
                            .get(user)
                            .ok_or_else(|| PolicyError::not_found(format!("snapshot for {user}")))?;
                        delegation::is_delegate(
                            self.directory.as_ref(),
                            snapshot,
                            caller_package,
                            caller.uid,
                            DelegationScope::KeepUninstalledPackages,
                            user,
                        )
                    };
                    if !delegated {
                        return Err(PolicyError::permission_denied(
                            "set_keep_uninstalled_packages",
                            "caller is neither device owner nor delegate",
                        ));
                    }
                    let owner = state
                        .ownership
                        .device_owner()
                        .ok_or_else(|| PolicyError::illegal_state("no device owner"))?
                        .clone();
                    self.ensure_loaded(&mut state, owner.user);
                    let snapshot = state
                        .repo
                        .get_mut(owner.user)
                        .ok_or_else(|| PolicyError::not_found("device owner snapshot"))?;
                    let admin = snapshot.admin_mut(&owner.component).ok_or_else(|| {
                        PolicyError::not_found(format!("device owner admin {}", owner.component))
                    })?;
                    admin.record.profile_mut().keep_uninstalled_packages = packages;
                    effects.persist_user(&state, owner.user);
                }
                self.apply_effects(effects);
                Ok(())
            },
        }
    }

    /// Sets the options for one trust agent.
    pub fn set_trust_agent_configuration(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        parent: bool,
        agent: &ComponentName,
        config: TrustAgentConfig,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, Self::scope_for(parent), |r| {
            r.trust_agent_options.insert(agent.flatten(), config);
        })
    }

    /// Disables account management for an account type.
    pub fn set_account_management_disabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        account_type: String,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            if disabled {
                r.account_types_with_management_disabled.insert(account_type);
            } else {
                r.account_types_with_management_disabled.remove(&account_type);
            }
        })
    }

    /// Replaces one of the permitted-package allow-lists. `None` permits
    /// everything; an empty list permits system packages only.
    pub fn set_permitted_packages(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        kind: PermittedListKind,
        list: Option<Vec<String>>,
    ) -> PolicyResult<()> {
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            match kind {
                PermittedListKind::AccessibilityServices => {
                    r.permitted_accessibility_services = list;
                },
                PermittedListKind::InputMethods => r.permitted_input_methods = list,
                PermittedListKind::NotificationListeners => {
                    r.permitted_notification_listeners = list;
                },
            }
        })
    }

    /// Adds a user restriction through an owner admin.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown restriction name;
    /// `PermissionDenied` when `component` holds no owner role.
    pub fn add_user_restriction(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        restriction: &str,
    ) -> PolicyResult<()> {
        if !restrictions::is_known(restriction) {
            return Err(PolicyError::invalid_argument(format!(
                "unknown user restriction {restriction:?}"
            )));
        }
        self.require_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.user_restrictions.insert(restriction.to_string());
        })
    }

    /// Clears a user restriction through an owner admin.
    pub fn clear_user_restriction(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        restriction: &str,
    ) -> PolicyResult<()> {
        if !restrictions::is_known(restriction) {
            return Err(PolicyError::invalid_argument(format!(
                "unknown user restriction {restriction:?}"
            )));
        }
        self.require_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.user_restrictions.remove(restriction);
        })
    }

    /// The restrictions an admin currently imposes.
    #[must_use]
    pub fn user_restrictions(&self, component: &ComponentName, user: UserId) -> Vec<String> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .and_then(|snapshot| snapshot.admin(component))
            .map(|admin| admin.record.profile().user_restrictions.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Effective-policy reads
    // ------------------------------------------------------------------

    fn with_aggregator<T>(
        &self,
        user: UserId,
        read: impl FnOnce(&PolicyAggregator<'_>) -> T,
    ) -> T {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        let state = &*state;
        let aggregator =
            PolicyAggregator::new(&state.repo, self.directory.as_ref(), &self.config);
        read(&aggregator)
    }

    /// Aggregated password requirements for a user context.
    #[must_use]
    pub fn effective_password_requirements(
        &self,
        user: UserId,
        parent: bool,
    ) -> PasswordRequirements {
        self.with_aggregator(user, |agg| agg.password_requirements(user, parent))
    }

    /// Aggregated password history length.
    #[must_use]
    pub fn effective_password_history_length(&self, user: UserId, parent: bool) -> u32 {
        self.with_aggregator(user, |agg| agg.password_history_length(user, parent))
    }

    /// Aggregated maximum time to lock.
    #[must_use]
    pub fn effective_max_time_to_lock(&self, user: UserId, parent: bool) -> i64 {
        self.with_aggregator(user, |agg| agg.max_time_to_lock(user, parent))
    }

    /// Aggregated failed-attempt limit before wipe.
    #[must_use]
    pub fn effective_max_failed_passwords_for_wipe(&self, user: UserId, parent: bool) -> u32 {
        self.with_aggregator(user, |agg| agg.max_failed_passwords_for_wipe(user, parent))
    }

    /// Aggregated strong-auth timeout, clamped.
    #[must_use]
    pub fn effective_strong_auth_timeout(&self, user: UserId, parent: bool) -> i64 {
        self.with_aggregator(user, |agg| agg.strong_auth_timeout(user, parent))
    }

    /// Aggregated disabled keyguard features.
    #[must_use]
    pub fn effective_keyguard_disabled_features(&self, user: UserId, parent: bool) -> u32 {
        self.with_aggregator(user, |agg| agg.keyguard_disabled_features(user, parent))
    }

    /// Aggregated camera-disabled flag.
    #[must_use]
    pub fn effective_camera_disabled(&self, user: UserId) -> bool {
        self.with_aggregator(user, |agg| agg.camera_disabled(user))
    }

    /// Aggregated screen-capture-disabled flag.
    #[must_use]
    pub fn effective_screen_capture_disabled(&self, user: UserId) -> bool {
        self.with_aggregator(user, |agg| agg.screen_capture_disabled(user))
    }

    /// One admin's declared value, for `who != null` reads.
    #[must_use]
    pub fn declared_policy<T>(
        &self,
        who: &ComponentName,
        user: UserId,
        parent: bool,
        read: impl FnOnce(&PolicyRecord) -> T,
    ) -> Option<T> {
        self.with_aggregator(user, |agg| agg.declared(who, user, parent).map(read))
    }

    // ------------------------------------------------------------------
    // Password tracking
    // ------------------------------------------------------------------

    /// Reports the metrics of a newly set credential. Resets the failed
    /// counter, refreshes expiration deadlines, updates the persisted
    /// sufficiency checkpoint, and notifies admins.
    pub fn report_password_changed(&self, user: UserId, metrics: PasswordMetrics) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            state.password_metrics.insert(user, metrics);

            let sufficient = {
                let state_ref = &*state;
                let aggregator = PolicyAggregator::new(
                    &state_ref.repo,
                    self.directory.as_ref(),
                    &self.config,
                );
                aggregator.password_requirements(user, false).satisfied_by(&metrics)
            };

            let now = now_ms();
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.failed_password_attempts = 0;
                snapshot.password_sufficient_checkpoint = sufficient;
                snapshot.password_owner_uid = None;
                for admin in snapshot.admins() {
                    effects.notifications.push((
                        admin.identity.component.clone(),
                        user,
                        AdminLifecycleEvent::PasswordChanged,
                    ));
                }
                // Restart every declared expiration window.
                let components: Vec<ComponentName> = snapshot
                    .admins()
                    .iter()
                    .map(|a| a.identity.component.clone())
                    .collect();
                for component in components {
                    if let Some(admin) = snapshot.admin_mut(&component) {
                        let record = admin.record.profile_mut();
                        if record.password_expiration_timeout_ms > 0 {
                            record.password_expiration_deadline_ms =
                                now + record.password_expiration_timeout_ms;
                        }
                    }
                }
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    /// Whether the tracked credential satisfies the aggregated
    /// requirements. Before any credential has been reported since boot,
    /// falls back to the persisted checkpoint.
    #[must_use]
    pub fn is_active_password_sufficient(&self, user: UserId, parent: bool) -> bool {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        let metrics = state.password_metrics.get(&user).copied();
        let state = &*state;
        match metrics {
            Some(metrics) => {
                let aggregator =
                    PolicyAggregator::new(&state.repo, self.directory.as_ref(), &self.config);
                aggregator.password_requirements(user, parent).satisfied_by(&metrics)
            },
            None => state
                .repo
                .get(user)
                .map(|s| s.password_sufficient_checkpoint)
                .unwrap_or(false),
        }
    }

    /// Records a failed credential attempt; requests a wipe through the
    /// strictest admin when the aggregated limit is reached.
    pub fn report_failed_password_attempt(&self, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let Some(snapshot) = state.repo.get_mut(user) else {
                return;
            };
            snapshot.failed_password_attempts += 1;
            let attempts = snapshot.failed_password_attempts;
            for admin in snapshot.admins() {
                effects.notifications.push((
                    admin.identity.component.clone(),
                    user,
                    AdminLifecycleEvent::PasswordFailed,
                ));
            }

            let state_ref = &*state;
            let aggregator =
                PolicyAggregator::new(&state_ref.repo, self.directory.as_ref(), &self.config);
            let limit = aggregator.max_failed_passwords_for_wipe(user, false);
            if limit > 0 && attempts >= limit {
                if let Some((component, admin_user, _)) =
                    aggregator.strictest_wipe_admin(user, false)
                {
                    warn!(%user, attempts, limit, "failed-attempt limit reached, requesting wipe");
                    effects.wipe_requests.push((admin_user, component));
                }
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    /// Records a successful credential attempt after failures.
    pub fn report_successful_password_attempt(&self, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let Some(snapshot) = state.repo.get_mut(user) else {
                return;
            };
            if snapshot.failed_password_attempts == 0 {
                return;
            }
            snapshot.failed_password_attempts = 0;
            for admin in snapshot.admins() {
                effects.notifications.push((
                    admin.identity.component.clone(),
                    user,
                    AdminLifecycleEvent::PasswordSucceeded,
                ));
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    /// Current failed-attempt counter.
    #[must_use]
    pub fn failed_password_attempts(&self, user: UserId) -> u32 {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .map(|s| s.failed_password_attempts)
            .unwrap_or(0)
    }

    /// Marks `uid` as the authoritative password owner until consumed.
    pub fn set_password_owner(&self, user: UserId, uid: u32) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.password_owner_uid = Some(uid);
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    /// Takes the password owner, consuming it.
    #[must_use]
    pub fn consume_password_owner(&self, user: UserId) -> Option<u32> {
        let mut effects = Effects::default();
        let owner;
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            owner = state
                .repo
                .get_mut(user)
                .and_then(|snapshot| snapshot.password_owner_uid.take());
            if owner.is_some() {
                effects.persist_user(&state, user);
            }
        }
        self.apply_effects(effects);
        owner
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    fn designation_context(&self, user: UserId, caller: CallerContext) -> DesignationContext {
        DesignationContext {
            user_running: self.directory.is_user_running(user),
            setup_complete: self.directory.is_setup_complete(self.config.primary_user),
            user_count: self.directory.users().len(),
            incompatible_accounts: self.directory.incompatible_account_count(),
            single_pairing: self.config.single_pairing,
            caller,
        }
    }

    /// Designates `component` as the device owner.
    ///
    /// # Errors
    ///
    /// `NotFound` unless the component is an active admin for `user`;
    /// otherwise the first failing ownership precondition.
    pub fn set_device_owner(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
    ) -> PolicyResult<()> {
        let ctx = self.designation_context(user, caller);
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if state.repo.get(user).is_none_or(|s| !s.has_admin(component)) {
                return Err(PolicyError::not_found(format!(
                    "admin {component} on {user}"
                )));
            }
            // Re-checked under the lock immediately before committing.
            state.ownership.check_device_owner_preconditions(user, &ctx)?;
            let baseline = state.ownership.designate_device_owner(component.clone(), user);
            if let Some(admin) = state
                .repo
                .get_mut(user)
                .and_then(|snapshot| snapshot.admin_mut(component))
            {
                for name in baseline {
                    admin.record.profile_mut().user_restrictions.insert(name.to_string());
                }
            }
            self.recompute_affiliation(&mut state, &mut effects);
            effects.persist_user(&state, user);
            effects.persist_ownership(&state);
            info!(%component, %user, "device owner designated");
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Designates `component` as the profile owner of `user`.
    ///
    /// # Errors
    ///
    /// `NotFound` unless the component is an active admin for `user`;
    /// otherwise the first failing ownership precondition.
    pub fn set_profile_owner(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
    ) -> PolicyResult<()> {
        let ctx = DesignationContext {
            setup_complete: self.directory.is_setup_complete(user),
            ..self.designation_context(user, caller)
        };
        let managed_profile = self
            .directory
            .profiles_of(user)
            .iter()
            .find(|p| p.user == user)
            .is_some_and(|p| p.managed);
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if state.repo.get(user).is_none_or(|s| !s.has_admin(component)) {
                return Err(PolicyError::not_found(format!(
                    "admin {component} on {user}"
                )));
            }
            state.ownership.check_profile_owner_preconditions(user, &ctx)?;
            let baseline =
                state
                    .ownership
                    .designate_profile_owner(component.clone(), user, managed_profile);
            if let Some(admin) = state
                .repo
                .get_mut(user)
                .and_then(|snapshot| snapshot.admin_mut(component))
            {
                for name in baseline {
                    admin.record.profile_mut().user_restrictions.insert(name.to_string());
                }
            }
            self.recompute_affiliation(&mut state, &mut effects);
            effects.persist_user(&state, user);
            effects.persist_ownership(&state);
            info!(%component, %user, "profile owner designated");
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Clears the device owner, resetting its owner-exclusive policies.
    /// Idempotent: clearing an absent owner is a no-op.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` when the caller is neither the owner's own uid
    /// nor elevated.
    pub fn clear_device_owner(&self, caller: CallerContext) -> PolicyResult<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            let Some(owner) = state.ownership.device_owner().cloned() else {
                return Ok(());
            };
            self.ensure_loaded(&mut state, owner.user);
            if !caller.elevated {
                let owner_uid = state
                    .repo
                    .get(owner.user)
                    .and_then(|s| s.admin(&owner.component))
                    .map(|a| a.identity.uid);
                if owner_uid != Some(caller.uid) {
                    return Err(PolicyError::permission_denied(
                        "clear_device_owner",
                        "caller is not the device owner",
                    ));
                }
            }
            state.ownership.clear_device_owner();
            state.affiliation.security_logging_enabled = false;
            if let Some(admin) = state
                .repo
                .get_mut(owner.user)
                .and_then(|snapshot| snapshot.admin_mut(&owner.component))
            {
                admin.record.profile_mut().reset_owner_exclusive();
            }
            self.recompute_affiliation(&mut state, &mut effects);
            effects.persist_user(&state, owner.user);
            effects.persist_ownership(&state);
            info!(component = %owner.component, user = %owner.user, "device owner cleared");
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Clears the profile owner of `user`. Idempotent.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` when the caller is neither the owner's own uid
    /// nor elevated.
    pub fn clear_profile_owner(&self, caller: CallerContext, user: UserId) -> PolicyResult<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            let Some(owner) = state.ownership.profile_owner(user).cloned() else {
                return Ok(());
            };
            self.ensure_loaded(&mut state, user);
            if !caller.elevated {
                let owner_uid = state
                    .repo
                    .get(user)
                    .and_then(|s| s.admin(&owner.component))
                    .map(|a| a.identity.uid);
                if owner_uid != Some(caller.uid) {
                    return Err(PolicyError::permission_denied(
                        "clear_profile_owner",
                        "caller is not the profile owner",
                    ));
                }
            }
            state.ownership.clear_profile_owner(user);
            if let Some(admin) = state
                .repo
                .get_mut(user)
                .and_then(|snapshot| snapshot.admin_mut(&owner.component))
            {
                admin.record.profile_mut().reset_owner_exclusive();
            }
            self.recompute_affiliation(&mut state, &mut effects);
            effects.persist_user(&state, user);
            effects.persist_ownership(&state);
            info!(component = %owner.component, %user, "profile owner cleared");
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// The device owner, if designated.
    #[must_use]
    pub fn device_owner(&self) -> Option<(ComponentName, UserId)> {
        let state = self.state.lock();
        state
            .ownership
            .device_owner()
            .map(|entry| (entry.component.clone(), entry.user))
    }

    /// The profile owner of `user`, if designated.
    #[must_use]
    pub fn profile_owner(&self, user: UserId) -> Option<ComponentName> {
        let state = self.state.lock();
        state
            .ownership
            .profile_owner(user)
            .map(|entry| entry.component.clone())
    }

    /// Whether `component` is the device owner for `user`.
    #[must_use]
    pub fn is_device_owner(&self, component: &ComponentName, user: UserId) -> bool {
        self.state.lock().ownership.is_device_owner(component, user)
    }

    /// Whether `component` is the profile owner of `user`.
    #[must_use]
    pub fn is_profile_owner(&self, component: &ComponentName, user: UserId) -> bool {
        self.state.lock().ownership.is_profile_owner(component, user)
    }

    fn require_owner(&self, component: &ComponentName, user: UserId) -> PolicyResult<()> {
        if self.state.lock().ownership.is_owner(component, user) {
            Ok(())
        } else {
            Err(PolicyError::permission_denied(
                "owner_operation",
                format!("{component} holds no owner role for {user}"),
            ))
        }
    }

    fn require_device_owner(&self, component: &ComponentName, user: UserId) -> PolicyResult<()> {
        if self.state.lock().ownership.is_device_owner(component, user) {
            Ok(())
        } else {
            Err(PolicyError::permission_denied(
                "device_owner_operation",
                format!("{component} is not the device owner"),
            ))
        }
    }

    /// Owner-role check plus caller-uid verification against the owning
    /// admin's recorded uid.
    fn require_owner_caller(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
    ) -> PolicyResult<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        if !state.ownership.is_owner(component, user) {
            return Err(PolicyError::permission_denied(
                "owner_operation",
                format!("{component} holds no owner role for {user}"),
            ));
        }
        if caller.elevated {
            return Ok(());
        }
        let admin_uid = state
            .repo
            .get(user)
            .and_then(|snapshot| snapshot.admin(component))
            .map(|admin| admin.identity.uid);
        if admin_uid == Some(caller.uid) {
            Ok(())
        } else {
            Err(PolicyError::permission_denied(
                "owner_operation",
                "caller uid does not own the admin",
            ))
        }
    }

    // ------------------------------------------------------------------
    // Provisioning
    // ------------------------------------------------------------------

    /// Moves `user` to `requested` in the provisioning lifecycle.
    ///
    /// An elevated bootstrap caller may jump `Unmanaged → SetupFinalized`
    /// directly; everything else follows the transition table.
    ///
    /// # Errors
    ///
    /// `IllegalState` naming both states for a forbidden transition.
    pub fn set_user_provisioning_state(
        &self,
        caller: CallerContext,
        user: UserId,
        requested: ProvisioningState,
    ) -> PolicyResult<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let snapshot = state
                .repo
                .get_mut(user)
                .ok_or_else(|| PolicyError::not_found(format!("snapshot for {user}")))?;
            let current = snapshot.provisioning_state;
            if caller.elevated
                && current == ProvisioningState::Unmanaged
                && requested == ProvisioningState::SetupFinalized
            {
                provisioning::validate_forced_finalize(current)?;
            } else {
                provisioning::validate_transition(current, requested)?;
            }
            snapshot.provisioning_state = requested;
            debug!(%user, from = %current, to = %requested, "provisioning state changed");
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// The provisioning state of `user`.
    #[must_use]
    pub fn user_provisioning_state(&self, user: UserId) -> ProvisioningState {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .map(|s| s.provisioning_state)
            .unwrap_or_default()
    }

    /// Sets the runtime permission policy for `user` (owners only).
    pub fn set_permission_policy(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        policy: PermissionPolicy,
    ) -> PolicyResult<()> {
        self.require_owner_caller(caller, component, user)?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.permission_policy = policy;
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// The runtime permission policy for `user`.
    #[must_use]
    pub fn permission_policy(&self, user: UserId) -> PermissionPolicy {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .map(|s| s.permission_policy)
            .unwrap_or_default()
    }

    /// Stores the one-shot initialization payload for a newly created
    /// managed user (device owner only).
    pub fn set_new_user_initialization_payload(
        &self,
        component: &ComponentName,
        owner_user: UserId,
        target_user: UserId,
        payload: Vec<u8>,
    ) -> PolicyResult<()> {
        self.require_device_owner(component, owner_user)?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, target_user);
            if let Some(snapshot) = state.repo.get_mut(target_user) {
                snapshot.new_user_init_payload = Some(payload);
            }
            effects.persist_user(&state, target_user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Takes the one-shot initialization payload, consuming it.
    #[must_use]
    pub fn consume_new_user_initialization_payload(&self, user: UserId) -> Option<Vec<u8>> {
        let mut effects = Effects::default();
        let payload;
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            payload = state
                .repo
                .get_mut(user)
                .and_then(|snapshot| snapshot.new_user_init_payload.take());
            if payload.is_some() {
                effects.persist_user(&state, user);
            }
        }
        self.apply_effects(effects);
        payload
    }

    // ------------------------------------------------------------------
    // Delegation
    // ------------------------------------------------------------------

    /// Replaces a delegate's scope set (owners only).
    pub fn set_delegated_scopes(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        delegate_package: &str,
        scopes: &[DelegationScope],
    ) -> PolicyResult<()> {
        self.require_owner_caller(caller, component, user)?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let snapshot = state
                .repo
                .get_mut(user)
                .ok_or_else(|| PolicyError::not_found(format!("snapshot for {user}")))?;
            let result = delegation::set_delegated_scopes(
                self.directory.as_ref(),
                snapshot,
                user,
                delegate_package,
                scopes,
            )?;
            for (package, scopes) in result.notifications {
                effects.delegation_notices.push((user, package, scopes));
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// The scopes granted to `package` for `user`.
    #[must_use]
    pub fn delegated_scopes(&self, user: UserId, package: &str) -> Vec<DelegationScope> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .map(|snapshot| delegation::delegated_scopes(snapshot, package))
            .unwrap_or_default()
    }

    /// Whether the live caller may exercise `scope` for `user`.
    #[must_use]
    pub fn is_delegate(
        &self,
        caller_package: &str,
        caller_uid: u32,
        scope: DelegationScope,
        user: UserId,
    ) -> bool {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state.repo.get(user).is_some_and(|snapshot| {
            delegation::is_delegate(
                self.directory.as_ref(),
                snapshot,
                caller_package,
                caller_uid,
                scope,
                user,
            )
        })
    }

    /// Legacy exclusive certificate-installer setter.
    pub fn set_certificate_installer(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        package: Option<&str>,
    ) -> PolicyResult<()> {
        self.set_exclusive_delegate(caller, component, user, package, DelegationScope::CertInstall)
    }

    /// Legacy exclusive application-restrictions-manager setter.
    pub fn set_application_restrictions_manager(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        package: Option<&str>,
    ) -> PolicyResult<()> {
        self.set_exclusive_delegate(
            caller,
            component,
            user,
            package,
            DelegationScope::AppRestrictions,
        )
    }

    fn set_exclusive_delegate(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        package: Option<&str>,
        scope: DelegationScope,
    ) -> PolicyResult<()> {
        self.require_owner_caller(caller, component, user)?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let snapshot = state
                .repo
                .get_mut(user)
                .ok_or_else(|| PolicyError::not_found(format!("snapshot for {user}")))?;
            let result = delegation::set_exclusive_delegate(
                self.directory.as_ref(),
                snapshot,
                user,
                package,
                scope,
            )?;
            for (package, scopes) in result.notifications {
                effects.delegation_notices.push((user, package, scopes));
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Affiliation & audit logging
    // ------------------------------------------------------------------

    fn recompute_affiliation(&self, state: &mut EngineState, effects: &mut Effects) {
        self.ensure_all_users_loaded(state);
        let EngineState {
            repo,
            ownership,
            affiliation,
            ..
        } = state;
        let result = affiliation.recompute(
            repo,
            ownership,
            self.directory.as_ref(),
            self.config.primary_user,
        );
        for user in result.cleared_lock_task {
            effects.persist_user(state, user);
        }
    }

    /// Replaces the affiliation ids of `user` wholesale (owner admin of
    /// that user only).
    pub fn set_affiliation_ids(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        ids: Vec<String>,
    ) -> PolicyResult<()> {
        self.require_owner_caller(caller, component, user)?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.affiliation_ids = ids.into_iter().collect();
            }
            self.recompute_affiliation(&mut state, &mut effects);
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Whether `user` is affiliated with the device.
    #[must_use]
    pub fn is_affiliated_user(&self, user: UserId) -> bool {
        let mut state = self.state.lock();
        self.ensure_all_users_loaded(&mut state);
        let state = &*state;
        affiliation::is_affiliated(&state.repo, &state.ownership, self.config.primary_user, user)
    }

    /// Whether audit-log delivery is currently paused.
    #[must_use]
    pub fn audit_logging_paused(&self) -> bool {
        self.state.lock().affiliation.is_paused()
    }

    /// Enables or disables device-wide security logging (device owner).
    pub fn set_security_logging_enabled(
        &self,
        component: &ComponentName,
        user: UserId,
        enabled: bool,
    ) -> PolicyResult<()> {
        self.require_device_owner(component, user)?;
        self.state.lock().affiliation.security_logging_enabled = enabled;
        Ok(())
    }

    /// Enables or disables device-wide network logging (device owner).
    pub fn set_network_logging_enabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        enabled: bool,
    ) -> PolicyResult<()> {
        self.require_device_owner(component, user)?;
        self.mutate_admin_policy(caller, component, user, PolicyScope::Profile, |r| {
            r.network_logging_enabled = enabled;
        })
    }

    /// Feeds a security event into the buffer (subject to the gate).
    pub fn report_security_event(&self, event: SecurityEvent) {
        self.state.lock().affiliation.append_security_event(event);
    }

    /// Feeds a network event into the buffer (subject to the gate).
    pub fn report_network_event(&self, event: NetworkEvent) {
        let mut state = self.state.lock();
        let enabled = state
            .ownership
            .device_owner()
            .and_then(|owner| {
                state
                    .repo
                    .get(owner.user)
                    .and_then(|s| s.admin(&owner.component))
                    .map(|a| a.record.profile().network_logging_enabled)
            })
            .unwrap_or(false);
        state.affiliation.append_network_event(enabled, event);
    }

    /// Retrieves buffered security logs (device owner, all users
    /// affiliated).
    ///
    /// # Errors
    ///
    /// `PermissionDenied` unless the caller is the device owner and every
    /// user is affiliated.
    pub fn retrieve_security_logs(
        &self,
        component: &ComponentName,
        user: UserId,
    ) -> PolicyResult<Vec<SecurityEvent>> {
        self.require_device_owner(component, user)?;
        let mut effects = Effects::default();
        let events;
        {
            let mut state = self.state.lock();
            self.ensure_all_users_loaded(&mut state);
            if !affiliation::all_users_affiliated(
                &state.repo,
                &state.ownership,
                self.directory.as_ref(),
                self.config.primary_user,
            ) {
                return Err(PolicyError::permission_denied(
                    "retrieve_security_logs",
                    "not all users are affiliated",
                ));
            }
            events = state.affiliation.drain_security_logs();
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.last_security_log_retrieval_ms = now_ms();
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(events)
    }

    /// Retrieves buffered network logs (device owner, logging enabled,
    /// all users affiliated).
    ///
    /// # Errors
    ///
    /// `PermissionDenied` unless the caller is the device owner and every
    /// user is affiliated.
    pub fn retrieve_network_logs(
        &self,
        component: &ComponentName,
        user: UserId,
    ) -> PolicyResult<Vec<NetworkEvent>> {
        self.require_device_owner(component, user)?;
        let mut effects = Effects::default();
        let events;
        {
            let mut state = self.state.lock();
            self.ensure_all_users_loaded(&mut state);
            if !affiliation::all_users_affiliated(
                &state.repo,
                &state.ownership,
                self.directory.as_ref(),
                self.config.primary_user,
            ) {
                return Err(PolicyError::permission_denied(
                    "retrieve_network_logs",
                    "not all users are affiliated",
                ));
            }
            events = state.affiliation.drain_network_logs();
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.last_network_log_retrieval_ms = now_ms();
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Certificate bookkeeping
    // ------------------------------------------------------------------

    /// Records that `user` accepted a CA certificate alias. Returns
    /// `false` if it was already accepted.
    pub fn approve_ca_certificate(&self, user: UserId, alias: String) -> bool {
        let mut effects = Effects::default();
        let added;
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            added = state
                .repo
                .get_mut(user)
                .is_some_and(|snapshot| snapshot.accepted_ca_certs.insert(alias));
            if added {
                effects.persist_user(&state, user);
            }
        }
        self.apply_effects(effects);
        added
    }

    /// Whether `user` has accepted the CA certificate alias.
    #[must_use]
    pub fn is_ca_certificate_approved(&self, user: UserId, alias: &str) -> bool {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .is_some_and(|snapshot| snapshot.accepted_ca_certs.contains(alias))
    }

    /// Records a CA certificate alias installed by the owner (or one of
    /// its cert-install delegates) so settings can attribute it.
    pub fn record_owner_installed_ca_certificate(&self, user: UserId, alias: String) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.owner_installed_ca_certs.insert(alias);
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    /// CA certificate aliases installed by the owner for `user`.
    #[must_use]
    pub fn owner_installed_ca_certificates(&self, user: UserId) -> Vec<String> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state
            .repo
            .get(user)
            .map(|snapshot| snapshot.owner_installed_ca_certs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Records that initial setup completed for `user`.
    pub fn record_setup_complete(&self, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                if snapshot.setup_complete {
                    return;
                }
                snapshot.setup_complete = true;
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    /// Records a bug-report request time for `user`.
    pub fn record_bug_report_request(&self, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.last_bug_report_request_ms = now_ms();
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
    }

    // ------------------------------------------------------------------
    // Lock task & status bar
    // ------------------------------------------------------------------

    /// Replaces the lock-task allow-list for `user` (owners only).
    pub fn set_lock_task_packages(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        packages: Vec<String>,
    ) -> PolicyResult<()> {
        self.require_owner_caller(caller, component, user)?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.lock_task_packages = packages;
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Whether `package` may enter lock-task mode for `user`.
    #[must_use]
    pub fn is_lock_task_permitted(&self, user: UserId, package: &str) -> bool {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, user);
        state.repo.get(user).is_some_and(|snapshot| {
            snapshot.lock_task_packages.iter().any(|p| p == package)
        })
    }

    /// Sets the status-bar-disabled flag for `user` (owners only).
    pub fn set_status_bar_disabled(
        &self,
        caller: CallerContext,
        component: &ComponentName,
        user: UserId,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.require_owner_caller(caller, component, user)?;
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            if let Some(snapshot) = state.repo.get_mut(user) {
                snapshot.status_bar_disabled = disabled;
            }
            effects.persist_user(&state, user);
        }
        self.apply_effects(effects);
        Ok(())
    }

    // ------------------------------------------------------------------
    // User & package lifecycle
    // ------------------------------------------------------------------

    /// Reacts to a new user: loads (or creates) its snapshot and
    /// re-evaluates affiliation.
    pub fn handle_user_added(&self, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            self.recompute_affiliation(&mut state, &mut effects);
        }
        self.apply_effects(effects);
    }

    /// Reacts to a removed user: drops its snapshot and file, clears its
    /// profile owner, discards its buffered audit logs if it was
    /// unaffiliated, and re-evaluates affiliation.
    pub fn handle_user_removed(&self, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_all_users_loaded(&mut state);
            let was_affiliated = affiliation::is_affiliated(
                &state.repo,
                &state.ownership,
                self.config.primary_user,
                user,
            );
            if !was_affiliated {
                // Removal must not make the user's history retroactively
                // visible to the owner.
                state.affiliation.discard_user(user);
            }
            if state.ownership.clear_profile_owner(user).is_some() {
                effects.persist_ownership(&state);
            }
            if state
                .ownership
                .device_owner()
                .is_some_and(|owner| owner.user == user)
            {
                state.ownership.clear_device_owner();
                state.affiliation.security_logging_enabled = false;
                effects.persist_ownership(&state);
            }
            state.repo.remove(user);
            state.password_metrics.remove(&user);
            effects.delete_users.push(user);
            self.recompute_affiliation(&mut state, &mut effects);
            info!(%user, "user removed, policy snapshot deleted");
        }
        self.apply_effects(effects);
    }

    /// Reacts to a package being uninstalled for `user`: force-removes
    /// its admins and drops its delegations.
    pub fn handle_package_removed(&self, package: &str, user: UserId) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state, user);
            let components: Vec<ComponentName> = state
                .repo
                .get(user)
                .map(|snapshot| {
                    snapshot
                        .admins()
                        .iter()
                        .filter(|a| a.identity.component.package() == package)
                        .map(|a| a.identity.component.clone())
                        .collect()
                })
                .unwrap_or_default();
            for component in &components {
                self.tear_down_owner_roles(&mut state, &mut effects, component, user);
                if let Some(snapshot) = state.repo.get_mut(user) {
                    registry::forced_remove(snapshot, component);
                }
            }
            let mut changed = !components.is_empty();
            if let Some(snapshot) = state.repo.get_mut(user) {
                changed |= snapshot.delegations.remove(package).is_some();
            }
            if changed {
                effects.persist_user(&state, user);
            }
        }
        self.apply_effects(effects);
    }
}
