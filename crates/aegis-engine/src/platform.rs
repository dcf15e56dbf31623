//! The platform boundary: traits the engine consumes, never implements.
//!
//! The engine decides *what* the effective policy is; everything that
//! touches the OS goes through these traits. [`UserDirectory`] answers
//! user/package questions, [`EnforcementSink`] accepts merged policy values
//! fire-and-forget, and [`LifecycleNotifier`] delivers named lifecycle
//! events to admin components, optionally reporting completion through a
//! [`CompletionHandle`].
//!
//! In-memory fakes for all three live in [`fakes`]; they are ordinary
//! types (not `cfg(test)`) so integration tests and embedders' test suites
//! can use them.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use aegis_core::delegation::DelegationScope;
use aegis_core::identity::{ComponentName, UserId};

/// One user/profile row as the directory reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileInfo {
    /// The profile's own user id.
    pub user: UserId,
    /// The parent user, if this is a profile of another user.
    pub parent: Option<UserId>,
    /// Whether this is a managed (work) profile.
    pub managed: bool,
    /// Whether the profile unlocks with its own credential instead of the
    /// parent's.
    pub separate_challenge: bool,
}

/// What the directory knows about a candidate admin component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminDescriptor {
    /// The uid the owning package runs as for the queried user.
    pub uid: u32,
    /// Whether the package is installed on internal (non-removable)
    /// storage.
    pub internal_storage: bool,
    /// Whether the package is an instant/ephemeral app.
    pub instant_app: bool,
    /// Whether the package is in the disabled-until-used state.
    pub enabled_until_used: bool,
}

/// Resolves users, profiles, packages, and components.
pub trait UserDirectory: Send + Sync {
    /// Whether `user` exists.
    fn user_exists(&self, user: UserId) -> bool;

    /// Whether `user` is in a running state.
    fn is_user_running(&self, user: UserId) -> bool;

    /// All users on the device (profiles included).
    fn users(&self) -> Vec<UserId>;

    /// The profile group of `user`: the user itself plus its profiles.
    fn profiles_of(&self, user: UserId) -> Vec<ProfileInfo>;

    /// The user a calling uid belongs to.
    fn user_of_uid(&self, uid: u32) -> UserId;

    /// Resolves `component` to an admin descriptor for `user`, or `None`
    /// if it does not resolve to a valid admin.
    fn resolve_admin_descriptor(
        &self,
        component: &ComponentName,
        user: UserId,
    ) -> Option<AdminDescriptor>;

    /// The installed uid of `package` for `user`, if installed.
    fn package_uid(&self, package: &str, user: UserId) -> Option<u32>;

    /// Whether `package` is installed for `user`.
    fn is_package_installed(&self, package: &str, user: UserId) -> bool {
        self.package_uid(package, user).is_some()
    }

    /// Number of accounts incompatible with device management.
    fn incompatible_account_count(&self) -> usize;

    /// Whether initial device setup has completed for `user`.
    fn is_setup_complete(&self, user: UserId) -> bool;
}

/// Accepts merged policy values and performs OS-level effects. All calls
/// are fire-and-forget; the engine does not await success.
pub trait EnforcementSink: Send + Sync {
    /// Pushes the aggregated maximum screen-lock timeout.
    fn apply_screen_lock_timeout(&self, user: UserId, timeout_ms: i64);

    /// Pushes the aggregated camera-disabled state.
    fn apply_camera_disabled(&self, user: UserId, disabled: bool);

    /// Re-enables a package that was disabled-until-used.
    fn enable_package(&self, package: &str, user: UserId);

    /// Informs a delegate package of its current scope set.
    fn notify_delegation_changed(&self, user: UserId, package: &str, scopes: &[DelegationScope]);

    /// Requests a wipe on behalf of the named admin.
    fn request_wipe(&self, user: UserId, admin: &ComponentName);
}

/// Named lifecycle events delivered to admin components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminLifecycleEvent {
    /// The admin was activated.
    Enabled,
    /// The admin is being deactivated and should clean up.
    Disabled,
    /// The user's credential changed.
    PasswordChanged,
    /// The user's credential is about to expire.
    PasswordExpiring,
    /// A credential attempt failed.
    PasswordFailed,
    /// A credential attempt succeeded after failures.
    PasswordSucceeded,
    /// A lock-task session is starting.
    LockTaskEntering,
    /// A lock-task session ended.
    LockTaskExiting,
    /// Buffered network logs are ready for retrieval.
    NetworkLogsAvailable,
    /// Buffered security logs are ready for retrieval.
    SecurityLogsAvailable,
}

/// Completion signal for a lifecycle notification.
///
/// The notifier (or the notified admin, through it) calls
/// [`CompletionHandle::complete`]; the engine waits with a bound via
/// [`CompletionHandle::wait_timeout`].
#[derive(Debug, Clone, Default)]
pub struct CompletionHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CompletionHandle {
    /// Creates an uncompleted handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the notification acknowledged.
    pub fn complete(&self) {
        let (flag, cvar) = &*self.inner;
        let mut done = flag.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *done = true;
        cvar.notify_all();
    }

    /// Returns `true` if already acknowledged.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Waits up to `timeout` for acknowledgment; `true` if acknowledged.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut done = flag.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while !*done {
            let (guard, result) = cvar
                .wait_timeout(done, timeout)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            done = guard;
            if result.timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Delivers lifecycle events to admin components.
pub trait LifecycleNotifier: Send + Sync {
    /// Delivers `event` to `component` on `user`. When `completion` is
    /// provided the notifier must call [`CompletionHandle::complete`] once
    /// the admin has acknowledged (or delivery definitively failed).
    fn notify(
        &self,
        component: &ComponentName,
        user: UserId,
        event: AdminLifecycleEvent,
        completion: Option<CompletionHandle>,
    );
}

/// In-memory fakes for the platform traits.
pub mod fakes {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{
        AdminDescriptor, AdminLifecycleEvent, CompletionHandle, ComponentName, DelegationScope,
        EnforcementSink, LifecycleNotifier, ProfileInfo, UserDirectory, UserId,
    };

    /// A scripted user/package directory.
    #[derive(Debug, Default)]
    pub struct FakeDirectory {
        inner: Mutex<DirectoryState>,
    }

    #[derive(Debug, Default)]
    struct DirectoryState {
        profiles: Vec<ProfileInfo>,
        running: HashMap<UserId, bool>,
        packages: HashMap<(String, UserId), u32>,
        descriptors: HashMap<(ComponentName, UserId), AdminDescriptor>,
        setup_complete: HashMap<UserId, bool>,
        incompatible_accounts: usize,
    }

    impl FakeDirectory {
        /// Creates a directory with a single running system user.
        #[must_use]
        pub fn new() -> Self {
            let fake = Self::default();
            fake.add_user(UserId::SYSTEM);
            fake
        }

        /// Adds a running top-level user.
        pub fn add_user(&self, user: UserId) {
            let mut state = self.inner.lock().unwrap();
            state.profiles.push(ProfileInfo {
                user,
                parent: None,
                managed: false,
                separate_challenge: false,
            });
            state.running.insert(user, true);
        }

        /// Adds a running managed profile of `parent`.
        pub fn add_managed_profile(&self, user: UserId, parent: UserId, separate_challenge: bool) {
            let mut state = self.inner.lock().unwrap();
            state.profiles.push(ProfileInfo {
                user,
                parent: Some(parent),
                managed: true,
                separate_challenge,
            });
            state.running.insert(user, true);
        }

        /// Removes a user or profile.
        pub fn remove_user(&self, user: UserId) {
            let mut state = self.inner.lock().unwrap();
            state.profiles.retain(|p| p.user != user);
            state.running.remove(&user);
        }

        /// Marks `user` stopped.
        pub fn set_running(&self, user: UserId, running: bool) {
            self.inner.lock().unwrap().running.insert(user, running);
        }

        /// Installs `package` for `user` at `uid`.
        pub fn install_package(&self, package: &str, user: UserId, uid: u32) {
            self.inner
                .lock()
                .unwrap()
                .packages
                .insert((package.to_string(), user), uid);
        }

        /// Registers an admin descriptor for `component` on `user` and
        /// installs its package.
        pub fn register_admin(&self, component: &ComponentName, user: UserId, uid: u32) {
            self.install_package(component.package(), user, uid);
            self.inner.lock().unwrap().descriptors.insert(
                (component.clone(), user),
                AdminDescriptor {
                    uid,
                    internal_storage: true,
                    instant_app: false,
                    enabled_until_used: false,
                },
            );
        }

        /// Registers a descriptor verbatim.
        pub fn register_descriptor(
            &self,
            component: &ComponentName,
            user: UserId,
            descriptor: AdminDescriptor,
        ) {
            self.install_package(component.package(), user, descriptor.uid);
            self.inner
                .lock()
                .unwrap()
                .descriptors
                .insert((component.clone(), user), descriptor);
        }

        /// Sets the setup-complete flag for `user`.
        pub fn set_setup_complete(&self, user: UserId, complete: bool) {
            self.inner
                .lock()
                .unwrap()
                .setup_complete
                .insert(user, complete);
        }

        /// Sets the incompatible-account count.
        pub fn set_incompatible_accounts(&self, count: usize) {
            self.inner.lock().unwrap().incompatible_accounts = count;
        }
    }

    impl UserDirectory for FakeDirectory {
        fn user_exists(&self, user: UserId) -> bool {
            self.inner
                .lock()
                .unwrap()
                .profiles
                .iter()
                .any(|p| p.user == user)
        }

        fn is_user_running(&self, user: UserId) -> bool {
            self.inner
                .lock()
                .unwrap()
                .running
                .get(&user)
                .copied()
                .unwrap_or(false)
        }

        fn users(&self) -> Vec<UserId> {
            self.inner
                .lock()
                .unwrap()
                .profiles
                .iter()
                .map(|p| p.user)
                .collect()
        }

        fn profiles_of(&self, user: UserId) -> Vec<ProfileInfo> {
            let state = self.inner.lock().unwrap();
            state
                .profiles
                .iter()
                .filter(|p| p.user == user || p.parent == Some(user))
                .copied()
                .collect()
        }

        fn user_of_uid(&self, uid: u32) -> UserId {
            UserId(i32::try_from(uid / 100_000).unwrap_or(0))
        }

        fn resolve_admin_descriptor(
            &self,
            component: &ComponentName,
            user: UserId,
        ) -> Option<AdminDescriptor> {
            self.inner
                .lock()
                .unwrap()
                .descriptors
                .get(&(component.clone(), user))
                .copied()
        }

        fn package_uid(&self, package: &str, user: UserId) -> Option<u32> {
            self.inner
                .lock()
                .unwrap()
                .packages
                .get(&(package.to_string(), user))
                .copied()
        }

        fn incompatible_account_count(&self) -> usize {
            self.inner.lock().unwrap().incompatible_accounts
        }

        fn is_setup_complete(&self, user: UserId) -> bool {
            self.inner
                .lock()
                .unwrap()
                .setup_complete
                .get(&user)
                .copied()
                .unwrap_or(false)
        }
    }

    /// Records every enforcement call.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        /// Chronological record of calls.
        pub calls: Mutex<Vec<SinkCall>>,
    }

    /// One recorded enforcement call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SinkCall {
        /// `apply_screen_lock_timeout`
        ScreenLockTimeout(UserId, i64),
        /// `apply_camera_disabled`
        CameraDisabled(UserId, bool),
        /// `enable_package`
        EnablePackage(String, UserId),
        /// `notify_delegation_changed`
        DelegationChanged(UserId, String, Vec<DelegationScope>),
        /// `request_wipe`
        RequestWipe(UserId, ComponentName),
    }

    impl RecordingSink {
        /// Creates an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of recorded calls.
        #[must_use]
        pub fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl EnforcementSink for RecordingSink {
        fn apply_screen_lock_timeout(&self, user: UserId, timeout_ms: i64) {
            self.calls
                .lock()
                .unwrap()
                .push(SinkCall::ScreenLockTimeout(user, timeout_ms));
        }

        fn apply_camera_disabled(&self, user: UserId, disabled: bool) {
            self.calls
                .lock()
                .unwrap()
                .push(SinkCall::CameraDisabled(user, disabled));
        }

        fn enable_package(&self, package: &str, user: UserId) {
            self.calls
                .lock()
                .unwrap()
                .push(SinkCall::EnablePackage(package.to_string(), user));
        }

        fn notify_delegation_changed(
            &self,
            user: UserId,
            package: &str,
            scopes: &[DelegationScope],
        ) {
            self.calls.lock().unwrap().push(SinkCall::DelegationChanged(
                user,
                package.to_string(),
                scopes.to_vec(),
            ));
        }

        fn request_wipe(&self, user: UserId, admin: &ComponentName) {
            self.calls
                .lock()
                .unwrap()
                .push(SinkCall::RequestWipe(user, admin.clone()));
        }
    }

    /// Records lifecycle notifications; completes handles immediately
    /// unless told to hold them.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        /// Recorded (component, user, event) triples.
        pub events: Mutex<Vec<(ComponentName, UserId, AdminLifecycleEvent)>>,
        /// When `true`, completion handles are stored instead of completed.
        pub hold_completions: Mutex<bool>,
        /// Handles held back while `hold_completions` is set.
        pub held: Mutex<Vec<CompletionHandle>>,
    }

    impl RecordingNotifier {
        /// Creates a notifier that acknowledges immediately.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Switches to holding completions for manual release.
        pub fn set_hold_completions(&self, hold: bool) {
            *self.hold_completions.lock().unwrap() = hold;
        }

        /// Completes all held handles.
        pub fn release_held(&self) {
            for handle in self.held.lock().unwrap().drain(..) {
                handle.complete();
            }
        }

        /// Snapshot of recorded events.
        #[must_use]
        pub fn events(&self) -> Vec<(ComponentName, UserId, AdminLifecycleEvent)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl LifecycleNotifier for RecordingNotifier {
        fn notify(
            &self,
            component: &ComponentName,
            user: UserId,
            event: AdminLifecycleEvent,
            completion: Option<CompletionHandle>,
        ) {
            self.events
                .lock()
                .unwrap()
                .push((component.clone(), user, event));
            if let Some(handle) = completion {
                if *self.hold_completions.lock().unwrap() {
                    self.held.lock().unwrap().push(handle);
                } else {
                    handle.complete();
                }
            }
        }
    }
}
