//! Cross-user affiliation and the audit-logging gate.
//!
//! A user is affiliated with the device iff it is the device owner's own
//! user, the configured primary user, or its declared affiliation-id set
//! intersects the device owner's user's set. Device-wide security/network
//! audit logging is only delivered while *every* user is affiliated:
//! otherwise it pauses (buffers retained), and the lock-task allow-lists
//! of unaffiliated users are cleared. Buffered events of an unaffiliated
//! user are discarded outright when that user is removed, so they can
//! never surface to the owner afterwards.

use std::collections::HashMap;

use aegis_core::identity::UserId;
use tracing::{debug, info};

use crate::ownership::OwnershipRecord;
use crate::platform::UserDirectory;
use crate::snapshot::SnapshotRepository;

/// One buffered security audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEvent {
    /// Event time, epoch ms.
    pub timestamp_ms: i64,
    /// The user the event originated from.
    pub user: UserId,
    /// Event tag.
    pub tag: String,
    /// Event payload.
    pub message: String,
}

/// One buffered network audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    /// Event time, epoch ms.
    pub timestamp_ms: i64,
    /// The user the connection originated from.
    pub user: UserId,
    /// The package that made the connection.
    pub package: String,
    /// The destination host.
    pub host: String,
}

/// What a recompute decided, for the engine to act on after the lock.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecomputeEffects {
    /// Logging moved from running to paused.
    pub logging_paused: bool,
    /// Logging moved from paused to running.
    pub logging_resumed: bool,
    /// Users whose lock-task allow-list was cleared (need persisting).
    pub cleared_lock_task: Vec<UserId>,
}

/// Tracks affiliation and owns the audit-log buffers.
#[derive(Debug, Default)]
pub struct AffiliationTracker {
    /// Device-wide security logging requested by the device owner.
    pub security_logging_enabled: bool,
    paused: bool,
    security_logs: HashMap<UserId, Vec<SecurityEvent>>,
    network_logs: HashMap<UserId, Vec<NetworkEvent>>,
}

/// Whether `user` is affiliated with the device.
///
/// The primary user is always affiliated. With no device owner there is no
/// authority to be unaffiliated from, so everything is trivially
/// affiliated (logging is gated on the owner's request anyway).
#[must_use]
pub fn is_affiliated(
    repo: &SnapshotRepository,
    ownership: &OwnershipRecord,
    primary: UserId,
    user: UserId,
) -> bool {
    if user == primary {
        return true;
    }
    let Some(owner) = ownership.device_owner() else {
        return true;
    };
    if user == owner.user {
        return true;
    }
    let owner_ids = repo.get(owner.user).map(|s| &s.affiliation_ids);
    let user_ids = repo.get(user).map(|s| &s.affiliation_ids);
    match (owner_ids, user_ids) {
        (Some(owner_ids), Some(user_ids)) => !owner_ids.is_disjoint(user_ids),
        _ => false,
    }
}

/// Whether every user on the device is affiliated.
#[must_use]
pub fn all_users_affiliated(
    repo: &SnapshotRepository,
    ownership: &OwnershipRecord,
    directory: &dyn UserDirectory,
    primary: UserId,
) -> bool {
    directory
        .users()
        .into_iter()
        .all(|user| is_affiliated(repo, ownership, primary, user))
}

impl AffiliationTracker {
    /// Creates a tracker with logging idle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether delivery is currently paused by an affiliation gap.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Re-derives the affiliation gate. Called whenever affiliation ids
    /// change, owners appear or disappear, or users come and go.
    pub fn recompute(
        &mut self,
        repo: &mut SnapshotRepository,
        ownership: &OwnershipRecord,
        directory: &dyn UserDirectory,
        primary: UserId,
    ) -> RecomputeEffects {
        let mut effects = RecomputeEffects::default();
        let all_affiliated = all_users_affiliated(repo, ownership, directory, primary);

        if all_affiliated {
            if self.paused {
                self.paused = false;
                effects.logging_resumed = true;
                info!("all users affiliated, audit logging resumed");
            }
            return effects;
        }

        if !self.paused {
            self.paused = true;
            effects.logging_paused = true;
            info!("unaffiliated user present, audit logging paused");
        }
        for user in directory.users() {
            if is_affiliated(repo, ownership, primary, user) {
                continue;
            }
            if let Some(snapshot) = repo.get_mut(user) {
                if !snapshot.lock_task_packages.is_empty() {
                    snapshot.lock_task_packages.clear();
                    effects.cleared_lock_task.push(user);
                    debug!(%user, "cleared lock-task allow-list of unaffiliated user");
                }
            }
        }
        effects
    }

    /// Buffers a security event if logging is enabled and not paused.
    pub fn append_security_event(&mut self, event: SecurityEvent) {
        if self.security_logging_enabled && !self.paused {
            self.security_logs.entry(event.user).or_default().push(event);
        }
    }

    /// Buffers a network event if logging is enabled and not paused.
    /// `enabled` is the device owner's network-logging toggle.
    pub fn append_network_event(&mut self, enabled: bool, event: NetworkEvent) {
        if enabled && !self.paused {
            self.network_logs.entry(event.user).or_default().push(event);
        }
    }

    /// Number of buffered security events (all users).
    #[must_use]
    pub fn buffered_security_events(&self) -> usize {
        self.security_logs.values().map(Vec::len).sum()
    }

    /// Drains every buffered security event, oldest first.
    pub fn drain_security_logs(&mut self) -> Vec<SecurityEvent> {
        let mut events: Vec<SecurityEvent> =
            self.security_logs.drain().flat_map(|(_, events)| events).collect();
        events.sort_by_key(|e| e.timestamp_ms);
        events
    }

    /// Drains every buffered network event, oldest first.
    pub fn drain_network_logs(&mut self) -> Vec<NetworkEvent> {
        let mut events: Vec<NetworkEvent> =
            self.network_logs.drain().flat_map(|(_, events)| events).collect();
        events.sort_by_key(|e| e.timestamp_ms);
        events
    }

    /// Discards everything buffered for a removed user.
    pub fn discard_user(&mut self, user: UserId) {
        let security = self.security_logs.remove(&user).map(|v| v.len()).unwrap_or(0);
        let network = self.network_logs.remove(&user).map(|v| v.len()).unwrap_or(0);
        if security + network > 0 {
            info!(%user, security, network, "discarded buffered audit logs of removed user");
        }
    }
}

#[cfg(test)]
mod tests {
    use aegis_core::identity::ComponentName;

    use super::*;
    use crate::platform::fakes::FakeDirectory;

    fn owner_on_system() -> OwnershipRecord {
        let mut ownership = OwnershipRecord::default();
        ownership.designate_device_owner(
            ComponentName::new("com.do", ".Admin").unwrap(),
            UserId::SYSTEM,
        );
        ownership
    }

    fn set_ids(repo: &mut SnapshotRepository, user: UserId, ids: &[&str]) {
        let (snapshot, _) = repo.get_or_load(user, || None);
        snapshot.affiliation_ids = ids.iter().map(|s| (*s).to_string()).collect();
    }

    #[test]
    fn system_user_is_always_affiliated() {
        let repo = SnapshotRepository::new();
        let ownership = owner_on_system();
        assert!(is_affiliated(&repo, &ownership, UserId::SYSTEM, UserId::SYSTEM));
    }

    #[test]
    fn intersecting_ids_affiliate() {
        let mut repo = SnapshotRepository::new();
        let ownership = owner_on_system();
        set_ids(&mut repo, UserId::SYSTEM, &["x"]);
        set_ids(&mut repo, UserId(10), &["y"]);
        assert!(!is_affiliated(&repo, &ownership, UserId::SYSTEM, UserId(10)));

        set_ids(&mut repo, UserId(10), &["x", "z"]);
        assert!(is_affiliated(&repo, &ownership, UserId::SYSTEM, UserId(10)));
    }

    #[test]
    fn pause_and_resume_keep_buffers() {
        let dir = FakeDirectory::new();
        dir.add_user(UserId(10));
        let mut repo = SnapshotRepository::new();
        let ownership = owner_on_system();
        set_ids(&mut repo, UserId::SYSTEM, &["x"]);
        repo.get_or_load(UserId(10), || None);

        let mut tracker = AffiliationTracker::new();
        tracker.security_logging_enabled = true;
        tracker.append_security_event(SecurityEvent {
            timestamp_ms: 1,
            user: UserId::SYSTEM,
            tag: "adb".to_string(),
            message: "shell connected".to_string(),
        });

        let effects = tracker.recompute(&mut repo, &ownership, &dir, UserId::SYSTEM);
        assert!(effects.logging_paused);
        assert_eq!(tracker.buffered_security_events(), 1);

        // Paused: nothing new is accepted.
        tracker.append_security_event(SecurityEvent {
            timestamp_ms: 2,
            user: UserId::SYSTEM,
            tag: "adb".to_string(),
            message: "dropped".to_string(),
        });
        assert_eq!(tracker.buffered_security_events(), 1);

        set_ids(&mut repo, UserId(10), &["x"]);
        let effects = tracker.recompute(&mut repo, &ownership, &dir, UserId::SYSTEM);
        assert!(effects.logging_resumed);
        assert_eq!(tracker.buffered_security_events(), 1);
    }

    #[test]
    fn unaffiliated_user_loses_lock_task_list() {
        let dir = FakeDirectory::new();
        dir.add_user(UserId(10));
        let mut repo = SnapshotRepository::new();
        let ownership = owner_on_system();
        set_ids(&mut repo, UserId::SYSTEM, &["x"]);
        {
            let (snapshot, _) = repo.get_or_load(UserId(10), || None);
            snapshot.lock_task_packages = vec!["com.kiosk".to_string()];
        }

        let mut tracker = AffiliationTracker::new();
        let effects = tracker.recompute(&mut repo, &ownership, &dir, UserId::SYSTEM);
        assert_eq!(effects.cleared_lock_task, vec![UserId(10)]);
        assert!(repo.get(UserId(10)).unwrap().lock_task_packages.is_empty());
    }

    #[test]
    fn removed_user_buffers_are_discarded() {
        let mut tracker = AffiliationTracker::new();
        tracker.security_logging_enabled = true;
        for user in [UserId::SYSTEM, UserId(10)] {
            tracker.append_security_event(SecurityEvent {
                timestamp_ms: 1,
                user,
                tag: "t".to_string(),
                message: "m".to_string(),
            });
        }
        tracker.discard_user(UserId(10));
        let drained = tracker.drain_security_logs();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].user, UserId::SYSTEM);
    }
}
