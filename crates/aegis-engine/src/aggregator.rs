//! Effective-policy reads: eligible-set resolution plus the strictest-wins
//! reduction from `aegis_core::aggregate`.
//!
//! Every getter resolves the set of admin records eligible to vote for the
//! queried `(user, parent_requested)` context and reduces fresh; nothing
//! here caches. Eligibility:
//!
//! 1. `parent_requested`: only the user's admins' parent-facing records.
//! 2. The user unlocks with its own separate challenge: only the user's
//!    own admins.
//! 3. Otherwise: the user's own admins, plus for each managed profile of
//!    the user: the profile admins' parent records unconditionally, and
//!    their profile records only when the profile shares the user's
//!    credential.

use aegis_core::aggregate::{self, Eligible};
use aegis_core::identity::{ComponentName, UserId};
use aegis_core::password::PasswordRequirements;
use aegis_core::policy::keyguard;
use aegis_core::policy::PolicyRecord;

use crate::config::EngineConfig;
use crate::platform::UserDirectory;
use crate::snapshot::SnapshotRepository;

/// Borrowing view over the engine state that answers effective-policy
/// queries. Constructed under the policy lock with all relevant snapshots
/// already resident.
pub struct PolicyAggregator<'a> {
    repo: &'a SnapshotRepository,
    directory: &'a dyn UserDirectory,
    config: &'a EngineConfig,
}

impl<'a> PolicyAggregator<'a> {
    /// Creates an aggregator view.
    #[must_use]
    pub fn new(
        repo: &'a SnapshotRepository,
        directory: &'a dyn UserDirectory,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            repo,
            directory,
            config,
        }
    }

    fn has_separate_challenge(&self, user: UserId) -> bool {
        self.directory
            .profiles_of(user)
            .iter()
            .find(|p| p.user == user)
            .is_some_and(|p| p.parent.is_some() && p.separate_challenge)
    }

    /// Resolves the eligible admin set for a `(user, parent_requested)`
    /// query.
    #[must_use]
    pub fn eligible(&self, user: UserId, parent_requested: bool) -> Vec<Eligible<'a>> {
        let mut out = Vec::new();
        let Some(snapshot) = self.repo.get(user) else {
            return out;
        };

        if parent_requested {
            for admin in snapshot.admins() {
                if let Some(parent) = admin.record.parent() {
                    out.push((&admin.identity, parent));
                }
            }
            return out;
        }

        if self.has_separate_challenge(user) {
            for admin in snapshot.admins() {
                out.push((&admin.identity, admin.record.profile()));
            }
            return out;
        }

        for profile in self.directory.profiles_of(user) {
            if profile.user == user {
                for admin in snapshot.admins() {
                    out.push((&admin.identity, admin.record.profile()));
                }
            } else if profile.managed {
                let Some(profile_snapshot) = self.repo.get(profile.user) else {
                    continue;
                };
                for admin in profile_snapshot.admins() {
                    if let Some(parent) = admin.record.parent() {
                        out.push((&admin.identity, parent));
                    }
                    if !profile.separate_challenge {
                        out.push((&admin.identity, admin.record.profile()));
                    }
                }
            }
        }
        out
    }

    /// The declared record of one specific admin for the queried scope,
    /// for `who != null` reads.
    #[must_use]
    pub fn declared(
        &self,
        who: &ComponentName,
        user: UserId,
        parent_requested: bool,
    ) -> Option<&'a PolicyRecord> {
        let admin = self.repo.get(user)?.admin(who)?;
        if parent_requested {
            admin.record.parent()
        } else {
            Some(admin.record.profile())
        }
    }

    /// Aggregated password requirements.
    #[must_use]
    pub fn password_requirements(
        &self,
        user: UserId,
        parent_requested: bool,
    ) -> PasswordRequirements {
        aggregate::password_requirements(&self.eligible(user, parent_requested))
    }

    /// Aggregated password history length.
    #[must_use]
    pub fn password_history_length(&self, user: UserId, parent_requested: bool) -> u32 {
        aggregate::max_u32(self.eligible(user, parent_requested), |r| {
            r.password_history_length
        })
    }

    /// Earliest declared password expiration deadline; `0` when no admin
    /// sets one.
    #[must_use]
    pub fn password_expiration(&self, user: UserId, parent_requested: bool) -> i64 {
        aggregate::min_nonzero_i64(self.eligible(user, parent_requested), |r| {
            r.password_expiration_deadline_ms
        })
    }

    /// Aggregated maximum time to lock; `0` when no admin constrains it.
    #[must_use]
    pub fn max_time_to_lock(&self, user: UserId, parent_requested: bool) -> i64 {
        aggregate::min_nonzero_i64(self.eligible(user, parent_requested), |r| {
            r.max_time_to_lock_ms
        })
    }

    /// Aggregated failed-attempt limit before wipe; `0` when no admin
    /// participates.
    #[must_use]
    pub fn max_failed_passwords_for_wipe(&self, user: UserId, parent_requested: bool) -> u32 {
        aggregate::min_nonzero_u32(self.eligible(user, parent_requested), |r| {
            r.max_failed_passwords_for_wipe
        })
    }

    /// Aggregated strong-auth timeout, clamped into the configured
    /// platform interval.
    #[must_use]
    pub fn strong_auth_timeout(&self, user: UserId, parent_requested: bool) -> i64 {
        let aggregated = aggregate::min_nonzero_i64(self.eligible(user, parent_requested), |r| {
            r.strong_auth_timeout_ms
        });
        self.config.clamp_strong_auth_timeout(aggregated)
    }

    /// Aggregated disabled keyguard features.
    ///
    /// A managed profile's own admins contribute only the
    /// parent-affecting subset unless the query is scoped to the profile
    /// itself (which rules 1 and 2 of eligibility are; the masking below
    /// only applies to the union of rule 3).
    #[must_use]
    pub fn keyguard_disabled_features(&self, user: UserId, parent_requested: bool) -> u32 {
        let Some(snapshot) = self.repo.get(user) else {
            return 0;
        };

        if parent_requested {
            let mut bits = 0;
            for admin in snapshot.admins() {
                if let Some(parent) = admin.record.parent() {
                    bits |= parent.disabled_keyguard_features;
                }
            }
            return bits;
        }

        if self.has_separate_challenge(user) {
            return snapshot
                .admins()
                .iter()
                .fold(0, |bits, a| bits | a.record.profile().disabled_keyguard_features);
        }

        let mut bits = 0;
        for profile in self.directory.profiles_of(user) {
            if profile.user == user {
                for admin in snapshot.admins() {
                    bits |= admin.record.profile().disabled_keyguard_features;
                }
            } else if profile.managed {
                let Some(profile_snapshot) = self.repo.get(profile.user) else {
                    continue;
                };
                for admin in profile_snapshot.admins() {
                    if let Some(parent) = admin.record.parent() {
                        bits |= parent.disabled_keyguard_features;
                    }
                    bits |= admin.record.profile().disabled_keyguard_features
                        & keyguard::PROFILE_AFFECTS_PARENT_MASK;
                }
            }
        }
        bits
    }

    /// Aggregated camera-disabled flag for `user`.
    #[must_use]
    pub fn camera_disabled(&self, user: UserId) -> bool {
        aggregate::any_true(self.eligible(user, false), |r| r.camera_disabled)
    }

    /// Aggregated screen-capture-disabled flag for `user`.
    #[must_use]
    pub fn screen_capture_disabled(&self, user: UserId) -> bool {
        aggregate::any_true(self.eligible(user, false), |r| r.screen_capture_disabled)
    }

    /// Auto-time requirement across every resident user.
    #[must_use]
    pub fn auto_time_required(&self) -> bool {
        self.repo.resident_users().into_iter().any(|user| {
            self.repo
                .get(user)
                .is_some_and(|s| s.admins().iter().any(|a| a.record.profile().auto_time_required))
        })
    }

    /// The admin whose wipe threshold binds for `user`: lowest configured
    /// limit, ties preferring the primary user's admin, then insertion
    /// order.
    #[must_use]
    pub fn strictest_wipe_admin(
        &self,
        user: UserId,
        parent_requested: bool,
    ) -> Option<(ComponentName, UserId, u32)> {
        let eligible = self.eligible(user, parent_requested);
        aggregate::strictest_wipe_admin(&eligible, self.config.primary_user).map(
            |(identity, record)| {
                (
                    identity.component.clone(),
                    identity.user,
                    record.max_failed_passwords_for_wipe,
                )
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use aegis_core::admin::{Admin, PolicyScope};
    use aegis_core::identity::AdminIdentity;
    use aegis_core::password::PasswordQuality;

    use super::*;
    use crate::platform::fakes::FakeDirectory;

    fn add_admin(
        repo: &mut SnapshotRepository,
        package: &str,
        user: UserId,
        configure: impl FnOnce(&mut Admin),
    ) {
        let (snapshot, _) = repo.get_or_load(user, || None);
        let mut admin = Admin::new(AdminIdentity::new(
            ComponentName::new(package, ".Admin").unwrap(),
            user,
            10_001,
        ));
        configure(&mut admin);
        snapshot.push_admin(admin);
    }

    fn fixture() -> (FakeDirectory, SnapshotRepository, EngineConfig) {
        (
            FakeDirectory::new(),
            SnapshotRepository::new(),
            EngineConfig::default(),
        )
    }

    #[test]
    fn separate_challenge_profile_is_isolated() {
        let (dir, mut repo, config) = fixture();
        dir.add_managed_profile(UserId(10), UserId::SYSTEM, true);

        add_admin(&mut repo, "com.profile", UserId(10), |a| {
            a.record.profile_mut().max_time_to_lock_ms = 30_000;
        });
        repo.get_or_load(UserId::SYSTEM, || None);

        let aggregator = PolicyAggregator::new(&repo, &dir, &config);
        // The profile's own aggregation sees its admin.
        assert_eq!(aggregator.max_time_to_lock(UserId(10), false), 30_000);
        // The parent user is unaffected by the separate-challenge
        // profile's own record.
        assert_eq!(aggregator.max_time_to_lock(UserId::SYSTEM, false), 0);
    }

    #[test]
    fn shared_challenge_profile_contributes_to_parent() {
        let (dir, mut repo, config) = fixture();
        dir.add_managed_profile(UserId(10), UserId::SYSTEM, false);

        add_admin(&mut repo, "com.profile", UserId(10), |a| {
            a.record.profile_mut().min_password_length = 12;
        });
        repo.get_or_load(UserId::SYSTEM, || None);

        let aggregator = PolicyAggregator::new(&repo, &dir, &config);
        assert_eq!(
            aggregator.password_requirements(UserId::SYSTEM, false).min_length,
            12
        );
    }

    #[test]
    fn parent_records_count_even_with_separate_challenge() {
        let (dir, mut repo, config) = fixture();
        dir.add_managed_profile(UserId(10), UserId::SYSTEM, true);

        add_admin(&mut repo, "com.profile", UserId(10), |a| {
            a.record.profile_mut().min_password_length = 12;
            a.record.policy_mut(PolicyScope::Parent).min_password_length = 8;
        });
        repo.get_or_load(UserId::SYSTEM, || None);

        let aggregator = PolicyAggregator::new(&repo, &dir, &config);
        // Only the parent-facing record reaches the parent user.
        assert_eq!(
            aggregator.password_requirements(UserId::SYSTEM, false).min_length,
            8
        );
        // parent_requested on the profile reads the same record.
        assert_eq!(
            aggregator.password_requirements(UserId(10), true).min_length,
            8
        );
    }

    #[test]
    fn two_admins_complex_aggregation() {
        let (dir, mut repo, config) = fixture();
        add_admin(&mut repo, "com.a", UserId::SYSTEM, |a| {
            a.record.profile_mut().min_password_length = 6;
        });
        add_admin(&mut repo, "com.b", UserId::SYSTEM, |a| {
            let record = a.record.profile_mut();
            record.min_password_length = 10;
            record.password_quality = PasswordQuality::Complex;
            record.min_password_uppercase = 2;
        });

        let aggregator = PolicyAggregator::new(&repo, &dir, &config);
        let req = aggregator.password_requirements(UserId::SYSTEM, false);
        assert_eq!(req.min_length, 10);
        assert_eq!(req.quality, PasswordQuality::Complex);
        assert_eq!(req.min_uppercase, 2);
    }

    #[test]
    fn keyguard_profile_contribution_is_masked_for_parent() {
        let (dir, mut repo, config) = fixture();
        dir.add_managed_profile(UserId(10), UserId::SYSTEM, false);

        add_admin(&mut repo, "com.profile", UserId(10), |a| {
            a.record.profile_mut().disabled_keyguard_features =
                keyguard::DISABLE_SECURE_CAMERA | keyguard::DISABLE_FINGERPRINT;
        });
        repo.get_or_load(UserId::SYSTEM, || None);

        let aggregator = PolicyAggregator::new(&repo, &dir, &config);
        // Scoped to the profile: full bitmask.
        assert_eq!(
            aggregator.keyguard_disabled_features(UserId(10), false),
            keyguard::DISABLE_SECURE_CAMERA | keyguard::DISABLE_FINGERPRINT
        );
        // For the parent: only the parent-affecting subset.
        assert_eq!(
            aggregator.keyguard_disabled_features(UserId::SYSTEM, false),
            keyguard::DISABLE_FINGERPRINT
        );
    }

    #[test]
    fn strong_auth_timeout_is_clamped() {
        let (dir, mut repo, config) = fixture();
        add_admin(&mut repo, "com.a", UserId::SYSTEM, |a| {
            a.record.profile_mut().strong_auth_timeout_ms = 1;
        });
        let aggregator = PolicyAggregator::new(&repo, &dir, &config);
        assert_eq!(
            aggregator.strong_auth_timeout(UserId::SYSTEM, false),
            config.strong_auth_timeout_min_ms
        );

        // No participant: the default maximum.
        let mut empty_repo = SnapshotRepository::new();
        empty_repo.get_or_load(UserId::SYSTEM, || None);
        let aggregator = PolicyAggregator::new(&empty_repo, &dir, &config);
        assert_eq!(
            aggregator.strong_auth_timeout(UserId::SYSTEM, false),
            config.strong_auth_timeout_max_ms
        );
    }

    #[test]
    fn declared_reads_one_admin_only() {
        let (dir, mut repo, config) = fixture();
        add_admin(&mut repo, "com.a", UserId::SYSTEM, |a| {
            a.record.profile_mut().min_password_length = 6;
        });
        add_admin(&mut repo, "com.b", UserId::SYSTEM, |a| {
            a.record.profile_mut().min_password_length = 10;
        });

        let aggregator = PolicyAggregator::new(&repo, &dir, &config);
        let component = ComponentName::new("com.a", ".Admin").unwrap();
        assert_eq!(
            aggregator
                .declared(&component, UserId::SYSTEM, false)
                .unwrap()
                .min_password_length,
            6
        );
        assert!(aggregator.declared(&component, UserId::SYSTEM, true).is_none());
    }
}
