//! Effective-policy aggregation scenarios through the full engine.

mod common;

use aegis_core::identity::UserId;
use aegis_core::password::{PasswordMetrics, PasswordQuality};
use common::Harness;

#[test]
fn two_admins_strictest_wins() {
    let h = Harness::new();
    let (a, caller_a) = h.activate_admin("com.mdm.a", UserId::SYSTEM, 10_001);
    let (b, caller_b) = h.activate_admin("com.mdm.b", UserId::SYSTEM, 10_002);

    h.engine
        .set_min_password_length(caller_a, &a, UserId::SYSTEM, false, 6)
        .unwrap();
    h.engine
        .set_min_password_length(caller_b, &b, UserId::SYSTEM, false, 10)
        .unwrap();
    h.engine
        .set_password_quality(caller_b, &b, UserId::SYSTEM, false, PasswordQuality::Complex)
        .unwrap();
    h.engine
        .set_min_password_uppercase(caller_b, &b, UserId::SYSTEM, false, 2)
        .unwrap();

    let req = h.engine.effective_password_requirements(UserId::SYSTEM, false);
    assert_eq!(req.min_length, 10);
    assert_eq!(req.quality, PasswordQuality::Complex);
    assert_eq!(req.min_uppercase, 2);
}

#[test]
fn quality_gated_fields_need_complex() {
    let h = Harness::new();
    let (a, caller) = h.activate_admin("com.mdm.a", UserId::SYSTEM, 10_001);

    // Uppercase minimum declared at Numeric quality: not counted.
    h.engine
        .set_password_quality(caller, &a, UserId::SYSTEM, false, PasswordQuality::Numeric)
        .unwrap();
    h.engine
        .set_min_password_uppercase(caller, &a, UserId::SYSTEM, false, 4)
        .unwrap();
    let req = h.engine.effective_password_requirements(UserId::SYSTEM, false);
    assert_eq!(req.min_uppercase, 0);

    h.engine
        .set_password_quality(caller, &a, UserId::SYSTEM, false, PasswordQuality::Complex)
        .unwrap();
    let req = h.engine.effective_password_requirements(UserId::SYSTEM, false);
    assert_eq!(req.min_uppercase, 4);
}

#[test]
fn separate_challenge_profile_does_not_leak_to_parent() {
    let h = Harness::new();
    h.directory.add_managed_profile(UserId(10), UserId::SYSTEM, true);
    let (c, caller_c) = h.activate_admin("com.mdm.profile", UserId(10), 1_010_001);

    h.engine
        .set_max_time_to_lock(caller_c, &c, UserId(10), false, 30_000)
        .unwrap();

    assert_eq!(h.engine.effective_max_time_to_lock(UserId(10), false), 30_000);
    assert_eq!(h.engine.effective_max_time_to_lock(UserId::SYSTEM, false), 0);
}

#[test]
fn parent_scoped_policies_reach_the_parent_user() {
    let h = Harness::new();
    h.directory.add_managed_profile(UserId(10), UserId::SYSTEM, true);
    let (c, caller_c) = h.activate_admin("com.mdm.profile", UserId(10), 1_010_001);

    // Parent-facing record of the profile admin counts for the parent
    // even though the profile has its own challenge.
    h.engine
        .set_min_password_length(caller_c, &c, UserId(10), true, 8)
        .unwrap();

    assert_eq!(
        h.engine
            .effective_password_requirements(UserId::SYSTEM, false)
            .min_length,
        8
    );
    assert_eq!(
        h.engine
            .effective_password_requirements(UserId(10), true)
            .min_length,
        8
    );
    // The profile's own context is untouched by its parent record.
    assert_eq!(
        h.engine
            .effective_password_requirements(UserId(10), false)
            .min_length,
        0
    );
}

#[test]
fn zero_means_not_participating_for_minimum_wins_fields() {
    let h = Harness::new();
    let (a, caller_a) = h.activate_admin("com.mdm.a", UserId::SYSTEM, 10_001);
    let (b, caller_b) = h.activate_admin("com.mdm.b", UserId::SYSTEM, 10_002);

    h.engine
        .set_max_time_to_lock(caller_a, &a, UserId::SYSTEM, false, 0)
        .unwrap();
    h.engine
        .set_max_time_to_lock(caller_b, &b, UserId::SYSTEM, false, 60_000)
        .unwrap();

    assert_eq!(h.engine.effective_max_time_to_lock(UserId::SYSTEM, false), 60_000);
}

#[test]
fn wipe_routes_through_the_strictest_admin() {
    let h = Harness::new();
    let (a, caller_a) = h.activate_admin("com.mdm.lenient", UserId::SYSTEM, 10_001);
    let (b, caller_b) = h.activate_admin("com.mdm.strict", UserId::SYSTEM, 10_002);

    h.engine
        .set_max_failed_passwords_for_wipe(caller_a, &a, UserId::SYSTEM, false, 10)
        .unwrap();
    h.engine
        .set_max_failed_passwords_for_wipe(caller_b, &b, UserId::SYSTEM, false, 3)
        .unwrap();
    assert_eq!(
        h.engine.effective_max_failed_passwords_for_wipe(UserId::SYSTEM, false),
        3
    );

    for _ in 0..3 {
        h.engine.report_failed_password_attempt(UserId::SYSTEM);
    }

    use aegis_engine::platform::fakes::SinkCall;
    let wipes: Vec<_> = h
        .sink
        .calls()
        .into_iter()
        .filter(|call| matches!(call, SinkCall::RequestWipe(_, _)))
        .collect();
    assert_eq!(
        wipes,
        vec![SinkCall::RequestWipe(UserId::SYSTEM, b.clone())]
    );

    // A successful attempt resets the counter.
    h.engine.report_successful_password_attempt(UserId::SYSTEM);
    assert_eq!(h.engine.failed_password_attempts(UserId::SYSTEM), 0);
}

#[test]
fn sufficiency_uses_checkpoint_before_first_report() {
    let h = Harness::new();
    let (a, caller) = h.activate_admin("com.mdm.a", UserId::SYSTEM, 10_001);

    // No admin requires anything: trivially sufficient.
    assert!(h.engine.is_active_password_sufficient(UserId::SYSTEM, false));

    h.engine
        .set_password_quality(caller, &a, UserId::SYSTEM, false, PasswordQuality::Numeric)
        .unwrap();
    h.engine
        .set_min_password_length(caller, &a, UserId::SYSTEM, false, 4)
        .unwrap();

    // A sufficient credential is reported and checkpointed.
    h.engine.report_password_changed(
        UserId::SYSTEM,
        PasswordMetrics::compute("123456", PasswordQuality::Numeric),
    );
    assert!(h.engine.is_active_password_sufficient(UserId::SYSTEM, false));

    // After restart no credential has been observed; the persisted
    // checkpoint answers instead of live metrics.
    let h = h.restart();
    assert!(h.engine.is_active_password_sufficient(UserId::SYSTEM, false));
}

#[test]
fn aggregated_screen_lock_timeout_is_pushed_to_the_sink() {
    let h = Harness::new();
    let (a, caller) = h.activate_admin("com.mdm.a", UserId::SYSTEM, 10_001);

    h.engine
        .set_max_time_to_lock(caller, &a, UserId::SYSTEM, false, 45_000)
        .unwrap();

    use aegis_engine::platform::fakes::SinkCall;
    assert!(h
        .sink
        .calls()
        .contains(&SinkCall::ScreenLockTimeout(UserId::SYSTEM, 45_000)));
}

#[test]
fn policies_survive_restart() {
    let h = Harness::new();
    let (a, caller) = h.activate_admin("com.mdm.a", UserId::SYSTEM, 10_001);
    h.engine
        .set_min_password_length(caller, &a, UserId::SYSTEM, false, 12)
        .unwrap();

    let h = h.restart();
    assert_eq!(
        h.engine
            .effective_password_requirements(UserId::SYSTEM, false)
            .min_length,
        12
    );
}
