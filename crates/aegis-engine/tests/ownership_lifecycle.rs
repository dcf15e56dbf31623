//! Ownership governance end to end: designation preconditions, baseline
//! restrictions, clearing semantics, forced removal.

mod common;

use aegis_core::error::PolicyError;
use aegis_core::identity::UserId;
use aegis_core::restrictions;
use common::Harness;

use aegis_engine::CallerContext;

#[test]
fn device_owner_designation_applies_baseline_restrictions() {
    let h = Harness::new();
    let (component, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);

    h.engine
        .set_device_owner(caller, &component, UserId::SYSTEM)
        .unwrap();

    assert!(h.engine.is_device_owner(&component, UserId::SYSTEM));
    let imposed = h.engine.user_restrictions(&component, UserId::SYSTEM);
    assert!(imposed.contains(&restrictions::names::NO_ADD_MANAGED_PROFILE.to_string()));
}

#[test]
fn second_device_owner_fails_with_illegal_state() {
    let h = Harness::new();
    let (first, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);
    h.engine.set_device_owner(caller, &first, UserId::SYSTEM).unwrap();

    let (second, caller2) = h.activate_admin("com.rival.mdm", UserId::SYSTEM, 10_002);
    let err = h
        .engine
        .set_device_owner(caller2, &second, UserId::SYSTEM)
        .unwrap_err();
    assert!(matches!(err, PolicyError::IllegalState { .. }));
}

#[test]
fn device_owner_and_profile_owner_are_mutually_exclusive() {
    let h = Harness::new();
    let (po, po_caller) = h.activate_admin("com.profile.mdm", UserId::SYSTEM, 10_001);
    h.engine.set_profile_owner(po_caller, &po, UserId::SYSTEM).unwrap();

    // A profile owner on the user blocks device-owner designation.
    let (candidate, do_caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_002);
    let err = h
        .engine
        .set_device_owner(do_caller, &candidate, UserId::SYSTEM)
        .unwrap_err();
    assert!(matches!(err, PolicyError::IllegalState { .. }));

    // And vice versa on a fresh engine.
    let h = Harness::new();
    let (device, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);
    h.engine.set_device_owner(caller, &device, UserId::SYSTEM).unwrap();
    let (profile, p_caller) = h.activate_admin("com.profile.mdm", UserId::SYSTEM, 10_002);
    let err = h
        .engine
        .set_profile_owner(p_caller, &profile, UserId::SYSTEM)
        .unwrap_err();
    assert!(matches!(err, PolicyError::IllegalState { .. }));
}

#[test]
fn designation_rejected_after_setup_for_ordinary_callers() {
    let h = Harness::new();
    h.directory.set_setup_complete(UserId::SYSTEM, true);
    let (component, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);

    let err = h
        .engine
        .set_device_owner(caller, &component, UserId::SYSTEM)
        .unwrap_err();
    assert!(matches!(err, PolicyError::IllegalState { .. }));

    // Elevated platform callers override the setup gate.
    h.engine
        .set_device_owner(CallerContext::elevated(1000), &component, UserId::SYSTEM)
        .unwrap();
}

#[test]
fn clearing_device_owner_resets_owner_exclusive_policies() {
    let h = Harness::new();
    let (component, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);
    h.engine.set_device_owner(caller, &component, UserId::SYSTEM).unwrap();

    h.engine
        .set_camera_disabled(caller, &component, UserId::SYSTEM, true)
        .unwrap();
    h.engine
        .set_force_ephemeral_users(caller, &component, UserId::SYSTEM, true)
        .unwrap();
    h.engine
        .set_network_logging_enabled(caller, &component, UserId::SYSTEM, true)
        .unwrap();
    assert!(h.engine.effective_camera_disabled(UserId::SYSTEM));

    h.engine.clear_device_owner(caller).unwrap();

    assert!(h.engine.device_owner().is_none());
    assert!(!h.engine.effective_camera_disabled(UserId::SYSTEM));
    let declared = h
        .engine
        .declared_policy(&component, UserId::SYSTEM, false, |r| {
            (
                r.camera_disabled,
                r.force_ephemeral_users,
                r.network_logging_enabled,
            )
        })
        .unwrap();
    assert_eq!(declared, (false, false, false));

    // Idempotent: a second clear is a no-op with the same end state.
    h.engine.clear_device_owner(caller).unwrap();
    assert!(h.engine.device_owner().is_none());
}

#[test]
fn clearing_requires_the_owner_or_elevation() {
    let h = Harness::new();
    let (component, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);
    h.engine.set_device_owner(caller, &component, UserId::SYSTEM).unwrap();

    let err = h
        .engine
        .clear_device_owner(CallerContext::app(99_999))
        .unwrap_err();
    assert!(matches!(err, PolicyError::PermissionDenied { .. }));

    h.engine
        .clear_device_owner(CallerContext::elevated(1000))
        .unwrap();
}

#[test]
fn forced_removal_tears_down_ownership_and_persists() {
    let h = Harness::new();
    let (component, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);
    h.engine.set_device_owner(caller, &component, UserId::SYSTEM).unwrap();

    h.engine.forced_remove_admin(&component, UserId::SYSTEM);
    assert!(h.engine.device_owner().is_none());
    assert!(!h.engine.is_admin_active(&component, UserId::SYSTEM));

    // The teardown survives a restart.
    let h = h.restart();
    assert!(h.engine.device_owner().is_none());
    assert!(!h.engine.is_admin_active(&component, UserId::SYSTEM));
}

#[test]
fn ownership_survives_restart() {
    let h = Harness::new();
    let (component, caller) = h.activate_admin("com.corp.mdm", UserId::SYSTEM, 10_001);
    h.engine.set_device_owner(caller, &component, UserId::SYSTEM).unwrap();

    let h = h.restart();
    assert!(h.engine.is_device_owner(&component, UserId::SYSTEM));
    assert_eq!(
        h.engine.device_owner(),
        Some((component.clone(), UserId::SYSTEM))
    );
}

#[test]
fn single_pairing_variant_blocks_second_pairing() {
    use std::sync::Arc;
    use std::time::Duration;

    use aegis_engine::platform::fakes::{FakeDirectory, RecordingNotifier, RecordingSink};
    use aegis_engine::{EngineConfig, PolicyEngine};

    let tempdir = tempfile::tempdir().unwrap();
    let directory = Arc::new(FakeDirectory::new());
    let config = EngineConfig::new(tempdir.path())
        .with_single_pairing(true)
        .with_deactivation_timeout(Duration::from_millis(100));
    let engine = PolicyEngine::new(
        config,
        directory.clone(),
        Arc::new(RecordingSink::new()),
        Arc::new(RecordingNotifier::new()),
    )
    .unwrap();

    let component =
        aegis_core::identity::ComponentName::new("com.corp.mdm", ".AdminReceiver").unwrap();
    directory.register_admin(&component, UserId::SYSTEM, 10_001);
    let caller = CallerContext::app(10_001);
    engine.activate_admin(&component, UserId::SYSTEM, false).unwrap();
    engine.set_device_owner(caller, &component, UserId::SYSTEM).unwrap();
    engine.clear_device_owner(caller).unwrap();

    // Paired once; the latch forbids a second designation.
    let err = engine
        .set_device_owner(caller, &component, UserId::SYSTEM)
        .unwrap_err();
    assert!(matches!(err, PolicyError::IllegalState { .. }));
}
