//! User restriction names and owner baseline sets.
//!
//! Restriction names are free-form strings on the wire but setters validate
//! them against the known table. Designating an owner applies a
//! default-enabled baseline exactly once; when a platform upgrade extends a
//! baseline, only the delta is applied, so a restriction the owner granted
//! and later revoked is never re-imposed.

use std::collections::BTreeSet;

/// Known restriction name constants.
pub mod names {
    /// Disallow adding or removing accounts.
    pub const NO_MODIFY_ACCOUNTS: &str = "no_modify_accounts";
    /// Disallow changing Wi-Fi configuration.
    pub const NO_CONFIG_WIFI: &str = "no_config_wifi";
    /// Disallow installing apps.
    pub const NO_INSTALL_APPS: &str = "no_install_apps";
    /// Disallow uninstalling apps.
    pub const NO_UNINSTALL_APPS: &str = "no_uninstall_apps";
    /// Disallow location sharing.
    pub const NO_SHARE_LOCATION: &str = "no_share_location";
    /// Disallow installs from unknown sources.
    pub const NO_INSTALL_UNKNOWN_SOURCES: &str = "no_install_unknown_sources";
    /// Disallow Bluetooth configuration.
    pub const NO_CONFIG_BLUETOOTH: &str = "no_config_bluetooth";
    /// Disallow Bluetooth file sharing.
    pub const NO_BLUETOOTH_SHARING: &str = "no_bluetooth_sharing";
    /// Disallow USB file transfer.
    pub const NO_USB_FILE_TRANSFER: &str = "no_usb_file_transfer";
    /// Disallow credential configuration.
    pub const NO_CONFIG_CREDENTIALS: &str = "no_config_credentials";
    /// Disallow removing users.
    pub const NO_REMOVE_USER: &str = "no_remove_user";
    /// Disallow debugging features.
    pub const NO_DEBUGGING_FEATURES: &str = "no_debugging_features";
    /// Disallow VPN configuration.
    pub const NO_CONFIG_VPN: &str = "no_config_vpn";
    /// Disallow tethering configuration.
    pub const NO_CONFIG_TETHERING: &str = "no_config_tethering";
    /// Disallow factory reset.
    pub const NO_FACTORY_RESET: &str = "no_factory_reset";
    /// Disallow adding users.
    pub const NO_ADD_USER: &str = "no_add_user";
    /// Disallow adding managed profiles.
    pub const NO_ADD_MANAGED_PROFILE: &str = "no_add_managed_profile";
    /// Require app verification.
    pub const ENSURE_VERIFY_APPS: &str = "ensure_verify_apps";
    /// Disallow cell broadcast configuration.
    pub const NO_CONFIG_CELL_BROADCASTS: &str = "no_config_cell_broadcasts";
    /// Disallow mobile network configuration.
    pub const NO_CONFIG_MOBILE_NETWORKS: &str = "no_config_mobile_networks";
    /// Disallow controlling applications.
    pub const NO_CONTROL_APPS: &str = "no_control_apps";
    /// Disallow mounting physical media.
    pub const NO_PHYSICAL_MEDIA: &str = "no_physical_media";
    /// Disallow unmuting the microphone.
    pub const NO_UNMUTE_MICROPHONE: &str = "no_unmute_microphone";
    /// Disallow volume adjustment.
    pub const NO_ADJUST_VOLUME: &str = "no_adjust_volume";
    /// Disallow outgoing calls.
    pub const NO_OUTGOING_CALLS: &str = "no_outgoing_calls";
    /// Disallow SMS.
    pub const NO_SMS: &str = "no_sms";
    /// Disallow creating system-overlay windows.
    pub const NO_CREATE_WINDOWS: &str = "no_create_windows";
    /// Disallow copy-paste across the profile boundary.
    pub const NO_CROSS_PROFILE_COPY_PASTE: &str = "no_cross_profile_copy_paste";
    /// Disallow outgoing NFC beam.
    pub const NO_OUTGOING_BEAM: &str = "no_outgoing_beam";
    /// Disallow wallpaper changes.
    pub const NO_WALLPAPER: &str = "no_wallpaper";
    /// Disallow rebooting into safe boot.
    pub const NO_SAFE_BOOT: &str = "no_safe_boot";
    /// Disallow audio recording.
    pub const NO_RECORD_AUDIO: &str = "no_record_audio";
    /// Disallow switching users.
    pub const NO_USER_SWITCH: &str = "no_user_switch";
    /// Disallow a unified lock challenge for the profile.
    pub const NO_UNIFIED_PASSWORD: &str = "no_unified_password";
    /// Disallow autofill services.
    pub const NO_AUTOFILL: &str = "no_autofill";
}

/// Every restriction name the engine accepts.
pub const KNOWN_RESTRICTIONS: &[&str] = &[
    names::NO_MODIFY_ACCOUNTS,
    names::NO_CONFIG_WIFI,
    names::NO_INSTALL_APPS,
    names::NO_UNINSTALL_APPS,
    names::NO_SHARE_LOCATION,
    names::NO_INSTALL_UNKNOWN_SOURCES,
    names::NO_CONFIG_BLUETOOTH,
    names::NO_BLUETOOTH_SHARING,
    names::NO_USB_FILE_TRANSFER,
    names::NO_CONFIG_CREDENTIALS,
    names::NO_REMOVE_USER,
    names::NO_DEBUGGING_FEATURES,
    names::NO_CONFIG_VPN,
    names::NO_CONFIG_TETHERING,
    names::NO_FACTORY_RESET,
    names::NO_ADD_USER,
    names::NO_ADD_MANAGED_PROFILE,
    names::ENSURE_VERIFY_APPS,
    names::NO_CONFIG_CELL_BROADCASTS,
    names::NO_CONFIG_MOBILE_NETWORKS,
    names::NO_CONTROL_APPS,
    names::NO_PHYSICAL_MEDIA,
    names::NO_UNMUTE_MICROPHONE,
    names::NO_ADJUST_VOLUME,
    names::NO_OUTGOING_CALLS,
    names::NO_SMS,
    names::NO_CREATE_WINDOWS,
    names::NO_CROSS_PROFILE_COPY_PASTE,
    names::NO_OUTGOING_BEAM,
    names::NO_WALLPAPER,
    names::NO_SAFE_BOOT,
    names::NO_RECORD_AUDIO,
    names::NO_USER_SWITCH,
    names::NO_UNIFIED_PASSWORD,
    names::NO_AUTOFILL,
];

/// Baseline restrictions enabled by default when a device owner is
/// designated.
pub const DEFAULT_ENABLED_FOR_DEVICE_OWNER: &[&str] = &[names::NO_ADD_MANAGED_PROFILE];

/// Baseline restrictions enabled by default when a managed-profile owner is
/// designated.
pub const DEFAULT_ENABLED_FOR_PROFILE_OWNER: &[&str] =
    &[names::NO_WALLPAPER, names::NO_BLUETOOTH_SHARING];

/// Returns `true` if `name` is a restriction the engine knows.
#[must_use]
pub fn is_known(name: &str) -> bool {
    KNOWN_RESTRICTIONS.contains(&name)
}

/// Computes the subset of `baseline` that has not yet been applied.
///
/// `already_applied` is the per-owner record of baseline restrictions
/// applied by any prior designation or platform upgrade. Restrictions in
/// that record are skipped even if the owner has since revoked them.
#[must_use]
pub fn baseline_delta<'a>(
    baseline: &'a [&'a str],
    already_applied: &BTreeSet<String>,
) -> Vec<&'a str> {
    baseline
        .iter()
        .copied()
        .filter(|name| !already_applied.contains(*name))
        .collect()
}
