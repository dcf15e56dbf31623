//! The per-admin policy record.
//!
//! One [`PolicyRecord`] holds every policy value a single admin has
//! declared. Unset values are the participation-neutral defaults: numeric
//! minimums of `0`, timeouts of `0` (meaning "does not participate" for the
//! minimum-wins fields), quality `Unspecified`, and empty collections. The
//! aggregator never reads defaults as declarations; see
//! [`crate::aggregate`].
//!
//! Records are serialized as-is into per-user snapshot files, so every
//! field carries `#[serde(default)]` to keep older files loadable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::password::PasswordQuality;

/// Keyguard feature bits an admin may disable.
pub mod keyguard {
    /// Disable all widgets on the keyguard.
    pub const DISABLE_WIDGETS_ALL: u32 = 1 << 0;
    /// Disable the camera on the secure keyguard.
    pub const DISABLE_SECURE_CAMERA: u32 = 1 << 1;
    /// Disable notifications on the secure keyguard.
    pub const DISABLE_SECURE_NOTIFICATIONS: u32 = 1 << 2;
    /// Redact notification content on the secure keyguard.
    pub const DISABLE_UNREDACTED_NOTIFICATIONS: u32 = 1 << 3;
    /// Disable trust agents.
    pub const DISABLE_TRUST_AGENTS: u32 = 1 << 4;
    /// Disable fingerprint unlock.
    pub const DISABLE_FINGERPRINT: u32 = 1 << 5;
    /// Disable inline remote input on the keyguard.
    pub const DISABLE_REMOTE_INPUT: u32 = 1 << 6;
    /// Disable face unlock.
    pub const DISABLE_FACE: u32 = 1 << 7;
    /// Disable iris unlock.
    pub const DISABLE_IRIS: u32 = 1 << 8;

    /// All defined feature bits.
    pub const DISABLE_FEATURES_ALL: u32 = DISABLE_WIDGETS_ALL
        | DISABLE_SECURE_CAMERA
        | DISABLE_SECURE_NOTIFICATIONS
        | DISABLE_UNREDACTED_NOTIFICATIONS
        | DISABLE_TRUST_AGENTS
        | DISABLE_FINGERPRINT
        | DISABLE_REMOTE_INPUT
        | DISABLE_FACE
        | DISABLE_IRIS;

    /// The subset a managed profile's own admin contributes to its parent
    /// user's keyguard when the query is not scoped to the profile itself.
    pub const PROFILE_AFFECTS_PARENT_MASK: u32 = DISABLE_TRUST_AGENTS
        | DISABLE_UNREDACTED_NOTIFICATIONS
        | DISABLE_FINGERPRINT
        | DISABLE_FACE
        | DISABLE_IRIS;
}

/// Options an admin declares for one trust agent, keyed by the agent's
/// flattened component name in [`PolicyRecord::trust_agent_options`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrustAgentConfig {
    /// Whether the agent is disabled outright for this admin.
    #[serde(default)]
    pub disabled: bool,
    /// Opaque agent-specific options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// All policy values declared by a single admin for one scope.
///
/// `Option<Vec<String>>` permitted-lists follow the platform convention:
/// `None` permits everything, `Some(vec![])` permits only system packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Required password quality class.
    #[serde(default)]
    pub password_quality: PasswordQuality,
    /// Minimum password length.
    #[serde(default)]
    pub min_password_length: u32,
    /// Minimum letter count; gated behind `Complex` quality.
    #[serde(default)]
    pub min_password_letters: u32,
    /// Minimum digit count; gated behind `Complex` quality.
    #[serde(default)]
    pub min_password_digits: u32,
    /// Minimum symbol count; gated behind `Complex` quality.
    #[serde(default)]
    pub min_password_symbols: u32,
    /// Minimum uppercase count; gated behind `Complex` quality.
    #[serde(default)]
    pub min_password_uppercase: u32,
    /// Minimum lowercase count; gated behind `Complex` quality.
    #[serde(default)]
    pub min_password_lowercase: u32,
    /// Minimum non-letter count; gated behind `Complex` quality.
    #[serde(default)]
    pub min_password_non_letter: u32,
    /// Number of previous passwords a new credential may not repeat.
    #[serde(default)]
    pub password_history_length: u32,
    /// Password expiration period in milliseconds; `0` = no expiration.
    #[serde(default)]
    pub password_expiration_timeout_ms: i64,
    /// Absolute expiration deadline in epoch milliseconds; `0` = none.
    #[serde(default)]
    pub password_expiration_deadline_ms: i64,
    /// Failed attempts before the admin requests a wipe; `0` = never.
    #[serde(default)]
    pub max_failed_passwords_for_wipe: u32,
    /// Maximum screen-lock timeout in milliseconds; `0` = no constraint.
    #[serde(default)]
    pub max_time_to_lock_ms: i64,
    /// Strong-auth (credential-only unlock) timeout in milliseconds;
    /// `0` = admin does not participate.
    #[serde(default)]
    pub strong_auth_timeout_ms: i64,
    /// Bitmask of disabled keyguard features; see [`keyguard`].
    #[serde(default)]
    pub disabled_keyguard_features: u32,
    /// Camera disabled by this admin.
    #[serde(default)]
    pub camera_disabled: bool,
    /// Screen capture disabled by this admin.
    #[serde(default)]
    pub screen_capture_disabled: bool,
    /// Automatic time required.
    #[serde(default)]
    pub auto_time_required: bool,
    /// Newly created users are ephemeral.
    #[serde(default)]
    pub force_ephemeral_users: bool,
    /// Device-wide network event logging requested by this admin.
    #[serde(default)]
    pub network_logging_enabled: bool,
    /// Bluetooth contact sharing with paired devices disabled.
    #[serde(default = "default_true")]
    pub bluetooth_contact_sharing_disabled: bool,
    /// Caller-id lookup across the profile boundary disabled.
    #[serde(default)]
    pub caller_id_disabled: bool,
    /// Contacts search across the profile boundary disabled.
    #[serde(default)]
    pub contacts_search_disabled: bool,
    /// Free-form user restrictions imposed by this admin.
    #[serde(default)]
    pub user_restrictions: BTreeSet<String>,
    /// Short support message shown where the admin blocks an action.
    #[serde(default)]
    pub short_support_message: Option<String>,
    /// Long support message shown in settings.
    #[serde(default)]
    pub long_support_message: Option<String>,
    /// Organization branding color (ARGB).
    #[serde(default)]
    pub organization_color: Option<u32>,
    /// Organization display name.
    #[serde(default)]
    pub organization_name: Option<String>,
    /// Packages whose widgets may be shown across the profile boundary.
    #[serde(default)]
    pub cross_profile_widget_providers: BTreeSet<String>,
    /// Packages kept in the uninstalled-but-retained state.
    #[serde(default)]
    pub keep_uninstalled_packages: Vec<String>,
    /// Trust agent options keyed by flattened agent component.
    #[serde(default)]
    pub trust_agent_options: BTreeMap<String, TrustAgentConfig>,
    /// Account types whose management the admin has disabled.
    #[serde(default)]
    pub account_types_with_management_disabled: BTreeSet<String>,
    /// Permitted accessibility services; `None` = all.
    #[serde(default)]
    pub permitted_accessibility_services: Option<Vec<String>>,
    /// Permitted input methods; `None` = all.
    #[serde(default)]
    pub permitted_input_methods: Option<Vec<String>>,
    /// Permitted notification listeners; `None` = all.
    #[serde(default)]
    pub permitted_notification_listeners: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyRecord {
    fn default() -> Self {
        Self {
            password_quality: PasswordQuality::Unspecified,
            min_password_length: 0,
            min_password_letters: 0,
            min_password_digits: 0,
            min_password_symbols: 0,
            min_password_uppercase: 0,
            min_password_lowercase: 0,
            min_password_non_letter: 0,
            password_history_length: 0,
            password_expiration_timeout_ms: 0,
            password_expiration_deadline_ms: 0,
            max_failed_passwords_for_wipe: 0,
            max_time_to_lock_ms: 0,
            strong_auth_timeout_ms: 0,
            disabled_keyguard_features: 0,
            camera_disabled: false,
            screen_capture_disabled: false,
            auto_time_required: false,
            force_ephemeral_users: false,
            network_logging_enabled: false,
            bluetooth_contact_sharing_disabled: true,
            caller_id_disabled: false,
            contacts_search_disabled: false,
            user_restrictions: BTreeSet::new(),
            short_support_message: None,
            long_support_message: None,
            organization_color: None,
            organization_name: None,
            cross_profile_widget_providers: BTreeSet::new(),
            keep_uninstalled_packages: Vec::new(),
            trust_agent_options: BTreeMap::new(),
            account_types_with_management_disabled: BTreeSet::new(),
            permitted_accessibility_services: None,
            permitted_input_methods: None,
            permitted_notification_listeners: None,
        }
    }
}

impl PolicyRecord {
    /// Resets the fields only an owner may set to their defaults.
    ///
    /// Called when a device or profile owner role is cleared: camera
    /// re-enabled, restrictions dropped, ephemeral users off, network
    /// logging off. Idempotent.
    pub fn reset_owner_exclusive(&mut self) {
        self.camera_disabled = false;
        self.user_restrictions.clear();
        self.force_ephemeral_users = false;
        self.network_logging_enabled = false;
    }
}
