//! Delegation capability scopes.
//!
//! A delegation grants a non-admin package a named capability on behalf of
//! the device or profile owner. Scope names are stable wire strings; the
//! engine validates caller-supplied names against this set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error for an unrecognized scope name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown delegation scope {0:?}")]
pub struct UnknownScope(pub String);

/// Capability scopes an owner may delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelegationScope {
    /// Install and manage certificates.
    CertInstall,
    /// Manage application restrictions.
    AppRestrictions,
    /// Block package uninstallation.
    BlockUninstall,
    /// Grant runtime permissions.
    PermissionGrant,
    /// Query package visibility state.
    PackageAccess,
    /// Re-enable system applications.
    EnableSystemApp,
    /// Manage the keep-uninstalled package list.
    KeepUninstalledPackages,
}

impl DelegationScope {
    /// All scopes, in wire order.
    pub const ALL: &'static [Self] = &[
        Self::CertInstall,
        Self::AppRestrictions,
        Self::BlockUninstall,
        Self::PermissionGrant,
        Self::PackageAccess,
        Self::EnableSystemApp,
        Self::KeepUninstalledPackages,
    ];

    /// The stable wire name of this scope.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CertInstall => "delegation-cert-install",
            Self::AppRestrictions => "delegation-app-restrictions",
            Self::BlockUninstall => "delegation-block-uninstall",
            Self::PermissionGrant => "delegation-permission-grant",
            Self::PackageAccess => "delegation-package-access",
            Self::EnableSystemApp => "delegation-enable-system-app",
            Self::KeepUninstalledPackages => "delegation-keep-uninstalled-packages",
        }
    }
}

impl fmt::Display for DelegationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DelegationScope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scope| scope.name() == s)
            .ok_or_else(|| UnknownScope(s.to_string()))
    }
}
