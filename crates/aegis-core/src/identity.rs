//! Identities for users, admin components, and their owning processes.
//!
//! A management admin is addressed by a [`ComponentName`] (package plus
//! receiver class) scoped to a [`UserId`]. The [`AdminIdentity`] triple adds
//! the uid of the process the admin was installed as; mutations verify the
//! live caller uid against it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when validating identities.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The package half of a component name is empty.
    #[error("component package is empty")]
    EmptyPackage,

    /// The class half of a component name is empty.
    #[error("component class is empty")]
    EmptyClass,

    /// A component part contains a character that is not allowed.
    #[error("component part {part:?} contains illegal character {ch:?}")]
    IllegalCharacter {
        /// The offending part.
        part: String,
        /// The offending character.
        ch: char,
    },

    /// A flattened component string is missing the `/` separator.
    #[error("component string {0:?} is missing a '/' separator")]
    MissingSeparator(String),
}

/// A user (or profile) id.
///
/// Profiles are users; whether a user is a managed profile of another is
/// resolved through the user directory, not encoded here.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UserId(pub i32);

impl UserId {
    /// The system user.
    pub const SYSTEM: Self = Self(0);

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns `true` if this is the system user.
    #[must_use]
    pub const fn is_system(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

impl From<i32> for UserId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// An opaque component reference: package name plus receiver class.
///
/// Flattened form is `package/class`. A leading `.` in the class is kept
/// verbatim (shorthand for a class inside the package).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    package: String,
    class: String,
}

impl ComponentName {
    /// Creates a component name, validating both parts.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if either part is empty or contains `/`
    /// or whitespace.
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Result<Self, IdentityError> {
        let package = package.into();
        let class = class.into();
        if package.is_empty() {
            return Err(IdentityError::EmptyPackage);
        }
        if class.is_empty() {
            return Err(IdentityError::EmptyClass);
        }
        for part in [&package, &class] {
            if let Some(ch) = part.chars().find(|c| *c == '/' || c.is_whitespace()) {
                return Err(IdentityError::IllegalCharacter {
                    part: part.clone(),
                    ch,
                });
            }
        }
        Ok(Self { package, class })
    }

    /// The package half.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The class half.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Flattens to the `package/class` form.
    #[must_use]
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

impl FromStr for ComponentName {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (package, class) = s
            .split_once('/')
            .ok_or_else(|| IdentityError::MissingSeparator(s.to_string()))?;
        Self::new(package, class)
    }
}

/// Full identity of one installed admin: component, owning user, and the
/// uid the owning package runs as for that user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdminIdentity {
    /// The admin component.
    pub component: ComponentName,
    /// The user the admin is installed for.
    pub user: UserId,
    /// The uid of the owning package for that user.
    pub uid: u32,
}

impl AdminIdentity {
    /// Creates an admin identity.
    #[must_use]
    pub const fn new(component: ComponentName, user: UserId, uid: u32) -> Self {
        Self {
            component,
            user,
            uid,
        }
    }
}

impl fmt::Display for AdminIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, uid {})", self.component, self.user, self.uid)
    }
}
