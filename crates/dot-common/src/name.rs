//! Volume name validation.

use std::fmt;
use std::str::FromStr;

use crate::error::{DotError, DotResult};

/// A validated volume name.
///
/// Volume names must:
/// - Start with an ASCII alphanumeric character
/// - Continue with ASCII alphanumerics, underscores, dots, or hyphens
///
/// i.e. match `^[a-zA-Z0-9][a-zA-Z0-9_.-]*$`, the format the docker daemon
/// itself accepts. A slash gets a dedicated error because it usually means
/// the user passed a host path where a name was expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeName(String);

impl VolumeName {
    /// Create a new volume name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the name format is invalid.
    pub fn new(name: impl Into<String>) -> DotResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the volume name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> DotResult<()> {
        if Self::matches_format(name) {
            return Ok(());
        }
        if name.contains('/') {
            // Handled separately for a more specific error message
            return Err(DotError::NameContainsSlash {
                name: name.to_string(),
            });
        }
        Err(DotError::InvalidName {
            name: name.to_string(),
        })
    }

    fn matches_format(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphanumeric() => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VolumeName {
    type Err = DotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
