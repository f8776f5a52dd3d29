//! Create-option validation for volumes.

use std::collections::HashMap;

use crate::error::{DotError, DotResult};

/// The option naming the base directory on the host.
pub const OPTION_BASE: &str = "base";
/// The option marking a volume as volatile.
pub const OPTION_VOLATILE: &str = "volatile";

/// Validated create options.
///
/// Only syntax is checked here; whether the base directory actually exists
/// on the host is probed by the driver, which owns the filesystem access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// Absolute host path acting as the overlay's read-only lower layer.
    pub base: String,
    /// Whether the upper layer is discarded on each fresh activation.
    pub volatile: bool,
}

impl CreateOptions {
    /// Parse and validate the option map of a create request.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown option keys, a missing or malformed
    /// `base`, or an unrecognized `volatile` value.
    pub fn parse(options: &HashMap<String, String>) -> DotResult<Self> {
        for key in options.keys() {
            if key.as_str() != OPTION_BASE && key.as_str() != OPTION_VOLATILE {
                return Err(DotError::InvalidOption {
                    option: key.clone(),
                });
            }
        }

        let base = options.get(OPTION_BASE).ok_or(DotError::MissingBase)?;
        validate_base_syntax(base)?;

        let volatile = match options.get(OPTION_VOLATILE) {
            Some(value) => parse_volatile(value)?,
            None => false,
        };

        Ok(Self {
            base: base.clone(),
            volatile,
        })
    }
}

/// Check that `base` is an absolute path the overlay mount syntax can carry.
///
/// Commas and colons are rejected because they are separators in the
/// `lowerdir=...,upperdir=...,workdir=...` option string.
pub fn validate_base_syntax(base: &str) -> DotResult<()> {
    if !base.starts_with('/') {
        return Err(DotError::BaseNotAbsolute {
            base: base.to_string(),
        });
    }
    if base.contains(',') || base.contains(':') {
        return Err(DotError::BaseHasForbiddenChars {
            base: base.to_string(),
        });
    }
    Ok(())
}

/// Parse the `volatile` option value (case-insensitive).
pub fn parse_volatile(value: &str) -> DotResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        _ => Err(DotError::InvalidVolatile {
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn minimal_options() {
        let parsed = CreateOptions::parse(&opts(&[("base", "/tmp/x")])).unwrap();
        assert_eq!(parsed.base, "/tmp/x");
        assert!(!parsed.volatile);
    }

    #[test]
    fn volatile_values() {
        for value in ["true", "yes", "TRUE", "Yes"] {
            let parsed =
                CreateOptions::parse(&opts(&[("base", "/tmp/x"), ("volatile", value)])).unwrap();
            assert!(parsed.volatile, "{value} should mean volatile");
        }
        for value in ["false", "no", "False", "NO"] {
            let parsed =
                CreateOptions::parse(&opts(&[("base", "/tmp/x"), ("volatile", value)])).unwrap();
            assert!(!parsed.volatile, "{value} should mean non-volatile");
        }
        assert!(matches!(
            CreateOptions::parse(&opts(&[("base", "/tmp/x"), ("volatile", "maybe")])),
            Err(DotError::InvalidVolatile { .. })
        ));
    }

    #[test]
    fn unknown_option_rejected() {
        assert!(matches!(
            CreateOptions::parse(&opts(&[("base", "/tmp/x"), ("color", "red")])),
            Err(DotError::InvalidOption { .. })
        ));
    }

    #[test]
    fn base_is_required() {
        assert!(matches!(
            CreateOptions::parse(&opts(&[])),
            Err(DotError::MissingBase)
        ));
    }

    #[test]
    fn base_syntax() {
        assert!(matches!(
            CreateOptions::parse(&opts(&[("base", "a/b")])),
            Err(DotError::BaseNotAbsolute { .. })
        ));
        assert!(matches!(
            CreateOptions::parse(&opts(&[("base", "/with,comma")])),
            Err(DotError::BaseHasForbiddenChars { .. })
        ));
        assert!(matches!(
            CreateOptions::parse(&opts(&[("base", "/no:colon")])),
            Err(DotError::BaseHasForbiddenChars { .. })
        ));
    }
}
