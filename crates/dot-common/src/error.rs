//! Common error types for the docker-on-top ecosystem.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`DotError`].
pub type DotResult<T> = Result<T, DotError>;

/// Errors across the docker-on-top ecosystem.
///
/// The variants fall into a few kinds with different reporting rules:
/// user mistakes (invalid names/options, missing base) are surfaced to the
/// caller verbatim and never logged at error level, while `Internal` and
/// `Critical` describe failures on driver-owned paths and are logged where
/// they occur. `Critical` additionally means the on-disk state can no longer
/// be reconciled automatically and carries operator instructions.
#[derive(Error, Diagnostic, Debug)]
pub enum DotError {
    /// Volume name contains a slash (usually a host path given as a name).
    #[error("volume name cannot contain slashes")]
    #[diagnostic(
        code(dot::name::slash),
        help("for specifying a host path use `-o base=/path/to/base/directory`")
    )]
    NameContainsSlash {
        /// The rejected name.
        name: String,
    },

    /// Volume name does not match the accepted format.
    #[error("volume name contains illegal characters: it should comply to \"[a-zA-Z0-9][a-zA-Z0-9_.-]*\"")]
    #[diagnostic(code(dot::name::invalid))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// An option other than `base`/`volatile` was supplied at create time.
    #[error("invalid option {option}")]
    #[diagnostic(code(dot::options::unknown))]
    InvalidOption {
        /// The unrecognized option key.
        option: String,
    },

    /// The mandatory `base` option was not supplied.
    #[error("`base` option must be provided and set to an absolute path to the base directory on host")]
    #[diagnostic(code(dot::options::missing_base))]
    MissingBase,

    /// The `base` option is not an absolute path.
    #[error("`base` must be an absolute path")]
    #[diagnostic(code(dot::options::base_not_absolute))]
    BaseNotAbsolute {
        /// The rejected base path.
        base: String,
    },

    /// The `base` option contains characters the overlay mount syntax cannot
    /// carry.
    #[error("directories with commas and/or colons in the path are not supported")]
    #[diagnostic(code(dot::options::base_forbidden_chars))]
    BaseHasForbiddenChars {
        /// The rejected base path.
        base: String,
    },

    /// The `base` option points to a path that does not exist on the host.
    #[error("base directory {base} does not exist")]
    #[diagnostic(code(dot::options::base_missing))]
    BaseDoesNotExist {
        /// The rejected base path.
        base: String,
    },

    /// The `volatile` option has a value outside the accepted set.
    #[error("option `volatile` must be either 'true', 'false', 'yes', or 'no'")]
    #[diagnostic(code(dot::options::invalid_volatile))]
    InvalidVolatile {
        /// The rejected value.
        value: String,
    },

    /// A volume with the requested name already exists.
    #[error("volume already exists")]
    #[diagnostic(code(dot::volume::exists))]
    AlreadyExists {
        /// The volume name.
        name: String,
    },

    /// The referenced volume does not exist.
    #[error("no such volume")]
    #[diagnostic(code(dot::volume::not_found))]
    NoSuchVolume {
        /// The volume name.
        name: String,
    },

    /// The kernel refused the overlay mount.
    #[error("failed to mount overlay for the volume (does the base directory exist?): {source}")]
    #[diagnostic(
        code(dot::mount::kernel),
        help("check that the base directory still exists on the host")
    )]
    KernelMount {
        /// The volume name.
        name: String,
        /// The underlying mount error.
        source: std::io::Error,
    },

    /// The exclusive directory lock could not be acquired.
    #[error("docker-on-top internal error: failed to lock {}: {source}", .path.display())]
    #[diagnostic(
        code(dot::lock::acquisition),
        help("the data root must reside on a filesystem that supports flock(2)")
    )]
    LockAcquisition {
        /// The directory that could not be locked.
        path: PathBuf,
        /// The underlying open/flock error.
        source: std::io::Error,
    },

    /// Unexpected I/O failure on a driver-owned path.
    #[error("docker-on-top internal error: {context}: {source}")]
    #[diagnostic(code(dot::internal))]
    Internal {
        /// What the driver was doing.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The volume's on-disk state can no longer be made consistent
    /// automatically; the message carries operator instructions.
    #[error("docker-on-top internal error: {message}")]
    #[diagnostic(
        code(dot::critical),
        help("human interaction is required; please also report this bug")
    )]
    Critical {
        /// Operator-actionable description of the inconsistency.
        message: String,
    },
}

impl DotError {
    /// Wrap an unexpected I/O failure with context.
    pub fn internal(context: impl Into<String>, source: std::io::Error) -> Self {
        DotError::Internal {
            context: context.into(),
            source,
        }
    }

    /// Whether this error is the caller's mistake rather than a driver
    /// failure. User errors are reported verbatim and logged at debug level.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DotError::NameContainsSlash { .. }
                | DotError::InvalidName { .. }
                | DotError::InvalidOption { .. }
                | DotError::MissingBase
                | DotError::BaseNotAbsolute { .. }
                | DotError::BaseHasForbiddenChars { .. }
                | DotError::BaseDoesNotExist { .. }
                | DotError::InvalidVolatile { .. }
                | DotError::AlreadyExists { .. }
                | DotError::NoSuchVolume { .. }
        )
    }
}
