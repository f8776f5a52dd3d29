//! # dot
//!
//! The docker-on-top volume driver core: bind-like copy-on-write volumes
//! backed by overlayfs.
//!
//! Each volume is parameterized by a *base* directory on the host and
//! presents a writable view of it: reads fall through to the base, writes
//! land in a per-volume upper layer shared across all concurrent mounts.
//! A *volatile* volume discards its upper layer on each fresh activation.
//!
//! The driver keeps no in-memory state. A volume is a directory subtree
//! under the data root (see [`dot_common::DotPaths`]); the set of active
//! mounts is a directory of marker files guarded by an exclusive `flock`,
//! which makes the mount counter inspectable by operators, robust to
//! driver crashes, and shared correctly between driver processes.

#![warn(missing_docs)]

pub mod driver;
pub mod lockdir;
pub mod metadata;
pub mod overlay;
pub mod tree;

pub use driver::{Capabilities, Driver};
pub use lockdir::LockedDir;
pub use overlay::{KernelMounter, Mounter, OverlayFs, MOUNT_SOURCE_PREFIX};
