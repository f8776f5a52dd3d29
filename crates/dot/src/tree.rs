//! Volume directory-tree management.
//!
//! The always-present part of a volume's tree (main directory,
//! `metadata.json`, `upper/`, `activemounts/`) is created at volume
//! creation and destroyed at removal; `workdir/` and `mountpoint/` exist
//! only while the volume is mounted and are managed by the pre-mount /
//! post-unmount pair. Boot reset reconciles a discovered tree with
//! whatever the kernel still has mounted.

use std::fs;
use std::io;

use dot_common::{DotError, DotPaths, DotResult};

/// Whether an I/O error is EBUSY (the path is a live mount).
pub(crate) fn is_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(rustix::io::Errno::BUSY.raw_os_error())
}

/// Create the directory tree for a new volume (but not its metadata).
///
/// # Errors
///
/// An already-existing main directory surfaces as
/// [`DotError::AlreadyExists`] without logging. Any other failure is
/// logged, the partially created tree is destroyed, and
/// [`DotError::Internal`] is returned.
pub fn create(paths: &DotPaths, name: &str) -> DotResult<()> {
    if let Err(err) = fs::create_dir(paths.volume(name)) {
        if err.kind() == io::ErrorKind::AlreadyExists {
            return Err(DotError::AlreadyExists {
                name: name.to_string(),
            });
        }
        tracing::error!(volume = name, %err, "Failed to Mkdir volume main directory");
        return Err(DotError::internal(
            "failed to Mkdir volume main directory",
            err,
        ));
    }

    for dir in [paths.upper(name), paths.active_mounts(name)] {
        if let Err(err) = fs::create_dir(&dir) {
            tracing::error!(
                volume = name,
                dir = %dir.display(),
                %err,
                "Failed to Mkdir internal directory. Aborting volume creation"
            );
            let _ = destroy(paths, name); // errors are logged inside
            return Err(DotError::internal(
                "failed to Mkdir internal directories",
                err,
            ));
        }
    }

    Ok(())
}

/// Destroy a volume's tree, recursively removing everything inside the
/// main directory, including anything placed there by third parties.
/// Absence of the volume counts as success.
///
/// # Errors
///
/// Failures are logged and returned as [`DotError::Internal`].
pub fn destroy(paths: &DotPaths, name: &str) -> DotResult<()> {
    match fs::remove_dir_all(paths.volume(name)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            tracing::error!(volume = name, %err, "Failed to RemoveAll volume main directory");
            Err(DotError::internal(
                "failed to RemoveAll volume main directory",
                err,
            ))
        }
    }
}

/// Create the mount-only directories (`mountpoint/`, `workdir/`) ahead of
/// a fresh activation; with `discard_upper`, also reset `upper/` from
/// scratch.
///
/// Either directory already existing is logged as a warning but is not an
/// error. On any other creation failure, only the sibling created by this
/// call is rolled back.
///
/// # Errors
///
/// Failures are logged and returned as [`DotError::Internal`].
pub fn pre_mount(paths: &DotPaths, name: &str, discard_upper: bool) -> DotResult<()> {
    let mountpoint = paths.mountpoint(name);
    let workdir = paths.workdir(name);

    let err1 = fs::create_dir(&mountpoint).err();
    if let Some(err) = &err1 {
        if err.kind() == io::ErrorKind::AlreadyExists {
            tracing::warn!(
                volume = name,
                "Mountpoint already exists. It might mean that the overlay is already mounted \
                 but the driver failed to detect it. Trying to proceed anyway"
            );
        }
    }
    let err2 = fs::create_dir(&workdir).err();
    if let Some(err) = &err2 {
        if err.kind() == io::ErrorKind::AlreadyExists {
            tracing::warn!(
                volume = name,
                "Workdir already exists. It might mean that the overlay is already mounted \
                 but the driver failed to detect it. Trying to proceed anyway"
            );
        }
    }

    let fatal1 = err1.as_ref().is_some_and(|e| e.kind() != io::ErrorKind::AlreadyExists);
    let fatal2 = err2.as_ref().is_some_and(|e| e.kind() != io::ErrorKind::AlreadyExists);
    if fatal1 || fatal2 {
        tracing::error!(
            volume = name,
            mountpoint_err = ?err1,
            workdir_err = ?err2,
            "Failed to Mkdir mountpoint, workdir"
        );

        // Only remove the directories created by this call
        if err1.is_none() {
            if let Err(cleanup_err) = fs::remove_dir(&mountpoint) {
                tracing::error!(volume = name, %cleanup_err, "Failed to cleanup mountpoint");
            }
        }
        if err2.is_none() {
            if let Err(cleanup_err) = fs::remove_dir(&workdir) {
                tracing::error!(volume = name, %cleanup_err, "Failed to cleanup workdir");
            }
        }

        return Err(DotError::internal(
            "failed to prepare internal directories",
            join_errors([err1, err2]),
        ));
    }

    // For a volatile volume, discard previous changes
    if discard_upper {
        let upper = paths.upper(name);

        if let Err(err) = fs::remove_dir_all(&upper) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::error!(volume = name, %err, "Failed to RemoveAll upperdir (for volatile)");
                return Err(DotError::internal(
                    "failed to discard previous changes",
                    err,
                ));
            }
        }
        if let Err(err) = fs::create_dir(&upper) {
            tracing::error!(volume = name, %err, "Failed to Mkdir upperdir (for volatile)");
            return Err(DotError::internal(
                "failed to create upperdir after discarding changes",
                err,
            ));
        }
    }

    Ok(())
}

/// Remove the mount-only directories after the overlay has been unmounted:
/// `mountpoint/` non-recursively (must be empty), `workdir/` recursively.
/// Both removals are attempted independently; the absence of `workdir/` is
/// not an error.
///
/// # Errors
///
/// Failures are logged, joined, and returned as [`DotError::Internal`].
pub fn post_unmount(paths: &DotPaths, name: &str) -> DotResult<()> {
    let err1 = fs::remove_dir(paths.mountpoint(name)).err();
    let err2 = fs::remove_dir_all(paths.workdir(name))
        .err()
        .filter(|e| e.kind() != io::ErrorKind::NotFound);

    if err1.is_some() || err2.is_some() {
        tracing::error!(
            volume = name,
            mountpoint_err = ?err1,
            workdir_err = ?err2,
            "Cleanup after unmount failed"
        );
        return Err(DotError::internal(
            "failed to cleanup on unmount",
            join_errors([err1, err2]),
        ));
    }

    Ok(())
}

/// Outcome of reconciling one volume subtree at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootReset {
    /// `mountpoint/` was removed and the dirty subtree cleaned: active
    /// mounts discarded, `workdir/` removed.
    Cleaned,
    /// No `mountpoint/` existed; the subtree never had a live mount.
    AlreadyClean,
    /// `mountpoint/` is still a live kernel mount; the subtree was left
    /// as-is.
    StillMounted,
}

/// Reconcile a volume subtree with reality after a driver restart.
///
/// Attempts to remove `mountpoint/` (non-recursive). On success the
/// previous active mounts are discarded (`activemounts/` is recreated from
/// scratch) and `workdir/` is removed; EBUSY means an overlay is still
/// mounted and nothing is touched.
///
/// # Errors
///
/// Any failure other than the NotFound/EBUSY classifications is returned
/// as [`DotError::Internal`].
pub fn boot_reset(paths: &DotPaths, name: &str) -> DotResult<BootReset> {
    match fs::remove_dir(paths.mountpoint(name)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BootReset::AlreadyClean),
        Err(err) if is_busy(&err) => return Ok(BootReset::StillMounted),
        Err(err) => {
            return Err(DotError::internal(
                "failed to remove the mountpoint on boot reset",
                err,
            ));
        }
    }

    let active = paths.active_mounts(name);
    if let Err(err) = fs::remove_dir_all(&active) {
        if err.kind() != io::ErrorKind::NotFound {
            return Err(DotError::internal(
                "failed to discard previous active mounts",
                err,
            ));
        }
    }
    fs::create_dir(&active)
        .map_err(|err| DotError::internal("failed to recreate the activemounts directory", err))?;

    if let Err(err) = fs::remove_dir_all(paths.workdir(name)) {
        if err.kind() != io::ErrorKind::NotFound {
            return Err(DotError::internal(
                "failed to remove the workdir on boot reset",
                err,
            ));
        }
    }

    Ok(BootReset::Cleaned)
}

fn join_errors<const N: usize>(errors: [Option<io::Error>; N]) -> io::Error {
    let joined = errors
        .into_iter()
        .flatten()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    io::Error::other(joined)
}
