//! The volume driver state machine.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use dot_common::{CreateOptions, DotError, DotPaths, DotResult, VolumeMetadata, VolumeName};

use crate::lockdir::LockedDir;
use crate::metadata;
use crate::overlay::{Mounter, OverlayFs};
use crate::tree::{self, BootReset};

/// Capabilities descriptor returned on plugin discovery.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// The scope the driver declares. Always `"volume"`: volume state is
    /// local to the host.
    pub scope: &'static str,
}

/// The docker-on-top volume driver.
///
/// All volume state lives on the local filesystem under the data root;
/// there is no in-memory volume table. Mount and unmount of the same
/// volume serialize on an exclusive `flock` of that volume's
/// `activemounts/` directory, which also coordinates with other driver
/// processes sharing the data root. Operations on distinct volumes never
/// contend.
pub struct Driver {
    paths: DotPaths,
    mounter: Box<dyn Mounter>,
}

impl Driver {
    /// Open a driver over the given data root.
    ///
    /// The data root is created if missing. Every volume subtree already
    /// present is reconciled with reality (the boot reset): a leftover
    /// `mountpoint/` is removed and stale active mounts are discarded,
    /// unless the overlay is still mounted, in which case the subtree is
    /// left alone and a warning is emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the data root cannot be created or listed, or
    /// if a discovered subtree fails to reset for a reason other than
    /// "still mounted".
    pub fn new(paths: DotPaths, mounter: Box<dyn Mounter>) -> DotResult<Self> {
        fs::create_dir_all(paths.root()).map_err(|err| {
            tracing::error!(root = %paths.root().display(), %err, "Failed to create the data root");
            DotError::internal("failed to create the data root", err)
        })?;

        let driver = Self { paths, mounter };
        driver.boot_reset_all()?;
        Ok(driver)
    }

    /// The path layout this driver operates on.
    #[must_use]
    pub fn paths(&self) -> &DotPaths {
        &self.paths
    }

    fn boot_reset_all(&self) -> DotResult<()> {
        let entries = fs::read_dir(self.paths.root()).map_err(|err| {
            tracing::error!(%err, "Failed to list the data root");
            DotError::internal("failed to list contents of the data root", err)
        })?;

        let mut still_mounted = false;
        for entry in entries {
            let entry = entry.map_err(|err| {
                tracing::error!(%err, "Failed to list the data root");
                DotError::internal("failed to list contents of the data root", err)
            })?;
            let volume = entry.file_name().to_string_lossy().into_owned();

            match tree::boot_reset(&self.paths, &volume) {
                Ok(BootReset::Cleaned) => {
                    tracing::info!(volume, "Detected volume. The state was dirty, cleaned successfully");
                }
                Ok(BootReset::AlreadyClean) => {
                    tracing::info!(volume, "Detected volume. The state is clean");
                }
                Ok(BootReset::StillMounted) => {
                    tracing::info!(volume, "Detected volume. The state is dirty: it is still mounted");
                    still_mounted = true;
                }
                Err(err) => {
                    tracing::error!(volume, %err, "Failed to reset volume on boot");
                    return Err(err);
                }
            }
        }

        if still_mounted {
            tracing::warn!(
                "Some of the detected volumes were already mounted when the driver started. If \
                 containers with those volumes mounted have exited while the driver was down, the \
                 overlays stay mounted until the machine reboots, and volatile volumes will not \
                 discard their changes until then"
            );
        }

        Ok(())
    }

    /// Create a volume.
    ///
    /// The name must match the accepted format, the options must be within
    /// `{base, volatile}`, and the base directory must exist on the host
    /// (probed with an open-and-close so a bad base is reported at create
    /// time rather than at first mount).
    ///
    /// # Errors
    ///
    /// User mistakes surface verbatim; any partial tree left by a failure
    /// is destroyed before the error is returned.
    pub fn create(&self, name: &str, options: &HashMap<String, String>) -> DotResult<()> {
        tracing::debug!(name, ?options, "Request Create");

        let name = VolumeName::new(name)?;
        let options = CreateOptions::parse(options)?;
        self.probe_base(&options.base)?;

        tree::create(&self.paths, name.as_str())?;

        let meta = VolumeMetadata {
            base_dir_path: options.base,
            volatile: options.volatile,
        };
        if let Err(err) = metadata::write(&self.paths, name.as_str(), &meta) {
            let _ = tree::destroy(&self.paths, name.as_str()); // errors are logged inside
            return Err(err);
        }

        Ok(())
    }

    fn probe_base(&self, base: &str) -> DotResult<()> {
        match File::open(base) {
            Ok(dir) => {
                drop(dir);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(base, "Base directory does not exist. Volume not created");
                Err(DotError::BaseDoesNotExist {
                    base: base.to_string(),
                })
            }
            Err(err) => {
                tracing::error!(base, %err, "Failed to open the base directory");
                Err(DotError::internal("failed to open the base directory", err))
            }
        }
    }

    /// List the names of all volumes. The data root is the system of
    /// record: its immediate children are the volumes.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Internal`] if the data root cannot be listed.
    pub fn list(&self) -> DotResult<Vec<String>> {
        tracing::debug!("Request List");

        let entries = fs::read_dir(self.paths.root()).map_err(|err| {
            tracing::error!(%err, "Failed to list contents of the data root");
            DotError::internal("failed to list contents of the data root", err)
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                tracing::error!(%err, "Failed to list contents of the data root");
                DotError::internal("failed to list contents of the data root", err)
            })?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    /// Report whether a volume exists. Only the main directory's existence
    /// is checked; the deeper structure is not validated.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::NoSuchVolume`] if the main directory does not
    /// exist.
    pub fn get(&self, name: &str) -> DotResult<()> {
        tracing::debug!(name, "Request Get");

        match File::open(self.paths.volume(name)) {
            Ok(dir) => {
                drop(dir);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(DotError::NoSuchVolume {
                name: name.to_string(),
            }),
            Err(err) => {
                tracing::error!(volume = name, %err, "Failed to open the volume's main directory");
                Err(DotError::internal(
                    "failed to open the volume's main directory",
                    err,
                ))
            }
        }
    }

    /// The volume's mountpoint path, returned unconditionally: the daemon
    /// may ask for it before the volume is mounted.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        tracing::debug!(name, "Request Path");
        self.paths.mountpoint(name)
    }

    /// Remove a volume, recursively erasing its main directory.
    ///
    /// The daemon is expected to have unmounted the volume first. A
    /// lingering mountpoint is still detected and force-unmounted
    /// (detached) rather than leaked; if even that fails, nothing is
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Internal`] on failure. A failure of the final
    /// recursive removal leaves the volume partially removed and requires
    /// operator intervention.
    pub fn remove(&self, name: &str) -> DotResult<()> {
        tracing::debug!(name, "Request Remove");

        let mountpoint = self.paths.mountpoint(name);
        match fs::remove_dir(&mountpoint) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) if tree::is_busy(&err) => {
                if let Err(unmount_err) = self.mounter.unmount_detached(&mountpoint) {
                    tracing::error!(
                        volume = name,
                        %unmount_err,
                        "Failed to force-unmount the lingering overlay. Leaving the volume untouched"
                    );
                    return Err(DotError::internal(
                        "failed to unmount the lingering overlay",
                        unmount_err,
                    ));
                }
                tracing::warn!(
                    volume = name,
                    "An overlay was still mounted on Remove; it has been force-unmounted (detached)"
                );
            }
            Err(err) => {
                tracing::error!(volume = name, %err, "Failed to remove the mountpoint");
                return Err(DotError::internal("failed to remove the mountpoint", err));
            }
        }

        tree::destroy(&self.paths, name)
    }

    /// Mount a volume for the given request ID, returning the mountpoint.
    ///
    /// The first activation issues the kernel overlay mount (discarding
    /// `upper/` first when the volume is volatile); later callers join the
    /// existing activation without a kernel call. Either way a marker file
    /// named after the request ID is recorded in `activemounts/`.
    ///
    /// # Errors
    ///
    /// [`DotError::NoSuchVolume`] if the volume does not exist,
    /// [`DotError::KernelMount`] if the kernel reports the base directory
    /// missing, [`DotError::Critical`] if the kernel mount succeeded but
    /// the marker file could not be written (the mount is left in place),
    /// [`DotError::Internal`] otherwise.
    pub fn mount(&self, name: &str, id: &str) -> DotResult<PathBuf> {
        tracing::debug!(name, id, "Request Mount");

        let meta = metadata::read(&self.paths, name)?;

        // Exclusive lock on activemounts/ for the whole remainder of the
        // operation. Unlocking between the emptiness check and the kernel
        // mount would let a peer observe our marker and treat an in-flight
        // mount as live.
        let _lock = LockedDir::open(&self.paths.active_mounts(name))?;

        if self.active_mount_count(name, 1)? == 0 {
            // No other containers use the volume: this activation mounts
            tree::pre_mount(&self.paths, name, meta.volatile)?;

            let overlay = OverlayFs::for_volume(&self.paths, name, &meta.base_dir_path);
            if let Err(err) = self.mounter.mount(&overlay) {
                if err.kind() == io::ErrorKind::NotFound {
                    tracing::debug!(volume = name, %err, "Overlay mount failed: the base directory is missing");
                    return Err(DotError::KernelMount {
                        name: name.to_string(),
                        source: err,
                    });
                }
                tracing::error!(volume = name, %err, "Failed to mount overlay");
                return Err(DotError::internal(
                    "failed to mount overlay for the volume",
                    err,
                ));
            }
            tracing::debug!(volume = name, mountpoint = %overlay.merged_dir.display(), "Mounted volume");
        } else {
            tracing::debug!(
                volume = name,
                "Volume is already mounted for some other container. Joining without remounting"
            );
        }

        let marker = self.paths.active_mount(name, id);
        match File::create_new(&marker) {
            Ok(file) => drop(file), // contents are ignored; existence is the record
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                // The docker daemon is known to reuse a mount ID for a
                // copy-out from a running container while the original
                // mount is live: https://github.com/moby/moby/issues/47964
                tracing::warn!(volume = name, id, "Active mount marker already exists");
            }
            Err(err) => {
                // The kernel mount is live but the driver cannot record
                // the activation; the mount must not be rolled back under
                // a container that may already use it
                let mountpoint = self.paths.mountpoint(name);
                tracing::error!(
                    volume = name,
                    id,
                    %err,
                    critical = true,
                    "Failed to create the active mount marker. The volume can no longer be \
                     mounted or unmounted through the driver"
                );
                return Err(DotError::Critical {
                    message: format!(
                        "failed to create an active mount file: {err}. The volume is now locked \
                         (run `umount {}` to unlock). Human interaction is required. Please, \
                         report this bug",
                        mountpoint.display()
                    ),
                });
            }
        }

        Ok(self.paths.mountpoint(name))
    }

    /// Unmount a volume for the given request ID.
    ///
    /// If this caller is the last user, the overlay is unmounted and the
    /// mount-only directories are removed; otherwise only the caller's
    /// marker file is dropped.
    ///
    /// # Errors
    ///
    /// A kernel unmount failure is returned with the state left intact.
    /// [`DotError::Critical`] if the marker file could not be removed (the
    /// volume would appear used by a caller that no longer exists).
    /// Cleanup failures after a successful kernel unmount are deferred and
    /// returned once the marker has been dropped.
    pub fn unmount(&self, name: &str, id: &str) -> DotResult<()> {
        tracing::debug!(name, id, "Request Unmount");

        // Same locking discipline as in mount
        let _lock = LockedDir::open(&self.paths.active_mounts(name))?;

        let mut deferred: Option<DotError> = None;
        if self.active_mount_count(name, 2)? <= 1 {
            // No _other_ container uses the volume: unmount and clean up
            let mountpoint = self.paths.mountpoint(name);
            if let Err(err) = self.mounter.unmount(&mountpoint) {
                tracing::error!(volume = name, mountpoint = %mountpoint.display(), %err, "Failed to unmount");
                return Err(DotError::internal("failed to unmount the overlay", err));
            }
            // Errors are reported after the marker is dropped
            deferred = tree::post_unmount(&self.paths, name).err();
        } else {
            tracing::debug!(
                volume = name,
                "Volume is still mounted in some other container. Skipping the kernel unmount"
            );
        }

        // Regardless of whether cleanup succeeded, drop this caller from
        // the volume users so the next mount request knows to mount the
        // overlay again.
        let marker = self.paths.active_mount(name, id);
        match fs::remove_file(&marker) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(volume = name, id, "Active mount marker was already gone");
            }
            Err(err) => {
                tracing::error!(
                    volume = name,
                    id,
                    %err,
                    critical = true,
                    "Failed to remove the active mount marker. The volume now appears used by a \
                     container that no longer exists"
                );
                return Err(DotError::Critical {
                    message: format!(
                        "failed to remove the active mount file: {err}. The volume is now \
                         considered used by a container that no longer exists. Human interaction \
                         is required: remove {} manually to fix the problem",
                        marker.display()
                    ),
                });
            }
        }

        match deferred {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The fixed capabilities descriptor.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        tracing::debug!("Request Capabilities: plugin discovery");
        Capabilities { scope: "volume" }
    }

    // Count entries in activemounts/, reading at most `cap` of them. The
    // caller must hold the volume's directory lock.
    fn active_mount_count(&self, name: &str, cap: usize) -> DotResult<usize> {
        let dir = self.paths.active_mounts(name);
        let entries = fs::read_dir(&dir).map_err(|err| {
            tracing::error!(volume = name, %err, "Failed to list the activemounts directory");
            DotError::internal("failed to list activemounts/", err)
        })?;

        let mut count = 0;
        for entry in entries.take(cap) {
            entry.map_err(|err| {
                tracing::error!(volume = name, %err, "Failed to list the activemounts directory");
                DotError::internal("failed to list activemounts/", err)
            })?;
            count += 1;
        }
        Ok(count)
    }
}
