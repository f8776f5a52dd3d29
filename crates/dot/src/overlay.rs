//! Overlay mount plumbing.

use std::io;
use std::path::{Path, PathBuf};

use dot_common::DotPaths;

/// Prefix of the overlay mount source tag. Stray mounts stay identifiable
/// in the kernel mount table (`grep docker-on-top /proc/mounts`) without
/// consulting driver state.
pub const MOUNT_SOURCE_PREFIX: &str = "docker-on-top";

/// Overlay mount configuration for one volume activation.
#[derive(Debug, Clone)]
pub struct OverlayFs {
    /// Read-only lower layer (the volume's base directory on the host).
    pub lower_dir: PathBuf,
    /// Writable upper layer.
    pub upper_dir: PathBuf,
    /// Work directory (required by overlayfs, same filesystem as upper).
    pub work_dir: PathBuf,
    /// Mount target presented to containers.
    pub merged_dir: PathBuf,
    /// Mount source tag.
    pub source: String,
}

impl OverlayFs {
    /// Overlay configuration for a volume with the given base directory.
    #[must_use]
    pub fn for_volume(paths: &DotPaths, name: &str, base_dir: &str) -> Self {
        Self {
            lower_dir: PathBuf::from(base_dir),
            upper_dir: paths.upper(name),
            work_dir: paths.workdir(name),
            merged_dir: paths.mountpoint(name),
            source: format!("{MOUNT_SOURCE_PREFIX}_{name}"),
        }
    }

    /// The kernel mount options string.
    #[must_use]
    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// The kernel mount interface the driver consumes.
///
/// A trait seam so tests can observe activations and fault-inject kernel
/// failures without privileges.
pub trait Mounter: Send + Sync {
    /// Issue the overlay mount described by `overlay`.
    fn mount(&self, overlay: &OverlayFs) -> io::Result<()>;

    /// Ordinary unmount of `target`.
    fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Forced, detached unmount of `target` (last-resort path of Remove).
    fn unmount_detached(&self, target: &Path) -> io::Result<()>;
}

/// [`Mounter`] backed by the real mount(2) / umount2(2).
#[derive(Debug, Default)]
pub struct KernelMounter;

#[cfg(target_os = "linux")]
impl Mounter for KernelMounter {
    fn mount(&self, overlay: &OverlayFs) -> io::Result<()> {
        use rustix::mount::{mount, MountFlags};
        use std::ffi::CString;

        let options = overlay.mount_options();

        tracing::debug!(
            target = %overlay.merged_dir.display(),
            options = %options,
            "Mounting overlayfs"
        );

        let fstype = CString::new("overlay").expect("static string has no NUL");
        let options_c = CString::new(options)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "overlay options contain a NUL byte"))?;

        mount(
            overlay.source.as_str(), // source tag
            &overlay.merged_dir,     // target
            fstype.as_c_str(),       // filesystem type
            MountFlags::empty(),     // flags
            options_c.as_c_str(),    // data/options
        )
        .map_err(io::Error::from)
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        use rustix::mount::{unmount, UnmountFlags};

        tracing::debug!(target = %target.display(), "Unmounting overlayfs");
        unmount(target, UnmountFlags::empty()).map_err(io::Error::from)
    }

    fn unmount_detached(&self, target: &Path) -> io::Result<()> {
        use rustix::mount::{unmount, UnmountFlags};

        tracing::debug!(target = %target.display(), "Force-unmounting overlayfs (detached)");
        unmount(target, UnmountFlags::FORCE | UnmountFlags::DETACH).map_err(io::Error::from)
    }
}

#[cfg(not(target_os = "linux"))]
impl Mounter for KernelMounter {
    fn mount(&self, _overlay: &OverlayFs) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "overlayfs is only supported on Linux",
        ))
    }

    fn unmount(&self, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "overlayfs is only supported on Linux",
        ))
    }

    fn unmount_detached(&self, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "overlayfs is only supported on Linux",
        ))
    }
}
