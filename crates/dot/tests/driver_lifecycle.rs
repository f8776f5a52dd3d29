//! Integration tests for the volume driver state machine.
//!
//! Kernel mounts are replaced by a recording fake so the tests run
//! unprivileged; everything else (trees, markers, locks, metadata) hits
//! the real filesystem in a temporary data root.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use dot::{Driver, Mounter, OverlayFs};
use dot_common::{DotError, DotPaths};
use tempfile::TempDir;

/// Records overlay activations instead of calling the kernel. Mount fails
/// with NotFound when the lower directory is missing, mirroring the
/// kernel's ENOENT for a deleted base.
#[derive(Clone, Default)]
struct FakeMounter {
    mounted: Arc<Mutex<BTreeSet<PathBuf>>>,
    total_mounts: Arc<AtomicUsize>,
}

impl FakeMounter {
    fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().unwrap().contains(target)
    }

    fn total_mounts(&self) -> usize {
        self.total_mounts.load(Ordering::SeqCst)
    }
}

impl Mounter for FakeMounter {
    fn mount(&self, overlay: &OverlayFs) -> io::Result<()> {
        if !overlay.lower_dir.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no such file or directory",
            ));
        }
        self.mounted
            .lock()
            .unwrap()
            .insert(overlay.merged_dir.clone());
        self.total_mounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        if !self.mounted.lock().unwrap().remove(target) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not mounted"));
        }
        Ok(())
    }

    fn unmount_detached(&self, target: &Path) -> io::Result<()> {
        self.unmount(target)
    }
}

struct Fixture {
    _root: TempDir,
    base: TempDir,
    driver: Driver,
    mounter: FakeMounter,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let mounter = FakeMounter::default();
        let driver = Driver::new(
            DotPaths::with_root(root.path()),
            Box::new(mounter.clone()),
        )
        .unwrap();
        Self {
            _root: root,
            base,
            driver,
            mounter,
        }
    }

    fn base_options(&self) -> HashMap<String, String> {
        options(&[("base", self.base.path().to_str().unwrap())])
    }

    fn create_volume(&self, name: &str) {
        self.driver.create(name, &self.base_options()).unwrap();
    }

    fn paths(&self) -> &DotPaths {
        self.driver.paths()
    }
}

fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn create_then_get_and_list() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    fx.driver.get("v1").unwrap();
    assert_eq!(fx.driver.list().unwrap(), vec!["v1".to_string()]);

    assert!(fx.paths().metadata("v1").is_file());
    assert!(fx.paths().upper("v1").is_dir());
    assert!(fx.paths().active_mounts("v1").is_dir());
}

#[test]
fn create_rejects_invalid_names() {
    let fx = Fixture::new();
    let opts = fx.base_options();

    assert!(matches!(
        fx.driver.create("_x", &opts),
        Err(DotError::InvalidName { .. })
    ));
    assert!(matches!(
        fx.driver.create("x*y", &opts),
        Err(DotError::InvalidName { .. })
    ));
    assert!(matches!(
        fx.driver.create("a/b", &opts),
        Err(DotError::NameContainsSlash { .. })
    ));
    fx.driver.create("x.y-z_1", &opts).unwrap();
}

#[test]
fn create_rejects_invalid_bases() {
    let fx = Fixture::new();

    assert!(matches!(
        fx.driver.create("v1", &options(&[("base", "a/b")])),
        Err(DotError::BaseNotAbsolute { .. })
    ));
    assert!(matches!(
        fx.driver.create("v1", &options(&[("base", "/with,comma")])),
        Err(DotError::BaseHasForbiddenChars { .. })
    ));
    assert!(matches!(
        fx.driver.create("v1", &options(&[("base", "/no:colon")])),
        Err(DotError::BaseHasForbiddenChars { .. })
    ));
    assert!(matches!(
        fx.driver.create("v1", &options(&[("base", "/does/not/exist")])),
        Err(DotError::BaseDoesNotExist { .. })
    ));
    // Nothing must be left behind by the rejected attempts
    assert!(fx.driver.list().unwrap().is_empty());
}

#[test]
fn create_existing_volume_fails() {
    let fx = Fixture::new();
    fx.create_volume("v1");
    let err = fx.driver.create("v1", &fx.base_options()).unwrap_err();
    assert!(matches!(err, DotError::AlreadyExists { .. }));
    assert_eq!(err.to_string(), "volume already exists");
}

#[test]
fn remove_then_get_fails() {
    let fx = Fixture::new();
    fx.create_volume("v1");
    fx.driver.remove("v1").unwrap();

    assert!(matches!(
        fx.driver.get("v1"),
        Err(DotError::NoSuchVolume { .. })
    ));
    assert!(!fx.paths().volume("v1").exists());
}

#[test]
fn path_answers_before_mount() {
    let fx = Fixture::new();
    fx.create_volume("v1");
    assert_eq!(fx.driver.path("v1"), fx.paths().mountpoint("v1"));
}

#[test]
fn mount_then_unmount_restores_pre_mount_state() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    let mountpoint = fx.driver.mount("v1", "c1").unwrap();
    assert_eq!(mountpoint, fx.paths().mountpoint("v1"));
    assert!(fx.mounter.is_mounted(&mountpoint));
    assert!(fx.paths().active_mount("v1", "c1").is_file());
    assert!(fx.paths().workdir("v1").is_dir());

    fx.driver.unmount("v1", "c1").unwrap();
    assert!(!fx.mounter.is_mounted(&mountpoint));
    assert!(!fx.paths().mountpoint("v1").exists());
    assert!(!fx.paths().workdir("v1").exists());
    assert!(!fx.paths().active_mount("v1", "c1").exists());
    // The always-present entries survive
    assert!(fx.paths().upper("v1").is_dir());
    assert!(fx.paths().metadata("v1").is_file());
}

#[test]
fn second_mount_joins_existing_activation() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    fx.driver.mount("v1", "c1").unwrap();
    fx.driver.mount("v1", "c2").unwrap();
    assert_eq!(fx.mounter.total_mounts(), 1);
    assert!(fx.paths().active_mount("v1", "c1").is_file());
    assert!(fx.paths().active_mount("v1", "c2").is_file());

    fx.driver.unmount("v1", "c1").unwrap();
    assert!(fx.mounter.is_mounted(&fx.paths().mountpoint("v1")));
    assert!(fx.paths().active_mount("v1", "c2").is_file());

    fx.driver.unmount("v1", "c2").unwrap();
    assert!(!fx.mounter.is_mounted(&fx.paths().mountpoint("v1")));
}

#[test]
fn concurrent_mounts_issue_one_kernel_mount() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    let driver = Arc::new(fx.driver);
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["c1", "c2"]
        .into_iter()
        .map(|id| {
            let driver = Arc::clone(&driver);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                driver.mount("v1", id).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(fx.mounter.total_mounts(), 1);
    assert!(driver.paths().active_mount("v1", "c1").is_file());
    assert!(driver.paths().active_mount("v1", "c2").is_file());
}

#[test]
fn non_volatile_upper_survives_reactivation() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    fx.driver.mount("v1", "c1").unwrap();
    // A container write lands in the upper layer
    fs::write(fx.paths().upper("v1").join("b"), b"456").unwrap();
    fx.driver.unmount("v1", "c1").unwrap();

    fx.driver.mount("v1", "c2").unwrap();
    assert_eq!(
        fs::read(fx.paths().upper("v1").join("b")).unwrap(),
        b"456"
    );
    fx.driver.unmount("v1", "c2").unwrap();
    // Writes never leak into the base directory
    assert!(!fx.base.path().join("b").exists());
}

#[test]
fn volatile_upper_is_discarded_on_fresh_activation() {
    let fx = Fixture::new();
    fx.driver
        .create(
            "v1",
            &options(&[
                ("base", fx.base.path().to_str().unwrap()),
                ("volatile", "true"),
            ]),
        )
        .unwrap();

    fx.driver.mount("v1", "c1").unwrap();
    fs::write(fx.paths().upper("v1").join("b"), b"456").unwrap();
    fx.driver.unmount("v1", "c1").unwrap();

    fx.driver.mount("v1", "c2").unwrap();
    assert!(!fx.paths().upper("v1").join("b").exists());
}

#[test]
fn duplicate_mount_id_is_idempotent() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    fx.driver.mount("v1", "c1").unwrap();
    // The docker daemon may reuse the ID for a copy-out request
    fx.driver.mount("v1", "c1").unwrap();
    assert_eq!(fx.mounter.total_mounts(), 1);
    assert_eq!(
        fs::read_dir(fx.paths().active_mounts("v1")).unwrap().count(),
        1
    );

    fx.driver.unmount("v1", "c1").unwrap();
    assert!(!fx.mounter.is_mounted(&fx.paths().mountpoint("v1")));
    assert!(!fx.paths().mountpoint("v1").exists());
}

#[test]
fn unmount_with_missing_marker_still_succeeds() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    fx.driver.mount("v1", "c1").unwrap();
    fs::remove_file(fx.paths().active_mount("v1", "c1")).unwrap();

    fx.driver.unmount("v1", "c1").unwrap();
    assert!(!fx.mounter.is_mounted(&fx.paths().mountpoint("v1")));
}

#[test]
fn mount_of_missing_volume_fails() {
    let fx = Fixture::new();
    assert!(matches!(
        fx.driver.mount("ghost", "c1"),
        Err(DotError::NoSuchVolume { .. })
    ));
}

#[test]
fn mount_with_deleted_base_hints_at_the_base_directory() {
    let root = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    let mounter = FakeMounter::default();
    let driver = Driver::new(
        DotPaths::with_root(root.path()),
        Box::new(mounter.clone()),
    )
    .unwrap();

    driver
        .create("v1", &options(&[("base", base.path().to_str().unwrap())]))
        .unwrap();
    let base_path = base.path().to_path_buf();
    drop(base);
    assert!(!base_path.exists());

    let err = driver.mount("v1", "c1").unwrap_err();
    assert!(matches!(err, DotError::KernelMount { .. }));
    assert!(err.to_string().contains("does the base directory exist?"));
}

#[test]
fn marker_write_failure_after_mount_is_critical() {
    let fx = Fixture::new();
    fx.create_volume("v1");

    // An ID that cannot be a file name makes the marker write fail after
    // the kernel mount has already happened
    let err = fx.driver.mount("v1", "missing-dir/c1").unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, DotError::Critical { .. }));
    assert!(message.contains(fx.paths().mountpoint("v1").to_str().unwrap()));
    assert!(message.contains("umount"));
    // The kernel mount must remain in place
    assert!(fx.mounter.is_mounted(&fx.paths().mountpoint("v1")));
}

#[test]
fn remove_with_stale_mountpoint_succeeds() {
    let fx = Fixture::new();
    fx.create_volume("v1");
    fs::create_dir(fx.paths().mountpoint("v1")).unwrap();

    fx.driver.remove("v1").unwrap();
    assert!(!fx.paths().volume("v1").exists());
}

#[test]
fn remove_of_absent_volume_succeeds() {
    let fx = Fixture::new();
    fx.driver.remove("never-created").unwrap();
}

#[test]
fn boot_reset_reconciles_a_dirty_tree() {
    let root = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();

    {
        let mounter = FakeMounter::default();
        let driver = Driver::new(
            DotPaths::with_root(root.path()),
            Box::new(mounter.clone()),
        )
        .unwrap();
        driver
            .create("v1", &options(&[("base", base.path().to_str().unwrap())]))
            .unwrap();
        driver.mount("v1", "c1").unwrap();
        // Driver goes down without unmount; the fake kernel state vanishes
        // with it, leaving a stale tree behind
    }

    let mounter = FakeMounter::default();
    let driver = Driver::new(
        DotPaths::with_root(root.path()),
        Box::new(mounter.clone()),
    )
    .unwrap();

    let paths = driver.paths();
    assert!(!paths.mountpoint("v1").exists());
    assert!(!paths.workdir("v1").exists());
    assert_eq!(fs::read_dir(paths.active_mounts("v1")).unwrap().count(), 0);
    // Metadata and upper survive the reset
    assert!(paths.metadata("v1").is_file());
    assert!(paths.upper("v1").is_dir());

    // The volume is fully usable again
    driver.get("v1").unwrap();
    driver.mount("v1", "c2").unwrap();
    assert_eq!(mounter.total_mounts(), 1);
}

#[test]
fn capabilities_declare_volume_scope() {
    let fx = Fixture::new();
    assert_eq!(fx.driver.capabilities().scope, "volume");
}
