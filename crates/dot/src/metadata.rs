//! Volume metadata persistence.

use std::fs;
use std::io;

use dot_common::{DotError, DotPaths, DotResult, VolumeMetadata};

/// Read a volume's metadata record.
///
/// # Errors
///
/// A missing metadata file surfaces as [`DotError::NoSuchVolume`]; a
/// corrupt one as [`DotError::Internal`]. Readers always consume the whole
/// file, so a partially written record is indistinguishable from a corrupt
/// one and reported the same way.
pub fn read(paths: &DotPaths, name: &str) -> DotResult<VolumeMetadata> {
    let path = paths.metadata(name);
    let payload = match fs::read(&path) {
        Ok(payload) => payload,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(DotError::NoSuchVolume {
                name: name.to_string(),
            });
        }
        Err(err) => {
            tracing::error!(volume = name, %err, "Failed to read volume metadata");
            return Err(DotError::internal(
                "failed to retrieve the volume's metadata",
                err,
            ));
        }
    };

    serde_json::from_slice(&payload).map_err(|err| {
        tracing::error!(volume = name, %err, "Volume metadata is corrupt");
        DotError::internal(
            "failed to parse the volume's metadata",
            io::Error::other(err),
        )
    })
}

/// Write a volume's metadata record as a single whole-file write.
///
/// # Errors
///
/// Returns [`DotError::Internal`] if serialization or the write fails.
pub fn write(paths: &DotPaths, name: &str, metadata: &VolumeMetadata) -> DotResult<()> {
    let payload = serde_json::to_vec(metadata).map_err(|err| {
        tracing::error!(volume = name, %err, "Failed to serialize volume metadata");
        DotError::internal(
            "failed to serialize metadata for the volume",
            io::Error::other(err),
        )
    })?;

    fs::write(paths.metadata(name), payload).map_err(|err| {
        tracing::error!(volume = name, %err, "Failed to write volume metadata");
        DotError::internal("failed to store metadata for the volume", err)
    })
}
