//! The per-volume metadata record.

use serde::{Deserialize, Serialize};

/// Metadata persisted in a volume's main directory at create time.
///
/// Field names stay PascalCase on disk so that metadata files written by
/// earlier releases keep deserializing; unknown future fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMetadata {
    /// Absolute host path acting as the overlay's read-only lower layer.
    #[serde(rename = "BaseDirPath")]
    pub base_dir_path: String,
    /// Whether the upper layer is discarded on each fresh activation.
    #[serde(rename = "Volatile", default)]
    pub volatile: bool,
}
