//! Directory snapshots and large-file chunk manifests.
//!
//! Two independent recursive JSON shapes live here:
//!
//! - [`DirManifest`] — a `{files, dirs}` snapshot of a filesystem subtree,
//!   keyed by file digests (§3, §4.F).
//! - [`ChunkManifest`] — a per-artifact companion describing byte ranges and
//!   their digests for a large file, enabling verified ranged reads (§3, §4.G).
//!
//! Both are canonical-JSON blobs: sorted keys, no whitespace, produced via
//! `kachery_digest::canonical_json`. Building either from the filesystem is
//! intentionally decoupled from the local cache and remote protocol — this
//! crate only touches the path it is asked to walk or hash, and callers that
//! need side effects (inserting each file into the cache as it is
//! encountered) pass a callback rather than this crate depending on
//! `kachery-store`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod chunk;
mod dir;

pub use chunk::{chunk_manifest_of_bytes, chunk_manifest_of_file, should_chunk, Chunk, ChunkManifest};
pub use dir::{build_dir_manifest, truncate_one_level, Error as DirError};

use std::collections::BTreeMap;
use std::fmt;

use kachery_digest::{Alg, Digest};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// FileEntry
// ============================================================================

/// A file's recorded size and digest within a [`DirManifest`].
///
/// On disk this is `{"size": N, "sha1": hex}` or `{"size": N, "md5": hex}` —
/// exactly one digest field is present, named after its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File size in bytes.
    pub size: u64,
    /// Content digest, under whichever algorithm produced it.
    pub digest: Digest,
}

impl Serialize for FileEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("size", &self.size)?;
        map.serialize_entry(self.digest.alg().name(), self.digest.hex())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for FileEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let size = value
            .get("size")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| D::Error::missing_field("size"))?;

        for alg in [Alg::Sha1, Alg::Md5] {
            if let Some(v) = value.get(alg.name()) {
                let hex = v
                    .as_str()
                    .ok_or_else(|| D::Error::custom(format!("'{}' must be a string", alg.name())))?;
                let digest = Digest::new(alg, hex).map_err(D::Error::custom)?;
                return Ok(FileEntry { size, digest });
            }
        }
        Err(D::Error::custom("file entry has neither a 'sha1' nor an 'md5' field"))
    }
}

// ============================================================================
// DirManifest / DirSlot
// ============================================================================

/// A recursive `{files, dirs}` snapshot of a directory subtree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirManifest {
    /// Files directly in this directory, keyed by basename.
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    /// Subdirectories, keyed by basename.
    #[serde(default)]
    pub dirs: BTreeMap<String, DirSlot>,
}

impl DirManifest {
    /// `true` if this manifest describes an empty directory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

/// The value of a `dirs[name]` entry: either a fully expanded subdirectory
/// manifest, or the bare `{}` sentinel that [`truncate_one_level`] produces
/// for a non-recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirSlot {
    /// A fully expanded subdirectory manifest.
    Manifest(Box<DirManifest>),
    /// An unexpanded subdirectory, serialized as the empty JSON object `{}`.
    Collapsed,
}

impl Serialize for DirSlot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Manifest(m) => m.serialize(serializer),
            Self::Collapsed => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

impl<'de> Deserialize<'de> for DirSlot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        if let serde_json::Value::Object(map) = &value {
            if map.is_empty() {
                return Ok(Self::Collapsed);
            }
        }
        let manifest: DirManifest = serde_json::from_value(value).map_err(D::Error::custom)?;
        Ok(Self::Manifest(Box::new(manifest)))
    }
}

impl fmt::Display for DirSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest(_) => write!(f, "<expanded>"),
            Self::Collapsed => write!(f, "{{}}"),
        }
    }
}
