//! Stat-fingerprint cache: skip rehashing a file whose `(path, size, ino,
//! mtime, ctime)` tuple is unchanged since the last time it was hashed (§4.C).

use std::fs;
use std::io;
use std::path::Path;

use kachery_digest::{digest_of_canonical_json, hash_file, Alg, Digest};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::jsonfile::{read_json, write_json_atomic};
use crate::{layout, root};
use crate::Error;

/// Below this size, always hash directly rather than consult the fingerprint
/// cache — the JSON housekeeping costs more than just reading the file (§4.A).
pub(crate) const SMALL_FILE_THRESHOLD: u64 = 100_000;

/// A file's identity snapshot at the moment it was last hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Absolute path at the time of hashing.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Inode number.
    pub ino: u64,
    /// Modification time, seconds component.
    pub mtime_sec: i64,
    /// Modification time, nanoseconds component.
    pub mtime_nsec: u32,
    /// Status-change time, seconds component.
    pub ctime_sec: i64,
    /// Status-change time, nanoseconds component.
    pub ctime_nsec: u32,
}

impl Fingerprint {
    fn of(path: &Path, metadata: &fs::Metadata) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        let absolute = fs::canonicalize(path)?;
        Ok(Self {
            path: absolute.to_string_lossy().into_owned(),
            size: metadata.len(),
            ino: metadata.ino(),
            mtime_sec: metadata.mtime(),
            mtime_nsec: u32::try_from(metadata.mtime_nsec()).unwrap_or(0),
            ctime_sec: metadata.ctime(),
            ctime_nsec: u32::try_from(metadata.ctime_nsec()).unwrap_or(0),
        })
    }
}

/// The current fingerprint of `path`, or `None` if it does not exist.
pub(crate) fn fingerprint_of(path: &Path) -> io::Result<Option<Fingerprint>> {
    match fs::metadata(path) {
        Ok(metadata) => Fingerprint::of(path, &metadata).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// A `{stat, <alg>: hex}` entry — the body of a `.record.json` file, or one
/// element of a `.hints.json` file's `files` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatEntry {
    pub(crate) stat: Fingerprint,
    pub(crate) digest: Digest,
}

impl Serialize for StatEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("stat", &self.stat)?;
        map.serialize_entry(self.digest.alg().name(), self.digest.hex())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for StatEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let stat = value
            .get("stat")
            .cloned()
            .ok_or_else(|| D::Error::missing_field("stat"))?;
        let stat: Fingerprint = serde_json::from_value(stat).map_err(D::Error::custom)?;

        for alg in [Alg::Sha1, Alg::Md5] {
            if let Some(v) = value.get(alg.name()) {
                let hex = v
                    .as_str()
                    .ok_or_else(|| D::Error::custom(format!("'{}' must be a string", alg.name())))?;
                let digest = Digest::new(alg, hex).map_err(D::Error::custom)?;
                return Ok(StatEntry { stat, digest });
            }
        }
        Err(D::Error::custom("stat entry has neither a 'sha1' nor an 'md5' field"))
    }
}

/// The body of a `.hints.json` file: a weak list of prior locations an
/// artifact with this digest was observed at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct HintsFile {
    #[serde(default)]
    pub(crate) files: Vec<StatEntry>,
}

/// Return the digest of the file at `path`, consulting (and maintaining) the
/// stat-fingerprint cache for files at or above [`SMALL_FILE_THRESHOLD`].
pub fn fingerprint_digest(alg: Alg, path: &Path) -> Result<Digest, Error> {
    let metadata = fs::metadata(path).map_err(Error::Io)?;
    if metadata.len() < SMALL_FILE_THRESHOLD {
        return hash_required(path, alg);
    }

    let root_dir = root::storage_root(alg);

    // Step 1: is this path already sitting at its own canonical cache location?
    if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
        if name.len() == alg.digest_len() {
            if let Ok(digest) = Digest::new(alg, name) {
                if layout::artifact_path(&root_dir, alg, digest.hex()) == *path {
                    return Ok(digest);
                }
            }
        }
    }

    let fp = Fingerprint::of(path, &metadata).map_err(Error::Io)?;
    let fp_key = digest_of_canonical_json(&fp).map_err(Error::Digest)?;
    let record_path = layout::record_path(&root_dir, alg, fp_key.hex());
    let record_lock = layout::lock_path(&record_path);

    {
        let _guard = kachery_lock::acquire_shared(&record_lock).map_err(Error::Io)?;
        if let Some(entry) = read_json::<StatEntry>(&record_path) {
            if entry.stat == fp && entry.digest.alg() == alg {
                log::debug!("kachery-store: fingerprint hit for {}", path.display());
                return Ok(entry.digest);
            }
        }
    }

    let digest = hash_required(path, alg)?;

    {
        let _guard = kachery_lock::acquire_exclusive(&record_lock).map_err(Error::Io)?;
        let entry = StatEntry { stat: fp.clone(), digest: digest.clone() };
        if let Err(e) = write_json_atomic(&record_path, &entry) {
            log::warn!("kachery-store: failed to write {}: {e}", record_path.display());
        }
    }

    let hints_path = layout::hints_path(&root_dir, alg, digest.hex());
    let hints_lock = layout::lock_path(&hints_path);
    {
        let _guard = kachery_lock::acquire_exclusive(&hints_lock).map_err(Error::Io)?;
        let mut hints: HintsFile = read_json(&hints_path).unwrap_or_default();
        hints.files.push(StatEntry { stat: fp, digest: digest.clone() });
        if let Err(e) = write_json_atomic(&hints_path, &hints) {
            log::warn!("kachery-store: failed to write {}: {e}", hints_path.display());
        }
    }

    Ok(digest)
}

fn hash_required(path: &Path, alg: Alg) -> Result<Digest, Error> {
    hash_file(path, alg)
        .map_err(Error::Digest)?
        .ok_or_else(|| Error::Io(io::Error::from(io::ErrorKind::NotFound)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs as stdfs;

    #[test]
    #[serial]
    fn fingerprint_digest_matches_direct_hash() {
        root::reset();
        let cache_dir = tempfile::tempdir().unwrap();
        root::set_storage_dir(Some(cache_dir.path().to_path_buf()));

        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("f.bin");
        let data = vec![7u8; 200_000];
        stdfs::write(&path, &data).unwrap();

        let digest = fingerprint_digest(Alg::Sha1, &path).unwrap();
        assert_eq!(digest.hex(), kachery_digest::hash_bytes(&data, Alg::Sha1).hex());
        root::reset();
    }

    #[test]
    #[serial]
    fn second_call_reuses_record_without_rehashing_identity() {
        root::reset();
        let cache_dir = tempfile::tempdir().unwrap();
        root::set_storage_dir(Some(cache_dir.path().to_path_buf()));

        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("f.bin");
        stdfs::write(&path, vec![9u8; 150_000]).unwrap();

        let first = fingerprint_digest(Alg::Sha1, &path).unwrap();
        let second = fingerprint_digest(Alg::Sha1, &path).unwrap();
        assert_eq!(first, second);

        let root_dir = root::storage_root(Alg::Sha1);
        let fp = fingerprint_of(&path).unwrap().unwrap();
        let fp_key = digest_of_canonical_json(&fp).unwrap();
        assert!(layout::record_path(&root_dir, Alg::Sha1, fp_key.hex()).exists());
        root::reset();
    }

    #[test]
    #[serial]
    fn sha1_and_md5_records_do_not_collide_under_a_shared_root() {
        root::reset();
        let cache_dir = tempfile::tempdir().unwrap();
        root::set_storage_dir(Some(cache_dir.path().to_path_buf()));

        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("f.bin");
        stdfs::write(&path, vec![5u8; 150_000]).unwrap();

        let sha1 = fingerprint_digest(Alg::Sha1, &path).unwrap();
        let md5 = fingerprint_digest(Alg::Md5, &path).unwrap();
        assert_ne!(sha1.hex(), md5.hex());

        // Re-requesting each algorithm must still return its own digest, not
        // whichever one happened to be recorded first at the shared stat key.
        assert_eq!(fingerprint_digest(Alg::Sha1, &path).unwrap(), sha1);
        assert_eq!(fingerprint_digest(Alg::Md5, &path).unwrap(), md5);
        root::reset();
    }

    #[test]
    #[serial]
    fn touching_mtime_forces_a_rehash() {
        root::reset();
        let cache_dir = tempfile::tempdir().unwrap();
        root::set_storage_dir(Some(cache_dir.path().to_path_buf()));

        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("f.bin");
        stdfs::write(&path, vec![1u8; 150_000]).unwrap();
        let first = fingerprint_digest(Alg::Sha1, &path).unwrap();

        stdfs::write(&path, vec![2u8; 150_000]).unwrap();
        let second = fingerprint_digest(Alg::Sha1, &path).unwrap();

        assert_ne!(first, second);
        root::reset();
    }

    #[test]
    #[serial]
    fn small_files_bypass_the_fingerprint_cache_entirely() {
        root::reset();
        let cache_dir = tempfile::tempdir().unwrap();
        root::set_storage_dir(Some(cache_dir.path().to_path_buf()));

        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("small.bin");
        stdfs::write(&path, b"abctest").unwrap();

        let digest = fingerprint_digest(Alg::Sha1, &path).unwrap();
        assert_eq!(digest.hex(), "69c2c724026dde5fd51e796b3d84fea6aeb6f5f0");

        let root_dir = root::storage_root(Alg::Sha1);
        let fp = fingerprint_of(&path).unwrap().unwrap();
        let fp_key = digest_of_canonical_json(&fp).unwrap();
        assert!(!layout::record_path(&root_dir, Alg::Sha1, fp_key.hex()).exists());
        root::reset();
    }

    #[test]
    fn stat_entry_roundtrips_through_json() {
        let entry = StatEntry {
            stat: Fingerprint {
                path: "/x/y.bin".to_owned(),
                size: 10,
                ino: 1,
                mtime_sec: 2,
                mtime_nsec: 3,
                ctime_sec: 4,
                ctime_nsec: 5,
            },
            digest: Digest::new(Alg::Sha1, "a".repeat(40)).unwrap(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: StatEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
