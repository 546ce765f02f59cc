//! The local hash cache: content-addressed filesystem layout, put/find by
//! digest, and streaming verified download (§4.D).

use std::fs;
use std::io::{self, Read, Write as _};
use std::path::{Path, PathBuf};

use kachery_digest::{Alg, Digest};
use md5::{Digest as _, Md5};
use sha1::Sha1;

use crate::fingerprint::{fingerprint_digest, fingerprint_of, HintsFile, StatEntry};
use crate::jsonfile::{read_json, write_json_atomic};
use crate::{layout, root, Error};

const READ_CHUNK: usize = 64 * 1024;

/// Locate a cached artifact: canonical path, then the alternate root, then
/// surviving hints (pruning stale ones), then the SHA-1 bootstrap directory.
#[must_use]
pub fn find(alg: Alg, hash: &Digest) -> Option<PathBuf> {
    let root_dir = root::storage_root(alg);
    let canonical = layout::artifact_path(&root_dir, alg, hash.hex());
    if canonical.exists() {
        return Some(canonical);
    }

    if let Some(alt_root) = root::storage_root_alt() {
        let alt_path = layout::artifact_path(&alt_root, alg, hash.hex());
        if alt_path.exists() {
            return Some(alt_path);
        }
    }

    if let Some(path) = find_via_hints(&root_dir, alg, hash) {
        return Some(path);
    }

    if alg == Alg::Sha1 {
        if let Some(bootstrap) = root::bootstrap_dir() {
            let path = root::bootstrap_path(&bootstrap, hash.hex());
            if path.exists() {
                return Some(path);
            }
        }
    }

    None
}

fn find_via_hints(root_dir: &Path, alg: Alg, hash: &Digest) -> Option<PathBuf> {
    let hints_path = layout::hints_path(root_dir, alg, hash.hex());
    let hints_lock = layout::lock_path(&hints_path);
    let _guard = kachery_lock::acquire_exclusive(&hints_lock).ok()?;

    let mut hints: HintsFile = read_json(&hints_path)?;
    let mut found = None;
    let mut kept = Vec::with_capacity(hints.files.len());
    for entry in hints.files.drain(..) {
        let still_matches = matches!(
            fingerprint_of(Path::new(&entry.stat.path)),
            Ok(Some(current)) if current == entry.stat
        );
        if still_matches {
            if found.is_none() {
                found = Some(PathBuf::from(&entry.stat.path));
            }
            kept.push(entry);
        } else {
            log::debug!("kachery-store: pruning stale hint for {}", entry.stat.path);
        }
    }
    hints.files = kept;
    if let Err(e) = write_json_atomic(&hints_path, &hints) {
        log::warn!("kachery-store: failed to rewrite {}: {e}", hints_path.display());
    }
    found
}

/// Insert `path` into the local cache under its computed digest, copying (or
/// hard-linking, if `use_hard_link`) into place. Idempotent if the artifact
/// is already present.
pub fn put(path: &Path, alg: Alg, use_hard_link: bool) -> Result<(PathBuf, Digest), Error> {
    let digest = fingerprint_digest(alg, path)?;
    let root_dir = root::storage_root(alg);
    let target = layout::artifact_path(&root_dir, alg, digest.hex());
    if !target.exists() {
        materialize(path, &target, use_hard_link).map_err(Error::Io)?;
    }
    Ok((target, digest))
}

/// Like [`put`], but removes `path` once the artifact is in place.
pub fn move_in(path: &Path, alg: Alg, use_hard_link: bool) -> Result<(PathBuf, Digest), Error> {
    let (target, digest) = put(path, alg, use_hard_link)?;
    if path != target {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(Error::Io(e));
            }
        }
    }
    Ok((target, digest))
}

fn materialize(src: &Path, target: &Path, use_hard_link: bool) -> io::Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let name = target.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");

    if use_hard_link {
        // hard_link needs an absent destination, which a live NamedTempFile
        // can't offer — reserve a unique name, then free it by dropping.
        let reserved = tempfile::Builder::new().prefix(&format!("{name}.linking.")).tempfile_in(parent)?.into_temp_path();
        let tmp_path = reserved.to_path_buf();
        drop(reserved);

        if fs::hard_link(src, &tmp_path).is_err() {
            fs::copy(src, &tmp_path)?;
        }
        return match fs::rename(&tmp_path, target) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                // A concurrent put of the same content may have already won the
                // race (§5): that's success, not failure.
                if target.exists() { Ok(()) } else { Err(e) }
            }
        };
    }

    let mut tmp = tempfile::Builder::new().prefix(&format!("{name}.copying.")).tempfile_in(parent)?;
    fs::copy(src, tmp.path())?;
    tmp.persist(target).map(|_| ()).or_else(|e| if target.exists() { Ok(()) } else { Err(e.error) })
}

/// Look up a by-code artifact (the range cache's namespace). No digest
/// verification — the code itself encodes content identity.
#[must_use]
pub fn find_by_code(alg: Alg, code: &str) -> Option<PathBuf> {
    let root_dir = root::storage_root(alg);
    let path = layout::by_code_path(&root_dir, alg, code);
    path.exists().then_some(path)
}

/// Write `bytes` directly under `code`'s by-code path, atomically.
pub fn put_by_code(alg: Alg, code: &str, bytes: &[u8]) -> Result<PathBuf, Error> {
    let root_dir = root::storage_root(alg);
    let target = layout::by_code_path(&root_dir, alg, code);
    if target.exists() {
        return Ok(target);
    }
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(Error::Io)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{code}."))
        .suffix(".byrange")
        .tempfile_in(parent)
        .map_err(Error::Io)?;
    tmp.write_all(bytes).map_err(Error::Io)?;
    tmp.persist(&target)
        .map(|_| target.clone())
        .or_else(|e| if target.exists() { Ok(target.clone()) } else { Err(Error::Io(e.error)) })
}

enum StreamHasher {
    Sha1(Box<Sha1>),
    Md5(Box<Md5>),
}

impl StreamHasher {
    fn new(alg: Alg) -> Self {
        match alg {
            Alg::Sha1 => Self::Sha1(Box::new(Sha1::new())),
            Alg::Md5 => Self::Md5(Box::new(Md5::new())),
        }
    }

    fn update(&mut self, buf: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(buf),
            Self::Md5(h) => h.update(buf),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Stream `reader` into a randomized temp file while computing its digest,
/// verify size (if given) and digest against `expected_hash`, then atomically
/// rename into place. On mismatch, the temp file is removed and an
/// [`Error::IntegrityFailure`] is returned.
///
/// If `target_path` is supplied, the artifact is written there instead of the
/// canonical cache location, and also registered in the fingerprint cache so
/// a later lookup of that exact path short-circuits the hash.
pub fn download_verified(
    mut reader: impl Read,
    alg: Alg,
    expected_hash: &Digest,
    target_path: Option<&Path>,
    expected_size: Option<u64>,
) -> Result<PathBuf, Error> {
    let root_dir = root::storage_root(alg);
    let final_path = target_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| layout::artifact_path(&root_dir, alg, expected_hash.hex()));

    let parent = final_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    fs::create_dir_all(&parent).map_err(Error::Io)?;
    let name = final_path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");

    let mut tmp_file = tempfile::Builder::new()
        .prefix(&format!("{name}.downloading."))
        .tempfile_in(&parent)
        .map_err(Error::Io)?;

    // `tmp_file` auto-deletes on drop, so any `?` below before `persist` needs
    // no manual cleanup.
    let (total, hex) = (|| -> Result<(u64, String), Error> {
        let mut hasher = StreamHasher::new(alg);
        let mut buf = [0u8; READ_CHUNK];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp_file.write_all(&buf[..n]).map_err(Error::Io)?;
            total += n as u64;
        }
        Ok((total, hasher.finalize_hex()))
    })()?;

    if let Some(expected_size) = expected_size {
        if total != expected_size {
            return Err(Error::IntegrityFailure {
                expected: expected_hash.hex().to_owned(),
                actual: format!("size {total} (expected {expected_size})"),
            });
        }
    }
    if hex != expected_hash.hex() {
        return Err(Error::IntegrityFailure {
            expected: expected_hash.hex().to_owned(),
            actual: hex,
        });
    }

    if let Err(e) = tmp_file.persist(&final_path) {
        if !final_path.exists() {
            return Err(Error::Io(e.error));
        }
    }

    if target_path.is_some() {
        register_fingerprint(&final_path, alg, expected_hash)?;
    }

    Ok(final_path)
}

fn register_fingerprint(path: &Path, alg: Alg, digest: &Digest) -> Result<(), Error> {
    let metadata = fs::metadata(path).map_err(Error::Io)?;
    if metadata.len() < crate::fingerprint::SMALL_FILE_THRESHOLD {
        return Ok(());
    }
    let fp = fingerprint_of(path).map_err(Error::Io)?.expect("just wrote this file");
    let fp_key = kachery_digest::digest_of_canonical_json(&fp).map_err(Error::Digest)?;
    let root_dir = root::storage_root(alg);
    let record_path = layout::record_path(&root_dir, alg, fp_key.hex());
    let lock_path = layout::lock_path(&record_path);
    let _guard = kachery_lock::acquire_exclusive(&lock_path).map_err(Error::Io)?;
    let entry = StatEntry { stat: fp, digest: digest.clone() };
    if let Err(e) = write_json_atomic(&record_path, &entry) {
        log::warn!("kachery-store: failed to write {}: {e}", record_path.display());
    }
    Ok(())
}
