//! On-disk path layout under a storage root (§3).

use std::path::{Path, PathBuf};

use kachery_digest::Alg;

/// The canonical cache path for an artifact: `<root>/<alg>/<H[0:2]>/<H[2:4]>/<H[4:6]>/<H>`.
#[must_use]
pub fn artifact_path(root: &Path, alg: Alg, hash: &str) -> PathBuf {
    root.join(alg.name())
        .join(&hash[0..2])
        .join(&hash[2..4])
        .join(&hash[4..6])
        .join(hash)
}

/// The `.record.json` side file for a stat-fingerprint key.
///
/// Lives at the fingerprint key's own cache path, nested under `alg`'s
/// subtree — the *artifact's* algorithm, not the (always-SHA-1) algorithm
/// used to derive the key itself. Two different algorithms hashing the same
/// file must not collide on the same record path (§4.C).
#[must_use]
pub fn record_path(root: &Path, alg: Alg, fingerprint_key: &str) -> PathBuf {
    let mut path = root
        .join(alg.name())
        .join(&fingerprint_key[0..2])
        .join(&fingerprint_key[2..4])
        .join(&fingerprint_key[4..6])
        .join(fingerprint_key);
    append_suffix(&mut path, ".record.json");
    path
}

/// The `.hints.json` side file for an artifact, at the artifact's own cache path.
#[must_use]
pub fn hints_path(root: &Path, alg: Alg, hash: &str) -> PathBuf {
    let mut path = artifact_path(root, alg, hash);
    append_suffix(&mut path, ".hints.json");
    path
}

/// The advisory lock path guarding a side file (`.record.json`/`.hints.json`).
#[must_use]
pub fn lock_path(side_file: &Path) -> PathBuf {
    let mut path = side_file.to_path_buf();
    append_suffix(&mut path, ".lock");
    path
}

/// The by-code path for the range cache: `<root>/<alg>/<code[0]>/<code[1:3]>/<code>`.
#[must_use]
pub fn by_code_path(root: &Path, alg: Alg, code: &str) -> PathBuf {
    root.join(alg.name()).join(&code[0..1]).join(&code[1..3]).join(code)
}

fn append_suffix(path: &mut PathBuf, suffix: &str) {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    *path = PathBuf::from(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const SHA1_HEX: &str = "69c2c724026dde5fd51e796b3d84fea6aeb6f5f0";

    #[test]
    fn artifact_path_has_three_prefix_levels() {
        let root = Path::new("/cache");
        let path = artifact_path(root, Alg::Sha1, SHA1_HEX);
        assert_eq!(
            path,
            Path::new("/cache/sha1/69/c2/c7/69c2c724026dde5fd51e796b3d84fea6aeb6f5f0")
        );
    }

    #[test]
    fn record_path_nests_under_the_artifacts_own_algorithm() {
        let root = Path::new("/cache");
        let path = record_path(root, Alg::Sha1, SHA1_HEX);
        assert_eq!(
            path,
            Path::new("/cache/sha1/69/c2/c7/69c2c724026dde5fd51e796b3d84fea6aeb6f5f0.record.json")
        );
    }

    #[test]
    fn record_path_differs_across_algorithms_for_the_same_key() {
        let root = Path::new("/cache");
        let sha1_path = record_path(root, Alg::Sha1, SHA1_HEX);
        let md5_path = record_path(root, Alg::Md5, SHA1_HEX);
        assert_ne!(sha1_path, md5_path);
    }

    #[test]
    fn hints_path_is_suffixed_artifact_path() {
        let root = Path::new("/cache");
        let path = hints_path(root, Alg::Md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            path,
            Path::new("/cache/md5/d4/1d/8c/d41d8cd98f00b204e9800998ecf8427e.hints.json")
        );
    }

    #[test]
    fn by_code_path_splits_one_then_two_characters() {
        let root = Path::new("/cache");
        let path = by_code_path(root, Alg::Sha1, SHA1_HEX);
        assert_eq!(
            path,
            Path::new("/cache/sha1/6/9c/69c2c724026dde5fd51e796b3d84fea6aeb6f5f0")
        );
    }

    #[test]
    fn lock_path_appends_lock_suffix() {
        let side = Path::new("/cache/sha1/69/c2/x.record.json");
        assert_eq!(lock_path(side), Path::new("/cache/sha1/69/c2/x.record.json.lock"));
    }
}
