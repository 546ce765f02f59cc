//! Building [`DirManifest`] snapshots from the filesystem.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use kachery_digest::{Alg, Digest};

use crate::{DirManifest, DirSlot, FileEntry};

/// Directory names that `git_annex_mode` always skips while walking.
const SKIPPED_DIR_NAMES: [&str; 2] = [".git", ".datalad"];

/// Build a [`DirManifest`] by walking `root` on the local filesystem.
///
/// When `git_annex_mode` is set, symlinks that point into
/// `.git/annex/objects` are parsed for their `{algorithm, hash, size}`
/// triple directly from the link target's filename, without opening (or
/// even following) the link; `.git` and `.datalad` subdirectories are never
/// descended into.
///
/// `on_file`, when given, is invoked with the absolute path and computed
/// entry of every file as it is discovered — the hook a caller uses to also
/// insert each file into the local cache (`store_files` in the facade) while
/// the walk is in progress, without this crate depending on `kachery-store`.
pub fn build_dir_manifest(
    root: &Path,
    alg: Alg,
    git_annex_mode: bool,
    mut on_file: Option<&mut dyn FnMut(&Path, &FileEntry) -> io::Result<()>>,
) -> Result<DirManifest, Error> {
    build_dir_manifest_inner(root, alg, git_annex_mode, &mut on_file)
}

fn build_dir_manifest_inner(
    root: &Path,
    alg: Alg,
    git_annex_mode: bool,
    on_file: &mut Option<&mut dyn FnMut(&Path, &FileEntry) -> io::Result<()>>,
) -> Result<DirManifest, Error> {
    let mut files = BTreeMap::new();
    let mut dirs = BTreeMap::new();

    let mut entries: Vec<_> = fs::read_dir(root)
        .map_err(|e| Error::Io(root.to_path_buf(), e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Io(root.to_path_buf(), e))?;
    entries.sort_by_key(fs::DirEntry::path);

    for entry in entries {
        let path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| Error::NonUtf8Name(path.clone()))?;

        let file_type = entry.file_type().map_err(|e| Error::Io(path.clone(), e))?;

        if file_type.is_dir() {
            if git_annex_mode && SKIPPED_DIR_NAMES.contains(&name.as_str()) {
                log::debug!("kachery-manifest: skipping {} under git-annex mode", path.display());
                continue;
            }
            let sub = build_dir_manifest_inner(&path, alg, git_annex_mode, on_file)?;
            dirs.insert(name, DirSlot::Manifest(Box::new(sub)));
            continue;
        }

        if git_annex_mode && file_type.is_symlink() {
            if let Some(target) = git_annex_target(&path).map_err(|e| Error::Io(path.clone(), e))? {
                let (annex_alg, digest, size) = parse_git_annex_symlink(&target)?;
                let _ = annex_alg; // always Md5 today; kept for clarity at call sites
                let entry = FileEntry { size, digest };
                if let Some(cb) = on_file.as_mut() {
                    cb(&path, &entry).map_err(|e| Error::Io(path.clone(), e))?;
                }
                files.insert(name, entry);
                continue;
            }
        }

        let metadata = fs::metadata(&path).map_err(|e| Error::Io(path.clone(), e))?;
        let digest = kachery_digest::hash_file(&path, alg)
            .map_err(|e| Error::Hash(path.clone(), e))?
            .ok_or_else(|| Error::Io(path.clone(), io::Error::from(io::ErrorKind::NotFound)))?;
        let entry = FileEntry {
            size: metadata.len(),
            digest,
        };
        if let Some(cb) = on_file.as_mut() {
            cb(&path, &entry).map_err(|e| Error::Io(path.clone(), e))?;
        }
        files.insert(name, entry);
    }

    Ok(DirManifest { files, dirs })
}

/// If `path` is a symlink whose target lies under `.git/annex/objects`,
/// return that target; otherwise `None` (treat as an ordinary file).
fn git_annex_target(path: &Path) -> io::Result<Option<std::path::PathBuf>> {
    let target = fs::read_link(path)?;
    let target_str = target.to_string_lossy();
    if target_str.contains(".git/annex/objects") {
        Ok(Some(target))
    } else {
        Ok(None)
    }
}

/// Parse a git-annex key filename of the form `MD5E-sN--H[.ext]`.
///
/// Only the `MD5E` backend tag is recognized; any other tag is a hard parse
/// error rather than a silent fallback to content hashing, matching the
/// original implementation's behavior.
fn parse_git_annex_symlink(target: &Path) -> Result<(Alg, Digest, u64), Error> {
    let filename = target
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::GitAnnexParse(target.to_path_buf(), "non-UTF-8 key filename".into()))?;

    let (tag, rest) = filename
        .split_once('-')
        .ok_or_else(|| Error::GitAnnexParse(target.to_path_buf(), "missing '-' after backend tag".into()))?;

    if tag != "MD5E" {
        return Err(Error::UnsupportedGitAnnexBackend(tag.to_owned()));
    }

    let rest = rest
        .strip_prefix('s')
        .ok_or_else(|| Error::GitAnnexParse(target.to_path_buf(), "missing size marker 's'".into()))?;
    let (size_str, rest) = rest
        .split_once("--")
        .ok_or_else(|| Error::GitAnnexParse(target.to_path_buf(), "missing '--' before hash".into()))?;
    let size: u64 = size_str
        .parse()
        .map_err(|_| Error::GitAnnexParse(target.to_path_buf(), format!("invalid size '{size_str}'")))?;

    let hash_part = rest.split('.').next().unwrap_or(rest);
    let digest = Digest::new(Alg::Md5, hash_part)
        .map_err(|e| Error::GitAnnexParse(target.to_path_buf(), e.to_string()))?;

    Ok((Alg::Md5, digest, size))
}

/// Replace every `dirs[name]` with the collapsed `{}` sentinel, for a
/// non-recursive listing of an already-loaded manifest (§4.F).
#[must_use]
pub fn truncate_one_level(manifest: &DirManifest) -> DirManifest {
    DirManifest {
        files: manifest.files.clone(),
        dirs: manifest.dirs.keys().cloned().map(|name| (name, DirSlot::Collapsed)).collect(),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while building a directory manifest from the filesystem.
#[derive(Debug)]
pub enum Error {
    /// I/O failure at the given path.
    Io(std::path::PathBuf, io::Error),
    /// Hashing failure at the given path.
    Hash(std::path::PathBuf, kachery_digest::Error),
    /// A directory entry's name is not valid UTF-8.
    NonUtf8Name(std::path::PathBuf),
    /// A git-annex symlink target didn't match the expected key grammar.
    GitAnnexParse(std::path::PathBuf, String),
    /// A git-annex symlink used a backend tag other than `MD5E`.
    UnsupportedGitAnnexBackend(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(p, e) => write!(f, "I/O error at {}: {e}", p.display()),
            Self::Hash(p, e) => write!(f, "failed to hash {}: {e}", p.display()),
            Self::NonUtf8Name(p) => write!(f, "non-UTF-8 directory entry name at {}", p.display()),
            Self::GitAnnexParse(p, msg) => {
                write!(f, "failed to parse git-annex key at {}: {msg}", p.display())
            }
            Self::UnsupportedGitAnnexBackend(tag) => {
                write!(f, "unsupported git-annex backend tag '{tag}' (only MD5E is recognized)")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            Self::Hash(_, e) => Some(e),
            _ => None,
        }
    }
}
