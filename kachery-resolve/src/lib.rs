//! Resolve a [`Uri`] to the `(algorithm, digest)` of the artifact it names.
//!
//! A non-directory URI resolves directly. A directory URI must load its
//! manifest — which may itself be remote-only — and walk any `sub/path`
//! segments through nested subdirectories to a leaf file or subdirectory.
//! Loading is abstracted behind [`ManifestLoader`] so this crate stays
//! decoupled from `kachery-store`/`kachery-remote`: the facade supplies a
//! loader that checks the local cache and falls back to the remote `check`/
//! `get` protocol, so a remote-only directory tree still resolves
//! transitively (§4.E).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fmt;

use kachery_digest::{Alg, Digest};
use kachery_manifest::{DirManifest, DirSlot};
use kachery_uri::Uri;

/// Supplies directory manifest bytes for a given `(algorithm, digest)`,
/// however the caller wants to obtain them (local cache, remote download, or
/// both).
pub trait ManifestLoader {
    /// The loader's own error type (e.g. I/O, network).
    type Error;

    /// Load the raw JSON bytes of the manifest for `(alg, hash)`.
    ///
    /// Returns `Ok(None)` if the manifest cannot be found anywhere, never a
    /// bare missing-value sentinel distinct from an error.
    fn load_manifest(&mut self, alg: Alg, hash: &Digest) -> Result<Option<Vec<u8>>, Self::Error>;
}

/// What a URI resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A single-file artifact: its algorithm, digest, and size (when known —
    /// always known when resolved through a directory manifest, since
    /// `FileEntry` records size; never known for a bare `alg://hash` URI).
    File {
        /// The file's hash algorithm.
        alg: Alg,
        /// The file's content digest.
        hash: Digest,
        /// The file's size in bytes, when known from a directory manifest entry.
        size: Option<u64>,
    },
    /// A directory: the (sub)manifest the path traversal landed on.
    Dir(DirManifest),
}

/// Resolve `uri` to the artifact (or subdirectory) it names.
///
/// Returns `Ok(None)` if a directory manifest this resolution depends on
/// cannot be loaded anywhere, or if a path segment names an entry that does
/// not exist in the manifest.
pub fn resolve<L: ManifestLoader>(uri: &Uri, loader: &mut L) -> Result<Option<Resolved>, Error<L::Error>> {
    match uri {
        Uri::File { alg, hash, .. } => Ok(Some(Resolved::File {
            alg: *alg,
            hash: hash.clone(),
            size: None,
        })),
        Uri::Dir { alg, hash, path, .. } => {
            let Some(bytes) = loader.load_manifest(*alg, hash).map_err(Error::Loader)? else {
                return Ok(None);
            };
            let manifest: DirManifest = serde_json::from_slice(&bytes).map_err(Error::Json)?;
            Ok(resolve_within(&manifest, path.as_deref()))
        }
    }
}

fn resolve_within(manifest: &DirManifest, path: Option<&str>) -> Option<Resolved> {
    let segments: Vec<&str> = path
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return Some(Resolved::Dir(manifest.clone()));
    }

    let mut current = manifest.clone();
    for (i, seg) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        if is_last {
            if let Some(entry) = current.files.get(*seg) {
                return Some(Resolved::File {
                    alg: entry.digest.alg(),
                    hash: entry.digest.clone(),
                    size: Some(entry.size),
                });
            }
            return match current.dirs.get(*seg) {
                Some(DirSlot::Manifest(m)) => Some(Resolved::Dir((**m).clone())),
                Some(DirSlot::Collapsed) => Some(Resolved::Dir(DirManifest::default())),
                None => None,
            };
        }
        match current.dirs.get(*seg) {
            Some(DirSlot::Manifest(m)) => current = (**m).clone(),
            _ => return None,
        }
    }
    unreachable!("non-empty segment list always returns from the loop body")
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while resolving a directory URI.
#[derive(Debug)]
pub enum Error<E> {
    /// The supplied [`ManifestLoader`] failed.
    Loader(E),
    /// The loaded manifest bytes were not valid JSON for a [`DirManifest`].
    Json(serde_json::Error),
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loader(e) => write!(f, "failed to load directory manifest: {e}"),
            Self::Json(e) => write!(f, "invalid directory manifest JSON: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Error<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Loader(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}
