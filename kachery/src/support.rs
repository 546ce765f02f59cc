//! Shared plumbing used by both the single-file and directory operations:
//! endpoint resolution, URI resolution against the local cache and the `fr`
//! endpoint, and the range-cache block code.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use kachery_config::{Config, EndpointRef};
use kachery_digest::{Alg, Digest};
use kachery_manifest::DirManifest;
use kachery_remote::{Client, Endpoint};
use kachery_resolve::{ManifestLoader, Resolved};
use kachery_uri::Uri;
use serde::Serialize;

use crate::error::{from_resolve, Error};

/// `true` if `s` looks like a kachery URI (`scheme://...`) rather than a
/// filesystem path.
pub(crate) fn is_hash_uri(s: &str) -> bool {
    s.contains("://")
}

/// Where an artifact currently lives, as determined by [`resolve_file_location`].
pub(crate) enum Location {
    /// Already present in the local cache (or at a hinted filesystem path).
    Local(PathBuf),
    /// Not local, but confirmed present on the `fr` remote.
    Remote {
        endpoint: Endpoint,
        size: Option<u64>,
    },
    /// The well-known digest of zero bytes: always "present" without I/O.
    Empty,
}

/// Resolve an [`EndpointRef`] to a concrete, usable [`Endpoint`].
pub(crate) fn resolve_endpoint(endpoint_ref: &Option<EndpointRef>) -> Result<Option<Endpoint>, Error> {
    let Some(endpoint_ref) = endpoint_ref else {
        return Ok(None);
    };
    let (url, channel, password) = endpoint_ref.resolve()?;
    Ok(Some(Endpoint { url, channel, password }))
}

/// `true` if `hash` is the digest of the empty byte sequence under `alg`.
pub(crate) fn is_empty_digest(alg: Alg, hash: &Digest) -> bool {
    kachery_digest::hash_bytes(&[], alg).hex() == hash.hex()
}

/// Locate an already-identified `(alg, hash)` artifact: local cache first
/// (unless `from_remote_only`), then the empty-content special case, then a
/// `check` against the `fr` endpoint.
pub(crate) fn resolve_file_location(
    alg: Alg,
    hash: &Digest,
    config: &Config,
    client: &Client,
) -> Result<Option<Location>, Error> {
    if !config.from_remote_only {
        if let Some(path) = kachery_store::find(alg, hash) {
            return Ok(Some(Location::Local(path)));
        }
    }
    if is_empty_digest(alg, hash) {
        return Ok(Some(Location::Empty));
    }
    let Some(endpoint) = resolve_endpoint(&config.fr)? else {
        return Ok(None);
    };
    match client.check(&endpoint, alg, hash)? {
        Some(check) => Ok(Some(Location::Remote { endpoint, size: check.size })),
        None => Ok(None),
    }
}

/// Loads directory manifest bytes for [`kachery_resolve::resolve`]: local
/// cache first (unless `from_remote_only`), then a full download from `fr`.
struct FacadeLoader<'a> {
    client: &'a Client,
    fr: Option<Endpoint>,
    from_remote_only: bool,
}

impl ManifestLoader for FacadeLoader<'_> {
    type Error = Error;

    fn load_manifest(&mut self, alg: Alg, hash: &Digest) -> Result<Option<Vec<u8>>, Error> {
        if !self.from_remote_only {
            if let Some(path) = kachery_store::find(alg, hash) {
                return Ok(Some(fs::read(path)?));
            }
        }
        let Some(endpoint) = &self.fr else {
            return Ok(None);
        };
        if self.client.check(endpoint, alg, hash)?.is_none() {
            return Ok(None);
        }
        let mut buf = Vec::new();
        self.client.download(endpoint, alg, hash, None, &mut buf)?;
        let path = kachery_store::download_verified(Cursor::new(&buf), alg, hash, None, None)?;
        Ok(Some(fs::read(path)?))
    }
}

/// Resolve a kachery URI all the way to a file's location, traversing any
/// directory manifests (remote-only ones included) the URI's path segments
/// cross.
pub(crate) fn locate_uri(uri: &Uri, config: &Config, client: &Client) -> Result<Option<Location>, Error> {
    let fr = resolve_endpoint(&config.fr)?;
    let mut loader = FacadeLoader { client, fr, from_remote_only: config.from_remote_only };
    let resolved = kachery_resolve::resolve(uri, &mut loader).map_err(from_resolve)?;
    match resolved {
        None => Ok(None),
        Some(Resolved::File { alg, hash, .. }) => resolve_file_location(alg, &hash, config, client),
        Some(Resolved::Dir(_)) => {
            Err(Error::Usage(format!("'{uri}' names a directory, not a file")))
        }
    }
}

/// Resolve a directory URI to its manifest, traversing any remote-only
/// ancestor manifests the URI's path segments cross. Returns
/// [`Error::Usage`] if `uri` actually names a file.
pub(crate) fn resolve_dir_manifest(uri: &Uri, config: &Config, client: &Client) -> Result<Option<DirManifest>, Error> {
    let fr = resolve_endpoint(&config.fr)?;
    let mut loader = FacadeLoader { client, fr, from_remote_only: config.from_remote_only };
    match kachery_resolve::resolve(uri, &mut loader).map_err(from_resolve)? {
        None => Ok(None),
        Some(Resolved::Dir(manifest)) => Ok(Some(manifest)),
        Some(Resolved::File { .. }) => Err(Error::Usage(format!("'{uri}' names a file, not a directory"))),
    }
}

/// The range-cache block identity: `sha1(canonical_json({<alg>: hash, start, end}))`.
pub(crate) fn range_code(alg: Alg, hash: &Digest, start: u64, end: u64) -> Result<String, Error> {
    let mut map = serde_json::Map::new();
    map.insert(alg.name().to_owned(), serde_json::Value::String(hash.hex().to_owned()));
    map.insert("start".to_owned(), serde_json::Value::from(start));
    map.insert("end".to_owned(), serde_json::Value::from(end));
    let digest = kachery_digest::digest_of_canonical_json(&serde_json::Value::Object(map))?;
    Ok(digest.hex().to_owned())
}

/// Download the full artifact into the canonical local cache, verifying size
/// and digest against what the `check` call reported.
pub(crate) fn download_whole_file(
    client: &Client,
    endpoint: &Endpoint,
    alg: Alg,
    hash: &Digest,
    size: Option<u64>,
) -> Result<PathBuf, Error> {
    let mut buf = Vec::new();
    client.download(endpoint, alg, hash, None, &mut buf)?;
    let path = kachery_store::download_verified(Cursor::new(buf), alg, hash, None, size)?;
    Ok(path)
}

/// Ensure the `to` endpoint holds `(alg, hash)`, uploading `path`'s bytes only
/// if the remote doesn't already have it. Zero-length artifacts are never
/// uploaded — the server refuses them and the empty file is a purely local
/// special case.
pub(crate) fn upload_if_absent(
    client: &Client,
    endpoint: &Endpoint,
    alg: Alg,
    hash: &Digest,
    path: &Path,
    size: u64,
) -> Result<(), Error> {
    if size == 0 {
        return Ok(());
    }
    match client.check(endpoint, alg, hash)? {
        Some(check) => {
            if let Some(remote_size) = check.size {
                if remote_size != size {
                    return Err(Error::IntegrityFailure {
                        expected: size.to_string(),
                        actual: format!("remote reports size {remote_size}"),
                    });
                }
            }
            Ok(())
        }
        None => {
            let bytes = fs::read(path)?;
            client.upload(endpoint, alg, hash, bytes)?;
            Ok(())
        }
    }
}

/// Write `value` as canonical JSON to a temp file named `basename` and store
/// it like any other file. Used for directory-manifest storage and for chunk
/// manifests (which always pass `no_manifest = true` to avoid recursing into
/// a manifest-of-a-manifest).
pub(crate) fn store_object_internal<T: Serialize>(
    value: &T,
    basename: &str,
    no_manifest: bool,
) -> Result<String, Error> {
    let json = kachery_digest::canonical_json(value)?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(basename);
    fs::write(&path, json.as_bytes())?;
    let path_str = path
        .to_str()
        .ok_or_else(|| Error::Usage(format!("temp path '{}' is not valid UTF-8", path.display())))?;
    crate::ops::store_file(path_str, Some(basename), false, no_manifest)
}
