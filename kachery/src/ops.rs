//! Single-file operations: `open_file`, `load_bytes`, `load_file`, `store_file`
//! (§4.G, §4.I).

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use kachery_remote::Client;
use kachery_uri::Uri;

use crate::error::Error;
use crate::reader::{BlockReader, ReadSeek};
use crate::support::{
    download_whole_file, is_hash_uri, locate_uri, resolve_endpoint, store_object_internal, upload_if_absent,
    Location,
};

/// Default block size for [`open_file`]'s lazy remote reader: 10 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 10_000_000;

/// Open `uri` as a seekable byte stream.
///
/// A local artifact is opened directly. A remote-only artifact whose size is
/// at most `block_size` is fetched whole into the canonical cache and opened
/// from there; a larger one returns a [`BlockReader`] that fetches and caches
/// fixed-size blocks on demand.
pub fn open_file(uri: &str, block_size: Option<u64>) -> Result<Option<Box<dyn ReadSeek>>, Error> {
    let parsed: Uri = uri.parse()?;
    let block_size = block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
    let config = kachery_config::get_config();
    let client = Client::new()?;

    let Some(location) = locate_uri(&parsed, &config, &client)? else {
        return Ok(None);
    };

    match location {
        Location::Local(path) => Ok(Some(Box::new(fs::File::open(path)?))),
        Location::Empty => {
            let path =
                kachery_store::download_verified(Cursor::new(Vec::new()), parsed.alg(), parsed.hash(), None, Some(0))?;
            Ok(Some(Box::new(fs::File::open(path)?)))
        }
        Location::Remote { endpoint, size } => {
            let size = size.ok_or_else(|| {
                Error::Usage(format!("remote artifact size for '{uri}' is unknown; cannot open a ranged stream"))
            })?;
            if block_size >= size {
                let path = download_whole_file(&client, &endpoint, parsed.alg(), parsed.hash(), Some(size))?;
                Ok(Some(Box::new(fs::File::open(path)?)))
            } else {
                let reader = BlockReader::new(client, endpoint, parsed.alg(), parsed.hash().clone(), size, block_size);
                Ok(Some(Box::new(reader)))
            }
        }
    }
}

/// Resolve `uri` and materialize it locally, copying to `dest` when given.
///
/// Returns `Ok(None)` if the artifact cannot be found locally, via any hint,
/// or on the configured `fr` endpoint.
pub fn load_file(uri: &str, dest: Option<&Path>) -> Result<Option<PathBuf>, Error> {
    let parsed: Uri = uri.parse()?;
    let config = kachery_config::get_config();
    let client = Client::new()?;

    let Some(location) = locate_uri(&parsed, &config, &client)? else {
        return Ok(None);
    };

    let cache_path = match location {
        Location::Local(path) => path,
        Location::Empty => {
            kachery_store::download_verified(Cursor::new(Vec::new()), parsed.alg(), parsed.hash(), None, Some(0))?
        }
        Location::Remote { endpoint, size } => download_whole_file(&client, &endpoint, parsed.alg(), parsed.hash(), size)?,
    };

    match dest {
        Some(dest) => {
            fs::copy(&cache_path, dest)?;
            Ok(Some(dest.to_path_buf()))
        }
        None => Ok(Some(cache_path)),
    }
}

/// Load (a slice of) `uri`'s content into memory.
///
/// `start`/`end` absent means the whole file. A confirmed-local artifact
/// defaults a missing `end` to its size; a remote-only artifact does not —
/// see Open Question #2 in `DESIGN.md` — and returns [`Error::Usage`] instead
/// of guessing. An equal `start == end` always yields an empty vector.
pub fn load_bytes(uri: &str, start: Option<u64>, end: Option<u64>) -> Result<Option<Vec<u8>>, Error> {
    if start.is_none() && end.is_none() {
        let Some(path) = load_file(uri, None)? else {
            return Ok(None);
        };
        return Ok(Some(fs::read(path)?));
    }

    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(Error::Usage(format!("invalid byte range [{start}, {end})")));
        }
    }

    let parsed: Uri = uri.parse()?;
    let config = kachery_config::get_config();
    let client = Client::new()?;
    let Some(location) = locate_uri(&parsed, &config, &client)? else {
        return Ok(None);
    };

    let start = start.unwrap_or(0);
    let is_remote = matches!(location, Location::Remote { .. });
    let size = match &location {
        Location::Local(path) => fs::metadata(path)?.len(),
        Location::Empty => 0,
        Location::Remote { size, .. } => {
            size.ok_or_else(|| Error::Usage(format!("remote artifact size for '{uri}' is unknown")))?
        }
    };
    let end = match end {
        Some(end) => end,
        None if is_remote => {
            return Err(Error::Usage("load_bytes: 'end' is required for a remote-only range read".to_owned()));
        }
        None => size,
    };

    if start > end || end > size {
        return Err(Error::Usage(format!(
            "invalid byte range [{start}, {end}) for an artifact of size {size}"
        )));
    }
    if start == end {
        return Ok(Some(Vec::new()));
    }

    let mut stream = open_file(uri, None)?.expect("locate_uri already confirmed this artifact exists");
    use std::io::{Read as _, Seek as _, SeekFrom};
    stream.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    stream.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// Store `path_or_uri`'s content as an artifact, returning its URI.
///
/// `path_or_uri` may itself already be a kachery URI — it is loaded first, so
/// re-storing already-stored content is idempotent. `basename` overrides the
/// display name carried in the returned URI. When `git_annex_mode` is set, no
/// upload to the `to` endpoint is attempted (the git-annex adapter manages its
/// own remotes). `no_manifest` suppresses chunk-manifest construction even for
/// a file above the chunking threshold — used internally to store a chunk
/// manifest itself without recursing into a manifest-of-a-manifest.
pub fn store_file(path_or_uri: &str, basename: Option<&str>, git_annex_mode: bool, no_manifest: bool) -> Result<String, Error> {
    let resolved_path: PathBuf = if is_hash_uri(path_or_uri) {
        load_file(path_or_uri, None)?
            .ok_or_else(|| Error::Usage(format!("could not locate '{path_or_uri}' to store")))?
    } else {
        PathBuf::from(path_or_uri)
    };

    let config = kachery_config::get_config();
    let alg = config.algorithm;
    let size = fs::metadata(&resolved_path)?.len();

    let (cache_path, digest) = if config.to_remote_only {
        let digest = kachery_store::fingerprint_digest(alg, &resolved_path)?;
        (resolved_path.clone(), digest)
    } else {
        kachery_store::put(&resolved_path, alg, config.use_hard_links)?
    };

    let manifest_hash = if !no_manifest && kachery_manifest::should_chunk(alg, size) {
        let chunk_manifest = kachery_manifest::chunk_manifest_of_file(&cache_path, size)?;
        let manifest_uri = store_object_internal(&chunk_manifest, "chunk_manifest.json", true)?;
        let manifest_uri: Uri = manifest_uri.parse()?;
        Some(manifest_uri.hash().clone())
    } else {
        None
    };

    if !git_annex_mode {
        if let Some(endpoint) = resolve_endpoint(&config.to)? {
            let client = Client::new()?;
            upload_if_absent(&client, &endpoint, alg, &digest, &cache_path, size)?;
        }
    }

    let name = basename
        .map(str::to_owned)
        .or_else(|| resolved_path.file_name().and_then(|n| n.to_str()).map(str::to_owned));

    let uri = Uri::File { alg, hash: digest, name, manifest: manifest_hash };
    Ok(uri.to_string())
}
