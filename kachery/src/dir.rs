//! Directory operations: `read_dir`, `store_dir`, `load_dir` (§4.F).

use std::fs;
use std::io::{self, Cursor};
use std::path::Path;

use kachery_manifest::{DirManifest, DirSlot, FileEntry};
use kachery_remote::Client;
use kachery_uri::Uri;

use crate::error::{io_other, Error};
use crate::support::{
    is_hash_uri, resolve_dir_manifest, resolve_endpoint, resolve_file_location, store_object_internal,
    upload_if_absent, Location,
};

/// Read a directory manifest, from either a filesystem path or a directory
/// URI.
///
/// Filesystem input walks `path_or_uri` fresh, hashing every file under the
/// configured algorithm. URI input resolves an existing manifest, traversing
/// any remote-only ancestor manifests along the way.
///
/// `recursive = false` truncates every subdirectory past the first level to
/// an empty placeholder (see [`kachery_manifest::truncate_one_level`]) — the
/// full recursive walk or resolution still happens first, since that's the
/// only way to know which files exist to report at all.
///
/// `store_files` only has an effect on filesystem input: as each file is
/// hashed it is also inserted into the local cache, and uploaded to the
/// configured `to` endpoint unless that endpoint has it already.
pub fn read_dir(
    path_or_uri: &str,
    recursive: bool,
    git_annex_mode: bool,
    store_files: bool,
) -> Result<Option<DirManifest>, Error> {
    if is_hash_uri(path_or_uri) {
        let parsed: Uri = path_or_uri.parse()?;
        if !parsed.is_dir() {
            return Err(Error::Usage(format!("'{path_or_uri}' is a file URI, not a directory URI")));
        }
        let config = kachery_config::get_config();
        let client = Client::new()?;
        let Some(manifest) = resolve_dir_manifest(&parsed, &config, &client)? else {
            return Ok(None);
        };
        return Ok(Some(truncate_unless_recursive(manifest, recursive)));
    }

    let path = Path::new(path_or_uri);
    if !path.is_dir() {
        return Ok(None);
    }

    let config = kachery_config::get_config();
    let alg = config.algorithm;

    let manifest = if store_files {
        let client = Client::new()?;
        let to_endpoint = resolve_endpoint(&config.to)?;
        let use_hard_links = config.use_hard_links;
        let mut hook = |file_path: &Path, entry: &FileEntry| -> io::Result<()> {
            let (cache_path, _) =
                kachery_store::put(file_path, entry.digest.alg(), use_hard_links).map_err(|e| io_other(e.into()))?;
            if let Some(endpoint) = &to_endpoint {
                upload_if_absent(&client, endpoint, entry.digest.alg(), &entry.digest, &cache_path, entry.size)
                    .map_err(io_other)?;
            }
            Ok(())
        };
        kachery_manifest::build_dir_manifest(path, alg, git_annex_mode, Some(&mut hook))?
    } else {
        kachery_manifest::build_dir_manifest(path, alg, git_annex_mode, None)?
    };

    Ok(Some(truncate_unless_recursive(manifest, recursive)))
}

fn truncate_unless_recursive(manifest: DirManifest, recursive: bool) -> DirManifest {
    if recursive {
        manifest
    } else {
        kachery_manifest::truncate_one_level(&manifest)
    }
}

/// Build a directory manifest for `path`, storing every file into the local
/// cache (and, unless `git_annex_mode`, uploading each to the `to` endpoint)
/// along the way, then store the manifest itself and return its
/// `algdir://hash.label` URI.
pub fn store_dir(path: &Path, label: Option<&str>, git_annex_mode: bool) -> Result<String, Error> {
    let config = kachery_config::get_config();
    let alg = config.algorithm;
    let use_hard_links = config.use_hard_links;
    let client = Client::new()?;
    let to_endpoint = if git_annex_mode { None } else { resolve_endpoint(&config.to)? };

    let mut hook = |file_path: &Path, entry: &FileEntry| -> io::Result<()> {
        let (cache_path, _) =
            kachery_store::put(file_path, entry.digest.alg(), use_hard_links).map_err(|e| io_other(e.into()))?;
        if let Some(endpoint) = &to_endpoint {
            upload_if_absent(&client, endpoint, entry.digest.alg(), &entry.digest, &cache_path, entry.size)
                .map_err(io_other)?;
        }
        Ok(())
    };

    let manifest = kachery_manifest::build_dir_manifest(path, alg, git_annex_mode, Some(&mut hook))?;
    let file_uri = store_object_internal(&manifest, "dir_manifest.json", false)?;
    let file_uri: Uri = file_uri.parse()?;

    let dir_uri = Uri::Dir {
        alg: file_uri.alg(),
        hash: file_uri.hash().clone(),
        label: label.map(str::to_owned),
        path: None,
    };
    Ok(dir_uri.to_string())
}

/// Recreate `uri`'s directory tree under `dest`, which must not already
/// exist. Files are copied (not hard-linked) from wherever they're located —
/// local cache, or a fresh remote download.
pub fn load_dir(uri: &str, dest: &Path) -> Result<(), Error> {
    if dest.exists() {
        return Err(Error::Usage(format!("destination '{}' already exists", dest.display())));
    }

    let parsed: Uri = uri.parse()?;
    if !parsed.is_dir() {
        return Err(Error::Usage(format!("'{uri}' is a file URI, not a directory URI")));
    }

    let config = kachery_config::get_config();
    let client = Client::new()?;
    let manifest = resolve_dir_manifest(&parsed, &config, &client)?
        .ok_or_else(|| Error::Usage(format!("could not locate directory manifest for '{uri}'")))?;

    load_dir_manifest(&manifest, dest, &config, &client)
}

fn load_dir_manifest(
    manifest: &DirManifest,
    dest: &Path,
    config: &kachery_config::Config,
    client: &Client,
) -> Result<(), Error> {
    fs::create_dir_all(dest)?;

    for (name, entry) in &manifest.files {
        let alg = entry.digest.alg();
        let target = dest.join(name);
        let Some(location) = resolve_file_location(alg, &entry.digest, config, client)? else {
            return Err(Error::Usage(format!(
                "could not locate file '{name}' ({alg}://{}) referenced by directory manifest",
                entry.digest.hex()
            )));
        };
        match location {
            Location::Local(path) => {
                fs::copy(&path, &target)?;
            }
            Location::Empty => {
                kachery_store::download_verified(Cursor::new(Vec::new()), alg, &entry.digest, Some(&target), Some(0))?;
            }
            Location::Remote { endpoint, size } => {
                let mut buf = Vec::new();
                client.download(&endpoint, alg, &entry.digest, None, &mut buf)?;
                kachery_store::download_verified(Cursor::new(buf), alg, &entry.digest, Some(&target), size)?;
            }
        }
    }

    for (name, slot) in &manifest.dirs {
        let sub_dest = dest.join(name);
        match slot {
            DirSlot::Manifest(sub_manifest) => load_dir_manifest(sub_manifest, &sub_dest, config, client)?,
            DirSlot::Collapsed => fs::create_dir_all(&sub_dest)?,
        }
    }

    Ok(())
}
