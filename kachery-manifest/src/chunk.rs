//! Per-chunk integrity manifests for large files (§4.G).

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use kachery_digest::hash_bytes;
use kachery_digest::Alg;
use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};

/// Files at or below this size never get a chunk manifest.
const CHUNK_THRESHOLD: u64 = 4_000_000;
/// Starting point for chunk-size selection.
const INITIAL_CHUNK_SIZE: u64 = 10_000_000;
/// Chunk size never shrinks below this.
const MIN_CHUNK_SIZE: u64 = 4_000_000;
/// Above this many bytes, the first chunk gets its own nested chunk manifest.
const NESTED_MANIFEST_THRESHOLD: u64 = 10_000_000;
const READ_CHUNK: usize = 64 * 1024;

/// `true` if a file this size (hashed under `alg`) gets a chunk manifest.
///
/// Only SHA-1 chunk manifests are defined (§3).
#[must_use]
pub fn should_chunk(alg: Alg, size: u64) -> bool {
    alg == Alg::Sha1 && size > CHUNK_THRESHOLD
}

/// A single byte range within a chunked file and its digest.
///
/// `manifest` is present only on the first chunk, and only when that chunk
/// itself exceeds [`NESTED_MANIFEST_THRESHOLD`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Start offset, inclusive.
    pub start: u64,
    /// End offset, exclusive.
    pub end: u64,
    /// SHA-1 of the bytes in `[start, end)`.
    pub sha1: String,
    /// A nested chunk manifest describing this chunk's own internal structure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub manifest: Option<Box<ChunkManifest>>,
}

/// A per-artifact chunk manifest: the full file's size and SHA-1, plus the
/// ordered list of chunk ranges that make it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Total file size in bytes.
    pub size: u64,
    /// SHA-1 of the full file.
    pub sha1: String,
    /// Ordered, contiguous, non-overlapping chunk descriptions.
    pub chunks: Vec<Chunk>,
}

/// Choose a chunk size for a file of `size` bytes: start at
/// [`INITIAL_CHUNK_SIZE`] and halve while it would yield fewer than 10
/// chunks (never going below [`MIN_CHUNK_SIZE`]), or double while it would
/// yield more than 100.
fn choose_chunk_size(size: u64) -> u64 {
    let mut chunk_size = INITIAL_CHUNK_SIZE;
    loop {
        let n_chunks = size.div_ceil(chunk_size);
        if n_chunks < 10 && chunk_size > MIN_CHUNK_SIZE {
            chunk_size = (chunk_size / 2).max(MIN_CHUNK_SIZE);
        } else if n_chunks > 100 {
            chunk_size *= 2;
        } else {
            return chunk_size;
        }
    }
}

/// Build a chunk manifest by streaming `path` once.
pub fn chunk_manifest_of_file(path: &Path, size: u64) -> io::Result<ChunkManifest> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(READ_CHUNK, file);
    build(&mut reader, size)
}

/// Build a chunk manifest over an in-memory buffer.
///
/// Used both for small inputs and — per the original implementation's
/// observable behavior — to recurse into an oversized first chunk: the
/// nested manifest is always built from the *entire* first-chunk buffer,
/// regardless of exactly how much of it exceeded [`NESTED_MANIFEST_THRESHOLD`].
#[must_use]
pub fn chunk_manifest_of_bytes(buf: &[u8]) -> ChunkManifest {
    let mut reader = io::Cursor::new(buf);
    build(&mut reader, buf.len() as u64).expect("reading from an in-memory buffer cannot fail")
}

fn build(reader: &mut impl Read, size: u64) -> io::Result<ChunkManifest> {
    let chunk_size = choose_chunk_size(size);
    let mut overall = Sha1::new();
    let mut chunks = Vec::new();
    let mut offset = 0u64;
    let mut first = true;

    while offset < size {
        let end = (offset + chunk_size).min(size);
        let this_len = end - offset;

        if first && this_len > NESTED_MANIFEST_THRESHOLD {
            log::debug!("kachery-manifest: first chunk of {this_len} bytes exceeds nested-manifest threshold, recursing");
            let mut buf = vec![0u8; this_len as usize];
            reader.read_exact(&mut buf)?;
            overall.update(&buf);
            let digest = hash_bytes(&buf, Alg::Sha1);
            let nested = chunk_manifest_of_bytes(&buf);
            chunks.push(Chunk {
                start: offset,
                end,
                sha1: digest.hex().to_owned(),
                manifest: Some(Box::new(nested)),
            });
        } else {
            let mut chunk_hasher = Sha1::new();
            let mut remaining = this_len;
            let mut buf = [0u8; READ_CHUNK];
            while remaining > 0 {
                let want = remaining.min(READ_CHUNK as u64) as usize;
                reader.read_exact(&mut buf[..want])?;
                overall.update(&buf[..want]);
                chunk_hasher.update(&buf[..want]);
                remaining -= want as u64;
            }
            chunks.push(Chunk {
                start: offset,
                end,
                sha1: hex::encode(chunk_hasher.finalize()),
                manifest: None,
            });
        }

        first = false;
        offset = end;
    }

    Ok(ChunkManifest {
        size,
        sha1: hex::encode(overall.finalize()),
        chunks,
    })
}
