//! Streaming hash functions over buffers and files.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use md5::{Digest as _, Md5};
use sha1::Sha1;

use crate::{Alg, Digest, Error};

/// Read buffer size for streamed file hashing.
const READ_CHUNK: usize = 64 * 1024;

/// Hash a byte buffer directly. Infallible — the resulting hex string is
/// always the correct length for `alg`.
pub fn hash_bytes(buf: &[u8], alg: Alg) -> Digest {
    let hex = match alg {
        Alg::Sha1 => hex::encode(Sha1::digest(buf)),
        Alg::Md5 => hex::encode(Md5::digest(buf)),
    };
    Digest::new(alg, hex).expect("hasher output always matches its own digest length")
}

/// Hash a file's contents by streaming it in 64 KiB reads.
///
/// Returns `Ok(None)` if the file does not exist — callers treat a missing
/// file as "nothing to hash", not an error.
pub fn hash_file(path: &Path, alg: Alg) -> Result<Option<Digest>, Error> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut reader = BufReader::with_capacity(READ_CHUNK, file);
    let mut buf = [0u8; READ_CHUNK];
    let hex = match alg {
        Alg::Sha1 => {
            let mut hasher = Sha1::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            hex::encode(hasher.finalize())
        }
        Alg::Md5 => {
            let mut hasher = Md5::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            hex::encode(hasher.finalize())
        }
    };
    Ok(Some(Digest::new(alg, hex)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_known_sha1() {
        // sha1("abctest") per the spec's concrete scenario #1.
        let d = hash_bytes(b"abctest", Alg::Sha1);
        assert_eq!(d.hex(), "69c2c724026dde5fd51e796b3d84fea6aeb6f5f0");
    }

    #[test]
    fn hash_file_missing_returns_none() {
        let path = std::path::Path::new("/nonexistent/does-not-exist-kachery");
        assert!(hash_file(path, Alg::Sha1).unwrap().is_none());
    }

    #[test]
    fn hash_file_matches_hash_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"abctest").unwrap();

        let from_file = hash_file(&path, Alg::Sha1).unwrap().unwrap();
        let from_bytes = hash_bytes(b"abctest", Alg::Sha1);
        assert_eq!(from_file.hex(), from_bytes.hex());
    }

    #[test]
    fn hash_file_streams_across_multiple_read_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data = vec![0x42u8; READ_CHUNK * 3 + 17];
        std::fs::write(&path, &data).unwrap();

        let from_file = hash_file(&path, Alg::Md5).unwrap().unwrap();
        let from_bytes = hash_bytes(&data, Alg::Md5);
        assert_eq!(from_file.hex(), from_bytes.hex());
    }
}
