//! The local hash cache: storage-root resolution, on-disk layout, the
//! stat-fingerprint shortcut, and streaming verified download (§4.C, §4.D).
//!
//! This crate owns everything that touches the storage root directly. The
//! directory-manifest and chunk-manifest shapes (`kachery-manifest`) and the
//! remote wire protocol (`kachery-remote`) are independent of it; the facade
//! crate wires them together.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod fingerprint;
mod jsonfile;
mod layout;
mod root;

pub use cache::{download_verified, find, find_by_code, move_in, put, put_by_code};
pub use fingerprint::fingerprint_digest;
pub use layout::{artifact_path, by_code_path, hints_path, lock_path, record_path};
pub use root::{
    bootstrap_dir, bootstrap_path, reset as reset_roots, set_bootstrap_dir, set_storage_dir,
    set_storage_dir_alt, storage_root, storage_root_alt,
};

use std::fmt;

/// Errors produced by the local hash cache.
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// A digest could not be computed or validated.
    Digest(kachery_digest::Error),
    /// A downloaded or hashed artifact did not match its expected identity.
    IntegrityFailure {
        /// The digest the caller expected.
        expected: String,
        /// What was actually observed (a digest, or a descriptive size mismatch).
        actual: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Digest(e) => write!(f, "digest error: {e}"),
            Self::IntegrityFailure { expected, actual } => {
                write!(f, "integrity check failed: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Digest(e) => Some(e),
            Self::IntegrityFailure { .. } => None,
        }
    }
}
