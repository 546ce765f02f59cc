//! A content-addressable file store client: URI parsing, a local hash cache,
//! directory and chunk manifests, and a remote check/download/upload
//! protocol, unified behind a small set of entry points (§1, §4.I).
//!
//! ```no_run
//! let uri = kachery::store_file("/path/to/data.bin", None, false, false)?;
//! let path = kachery::load_file(&uri, None)?;
//! # Ok::<(), kachery::Error>(())
//! ```
//!
//! Process-wide configuration — which remote to read from, which to write
//! to, which hash algorithm to use — is set with [`set_config`] and read with
//! [`get_config`]; see [`kachery_config`] for the full layering model.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod dir;
mod error;
mod ops;
mod reader;
mod support;

pub use dir::{load_dir, read_dir, store_dir};
pub use error::Error;
pub use ops::{load_bytes, load_file, open_file, store_file, DEFAULT_BLOCK_SIZE};
pub use reader::ReadSeek;

pub use kachery_config::{
    get_config, reset, set_config, Config, ConfigUpdate, Direction, EndpointRef, InlineEndpoint, Password,
};
pub use kachery_digest::Alg;
pub use kachery_manifest::DirManifest;
pub use kachery_uri::Uri;
