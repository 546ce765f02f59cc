//! Kachery URI parsing.
//!
//! A kachery URI identifies either a single file artifact or a directory
//! snapshot, both by content digest:
//!
//! ```text
//! alg://hash[/name][?manifest=M]
//! algdir://hash[.label][/sub/path]
//! ```
//!
//! - **alg** — `sha1` or `md5` for a file reference; `sha1dir` or `md5dir`
//!   for a directory reference.
//! - **name** (file only) — a display basename, ignored by resolution.
//! - **manifest** (file only, query key) — the SHA-1 digest of a companion
//!   chunk manifest (see `kachery-manifest`).
//! - **label** (dir only) — a display label, ignored by resolution.
//! - **sub/path** (dir only) — path segments traversing into the directory
//!   manifest tree.
//!
//! # Examples
//!
//! ```
//! use kachery_uri::Uri;
//!
//! let uri: Uri = "sha1://69c2c724026dde5fd51e796b3d84fea6aeb6f5f0/file.txt"
//!     .parse()
//!     .unwrap();
//! assert!(matches!(uri, Uri::File { .. }));
//!
//! let uri: Uri = "sha1dir://abcdef0123456789abcdef0123456789abcdef01.mylabel/sub/file"
//!     .parse()
//!     .unwrap();
//! assert!(matches!(uri, Uri::Dir { .. }));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use kachery_digest::{Alg, Digest};

// ============================================================================
// Uri
// ============================================================================

/// A parsed kachery URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uri {
    /// `alg://hash[/name][?manifest=M]` — a single-file artifact reference.
    File {
        /// The hash algorithm.
        alg: Alg,
        /// The artifact's content digest.
        hash: Digest,
        /// Display basename, if present. Ignored by resolution.
        name: Option<String>,
        /// Companion chunk-manifest digest, if present (always SHA-1).
        manifest: Option<Digest>,
    },
    /// `algdir://hash[.label][/sub/path]` — a directory snapshot reference.
    Dir {
        /// The hash algorithm.
        alg: Alg,
        /// The directory manifest's content digest.
        hash: Digest,
        /// Display label, if present. Ignored by resolution.
        label: Option<String>,
        /// Path segments traversing into the manifest tree, if present.
        path: Option<String>,
    },
}

impl Uri {
    /// The hash algorithm for this reference.
    #[must_use]
    pub fn alg(&self) -> Alg {
        match self {
            Self::File { alg, .. } | Self::Dir { alg, .. } => *alg,
        }
    }

    /// The content digest for this reference (file content, or directory
    /// manifest).
    #[must_use]
    pub fn hash(&self) -> &Digest {
        match self {
            Self::File { hash, .. } | Self::Dir { hash, .. } => hash,
        }
    }

    /// `true` if this is a directory-scheme reference.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir { .. })
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once("://").ok_or(Error::MissingScheme)?;
        let is_dir = match scheme {
            "sha1" | "md5" => false,
            "sha1dir" | "md5dir" => true,
            other => return Err(Error::UnknownScheme(other.to_owned())),
        };
        let alg = Alg::from_str(scheme.trim_end_matches("dir")).map_err(Error::InvalidAlgorithm)?;

        if is_dir {
            parse_dir(alg, rest)
        } else {
            parse_file(alg, rest)
        }
    }
}

fn parse_file(alg: Alg, rest: &str) -> Result<Uri, Error> {
    let (path_part, query) = split_query(rest);
    let (hash_str, name) = match path_part.split_once('/') {
        Some((h, n)) => (h, Some(n.to_owned())),
        None => (path_part, None),
    };
    if hash_str.is_empty() {
        return Err(Error::MissingHash);
    }
    let hash = Digest::new(alg, hash_str).map_err(Error::InvalidDigest)?;

    let manifest = match query.and_then(|q| find_query_value(q, "manifest")) {
        Some(m) => Some(Digest::new(Alg::Sha1, m).map_err(Error::InvalidDigest)?),
        None => None,
    };

    Ok(Uri::File {
        alg,
        hash,
        name,
        manifest,
    })
}

fn parse_dir(alg: Alg, rest: &str) -> Result<Uri, Error> {
    let (path_part, _query) = split_query(rest);
    let (first_segment, path) = match path_part.split_once('/') {
        Some((h, p)) if !p.is_empty() => (h, Some(p.to_owned())),
        Some((h, _)) => (h, None),
        None => (path_part, None),
    };
    let (hash_str, label) = match first_segment.split_once('.') {
        Some((h, l)) => (h, Some(l.to_owned())),
        None => (first_segment, None),
    };
    if hash_str.is_empty() {
        return Err(Error::MissingHash);
    }
    let hash = Digest::new(alg, hash_str).map_err(Error::InvalidDigest)?;

    Ok(Uri::Dir {
        alg,
        hash,
        label,
        path,
    })
}

/// Split `rest` into `(path_part, query_part)` at the first `?`.
fn split_query(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    }
}

/// Find the value of `key` in an unparsed `&`-joined query string.
fn find_query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .find_map(|kv| kv.split_once('=').filter(|(k, _)| *k == key).map(|(_, v)| v))
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File {
                alg,
                hash,
                name,
                manifest,
            } => {
                write!(f, "{alg}://{hash}")?;
                if let Some(name) = name {
                    write!(f, "/{name}")?;
                }
                if let Some(manifest) = manifest {
                    write!(f, "?manifest={manifest}")?;
                }
                Ok(())
            }
            Self::Dir {
                alg,
                hash,
                label,
                path,
            } => {
                write!(f, "{alg}dir://{hash}")?;
                if let Some(label) = label {
                    write!(f, ".{label}")?;
                }
                if let Some(path) = path {
                    write!(f, "/{path}")?;
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while parsing a kachery URI.
#[derive(Debug)]
pub enum Error {
    /// No `://` delimiter found.
    MissingScheme,
    /// Scheme is not one of `sha1`, `md5`, `sha1dir`, `md5dir`.
    UnknownScheme(String),
    /// The algorithm name (after stripping a `dir` suffix) was not recognized.
    InvalidAlgorithm(kachery_digest::Error),
    /// No hash segment present after the scheme.
    MissingHash,
    /// The hash segment failed digest validation.
    InvalidDigest(kachery_digest::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingScheme => write!(f, "missing '://' in kachery URI"),
            Self::UnknownScheme(s) => write!(f, "unknown kachery URI scheme: '{s}'"),
            Self::InvalidAlgorithm(e) => write!(f, "invalid algorithm: {e}"),
            Self::MissingHash => write!(f, "missing hash in kachery URI"),
            Self::InvalidDigest(e) => write!(f, "invalid digest in kachery URI: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidAlgorithm(e) | Self::InvalidDigest(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
