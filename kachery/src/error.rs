//! The crate-wide error type (§7, §10.2): one variant per abstract error
//! kind, plus the usual I/O/JSON/HTTP transparent wrappers. Every dependency
//! crate's local error type converts in via `From` so callers only ever see
//! this one type.

use std::fmt;

/// Errors produced by the kachery facade.
#[derive(Debug)]
pub enum Error {
    /// Underlying local I/O failure.
    Io(std::io::Error),
    /// A JSON document (manifest, config, record) failed to parse.
    Json(serde_json::Error),
    /// An HTTP client could not be constructed.
    Http(reqwest::Error),
    /// A digest could not be computed or validated.
    Digest(kachery_digest::Error),
    /// A downloaded or hashed artifact did not match its expected identity.
    IntegrityFailure {
        /// What was expected.
        expected: String,
        /// What was actually observed.
        actual: String,
    },
    /// A remote request exhausted its retries, or returned a non-success
    /// status.
    RemoteTransport {
        /// The endpoint URL involved.
        endpoint: String,
        /// What went wrong.
        detail: String,
    },
    /// A remote operation was requested without a usable URL/channel/password
    /// for the relevant direction.
    ConfigMissing(String),
    /// Malformed URI, invalid byte range, or another caller mistake.
    Usage(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::Http(e) => write!(f, "HTTP client error: {e}"),
            Self::Digest(e) => write!(f, "digest error: {e}"),
            Self::IntegrityFailure { expected, actual } => {
                write!(f, "integrity check failed: expected {expected}, got {actual}")
            }
            Self::RemoteTransport { endpoint, detail } => {
                write!(f, "remote transport error at {endpoint}: {detail}")
            }
            Self::ConfigMissing(msg) => write!(f, "missing configuration: {msg}"),
            Self::Usage(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Http(e) => Some(e),
            Self::Digest(e) => Some(e),
            Self::IntegrityFailure { .. }
            | Self::RemoteTransport { .. }
            | Self::ConfigMissing(_)
            | Self::Usage(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<kachery_digest::Error> for Error {
    fn from(e: kachery_digest::Error) -> Self {
        Self::Digest(e)
    }
}

impl From<kachery_uri::Error> for Error {
    fn from(e: kachery_uri::Error) -> Self {
        Self::Usage(e.to_string())
    }
}

impl From<kachery_manifest::DirError> for Error {
    fn from(e: kachery_manifest::DirError) -> Self {
        Self::Usage(e.to_string())
    }
}

impl From<kachery_config::Error> for Error {
    fn from(e: kachery_config::Error) -> Self {
        match e {
            kachery_config::Error::MissingEnvVar(var) => {
                Self::ConfigMissing(format!("environment variable '{var}' is not set"))
            }
            kachery_config::Error::UnresolvedNamedEndpoint(server) => {
                Self::ConfigMissing(format!("endpoint '{server}' was never resolved to a URL"))
            }
        }
    }
}

impl From<kachery_store::Error> for Error {
    fn from(e: kachery_store::Error) -> Self {
        match e {
            kachery_store::Error::Io(io) => Self::Io(io),
            kachery_store::Error::Digest(d) => Self::Digest(d),
            kachery_store::Error::IntegrityFailure { expected, actual } => {
                Self::IntegrityFailure { expected, actual }
            }
        }
    }
}

impl From<kachery_remote::Error> for Error {
    fn from(e: kachery_remote::Error) -> Self {
        match e {
            kachery_remote::Error::Io(io) => Self::Io(io),
            kachery_remote::Error::Digest(d) => Self::Digest(d),
            kachery_remote::Error::RemoteTransport { endpoint, detail } => {
                Self::RemoteTransport { endpoint, detail }
            }
            kachery_remote::Error::Usage(msg) => Self::Usage(msg),
            kachery_remote::Error::Transport(e) => Self::Http(e),
        }
    }
}

/// Flatten a [`kachery_resolve::Error<Error>`] into a plain [`Error`]. Not a
/// blanket `From` impl since `kachery_resolve::Error` is itself generic.
pub(crate) fn from_resolve(e: kachery_resolve::Error<Error>) -> Error {
    match e {
        kachery_resolve::Error::Loader(inner) => inner,
        kachery_resolve::Error::Json(json) => Error::Json(json),
    }
}

pub(crate) fn io_other(e: Error) -> std::io::Error {
    match e {
        Error::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    }
}
