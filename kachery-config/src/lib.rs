//! Layered global configuration for the kachery facade.
//!
//! Mirrors the original implementation's `config` context-manager: a single
//! process-wide [`Config`] value, mutated through [`set_config`] and restored
//! to its prior value when the returned [`Scope`] guard drops — including on
//! panic-driven unwind, since restoration happens in `Drop`.
//!
//! Three resolution layers apply throughout this crate's surface, matching
//! `kachery-store`'s storage-root resolution: (1) an explicit value passed to
//! [`set_config`], (2) an environment variable, (3) a hardcoded default.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::env;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use kachery_digest::Alg;

// ============================================================================
// Password
// ============================================================================

/// A remote channel password, either given directly or indirected through an
/// environment variable.
///
/// Modeled as a real two-variant enum (rather than a stringly-typed `{env:
/// VAR}` convention checked at runtime) so a malformed indirection is a
/// construction-time mistake, not a parse failure deep in a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Password {
    /// The password itself.
    Literal(String),
    /// The name of an environment variable holding the password.
    EnvIndirect(String),
}

impl Password {
    /// Resolve this password to its literal value.
    pub fn resolve(&self) -> Result<String, Error> {
        match self {
            Self::Literal(s) => Ok(s.clone()),
            Self::EnvIndirect(var) => {
                env::var(var).map_err(|_| Error::MissingEnvVar(var.clone()))
            }
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A fully-specified remote endpoint: URL, channel, and password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineEndpoint {
    /// Base URL of the kachery server.
    pub url: String,
    /// Channel name on that server.
    pub channel: String,
    /// Channel password.
    pub password: Password,
}

/// A `to` or `fr` endpoint reference, as the caller supplied it.
///
/// `Named` is retained at the type level so this value round-trips through
/// the on-disk shape the (out-of-scope) server-discovery collaborator would
/// resolve — this crate never resolves a `Named` reference itself. A network
/// operation that needs a URL and finds an unresolved `Named` endpoint
/// surfaces [`Error::UnresolvedNamedEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointRef {
    /// Already-resolved `{url, channel, password}`.
    Inline(InlineEndpoint),
    /// A server name (and optional channel override) for the server-discovery
    /// collaborator to resolve. Not usable directly by this crate.
    Named {
        /// The server's name, as known to the discovery collaborator.
        server: String,
        /// An explicit channel override, if different from the server's default.
        channel: Option<String>,
    },
}

impl EndpointRef {
    /// Resolve this endpoint to a concrete `(url, channel, password)` triple,
    /// failing if it is an unresolved `Named` reference.
    pub fn resolve(&self) -> Result<(String, String, String), Error> {
        match self {
            Self::Inline(ep) => Ok((ep.url.clone(), ep.channel.clone(), ep.password.resolve()?)),
            Self::Named { server, .. } => {
                Err(Error::UnresolvedNamedEndpoint(server.clone()))
            }
        }
    }
}

// ============================================================================
// Direction
// ============================================================================

/// Which direction an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Reads (`fr`).
    Read,
    /// Writes (`to`).
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "fr",
            Self::Write => "to",
        })
    }
}

// ============================================================================
// Config
// ============================================================================

/// The full set of options threaded through every kachery operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upload endpoint.
    pub to: Option<EndpointRef>,
    /// Download endpoint.
    pub fr: Option<EndpointRef>,
    /// If set, reads never consult the local cache before the remote.
    pub from_remote_only: bool,
    /// If set, writes never populate the local cache.
    pub to_remote_only: bool,
    /// Default algorithm for operations that don't pin one explicitly.
    pub algorithm: Alg,
    /// Use hard links (rather than copies) when inserting into the local cache.
    pub use_hard_links: bool,
    /// Gate human-readable progress logging at `info` level.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            to: legacy_endpoint(),
            fr: legacy_endpoint(),
            from_remote_only: false,
            to_remote_only: false,
            algorithm: Alg::Sha1,
            use_hard_links: false,
            verbose: env::var("HTTP_VERBOSE").is_ok(),
        }
    }
}

/// `KACHERY_URL`/`KACHERY_CHANNEL`/`KACHERY_PASSWORD`: the legacy
/// single-endpoint fallback, applied identically to both `to` and `fr` when
/// no explicit endpoint is configured.
fn legacy_endpoint() -> Option<EndpointRef> {
    let url = env::var("KACHERY_URL").ok()?;
    let channel = env::var("KACHERY_CHANNEL").unwrap_or_default();
    let password = env::var("KACHERY_PASSWORD").unwrap_or_default();
    Some(EndpointRef::Inline(InlineEndpoint {
        url,
        channel,
        password: Password::Literal(password),
    }))
}

/// A partial update applied by [`set_config`]. Every field left `None`
/// leaves the corresponding [`Config`] field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    /// New upload endpoint, or `None` to leave the current one in place.
    pub to: Option<EndpointRef>,
    /// New download endpoint, or `None` to leave the current one in place.
    pub fr: Option<EndpointRef>,
    /// Override `from_remote_only`.
    pub from_remote_only: Option<bool>,
    /// Override `to_remote_only`.
    pub to_remote_only: Option<bool>,
    /// Override the default algorithm.
    pub algorithm: Option<Alg>,
    /// Override `use_hard_links`.
    pub use_hard_links: Option<bool>,
    /// Override `verbose`.
    pub verbose: Option<bool>,
}

fn global() -> &'static RwLock<Config> {
    static GLOBAL: OnceLock<RwLock<Config>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Config::default()))
}

/// Read the current process-wide configuration.
#[must_use]
pub fn get_config() -> Config {
    global().read().expect("config lock poisoned").clone()
}

/// Apply `update` to the process-wide configuration, returning a [`Scope`]
/// guard that restores the prior configuration when dropped.
///
/// ```
/// use kachery_config::{set_config, get_config, ConfigUpdate};
///
/// let before = get_config().verbose;
/// {
///     let _scope = set_config(ConfigUpdate { verbose: Some(!before), ..Default::default() });
///     assert_eq!(get_config().verbose, !before);
/// }
/// assert_eq!(get_config().verbose, before);
/// ```
#[must_use = "the scoped override lasts only as long as the returned guard is alive"]
pub fn set_config(update: ConfigUpdate) -> Scope {
    let mut guard = global().write().expect("config lock poisoned");
    let previous = guard.clone();

    if let Some(to) = update.to {
        guard.to = Some(to);
    }
    if let Some(fr) = update.fr {
        guard.fr = Some(fr);
    }
    if let Some(v) = update.from_remote_only {
        guard.from_remote_only = v;
    }
    if let Some(v) = update.to_remote_only {
        guard.to_remote_only = v;
    }
    if let Some(v) = update.algorithm {
        guard.algorithm = v;
    }
    if let Some(v) = update.use_hard_links {
        guard.use_hard_links = v;
    }
    if let Some(v) = update.verbose {
        guard.verbose = v;
    }

    log::debug!("kachery-config: configuration updated");
    Scope { previous: Some(previous) }
}

/// Reset the process-wide configuration to its default (env-derived) value.
///
/// Intended for test suites that reconfigure endpoints between cases, rather
/// than relying on process restart to clear state.
pub fn reset() {
    *global().write().expect("config lock poisoned") = Config::default();
}

/// Restores the configuration in effect before [`set_config`] was called,
/// when dropped.
pub struct Scope {
    previous: Option<Config>,
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *global().write().expect("config lock poisoned") = previous;
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while resolving configuration values.
#[derive(Debug)]
pub enum Error {
    /// A `{env: VAR}` password indirection pointed at an unset variable.
    MissingEnvVar(String),
    /// An endpoint was still a `Named` reference when a network operation
    /// needed a concrete URL.
    UnresolvedNamedEndpoint(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnvVar(var) => write!(f, "environment variable '{var}' is not set"),
            Self::UnresolvedNamedEndpoint(server) => {
                write!(f, "endpoint '{server}' was never resolved to a URL")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn set_config_overrides_and_scope_restores() {
        reset();
        let before = get_config();
        {
            let _scope = set_config(ConfigUpdate {
                algorithm: Some(Alg::Md5),
                use_hard_links: Some(true),
                ..Default::default()
            });
            let during = get_config();
            assert_eq!(during.algorithm, Alg::Md5);
            assert!(during.use_hard_links);
        }
        assert_eq!(get_config(), before);
    }

    #[test]
    #[serial]
    fn nested_scopes_restore_in_order() {
        reset();
        let outer = set_config(ConfigUpdate {
            algorithm: Some(Alg::Md5),
            ..Default::default()
        });
        {
            let _inner = set_config(ConfigUpdate {
                algorithm: Some(Alg::Sha1),
                ..Default::default()
            });
            assert_eq!(get_config().algorithm, Alg::Sha1);
        }
        assert_eq!(get_config().algorithm, Alg::Md5);
        drop(outer);
        assert_eq!(get_config().algorithm, Alg::Sha1);
    }

    #[test]
    fn literal_password_resolves_directly() {
        let p = Password::Literal("secret".to_owned());
        assert_eq!(p.resolve().unwrap(), "secret");
    }

    #[test]
    fn env_indirect_password_resolves_from_environment() {
        // SAFETY: test-only, single-threaded env mutation guarded by #[serial]
        // would be needed if this ran concurrently with other env-touching
        // tests; this variable name is unique to this test.
        unsafe {
            env::set_var("KACHERY_TEST_PW_VAR", "from-env");
        }
        let p = Password::EnvIndirect("KACHERY_TEST_PW_VAR".to_owned());
        assert_eq!(p.resolve().unwrap(), "from-env");
        unsafe {
            env::remove_var("KACHERY_TEST_PW_VAR");
        }
    }

    #[test]
    fn env_indirect_password_missing_var_errors() {
        let p = Password::EnvIndirect("KACHERY_DOES_NOT_EXIST_XYZ".to_owned());
        assert!(matches!(p.resolve(), Err(Error::MissingEnvVar(_))));
    }

    #[test]
    fn named_endpoint_does_not_resolve() {
        let ep = EndpointRef::Named {
            server: "myserver".to_owned(),
            channel: None,
        };
        assert!(matches!(ep.resolve(), Err(Error::UnresolvedNamedEndpoint(_))));
    }

    #[test]
    fn inline_endpoint_resolves() {
        let ep = EndpointRef::Inline(InlineEndpoint {
            url: "https://example.org".to_owned(),
            channel: "ch".to_owned(),
            password: Password::Literal("pw".to_owned()),
        });
        assert_eq!(
            ep.resolve().unwrap(),
            ("https://example.org".to_owned(), "ch".to_owned(), "pw".to_owned())
        );
    }
}
