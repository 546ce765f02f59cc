//! Blocking HTTP check/get/set protocol against a kachery remote server
//! (§4.H).
//!
//! Every request carries a per-request signature computed as
//! `sha1(canonical_json({algorithm, hash, name: <op>, password}))`, where
//! `<op>` is always one of the three wire names below — these differ from
//! the URL path segments (`check`/`get`/`set`) on purpose; it is what the
//! original server protocol expects and this codebase preserves it.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::io::Read as _;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use kachery_digest::{digest_of_canonical_json, Alg, Digest};
use serde::{Deserialize, Serialize};

/// Delays between successive GET-JSON attempts, applied after the first
/// failed attempt (so up to three attempts total).
const RETRY_DELAYS: &[Duration] = &[Duration::from_millis(200), Duration::from_millis(500)];

/// A resolved remote endpoint: base URL, channel, and plaintext password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL of the kachery server, with no trailing slash assumed.
    pub url: String,
    /// Channel name on that server.
    pub channel: String,
    /// Channel password, already resolved to its literal value.
    pub password: String,
}

/// The three signed operations this protocol supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `GET {url}/check/{alg}/{hash}`.
    Check,
    /// `GET {url}/get/{alg}/{hash}`.
    Download,
    /// `POST {url}/set/{alg}/{hash}`.
    Upload,
}

impl Op {
    /// The wire name carried inside the signature payload's `name` field —
    /// distinct from the URL path segment for the same operation.
    fn signature_name(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }

    fn url_segment(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Download => "get",
            Self::Upload => "set",
        }
    }
}

#[derive(Serialize)]
struct SignaturePayload<'a> {
    algorithm: &'a str,
    hash: &'a str,
    name: &'a str,
    password: &'a str,
}

/// Compute the request signature for `op` against `hash` under `alg`.
///
/// Always hashes with SHA-1 regardless of `alg` — wire compatibility with
/// the original server, preserved even for MD5 artifacts (§9, open question).
pub fn signature(alg: Alg, hash: &str, op: Op, password: &str) -> Result<String, Error> {
    let payload = SignaturePayload {
        algorithm: alg.name(),
        hash,
        name: op.signature_name(),
        password,
    };
    let digest = digest_of_canonical_json(&payload).map_err(Error::Digest)?;
    Ok(digest.hex().to_owned())
}

fn signed_url(endpoint: &Endpoint, alg: Alg, hash: &str, op: Op) -> Result<String, Error> {
    let sig = signature(alg, hash, op, &endpoint.password)?;
    Ok(format!(
        "{}/{}/{}/{}?channel={}&signature={}",
        endpoint.url.trim_end_matches('/'),
        op.url_segment(),
        alg.name(),
        hash,
        urlencode(&endpoint.channel),
        sig,
    ))
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

// ============================================================================
// Check-response memoization
// ============================================================================

fn positive_cache() -> &'static Mutex<HashMap<String, CheckResult>> {
    static CACHE: OnceLock<Mutex<HashMap<String, CheckResult>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Clear the process-wide memoization of positive `check` responses.
///
/// Intended for test suites that reconfigure endpoints between cases, rather
/// than relying on process restart to clear state (§5).
pub fn reset() {
    positive_cache().lock().expect("check cache lock poisoned").clear();
}

/// The outcome of a successful, positive `check` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    /// Size of the artifact on the remote, when the server reports it.
    pub size: Option<u64>,
}

#[derive(Deserialize)]
struct CheckResponse {
    success: bool,
    #[serde(default)]
    found: bool,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// A reusable blocking HTTP client for the check/get/set protocol.
pub struct Client {
    http: reqwest::blocking::Client,
}

impl Client {
    /// Build a client with a fixed per-request timeout.
    pub fn new() -> Result<Self, Error> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("kachery-remote/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(Error::Transport)?;
        Ok(Self { http })
    }

    /// Ask the remote whether it holds an artifact, without downloading it.
    ///
    /// Returns `Ok(None)` for a negative or cache-memoized-absent response,
    /// `Ok(Some(_))` for a positive one (memoized by URL for future calls).
    pub fn check(
        &self,
        endpoint: &Endpoint,
        alg: Alg,
        hash: &Digest,
    ) -> Result<Option<CheckResult>, Error> {
        let url = format!(
            "{}/{}/{}/{}?channel={}&signature={}",
            endpoint.url.trim_end_matches('/'),
            Op::Check.url_segment(),
            alg.name(),
            hash.hex(),
            urlencode(&endpoint.channel),
            signature(alg, hash.hex(), Op::Check, &endpoint.password)?,
        );

        if let Some(cached) = positive_cache().lock().expect("check cache lock poisoned").get(&url)
        {
            return Ok(Some(*cached));
        }

        let response: CheckResponse = self.get_json(&url)?;
        if !response.success {
            log::warn!(
                "kachery-remote: check failed for {}/{}: {}",
                alg.name(),
                hash.hex(),
                response.error.as_deref().unwrap_or("no error message"),
            );
            return Err(Error::RemoteTransport {
                endpoint: endpoint.url.clone(),
                detail: response.error.unwrap_or_else(|| "check request failed".to_owned()),
            });
        }
        if !response.found {
            return Ok(None);
        }

        let result = CheckResult { size: response.size };
        positive_cache()
            .lock()
            .expect("check cache lock poisoned")
            .insert(url, result);
        Ok(Some(result))
    }

    /// Download the full artifact, or the half-open byte range
    /// `[start, end)` when `range` is given, into `out`.
    pub fn download(
        &self,
        endpoint: &Endpoint,
        alg: Alg,
        hash: &Digest,
        range: Option<(u64, u64)>,
        out: &mut dyn std::io::Write,
    ) -> Result<(), Error> {
        let url = signed_url(endpoint, alg, hash.hex(), Op::Download)?;
        let mut request = self.http.get(&url);
        if let Some((start, end)) = range {
            request = request.header("Range", format!("bytes={start}-{}", end.saturating_sub(1)));
        }

        let response = request.send().map_err(|e| Error::RemoteTransport {
            endpoint: endpoint.url.clone(),
            detail: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::RemoteTransport {
                endpoint: endpoint.url.clone(),
                detail: format!("download returned HTTP {status}"),
            });
        }

        let mut reader = response;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(|e| Error::RemoteTransport {
                endpoint: endpoint.url.clone(),
                detail: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Upload `bytes` as the artifact for `(alg, hash)`.
    ///
    /// Zero-length uploads are refused by the server and never attempted;
    /// callers must special-case the empty file before reaching here (§4.H).
    pub fn upload(
        &self,
        endpoint: &Endpoint,
        alg: Alg,
        hash: &Digest,
        bytes: Vec<u8>,
    ) -> Result<(), Error> {
        if bytes.is_empty() {
            return Err(Error::Usage("zero-length uploads are never sent to the server".to_owned()));
        }
        let url = signed_url(endpoint, alg, hash.hex(), Op::Upload)?;
        let response = self
            .http
            .post(&url)
            .body(bytes)
            .send()
            .map_err(|e| Error::RemoteTransport {
                endpoint: endpoint.url.clone(),
                detail: e.to_string(),
            })?;
        let status = response.status();
        let body: UploadResponse = response.json().map_err(|e| Error::RemoteTransport {
            endpoint: endpoint.url.clone(),
            detail: e.to_string(),
        })?;
        if !status.is_success() || !body.success {
            return Err(Error::RemoteTransport {
                endpoint: endpoint.url.clone(),
                detail: body.error.unwrap_or_else(|| format!("upload returned HTTP {status}")),
            });
        }
        Ok(())
    }

    /// `GET` a JSON document, retrying on transport failure per
    /// [`RETRY_DELAYS`]. A JSON parse failure on a successful response is not
    /// retried.
    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, Error> {
        let mut attempt = 0usize;
        loop {
            match self.http.get(url).send().and_then(|r| r.error_for_status()) {
                Ok(response) => {
                    return response.json::<T>().map_err(|e| Error::RemoteTransport {
                        endpoint: url.to_owned(),
                        detail: format!("invalid JSON response: {e}"),
                    });
                }
                Err(e) => {
                    if attempt >= RETRY_DELAYS.len() {
                        return Err(Error::RemoteTransport {
                            endpoint: url.to_owned(),
                            detail: e.to_string(),
                        });
                    }
                    std::thread::sleep(RETRY_DELAYS[attempt]);
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by the remote check/get/set protocol.
#[derive(Debug)]
pub enum Error {
    /// Underlying local I/O failure (writing a downloaded stream out).
    Io(std::io::Error),
    /// A signature could not be computed.
    Digest(kachery_digest::Error),
    /// Building the HTTP client failed, or a request exhausted its retries,
    /// or an upload received a non-2xx status.
    RemoteTransport {
        /// The endpoint URL involved.
        endpoint: String,
        /// What went wrong.
        detail: String,
    },
    /// A caller asked for something the protocol cannot express.
    Usage(String),
    /// An HTTP client could not be constructed.
    Transport(reqwest::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Digest(e) => write!(f, "digest error: {e}"),
            Self::RemoteTransport { endpoint, detail } => {
                write!(f, "remote transport error at {endpoint}: {detail}")
            }
            Self::Usage(msg) => write!(f, "usage error: {msg}"),
            Self::Transport(e) => write!(f, "HTTP client error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Digest(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::RemoteTransport { .. } | Self::Usage(_) => None,
        }
    }
}
