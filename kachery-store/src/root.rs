//! Storage-root resolution (§4.D, §6).
//!
//! Resolution order per algorithm: an explicit setter; else `KACHERY_STORAGE_DIR`;
//! else a legacy per-algorithm alias (`SHA1_CACHE_DIR`/`KBUCKET_CACHE_DIR` for
//! SHA-1, `MD5_CACHE_DIR` for MD5); else a hardcoded `/tmp` default. The
//! alternate root and bootstrap directory are simpler: an explicit setter,
//! else a single environment variable, else absent.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, RwLock};

use kachery_digest::Alg;

#[derive(Debug, Clone, Default)]
struct Roots {
    explicit_primary: Option<PathBuf>,
    explicit_alt: Option<PathBuf>,
    explicit_bootstrap: Option<PathBuf>,
}

fn global() -> &'static RwLock<Roots> {
    static GLOBAL: OnceLock<RwLock<Roots>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Roots::default()))
}

/// Explicitly set the primary storage root, overriding environment and
/// default resolution for both algorithms. Pass `None` to fall back to
/// environment/default resolution again.
pub fn set_storage_dir(path: Option<PathBuf>) {
    global().write().expect("storage root lock poisoned").explicit_primary = path;
}

/// Explicitly set the read-only alternate storage root.
pub fn set_storage_dir_alt(path: Option<PathBuf>) {
    global().write().expect("storage root lock poisoned").explicit_alt = path;
}

/// Explicitly set the optional SHA-1-only bootstrap directory.
pub fn set_bootstrap_dir(path: Option<PathBuf>) {
    global().write().expect("storage root lock poisoned").explicit_bootstrap = path;
}

/// Reset all explicit overrides, returning to pure environment/default
/// resolution. Intended for test isolation between cases.
pub fn reset() {
    *global().write().expect("storage root lock poisoned") = Roots::default();
}

fn warned_once(alg: Alg) -> &'static AtomicBool {
    static SHA1_WARNED: AtomicBool = AtomicBool::new(false);
    static MD5_WARNED: AtomicBool = AtomicBool::new(false);
    match alg {
        Alg::Sha1 => &SHA1_WARNED,
        Alg::Md5 => &MD5_WARNED,
    }
}

/// Resolve the storage root used for `alg`'s artifacts.
#[must_use]
pub fn storage_root(alg: Alg) -> PathBuf {
    if let Some(p) = global().read().expect("storage root lock poisoned").explicit_primary.clone() {
        return p;
    }
    if let Ok(p) = env::var("KACHERY_STORAGE_DIR") {
        return PathBuf::from(p);
    }

    let (legacy_vars, default_dir): (&[&str], &str) = match alg {
        Alg::Sha1 => (&["SHA1_CACHE_DIR", "KBUCKET_CACHE_DIR"], "/tmp/sha1-cache"),
        Alg::Md5 => (&["MD5_CACHE_DIR"], "/tmp/md5-cache"),
    };
    for var in legacy_vars {
        if let Ok(p) = env::var(var) {
            return PathBuf::from(p);
        }
    }

    if !warned_once(alg).swap(true, Ordering::SeqCst) {
        log::warn!(
            "kachery-store: no storage directory configured for {alg}, falling back to default {default_dir}"
        );
    }
    PathBuf::from(default_dir)
}

/// Resolve the read-only alternate storage root, if configured.
#[must_use]
pub fn storage_root_alt() -> Option<PathBuf> {
    if let Some(p) = global().read().expect("storage root lock poisoned").explicit_alt.clone() {
        return Some(p);
    }
    env::var("KACHERY_STORAGE_DIR_ALT").ok().map(PathBuf::from)
}

/// Resolve the optional SHA-1-only bootstrap directory, if configured.
#[must_use]
pub fn bootstrap_dir() -> Option<PathBuf> {
    if let Some(p) = global().read().expect("storage root lock poisoned").explicit_bootstrap.clone() {
        return Some(p);
    }
    env::var("KACHERY_BOOTSTRAP_MOUNTAINTOOLS_DIR").ok().map(PathBuf::from)
}

/// The flat path for `hash` within the bootstrap directory (SHA-1 only, no
/// prefix nesting — the legacy mountaintools cache convention).
#[must_use]
pub fn bootstrap_path(dir: &Path, hash: &str) -> PathBuf {
    dir.join(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn explicit_setter_wins_over_environment() {
        reset();
        set_storage_dir(Some(PathBuf::from("/explicit")));
        assert_eq!(storage_root(Alg::Sha1), Path::new("/explicit"));
        reset();
    }

    #[test]
    #[serial]
    fn falls_back_to_default_when_nothing_configured() {
        reset();
        // SAFETY: test-only, serialized via #[serial] against other env-mutating tests.
        unsafe {
            env::remove_var("KACHERY_STORAGE_DIR");
            env::remove_var("SHA1_CACHE_DIR");
            env::remove_var("KBUCKET_CACHE_DIR");
            env::remove_var("MD5_CACHE_DIR");
        }
        assert_eq!(storage_root(Alg::Sha1), Path::new("/tmp/sha1-cache"));
        assert_eq!(storage_root(Alg::Md5), Path::new("/tmp/md5-cache"));
        reset();
    }

    #[test]
    #[serial]
    fn legacy_alias_used_before_default() {
        reset();
        // SAFETY: test-only, serialized via #[serial].
        unsafe {
            env::remove_var("KACHERY_STORAGE_DIR");
            env::set_var("SHA1_CACHE_DIR", "/legacy-sha1");
        }
        assert_eq!(storage_root(Alg::Sha1), Path::new("/legacy-sha1"));
        // SAFETY: test-only.
        unsafe {
            env::remove_var("SHA1_CACHE_DIR");
        }
        reset();
    }

    #[test]
    #[serial]
    fn alt_root_is_none_when_unconfigured() {
        reset();
        // SAFETY: test-only, serialized via #[serial].
        unsafe {
            env::remove_var("KACHERY_STORAGE_DIR_ALT");
        }
        assert_eq!(storage_root_alt(), None);
        reset();
    }
}
