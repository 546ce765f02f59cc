//! Self-healing JSON side-file helpers shared by the fingerprint cache and
//! the hint list: a read failure (missing file is not a failure; malformed
//! JSON is) deletes the file and is treated as absence, never propagated.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Read and parse `path` as JSON. Returns `None` if the file is missing.
/// On parse failure, logs a warning, deletes the file, and returns `None` —
/// corrupt metadata self-heals rather than propagating an error (§4.C, §7).
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(_) => return None,
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("kachery-store: corrupt JSON at {}: {e}, deleting", path.display());
            if let Err(remove_err) = fs::remove_file(path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    log::warn!("kachery-store: failed to delete corrupt {}: {remove_err}", path.display());
                }
            }
            None
        }
    }
}

/// Serialize `value` and atomically replace `path` with it: write to a
/// randomized temp file in the same directory, then rename into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let json = serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("side-file");
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?;

    use std::io::Write as _;
    tmp.write_all(&json)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
