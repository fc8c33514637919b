//! Artifact delivery: resolve a source to its complete binary payload.
//!
//! Remote http/https sources stream through `ureq` (behind the `fetch`
//! feature) with a `(bytes_loaded, bytes_total)` progress callback. `file://`
//! URIs and plain paths read from disk. Retry and integrity policy belong to
//! the caller's download subsystem, not here.

use std::borrow::Cow;
use std::path::Path;

use crate::error::EngineError;

/// Where an artifact (model graph or vocabulary) comes from.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// A URI: `http://`, `https://`, `file://`, or a plain filesystem path.
    Uri(String),
    /// An in-memory binary payload.
    Bytes(Vec<u8>),
}

impl ArtifactSource {
    /// Convenience constructor for URI sources.
    pub fn uri(uri: impl Into<String>) -> Self {
        ArtifactSource::Uri(uri.into())
    }

    /// Resolve this source to its complete payload.
    ///
    /// `Bytes` sources are returned without copying; `Uri` sources go through
    /// [`fetch_bytes`].
    pub fn resolve(&self, progress: &dyn Fn(u64, u64)) -> Result<Cow<'_, [u8]>, EngineError> {
        match self {
            ArtifactSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            ArtifactSource::Uri(uri) => fetch_bytes(uri, progress).map(Cow::Owned),
        }
    }
}

impl From<Vec<u8>> for ArtifactSource {
    fn from(bytes: Vec<u8>) -> Self {
        ArtifactSource::Bytes(bytes)
    }
}

impl From<&str> for ArtifactSource {
    fn from(uri: &str) -> Self {
        ArtifactSource::Uri(uri.to_string())
    }
}

/// Fetch the complete payload behind a URI.
///
/// The progress callback receives `(bytes_loaded, bytes_total)`; total is 0
/// when the server does not declare a length. Unrecognized URI schemes fail
/// with [`EngineError::InvalidSource`].
pub fn fetch_bytes(uri: &str, progress: &dyn Fn(u64, u64)) -> Result<Vec<u8>, EngineError> {
    if let Some(path) = uri.strip_prefix("file://") {
        return read_local(Path::new(path), progress);
    }

    if uri.starts_with("http://") || uri.starts_with("https://") {
        return http_fetch(uri, progress);
    }

    if uri.contains("://") {
        return Err(EngineError::InvalidSource(format!(
            "unsupported URI scheme in '{}'",
            uri
        )));
    }

    read_local(Path::new(uri), progress)
}

fn read_local(path: &Path, progress: &dyn Fn(u64, u64)) -> Result<Vec<u8>, EngineError> {
    let bytes = std::fs::read(path).map_err(|e| {
        EngineError::Load(format!("Failed to read '{}': {}", path.display(), e))
    })?;
    let total = bytes.len() as u64;
    progress(total, total);
    Ok(bytes)
}

#[cfg(feature = "fetch")]
fn http_fetch(uri: &str, progress: &dyn Fn(u64, u64)) -> Result<Vec<u8>, EngineError> {
    use std::io::Read;

    let response = ureq::get(uri)
        .call()
        .map_err(|e| EngineError::Load(format!("Failed to fetch '{}': {}", uri, e)))?;

    let total_bytes = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let mut reader = response.into_body().into_reader();
    let mut payload = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut loaded: u64 = 0;

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| EngineError::Load(format!("Read error fetching '{}': {}", uri, e)))?;
        if n == 0 {
            break;
        }
        payload.extend_from_slice(&buf[..n]);
        loaded += n as u64;
        progress(loaded, total_bytes);
    }

    if total_bytes > 0 && loaded != total_bytes {
        return Err(EngineError::Load(format!(
            "Fetch size mismatch for '{}': expected {} bytes, got {}",
            uri, total_bytes, loaded
        )));
    }

    Ok(payload)
}

#[cfg(not(feature = "fetch"))]
fn http_fetch(uri: &str, _progress: &dyn Fn(u64, u64)) -> Result<Vec<u8>, EngineError> {
    Err(EngineError::Load(format!(
        "Cannot fetch '{}': compiled without the `fetch` feature",
        uri
    )))
}
