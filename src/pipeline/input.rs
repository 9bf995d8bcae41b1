//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why download to a temp file?
//!
//! pdfium requires a file-system path — it cannot stream from a byte buffer.
//! Downloading to a `TempDir` gives us a path pdfium can open while ensuring
//! cleanup happens automatically when `ResolvedInput` is dropped, even if
//! the process panics. We validate the PDF magic bytes (`%PDF`) before
//! returning so callers get a meaningful error rather than a pdfium crash.
//!
//! ## Size guard
//!
//! The advertised `Content-Length` is checked first, but servers lie or omit
//! it, so the body is also counted while it streams and the download stops as
//! soon as it crosses the limit.

use crate::error::FormulaError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Default cap on downloaded PDFs.
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// The resolved input — either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
///
/// URLs are downloaded (at most `max_size_bytes`) to a temporary directory;
/// local files are checked for existence, readability and the PDF magic.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
    max_size_bytes: u64,
) -> Result<ResolvedInput, FormulaError> {
    if is_url(input) {
        download_url(input, timeout_secs, max_size_bytes).await
    } else if input.trim().is_empty() {
        Err(FormulaError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, FormulaError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(FormulaError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(FormulaError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(FormulaError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(FormulaError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(
    url: &str,
    timeout_secs: u64,
    max_size_bytes: u64,
) -> Result<ResolvedInput, FormulaError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| FormulaError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let too_large = || FormulaError::FileTooLarge {
        url: url.to_string(),
        limit_mb: max_size_bytes / (1024 * 1024),
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FormulaError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(failed("not found (HTTP 404)".into()));
    }
    if !status.is_success() {
        return Err(failed(format!("HTTP {}", status)));
    }
    if response.content_length().is_some_and(|len| len > max_size_bytes) {
        return Err(too_large());
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| FormulaError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);
    let mut file = tokio::fs::File::create(&file_path)
        .await
        .map_err(|e| FormulaError::Internal(format!("Failed to create temp file: {}", e)))?;

    let mut received: u64 = 0;
    let mut magic = [0u8; 4];
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                FormulaError::DownloadTimeout {
                    url: url.to_string(),
                    secs: timeout_secs,
                }
            } else {
                failed(e.to_string())
            }
        })?;

        let before = received as usize;
        if before < 4 {
            let take = (4 - before).min(chunk.len());
            magic[before..before + take].copy_from_slice(&chunk[..take]);
        }
        received += chunk.len() as u64;
        if received > max_size_bytes {
            return Err(too_large());
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| FormulaError::Internal(format!("Failed to write temp file: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| FormulaError::Internal(format!("Failed to write temp file: {}", e)))?;

    if received >= 4 && &magic != b"%PDF" {
        return Err(FormulaError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    info!("Downloaded {} bytes to: {}", received, file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it looks like a file name, else `downloaded.pdf`.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
