//! Error types for the pdf2md-formula library.
//!
//! Two failure modes exist and they are kept apart on purpose:
//!
//! * [`FormulaError`] — returned by the glue around the core: resolving the
//!   input, opening the PDF, rendering, talking to the OCR endpoint. These
//!   surface as `Err(FormulaError)` from the individual stage functions.
//!
//! * Degradation — once a document reaches the orchestrator, no error escapes.
//!   Any `FormulaError` (or panic) raised inside the pipeline is folded into
//!   [`crate::output::PatchOutcome::Degraded`] and the caller receives the
//!   original Markdown untouched.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the pdf2md-formula library.
#[derive(Debug, Error)]
pub enum FormulaError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// Remote file is larger than the configured limit.
    #[error("PDF at '{url}' exceeds maximum size of {limit_mb}MB")]
    FileTooLarge { url: String, limit_mb: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// pdfium could not produce a text layout for a page.
    #[error("Text layout extraction failed for page {page}: {detail}")]
    LayoutFailed { page: usize, detail: String },

    /// A layout record from an external source is missing required fields.
    #[error("Invalid layout record: {0}")]
    InvalidLayout(String),

    // ── Image errors ──────────────────────────────────────────────────────
    /// A formula crop could not be encoded for transport.
    #[error("Image encoding failed: {0}")]
    ImageEncoding(#[from] image::ImageError),

    // ── OCR errors ────────────────────────────────────────────────────────
    /// No OCR backend could be constructed from the configuration.
    #[error("OCR provider is not configured: {hint}")]
    ProviderNotConfigured { hint: String },

    /// The OCR request could not be sent or its body could not be read.
    #[error("OCR request failed: {0}")]
    OcrTransport(String),

    /// The OCR endpoint answered with a non-success status code.
    #[error("OCR endpoint returned HTTP {status}: {body}")]
    OcrStatus { status: u16, body: String },

    /// The OCR endpoint answered, but the body was not a usable completion.
    #[error("Malformed OCR response: {0}")]
    OcrResponse(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for FormulaError {
    fn from(e: reqwest::Error) -> Self {
        FormulaError::OcrTransport(e.to_string())
    }
}
