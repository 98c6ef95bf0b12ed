//! Error types for the edgequake-ocrsuite library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrSuiteError`] is **fatal**: the run cannot proceed at all (bad
//!   settings file, unreadable PDF, output directory not writable). Returned
//!   as `Err(OcrSuiteError)` from [`crate::convert::convert`].
//!
//! * [`InferenceError`] is **page-level**: the vision service could not be
//!   reached, timed out, or rejected one request. The batch driver turns it
//!   into an [`crate::output::ErrorRecord`] and moves on to the next page, so
//!   one flaky request never loses the rest of the book.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-ocrsuite library.
#[derive(Debug, Error)]
pub enum OcrSuiteError {
    // ── Configuration ─────────────────────────────────────────────────────
    /// Settings file is missing.
    #[error("Config file not found: '{path}'")]
    ConfigNotFound { path: PathBuf },

    /// Settings file exists but is not valid YAML for [`crate::Config`].
    #[error("Failed to parse config file '{path}': {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    /// A setting is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Preprocessing ─────────────────────────────────────────────────────
    /// Input PDF was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// pdfium could not open the document.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium failed to render or save one page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, or place the library next to the\n\
executable or in the current directory.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Vision service ────────────────────────────────────────────────────
    /// The liveness check failed before any page was processed.
    #[error(
        "Could not connect to the vision service at {url}.\nStart it with: ollama serve\n\
         Then pull a model: ollama pull {model}"
    )]
    ServiceUnavailable { url: String, model: String },

    // ── Assembly ──────────────────────────────────────────────────────────
    /// Could not create or write an output file or directory.
    #[error("Failed to write output '{path}': {source}")]
    Assembly {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── LaTeX ─────────────────────────────────────────────────────────────
    /// LaTeX compilation was requested and failed.
    #[error(transparent)]
    Latex(#[from] crate::latex::LatexError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrSuiteError {
    /// Shorthand for wrapping an I/O failure on an output path.
    pub fn assembly(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OcrSuiteError::Assembly {
            path: path.into(),
            source,
        }
    }
}

/// A recoverable failure talking to the vision service for one page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// Every connection attempt was refused or dropped.
    #[error(
        "Could not connect to vision service at {url} after {attempts} attempts. \
         Is it running? Try: ollama serve"
    )]
    Unreachable { url: String, attempts: u32 },

    /// The server accepted the connection but did not answer in time.
    #[error("Vision request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The server answered with a non-success status.
    #[error("Vision service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The page image could not be read from disk.
    #[error("Could not read image '{path}': {detail}")]
    ImageRead { path: PathBuf, detail: String },

    /// The response body was not the expected JSON shape.
    #[error("Could not decode vision response: {0}")]
    Decode(String),

    /// Any other request failure (bad URL, TLS, builder error).
    #[error("Vision request failed: {0}")]
    Request(String),
}
