//! Error types for the docconv library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`]: **Fatal**: the conversion cannot proceed at all
//!   (unsupported extension, missing input, Pandoc not installed, engine
//!   crashed). Returned as `Err(ConvertError)` from the top-level `convert*`
//!   functions.
//!
//! * [`DiagramError`]: **Non-fatal**: a single diagram could not be
//!   rendered. Stored inside [`crate::output::DiagramResult`]; whether it
//!   aborts the run is decided by
//!   [`crate::config::DiagramFailurePolicy`].
//!
//! A PDF engine fallback is neither: it is recorded as
//! [`crate::output::PdfFallback`] and logged as a warning.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docconv library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input extension is neither Markdown nor DOCX, or the requested
    /// target does not make sense for the source.
    #[error("Unsupported format for '{path}': {detail}\nSupported inputs: .md, .markdown, .docx")]
    UnsupportedFormat { path: PathBuf, detail: String },

    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file has a `.docx` extension but is not a ZIP container.
    #[error("File is not a valid DOCX document: '{path}'\nFirst bytes: {magic:?}")]
    NotADocx { path: PathBuf, magic: [u8; 4] },

    // ── External dependencies ─────────────────────────────────────────────
    /// An external program the conversion needs could not be started.
    #[error("Required program '{program}' is not available.\n{hint}")]
    DependencyMissing { program: String, hint: String },

    // ── Diagram rendering ─────────────────────────────────────────────────
    /// A diagram could not be rendered and the failure policy is `fail`.
    #[error("Diagram {diagram} could not be rendered: {detail}\nCheck your internet connection or use --on-diagram-error placeholder.")]
    NetworkFailure { diagram: usize, detail: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The conversion engine ran but exited unsuccessfully.
    #[error("Conversion engine '{engine}' failed ({status}):\n{stderr}")]
    ConversionEngineFailure {
        engine: String,
        status: String,
        stderr: String,
    },

    /// The conversion engine did not finish within the configured timeout.
    #[error("Conversion engine '{engine}' timed out after {secs}s\nIncrease --engine-timeout.")]
    EngineTimeout { engine: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file or directory.
    #[error("Failed to write '{path}': {source}")]
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

/// A non-fatal error for a single diagram.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum DiagramError {
    /// The rendering service could not be reached or answered with an error.
    #[error("Diagram {diagram}: rendering failed after {retries} retries: {detail}")]
    RenderFailed {
        diagram: usize,
        retries: u8,
        detail: String,
    },

    /// The service answered successfully but the body is not a PNG image.
    #[error("Diagram {diagram}: service returned something that is not a PNG image: {detail}")]
    InvalidImage { diagram: usize, detail: String },

    /// Every attempt hit the request timeout.
    #[error("Diagram {diagram}: rendering timed out after {secs}s")]
    Timeout { diagram: usize, secs: u64 },
}

impl DiagramError {
    /// 1-based index of the diagram this error belongs to.
    pub fn diagram(&self) -> usize {
        match self {
            DiagramError::RenderFailed { diagram, .. }
            | DiagramError::InvalidImage { diagram, .. }
            | DiagramError::Timeout { diagram, .. } => *diagram,
        }
    }

    /// Short reason without the "Diagram N:" prefix, for inline notices.
    pub fn reason(&self) -> String {
        match self {
            DiagramError::RenderFailed { detail, .. } => detail.clone(),
            DiagramError::InvalidImage { detail, .. } => format!("invalid image ({detail})"),
            DiagramError::Timeout { secs, .. } => format!("timed out after {secs}s"),
        }
    }
}

impl From<DiagramError> for ConvertError {
    fn from(e: DiagramError) -> Self {
        ConvertError::NetworkFailure {
            diagram: e.diagram(),
            detail: e.reason(),
        }
    }
}
