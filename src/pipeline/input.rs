//! Input resolution: validate the source file and decide the conversion
//! direction from its extension.
//!
//! The direction is a pure function of the input extension, the requested
//! format and (when no format was requested) the output extension. The only
//! I/O here is the existence / readability / magic-byte check, done up front
//! so a typo fails before any network call or Pandoc run.

use crate::config::TargetFormat;
use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// ZIP local-file-header magic; every DOCX starts with it.
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// What a conversion was asked to do.
///
/// Built once from CLI arguments or interactive prompts and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub format: Option<TargetFormat>,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            format: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_format(mut self, format: TargetFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Kind of document the input file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Markdown,
    Docx,
}

impl SourceKind {
    /// Classify a path by extension (ASCII case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ConvertError> {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("md") | Some("markdown") => Ok(SourceKind::Markdown),
            Some("docx") => Ok(SourceKind::Docx),
            Some(other) => Err(ConvertError::UnsupportedFormat {
                path: path.to_path_buf(),
                detail: format!("extension '.{other}' is not supported"),
            }),
            None => Err(ConvertError::UnsupportedFormat {
                path: path.to_path_buf(),
                detail: "file has no extension".to_string(),
            }),
        }
    }
}

/// The three conversions this crate performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    MarkdownToDocx,
    MarkdownToPdf,
    DocxToMarkdown,
}

impl Direction {
    pub fn source(self) -> SourceKind {
        match self {
            Direction::MarkdownToDocx | Direction::MarkdownToPdf => SourceKind::Markdown,
            Direction::DocxToMarkdown => SourceKind::Docx,
        }
    }

    pub fn target(self) -> TargetFormat {
        match self {
            Direction::MarkdownToDocx => TargetFormat::Docx,
            Direction::MarkdownToPdf => TargetFormat::Pdf,
            Direction::DocxToMarkdown => TargetFormat::Markdown,
        }
    }
}

/// Decide the conversion direction.
///
/// For Markdown input an explicit `requested` format wins; otherwise the
/// output extension decides when it is `.docx` or `.pdf`, and DOCX is the
/// fallback. DOCX input always becomes Markdown.
pub fn resolve_direction(
    input: &Path,
    requested: Option<TargetFormat>,
    output: Option<&Path>,
) -> Result<Direction, ConvertError> {
    match SourceKind::from_path(input)? {
        SourceKind::Markdown => {
            let target = match requested {
                Some(fmt) => fmt,
                None => output
                    .and_then(|p| p.extension())
                    .and_then(OsStr::to_str)
                    .and_then(|ext| ext.parse::<TargetFormat>().ok())
                    .filter(|fmt| *fmt != TargetFormat::Markdown)
                    .unwrap_or(TargetFormat::Docx),
            };
            match target {
                TargetFormat::Docx => Ok(Direction::MarkdownToDocx),
                TargetFormat::Pdf => Ok(Direction::MarkdownToPdf),
                TargetFormat::Markdown => Err(ConvertError::UnsupportedFormat {
                    path: input.to_path_buf(),
                    detail: "Markdown input can only be converted to docx or pdf".to_string(),
                }),
            }
        }
        SourceKind::Docx => {
            if let Some(fmt) = requested.filter(|f| *f != TargetFormat::Markdown) {
                warn!(
                    "Ignoring requested format '{}': DOCX input is always converted to Markdown",
                    fmt
                );
            }
            Ok(Direction::DocxToMarkdown)
        }
    }
}

/// Output path used when the caller did not supply one: the input file name
/// with the target extension, in the input's directory.
pub fn default_output_path(input: &Path, direction: Direction) -> PathBuf {
    input.with_extension(direction.target().extension())
}

/// Validate that the input exists, is readable and, for DOCX, is a ZIP
/// container. Returns the detected source kind.
pub fn resolve_input(path: &Path) -> Result<SourceKind, ConvertError> {
    let kind = SourceKind::from_path(path)?;

    if !path.is_file() {
        return Err(ConvertError::InputNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            if kind == SourceKind::Docx {
                let mut magic = [0u8; 4];
                let read = f.read_exact(&mut magic);
                if read.is_err() || &magic != ZIP_MAGIC {
                    return Err(ConvertError::NotADocx {
                        path: path.to_path_buf(),
                        magic,
                    });
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConvertError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(ConvertError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    debug!("Resolved {:?} input: {}", kind, path.display());
    Ok(kind)
}

/// Strip the quotes people paste around paths copied from a file manager.
pub fn clean_path_input(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}
