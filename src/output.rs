//! Result types returned by the conversion entry points.
//!
//! Everything here is `Serialize` so the CLI can print a run report with
//! `--json` and callers can persist it next to the produced document.

use crate::config::TargetFormat;
use crate::error::DiagramError;
use crate::pipeline::input::{Direction, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of one end-to-end conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Input document as given by the caller.
    pub input: PathBuf,
    /// Document that was written.
    pub output: PathBuf,
    /// Conversion direction that was executed.
    pub direction: Direction,
    /// Per-diagram outcomes in document order. Empty for DOCX input.
    pub diagrams: Vec<DiagramResult>,
    /// PDF engine that produced the document, for PDF output.
    pub pdf_engine: Option<String>,
    /// Set when the primary PDF engine could not be used.
    pub pdf_fallback: Option<PdfFallback>,
    /// Directory that received extracted media (DOCX → Markdown only).
    pub media_dir: Option<PathBuf>,
    /// Aggregate statistics.
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Diagrams that were replaced by a failure notice.
    pub fn failed_diagrams(&self) -> impl Iterator<Item = &DiagramResult> {
        self.diagrams.iter().filter(|d| d.error.is_some())
    }
}

/// Outcome of rendering one diagram block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramResult {
    /// 1-based position of the diagram in the document.
    pub index: usize,
    /// Where the PNG was written, when rendering succeeded.
    pub image_path: Option<PathBuf>,
    /// Size of the PNG in bytes (0 on failure).
    pub bytes: usize,
    /// Retries needed (0 = first attempt succeeded).
    pub retries: u8,
    /// Wall-clock time spent on this diagram, including back-off.
    pub duration_ms: u64,
    /// Failure, if the diagram could not be rendered.
    pub error: Option<DiagramError>,
}

/// Record of a PDF produced by the fallback engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfFallback {
    /// Engine that was tried first.
    pub primary: String,
    /// Engine that produced the PDF.
    pub fallback: String,
    /// Why the primary engine was abandoned.
    pub reason: String,
}

/// Aggregate statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_diagrams: usize,
    pub rendered_diagrams: usize,
    pub failed_diagrams: usize,
    pub front_matter_stripped: bool,
    pub rules_rewritten: usize,
    pub headings_rewritten: usize,
    pub diagram_duration_ms: u64,
    pub engine_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// What [`crate::inspect`] learns about an input without converting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectReport {
    pub input: PathBuf,
    pub source: SourceKind,
    pub direction: Direction,
    pub target: TargetFormat,
    pub default_output: PathBuf,
    pub front_matter: bool,
    pub rules_rewritten: usize,
    pub headings_rewritten: usize,
    pub diagram_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_serialises_to_json() {
        let output = ConversionOutput {
            input: PathBuf::from("demo.md"),
            output: PathBuf::from("demo.docx"),
            direction: Direction::MarkdownToDocx,
            diagrams: vec![DiagramResult {
                index: 1,
                image_path: None,
                bytes: 0,
                retries: 2,
                duration_ms: 10,
                error: Some(DiagramError::Timeout {
                    diagram: 1,
                    secs: 30,
                }),
            }],
            pdf_engine: None,
            pdf_fallback: None,
            media_dir: None,
            stats: ConversionStats::default(),
        };
        let json = serde_json::to_string(&output).expect("serialisable");
        assert!(json.contains("\"direction\":\"markdown_to_docx\""), "got: {json}");
        assert!(json.contains("Timeout"));
        assert_eq!(output.failed_diagrams().count(), 1);
    }
}
