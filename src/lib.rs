//! # docconv
//!
//! Convert Markdown to DOCX or PDF with rendered Mermaid diagrams, and DOCX
//! back to Markdown.
//!
//! Pandoc does the document conversion. Before it sees a Markdown file, the
//! text is cleaned up so Pandoc reads it the way the author meant: front
//! matter is removed, bare `---` rules can no longer be mistaken for YAML
//! metadata blocks, and every fenced `mermaid` block is rendered to a PNG by
//! a mermaid.ink-compatible service and replaced with an image reference.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Input       check extension / existence, pick docx or pdf
//!  ├─ 2. Preprocess  front matter, `---` rules, diagram discovery
//!  ├─ 3. Render      concurrent diagram requests with retry/backoff
//!  ├─ 4. Substitute  images/{stem}_diagram_{n}.png + image references
//!  └─ 5. Pandoc      DOCX, or PDF via xelatex with weasyprint fallback
//!
//! DOCX ─▶ Pandoc ─▶ Markdown + media/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docconv::{convert, ConversionConfig, ConversionRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let output = convert(&ConversionRequest::new("demo.md"), &config).await?;
//!     eprintln!(
//!         "{} diagram(s) rendered, {} failed",
//!         output.stats.rendered_diagrams, output.stats.failed_diagrams
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `convert` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docconv = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Programs
//!
//! | Program | Needed for |
//! |---------|------------|
//! | `pandoc` | every conversion |
//! | `xelatex` or `weasyprint` | PDF output |
//!
//! Diagram rendering needs network access to the configured service
//! (default `https://mermaid.ink`).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, DiagramFailurePolicy, TargetFormat,
    DEFAULT_MERMAID_URL,
};
pub use convert::{convert, convert_sync, inspect};
pub use error::{ConvertError, DiagramError};
pub use output::{ConversionOutput, ConversionStats, DiagramResult, InspectReport, PdfFallback};
pub use pipeline::input::{ConversionRequest, Direction, SourceKind};
pub use pipeline::preprocess::{prepare_markdown, DiagramBlock, PreparedMarkdown};
pub use pipeline::render::{DiagramRenderer, MermaidInkRenderer, RenderFailure, PNG_SIGNATURE};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
