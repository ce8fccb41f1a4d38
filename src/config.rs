//! Configuration types for document conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Every knob lives in one struct so a
//! run can be logged, cloned into concurrent diagram tasks, and reproduced
//! from the CLI flags that produced it.

use crate::error::ConvertError;
use crate::pipeline::render::DiagramRenderer;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default diagram rendering service.
pub const DEFAULT_MERMAID_URL: &str = "https://mermaid.ink";

/// Upper bound accepted for [`ConversionConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for a single conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use docconv::{ConversionConfig, DiagramFailurePolicy};
///
/// let config = ConversionConfig::builder()
///     .diagram_timeout_secs(20)
///     .on_diagram_error(DiagramFailurePolicy::Fail)
///     .pdf_engine("lualatex")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Base URL of the diagram rendering service. Default: `https://mermaid.ink`.
    ///
    /// Diagrams are fetched from `{mermaid_url}/img/{base64}?type=png`, so any
    /// self-hosted mermaid.ink instance works as a drop-in replacement.
    pub mermaid_url: String,

    /// Per-request timeout for the diagram service in seconds. Default: 30.
    pub diagram_timeout_secs: u64,

    /// Retries per diagram after the first attempt. Default: 2, at most
    /// [`MAX_RETRIES`].
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled on every retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Diagram requests in flight at once. Default: 4.
    ///
    /// Results are always spliced back in document order regardless of the
    /// order in which responses arrive.
    pub diagram_concurrency: usize,

    /// What to do when a diagram cannot be rendered. Default: placeholder.
    pub on_diagram_error: DiagramFailurePolicy,

    /// Name of the directory, next to the output file, that receives rendered
    /// diagrams. Default: `images`.
    pub images_dir_name: String,

    /// Pandoc executable. If None, `pandoc` is looked up on `PATH`.
    pub pandoc_path: Option<PathBuf>,

    /// Pandoc reader used for Markdown input. Default: `markdown`.
    pub from_format: String,

    /// Pandoc writer used for DOCX → Markdown. Default: `markdown`.
    pub markdown_flavor: String,

    /// Primary PDF engine handed to Pandoc. Default: `xelatex`.
    pub pdf_engine: String,

    /// Engine used when the primary one is missing or fails. Default: `weasyprint`.
    ///
    /// `None` disables the fallback: a failing primary engine is fatal.
    pub pdf_fallback_engine: Option<String>,

    /// Upper bound for a single Pandoc run in seconds. Default: 300.
    pub engine_timeout_secs: u64,

    /// Pre-constructed diagram renderer. Takes precedence over `mermaid_url`.
    pub renderer: Option<Arc<dyn DiagramRenderer>>,

    /// Receives per-diagram progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            mermaid_url: DEFAULT_MERMAID_URL.to_string(),
            diagram_timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 500,
            diagram_concurrency: 4,
            on_diagram_error: DiagramFailurePolicy::default(),
            images_dir_name: "images".to_string(),
            pandoc_path: None,
            from_format: "markdown".to_string(),
            markdown_flavor: "markdown".to_string(),
            pdf_engine: "xelatex".to_string(),
            pdf_fallback_engine: Some("weasyprint".to_string()),
            engine_timeout_secs: 300,
            renderer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("mermaid_url", &self.mermaid_url)
            .field("diagram_timeout_secs", &self.diagram_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("diagram_concurrency", &self.diagram_concurrency)
            .field("on_diagram_error", &self.on_diagram_error)
            .field("images_dir_name", &self.images_dir_name)
            .field("pandoc_path", &self.pandoc_path)
            .field("from_format", &self.from_format)
            .field("markdown_flavor", &self.markdown_flavor)
            .field("pdf_engine", &self.pdf_engine)
            .field("pdf_fallback_engine", &self.pdf_fallback_engine)
            .field("engine_timeout_secs", &self.engine_timeout_secs)
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn DiagramRenderer>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn mermaid_url(mut self, url: impl Into<String>) -> Self {
        self.config.mermaid_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn diagram_timeout_secs(mut self, secs: u64) -> Self {
        self.config.diagram_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn diagram_concurrency(mut self, n: usize) -> Self {
        self.config.diagram_concurrency = n.max(1);
        self
    }

    pub fn on_diagram_error(mut self, policy: DiagramFailurePolicy) -> Self {
        self.config.on_diagram_error = policy;
        self
    }

    pub fn images_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.images_dir_name = name.into();
        self
    }

    pub fn pandoc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pandoc_path = Some(path.into());
        self
    }

    pub fn from_format(mut self, format: impl Into<String>) -> Self {
        self.config.from_format = format.into();
        self
    }

    pub fn markdown_flavor(mut self, flavor: impl Into<String>) -> Self {
        self.config.markdown_flavor = flavor.into();
        self
    }

    pub fn pdf_engine(mut self, engine: impl Into<String>) -> Self {
        self.config.pdf_engine = engine.into();
        self
    }

    pub fn pdf_fallback_engine(mut self, engine: Option<String>) -> Self {
        self.config.pdf_fallback_engine = engine.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout_secs = secs;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn DiagramRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.renderer.is_none()
            && !(c.mermaid_url.starts_with("http://") || c.mermaid_url.starts_with("https://"))
        {
            return Err(ConvertError::InvalidConfig(format!(
                "Diagram service URL must start with http:// or https://, got '{}'",
                c.mermaid_url
            )));
        }
        if c.diagram_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Diagram timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(ConvertError::InvalidConfig(format!(
                "Max retries must be at most {MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        if c.engine_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Engine timeout must be ≥ 1 second".into(),
            ));
        }
        if c.images_dir_name.trim().is_empty()
            || c.images_dir_name.contains(['/', '\\'])
        {
            return Err(ConvertError::InvalidConfig(format!(
                "Images directory must be a plain directory name, got '{}'",
                c.images_dir_name
            )));
        }
        if c.pdf_engine.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "PDF engine must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output format a conversion produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Docx,
    Pdf,
    Markdown,
}

impl TargetFormat {
    /// File extension (without the dot) written for this format.
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Docx => "docx",
            TargetFormat::Pdf => "pdf",
            TargetFormat::Markdown => "md",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetFormat::Docx => "docx",
            TargetFormat::Pdf => "pdf",
            TargetFormat::Markdown => "markdown",
        })
    }
}

impl FromStr for TargetFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "docx" => Ok(TargetFormat::Docx),
            "pdf" => Ok(TargetFormat::Pdf),
            "md" | "markdown" => Ok(TargetFormat::Markdown),
            other => Err(ConvertError::InvalidConfig(format!(
                "Unknown output format '{other}' (expected docx or pdf)"
            ))),
        }
    }
}

/// What happens to a diagram the rendering service could not produce.
///
/// A dropped diagram silently changes what the document says, so both
/// policies are loud: one stops the run, the other leaves a visible notice
/// plus the diagram source in the output document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramFailurePolicy {
    /// Replace the block with an inline notice followed by its source. (default)
    #[default]
    Placeholder,
    /// Abort the conversion with [`ConvertError::NetworkFailure`].
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConversionConfig::builder().build().expect("defaults build");
        assert_eq!(config.mermaid_url, DEFAULT_MERMAID_URL);
        assert_eq!(config.pdf_engine, "xelatex");
        assert_eq!(config.pdf_fallback_engine.as_deref(), Some("weasyprint"));
        assert_eq!(config.on_diagram_error, DiagramFailurePolicy::Placeholder);
    }

    #[test]
    fn mermaid_url_trailing_slash_trimmed() {
        let config = ConversionConfig::builder()
            .mermaid_url("http://localhost:8080/")
            .build()
            .unwrap();
        assert_eq!(config.mermaid_url, "http://localhost:8080");
    }

    #[test]
    fn rejects_non_http_service_url() {
        let err = ConversionConfig::builder()
            .mermaid_url("ftp://example.org")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn rejects_excessive_retries() {
        let err = ConversionConfig::builder()
            .max_retries(MAX_RETRIES + 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidConfig(ref m) if m.contains("retries")));

        let config = ConversionConfig::builder()
            .max_retries(MAX_RETRIES)
            .build()
            .unwrap();
        assert_eq!(config.max_retries, MAX_RETRIES);
    }

    #[test]
    fn rejects_nested_images_dir() {
        assert!(ConversionConfig::builder()
            .images_dir_name("a/b")
            .build()
            .is_err());
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let config = ConversionConfig::builder()
            .diagram_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(config.diagram_concurrency, 1);
    }

    #[test]
    fn empty_fallback_engine_disables_fallback() {
        let config = ConversionConfig::builder()
            .pdf_fallback_engine(Some("  ".into()))
            .build()
            .unwrap();
        assert!(config.pdf_fallback_engine.is_none());
    }

    #[test]
    fn target_format_parsing() {
        assert_eq!("docx".parse::<TargetFormat>().unwrap(), TargetFormat::Docx);
        assert_eq!("PDF".parse::<TargetFormat>().unwrap(), TargetFormat::Pdf);
        assert_eq!(".md".parse::<TargetFormat>().unwrap(), TargetFormat::Markdown);
        assert!("odt".parse::<TargetFormat>().is_err());
    }

    #[test]
    fn debug_hides_trait_objects() {
        let dbg = format!("{:?}", ConversionConfig::default());
        assert!(dbg.contains("mermaid_url"));
        assert!(dbg.contains("renderer: None"));
    }
}
