//! Conversion entry points.
//!
//! [`convert`] runs one request end to end: validate the input, pick the
//! direction, preprocess Markdown and render its diagrams, then hand the
//! result to Pandoc. [`inspect`] does the first half only and never touches
//! the network or Pandoc.

use crate::config::{ConversionConfig, TargetFormat};
use crate::error::ConvertError;
use crate::output::{ConversionOutput, ConversionStats, InspectReport};
use crate::pipeline::input::{
    default_output_path, resolve_direction, resolve_input, ConversionRequest, Direction,
    SourceKind,
};
use crate::pipeline::pandoc::{self, Pandoc};
use crate::pipeline::preprocess::{prepare_markdown, PreparedMarkdown};
use crate::pipeline::render::resolve_renderer;
use crate::pipeline::substitute::{images_dir_for, substitute_diagrams};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Convert one document.
///
/// # Returns
/// `Ok(ConversionOutput)` once the output file has been written, even if
/// some diagrams were replaced by failure notices (see
/// [`ConversionOutput::failed_diagrams`]).
///
/// # Errors
/// Returns `Err(ConvertError)` for fatal errors only:
/// - unsupported extension, missing or unreadable input, fake DOCX
/// - Pandoc or every PDF engine missing
/// - a diagram failed under [`crate::DiagramFailurePolicy::Fail`]
/// - Pandoc exited with an error or timed out
///
/// # Example
/// ```rust,no_run
/// use docconv::{convert, ConversionConfig, ConversionRequest, TargetFormat};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let request = ConversionRequest::new("demo.md").with_format(TargetFormat::Pdf);
/// let output = convert(&request, &ConversionConfig::default()).await?;
/// println!("wrote {}", output.output.display());
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    let total_start = Instant::now();
    info!("Starting conversion: {}", request.input.display());

    // ── Step 1: Validate input and pick direction ────────────────────────
    resolve_input(&request.input)?;
    let direction = resolve_direction(&request.input, request.format, request.output.as_deref())?;
    let output_path = request
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&request.input, direction));
    let output_abs = absolute(&output_path)?;
    info!(
        "{} → {} ({:?})",
        request.input.display(),
        output_path.display(),
        direction
    );

    // ── Step 2: Locate Pandoc before any network traffic ─────────────────
    let pandoc = Pandoc::locate(config).await?;
    ensure_parent_dir(&output_abs).await?;
    remove_stale_output(&request.input, &output_abs).await?;

    let mut stats = ConversionStats::default();
    let mut output = ConversionOutput {
        input: request.input.clone(),
        output: output_path.clone(),
        direction,
        diagrams: Vec::new(),
        pdf_engine: None,
        pdf_fallback: None,
        media_dir: None,
        stats: ConversionStats::default(),
    };

    match direction {
        Direction::DocxToMarkdown => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_conversion_start(0);
            }
            let engine_start = Instant::now();
            output.media_dir = docx_to_markdown(&pandoc, &request.input, &output_abs, config).await?;
            stats.engine_duration_ms = engine_start.elapsed().as_millis() as u64;
        }
        Direction::MarkdownToDocx | Direction::MarkdownToPdf => {
            // ── Step 3: Preprocess ───────────────────────────────────────
            let source = read_markdown(&request.input).await?;
            let prepared = prepare_markdown(&source);
            debug!(
                "Preprocessed: front matter {}, {} rule(s), {} heading(s), {} diagram(s)",
                prepared.front_matter_stripped,
                prepared.rules_rewritten,
                prepared.headings_rewritten,
                prepared.diagrams.len()
            );
            if let Some(ref cb) = config.progress_callback {
                cb.on_conversion_start(prepared.diagrams.len());
            }

            // ── Step 4: Render diagrams ──────────────────────────────────
            let diagram_start = Instant::now();
            let text = if prepared.diagrams.is_empty() {
                prepared.text.clone()
            } else {
                let renderer = resolve_renderer(config)?;
                let images_dir = images_dir_for(&output_abs, config);
                let stem = file_stem(&request.input);
                let substitution =
                    substitute_diagrams(&prepared, &images_dir, &stem, renderer, config).await?;
                output.diagrams = substitution.diagrams;
                substitution.text
            };
            stats.diagram_duration_ms = diagram_start.elapsed().as_millis() as u64;
            record_preprocessing(&mut stats, &prepared);

            // ── Step 5: Pandoc ───────────────────────────────────────────
            let resource_path = pandoc::resource_search_path(&request.input)?;
            let engine_start = Instant::now();
            if direction == Direction::MarkdownToPdf {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_engine_start(&config.pdf_engine);
                }
                let (engine, fallback) = pandoc
                    .markdown_to_pdf(&text, &output_abs, &resource_path, config)
                    .await?;
                output.pdf_engine = Some(engine);
                output.pdf_fallback = fallback;
            } else {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_engine_start("pandoc");
                }
                let args = pandoc::markdown_args(
                    &config.from_format,
                    TargetFormat::Docx,
                    &output_abs,
                    &resource_path,
                    None,
                );
                pandoc.run(&args, Some(&text), None).await?;
            }
            stats.engine_duration_ms = engine_start.elapsed().as_millis() as u64;
        }
    }

    if !output_abs.is_file() {
        return Err(ConvertError::ConversionEngineFailure {
            engine: pandoc.program().display().to_string(),
            status: "exit status: 0".to_string(),
            stderr: format!("no output was written to '{}'", output_abs.display()),
        });
    }

    stats.total_diagrams = output.diagrams.len();
    stats.failed_diagrams = output.failed_diagrams().count();
    stats.rendered_diagrams = stats.total_diagrams - stats.failed_diagrams;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Conversion complete: {} ({} diagram(s) rendered, {} failed, {}ms)",
        output_path.display(),
        stats.rendered_diagrams,
        stats.failed_diagrams,
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(stats.total_diagrams, stats.rendered_diagrams);
    }

    output.stats = stats;
    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(request, config))
}

/// Describe what [`convert`] would do with `input` without converting it.
///
/// Does not require Pandoc or network access.
pub async fn inspect(
    input: impl AsRef<Path>,
    format: Option<TargetFormat>,
) -> Result<InspectReport, ConvertError> {
    let input = input.as_ref();
    let source = resolve_input(input)?;
    let direction = resolve_direction(input, format, None)?;

    let prepared = match source {
        SourceKind::Markdown => prepare_markdown(&read_markdown(input).await?),
        SourceKind::Docx => PreparedMarkdown::default(),
    };

    Ok(InspectReport {
        input: input.to_path_buf(),
        source,
        direction,
        target: direction.target(),
        default_output: default_output_path(input, direction),
        front_matter: prepared.front_matter_stripped,
        rules_rewritten: prepared.rules_rewritten,
        headings_rewritten: prepared.headings_rewritten,
        diagram_count: prepared.diagrams.len(),
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// DOCX → Markdown. Pandoc runs inside the output directory so extracted
/// media lands in `media/` next to the Markdown file.
async fn docx_to_markdown(
    pandoc: &Pandoc,
    input: &Path,
    output_abs: &Path,
    config: &ConversionConfig,
) -> Result<Option<PathBuf>, ConvertError> {
    if let Some(ref cb) = config.progress_callback {
        cb.on_engine_start("pandoc");
    }
    let input_abs = absolute(input)?;
    let out_dir = output_abs.parent().unwrap_or_else(|| Path::new("."));
    let args = pandoc::docx_args(&input_abs, output_abs, &config.markdown_flavor);
    pandoc.run(&args, None, Some(out_dir)).await?;

    let media = out_dir.join("media");
    if media.is_dir() {
        debug!("Extracted media into {}", media.display());
        Ok(Some(media))
    } else {
        Ok(None)
    }
}

async fn read_markdown(path: &Path) -> Result<String, ConvertError> {
    tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => ConvertError::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: "file is not valid UTF-8 text".to_string(),
        },
        std::io::ErrorKind::PermissionDenied => ConvertError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ConvertError::InputNotFound {
            path: path.to_path_buf(),
        },
    })
}

fn record_preprocessing(stats: &mut ConversionStats, prepared: &PreparedMarkdown) {
    stats.front_matter_stripped = prepared.front_matter_stripped;
    stats.rules_rewritten = prepared.rules_rewritten;
    stats.headings_rewritten = prepared.headings_rewritten;
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

fn absolute(path: &Path) -> Result<PathBuf, ConvertError> {
    std::path::absolute(path)
        .map_err(|e| ConvertError::Internal(format!("cannot resolve '{}': {e}", path.display())))
}

async fn ensure_parent_dir(path: &Path) -> Result<(), ConvertError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ConvertError::OutputWriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    Ok(())
}

/// Delete a previous output so the post-run existence check proves the
/// engine wrote this one.
async fn remove_stale_output(input: &Path, output: &Path) -> Result<(), ConvertError> {
    if absolute(input)? == output {
        return Err(ConvertError::InvalidConfig(format!(
            "Output path '{}' is the input file",
            output.display()
        )));
    }
    match tokio::fs::remove_file(output).await {
        Ok(()) => {
            debug!("Removed previous output {}", output.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ConvertError::OutputWriteFailed {
            path: output.to_path_buf(),
            source: e,
        }),
    }
}
