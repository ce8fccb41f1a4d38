//! Diagram substitution: render every diagram block, save the PNGs and
//! splice image references back into the Markdown.
//!
//! Rendering requests run concurrently (bounded by
//! `config.diagram_concurrency`) but `buffered` yields results in document
//! order, so diagram *n* is always saved as `{stem}_diagram_{n}.png` and
//! spliced at its own block no matter which response arrives first.
//!
//! Splicing walks the blocks front to back, copying the text between them,
//! so earlier replacements never shift the offsets of later ones.

use crate::config::{ConversionConfig, DiagramFailurePolicy};
use crate::error::ConvertError;
use crate::output::DiagramResult;
use crate::pipeline::preprocess::{DiagramBlock, PreparedMarkdown};
use crate::pipeline::render::{render_diagram, DiagramRenderer, RenderedDiagram};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Markdown with diagrams replaced, plus one result per diagram.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub text: String,
    pub diagrams: Vec<DiagramResult>,
}

/// File name of the PNG for diagram `index` of the document `stem`.
pub fn diagram_file_name(stem: &str, index: usize) -> String {
    format!("{stem}_diagram_{index}.png")
}

/// Render all diagrams of `prepared` and return the rewritten Markdown.
///
/// `images_dir` is created on first use. With
/// [`DiagramFailurePolicy::Fail`] the first failed diagram (in document
/// order) aborts with [`ConvertError::NetworkFailure`]; otherwise the block
/// is replaced with a visible notice followed by its original source.
pub async fn substitute_diagrams(
    prepared: &PreparedMarkdown,
    images_dir: &Path,
    stem: &str,
    renderer: Arc<dyn DiagramRenderer>,
    config: &ConversionConfig,
) -> Result<Substitution, ConvertError> {
    if prepared.diagrams.is_empty() {
        return Ok(Substitution {
            text: prepared.text.clone(),
            diagrams: Vec::new(),
        });
    }

    let total = prepared.diagrams.len();
    info!(
        "Rendering {} diagram(s) via {} ({} concurrent)",
        total,
        renderer.name(),
        config.diagram_concurrency
    );

    tokio::fs::create_dir_all(images_dir)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: images_dir.to_path_buf(),
            source: e,
        })?;

    let rendered: Vec<RenderedDiagram> = stream::iter(prepared.diagrams.iter())
        .map(|block| render_diagram(renderer.as_ref(), block, total, config))
        .buffered(config.diagram_concurrency.max(1))
        .collect()
        .await;

    let mut results = Vec::with_capacity(total);
    let mut replacements = Vec::with_capacity(total);

    for (block, outcome) in prepared.diagrams.iter().zip(rendered) {
        let (result, replacement) = match outcome.png {
            Some(png) => {
                let path = images_dir.join(diagram_file_name(stem, block.sequence_index));
                tokio::fs::write(&path, &png)
                    .await
                    .map_err(|e| ConvertError::OutputWriteFailed {
                        path: path.clone(),
                        source: e,
                    })?;
                debug!("Saved diagram {} → {}", block.sequence_index, path.display());
                let replacement = image_reference(block, &path);
                (
                    DiagramResult {
                        index: outcome.index,
                        image_path: Some(path),
                        bytes: png.len(),
                        retries: outcome.retries,
                        duration_ms: outcome.duration_ms,
                        error: None,
                    },
                    replacement,
                )
            }
            None => {
                let error = outcome.error.unwrap_or_else(|| crate::error::DiagramError::RenderFailed {
                    diagram: block.sequence_index,
                    retries: outcome.retries,
                    detail: "renderer returned no image".to_string(),
                });
                if config.on_diagram_error == DiagramFailurePolicy::Fail {
                    return Err(error.into());
                }
                warn!("{}; keeping its source with a notice", error);
                let original = &prepared.text[block.start_offset..block.end_offset];
                let replacement = failure_notice(block, &error.reason(), original);
                (
                    DiagramResult {
                        index: outcome.index,
                        image_path: None,
                        bytes: 0,
                        retries: outcome.retries,
                        duration_ms: outcome.duration_ms,
                        error: Some(error),
                    },
                    replacement,
                )
            }
        };
        results.push(result);
        replacements.push(replacement);
    }

    let text = splice(&prepared.text, &prepared.diagrams, &replacements);
    Ok(Substitution {
        text,
        diagrams: results,
    })
}

/// `![Diagram n](<path>)`, indented like the fence it replaces.
///
/// Angle brackets keep paths with spaces or parentheses intact. Separators
/// are written as `/` since a backslash is a Markdown escape.
pub fn image_reference(block: &DiagramBlock, path: &Path) -> String {
    format!(
        "{}![Diagram {}](<{}>)",
        block.indent,
        block.sequence_index,
        path.to_string_lossy().replace('\\', "/")
    )
}

fn failure_notice(block: &DiagramBlock, reason: &str, original: &str) -> String {
    let reason = reason.replace('\n', " ");
    format!(
        "{indent}> **Diagram {n} could not be rendered:** {reason}\n\n{original}",
        indent = block.indent,
        n = block.sequence_index,
    )
}

/// Replace each block's span with its replacement, keeping a blank line on
/// both sides so the result is parsed as its own paragraph.
fn splice(text: &str, blocks: &[DiagramBlock], replacements: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    for (block, replacement) in blocks.iter().zip(replacements) {
        out.push_str(&text[cursor..block.start_offset]);
        if needs_gap_before(&out) {
            out.push('\n');
        }
        out.push_str(replacement);
        cursor = block.end_offset;
        if needs_gap_after(&text[cursor..]) {
            out.push('\n');
        }
    }
    out.push_str(&text[cursor..]);
    out
}

fn needs_gap_before(out: &str) -> bool {
    let prev = out.strip_suffix('\n').unwrap_or(out);
    match prev.rsplit('\n').next() {
        Some(line) => !line.trim().is_empty(),
        None => false,
    }
}

fn needs_gap_after(rest: &str) -> bool {
    let after = rest.strip_prefix('\n').unwrap_or(rest);
    match after.split('\n').next() {
        Some(line) => !line.trim().is_empty(),
        None => false,
    }
}

/// Absolute images directory for an output file.
pub fn images_dir_for(output: &Path, config: &ConversionConfig) -> PathBuf {
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(&config.images_dir_name)
}
