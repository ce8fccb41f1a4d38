//! Remote diagram rendering: send a diagram to the rendering service and get
//! PNG bytes back.
//!
//! The service sits behind the [`DiagramRenderer`] trait so callers can plug
//! in a self-hosted renderer, a cache, or a fake in tests via
//! [`crate::config::ConversionConfigBuilder::renderer`]. The built-in
//! [`MermaidInkRenderer`] talks to a mermaid.ink-compatible HTTP endpoint.
//!
//! ## Retry Strategy
//!
//! Timeouts, transport errors, HTTP 429 and 5xx are retried with exponential
//! backoff (`retry_backoff_ms * 2^attempt`): 500 ms → 1 s → 2 s with the
//! defaults, capped at [`MAX_BACKOFF_MS`]. Any other 4xx means the service rejected the diagram itself
//! (usually a syntax error), so it fails immediately.

use crate::config::ConversionConfig;
use crate::error::{ConvertError, DiagramError};
use crate::pipeline::encode::diagram_url;
use crate::pipeline::preprocess::DiagramBlock;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Every PNG file starts with these eight bytes.
pub const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Longest single wait between two attempts.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Why one rendering attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    /// The service answered with a non-success status.
    #[error("HTTP {status}")]
    Status { status: u16 },

    /// The request never completed (DNS, TLS, connection reset, …).
    #[error("{detail}")]
    Transport { detail: String },

    /// The request exceeded the client timeout.
    #[error("request timed out")]
    Timeout,

    /// The body is not a PNG image.
    #[error("{detail}")]
    NotPng { detail: String },
}

impl RenderFailure {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderFailure::Status { status } => *status == 429 || *status >= 500,
            RenderFailure::Transport { .. } | RenderFailure::Timeout => true,
            RenderFailure::NotPng { .. } => false,
        }
    }
}

/// Turns diagram source into PNG bytes.
///
/// Implementations must be `Send + Sync`; several diagrams are rendered
/// concurrently through the same instance.
pub trait DiagramRenderer: Send + Sync {
    /// Render one diagram to PNG.
    fn render<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<Vec<u8>, RenderFailure>>;

    /// Name used in log lines.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Renderer backed by a mermaid.ink-compatible HTTP service.
#[derive(Debug, Clone)]
pub struct MermaidInkRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl MermaidInkRenderer {
    /// Build a renderer with a request timeout.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, ConvertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("docconv/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConvertError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl DiagramRenderer for MermaidInkRenderer {
    fn render<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<Vec<u8>, RenderFailure>> {
        Box::pin(async move {
            let url = diagram_url(&self.base_url, source);
            debug!("GET {}", url);

            let response = self
                .client
                .get(&url)
                .header(reqwest::header::ACCEPT, "image/png")
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(RenderFailure::Status {
                    status: status.as_u16(),
                });
            }

            let bytes = response.bytes().await.map_err(map_reqwest_error)?;
            Ok(bytes.to_vec())
        })
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RenderFailure {
    if e.is_timeout() {
        RenderFailure::Timeout
    } else {
        RenderFailure::Transport {
            detail: e.to_string(),
        }
    }
}

/// Pick the renderer: a pre-built one from the config, else mermaid.ink at
/// `config.mermaid_url`.
pub fn resolve_renderer(config: &ConversionConfig) -> Result<Arc<dyn DiagramRenderer>, ConvertError> {
    if let Some(ref renderer) = config.renderer {
        return Ok(Arc::clone(renderer));
    }
    let renderer = MermaidInkRenderer::new(&config.mermaid_url, config.diagram_timeout_secs)?;
    Ok(Arc::new(renderer))
}

/// Outcome of rendering one diagram, before anything is written to disk.
#[derive(Debug, Clone)]
pub struct RenderedDiagram {
    pub index: usize,
    pub png: Option<Vec<u8>>,
    pub retries: u8,
    pub duration_ms: u64,
    pub error: Option<DiagramError>,
}

/// Render a single diagram block with retries.
///
/// Never returns an error: failures are carried in
/// [`RenderedDiagram::error`] so the caller applies the failure policy once,
/// in document order.
pub async fn render_diagram(
    renderer: &dyn DiagramRenderer,
    block: &DiagramBlock,
    total: usize,
    config: &ConversionConfig,
) -> RenderedDiagram {
    let start = Instant::now();
    let index = block.sequence_index;

    if let Some(ref cb) = config.progress_callback {
        cb.on_diagram_start(index, total);
    }

    let mut last_err = RenderFailure::Transport {
        detail: "not attempted".to_string(),
    };
    let mut attempts = 0u32;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Diagram {}: retry {}/{} after {}ms",
                index, attempt, config.max_retries, backoff
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
        attempts = attempt;

        let result = renderer.render(&block.raw_source).await.and_then(|bytes| {
            if bytes.starts_with(PNG_SIGNATURE) {
                Ok(bytes)
            } else {
                Err(RenderFailure::NotPng {
                    detail: format!("{} bytes without PNG signature", bytes.len()),
                })
            }
        });

        match result {
            Ok(png) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(
                    "Diagram {}: {} bytes from {} in {}ms",
                    index,
                    png.len(),
                    renderer.name(),
                    duration_ms
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_diagram_complete(index, total, png.len());
                }
                return RenderedDiagram {
                    index,
                    png: Some(png),
                    retries: retry_count(attempt),
                    duration_ms,
                    error: None,
                };
            }
            Err(e) => {
                warn!("Diagram {}: attempt {} failed: {}", index, attempt + 1, e);
                let retryable = e.is_retryable();
                last_err = e;
                if !retryable {
                    break;
                }
            }
        }
    }

    let retries = retry_count(attempts);
    let error = match last_err {
        RenderFailure::Timeout => DiagramError::Timeout {
            diagram: index,
            secs: config.diagram_timeout_secs,
        },
        RenderFailure::NotPng { detail } => DiagramError::InvalidImage {
            diagram: index,
            detail,
        },
        other => DiagramError::RenderFailed {
            diagram: index,
            retries,
            detail: other.to_string(),
        },
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_diagram_error(index, total, &error.to_string());
    }

    RenderedDiagram {
        index,
        png: None,
        retries,
        duration_ms: start.elapsed().as_millis() as u64,
        error: Some(error),
    }
}

/// Delay before retry number `attempt` (1-based), doubling from `base_ms`.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
        .min(MAX_BACKOFF_MS)
}

fn retry_count(attempt: u32) -> u8 {
    u8::try_from(attempt).unwrap_or(u8::MAX)
}
