//! Diagram encoding: Mermaid source → URL path segment for the rendering
//! service.
//!
//! mermaid.ink takes the diagram source base64-encoded in the URL path. The
//! URL-safe alphabet is used so the encoded source never contains `/` or `+`,
//! which would otherwise split the path or be decoded as a space by proxies.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use tracing::debug;

/// Encode diagram source for transport in a URL path.
pub fn encode_diagram(source: &str) -> String {
    let encoded = URL_SAFE.encode(source.trim().as_bytes());
    debug!("Encoded diagram → {} bytes base64", encoded.len());
    encoded
}

/// Full PNG rendering URL for a diagram on a mermaid.ink-compatible service.
pub fn diagram_url(base_url: &str, source: &str) -> String {
    format!(
        "{}/img/{}?type=png",
        base_url.trim_end_matches('/'),
        encode_diagram(source)
    )
}
