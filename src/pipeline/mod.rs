//! Pipeline stages for document conversion.
//!
//! Each submodule implements exactly one step and is tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! Markdown ─▶ input ─▶ preprocess ─▶ encode/render ─▶ substitute ─▶ pandoc ─▶ DOCX / PDF
//! DOCX     ─▶ input ─────────────────────────────────────────────▶ pandoc ─▶ Markdown + media/
//! ```
//!
//! 1. [`input`]      : validate the file and decide the direction
//! 2. [`preprocess`] : strip front matter, rewrite `---` rules, find diagrams
//! 3. [`encode`]     : diagram source → URL-safe base64 request path
//! 4. [`render`]     : fetch PNGs with retry/backoff; the only network I/O
//! 5. [`substitute`] : save PNGs and splice image references in document order
//! 6. [`pandoc`]     : run Pandoc, with PDF engine fallback

pub mod encode;
pub mod input;
pub mod pandoc;
pub mod preprocess;
pub mod render;
pub mod substitute;
