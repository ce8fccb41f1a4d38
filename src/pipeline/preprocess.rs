//! Markdown preprocessing: turn an author's Markdown into a buffer Pandoc
//! reads the way the author meant it.
//!
//! Three problems are fixed here, in one pass over the text:
//!
//! 1. **Front matter.** A leading `---` … `---` block is metadata for other
//!    tools and must not end up in the document body.
//! 2. **Bare `---` rules.** Pandoc's `yaml_metadata_block` extension treats a
//!    `---` line anywhere in the body as the start of another metadata block.
//!    Rules outside code fences are rewritten to `***`, which renders the same
//!    and cannot be mistaken for metadata. A `---` directly under a top-level
//!    paragraph is a setext heading underline, so that paragraph is folded
//!    into an ATX `##` heading instead. Text inside a list item or blockquote
//!    is never folded; the rule under it becomes `***`.
//! 3. **Diagram discovery.** Fenced blocks tagged `mermaid` are located for
//!    the substitution stage.
//!
//! ## Fence tracking
//!
//! Fences are tracked with an explicit stack rather than a first-match regex.
//! A fence line carrying an info string pushes; a bare fence line pops (or
//! opens an anonymous block when nothing is open). Only a `mermaid` block
//! opened and closed at depth 1 is a diagram, so a tutorial that shows
//! diagram syntax inside an outer fence keeps it as literal code:
//!
//! ````text
//! ```markdown
//! ```mermaid        <- depth 2: literal content, never rendered
//! graph TD; A-->B
//! ```
//! ```
//! ````
//!
//! Inside an open fence, a fence line using a different character or fewer
//! fence characters than the opener is plain content.

use once_cell::sync::Lazy;
use regex::Regex;

/// A fenced `mermaid` block found at fence depth 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramBlock {
    /// Diagram source between the fence lines, opener indentation removed.
    pub raw_source: String,
    /// Byte offset of the opening fence line in [`PreparedMarkdown::text`].
    pub start_offset: usize,
    /// Byte offset just past the closing fence line (its newline excluded).
    pub end_offset: usize,
    /// 1-based position among the document's diagrams.
    pub sequence_index: usize,
    /// Indentation of the opening fence, reused for the replacement.
    pub indent: String,
}

/// Pandoc-ready Markdown plus what the scan found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedMarkdown {
    pub text: String,
    pub diagrams: Vec<DiagramBlock>,
    pub front_matter_stripped: bool,
    pub rules_rewritten: usize,
    pub headings_rewritten: usize,
}

/// Run every preprocessing step over a Markdown document.
pub fn prepare_markdown(input: &str) -> PreparedMarkdown {
    let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
    let normalised = normalise_line_endings(input);

    let (body, front_matter_stripped) = match strip_front_matter(&normalised) {
        Some(rest) => (rest, true),
        None => (normalised.as_str(), false),
    };

    let mut prepared = scan(body);
    prepared.front_matter_stripped = front_matter_stripped;
    prepared
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Front matter ─────────────────────────────────────────────────────────────

/// Return the text after a leading front-matter block, if there is one.
///
/// Only a `---` on the very first line opens front matter; the block ends at
/// the first later line that is `---` or `...`. Without a closing line the
/// document is left alone.
fn strip_front_matter(text: &str) -> Option<&str> {
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }

    let mut consumed = first.len();
    for line in lines {
        consumed += line.len();
        let t = line.trim_end();
        if t == "---" || t == "..." {
            return Some(&text[consumed..]);
        }
    }
    None
}

// ── Line classification ──────────────────────────────────────────────────────

static RE_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^( {0,3})-{3,}[ \t]*$").unwrap());

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^( {0,3})(`{3,}|~{3,})(.*)$").unwrap());

static RE_BLOCK_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?:#|>|[-*+][ \t]|[-*+]$|\d{1,9}[.)](?:[ \t]|$)|\||<)").unwrap());

/// List item or blockquote marker; text after it belongs to a container.
static RE_CONTAINER_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?:>|[-*+](?:[ \t]|$)|\d{1,9}[.)](?:[ \t]|$))").unwrap());

#[derive(Debug)]
struct FenceToken {
    indent: usize,
    ch: char,
    len: usize,
    info: String,
}

fn fence_token(line: &str) -> Option<FenceToken> {
    let caps = RE_FENCE.captures(line)?;
    let fence = &caps[2];
    let info = caps[3].trim();
    let ch = fence.chars().next()?;
    // "```foo```" is inline code, not a fence.
    if ch == '`' && info.contains('`') {
        return None;
    }
    Some(FenceToken {
        indent: caps[1].len(),
        ch,
        len: fence.len(),
        info: info.to_string(),
    })
}

fn is_rule_line(line: &str) -> Option<&str> {
    RE_RULE.captures(line).map(|c| c.get(1).map_or("", |m| m.as_str()))
}

/// True when the info string tags the block as a Mermaid diagram
/// (`mermaid`, `Mermaid title="x"`, `{.mermaid}`).
fn is_mermaid(info: &str) -> bool {
    info.split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| c == '{' || c == '}' || c == '.'))
        .is_some_and(|w| w.eq_ignore_ascii_case("mermaid"))
}

// ── Scan ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Frame {
    ch: char,
    len: usize,
    indent: usize,
    info: String,
    /// Index into the output line vector of the opening fence.
    open_line: usize,
}

/// Line range of a diagram in the output line vector (inclusive).
struct DiagramLines {
    open: usize,
    close: usize,
    indent: usize,
}

fn scan(body: &str) -> PreparedMarkdown {
    let mut out: Vec<String> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut found: Vec<DiagramLines> = Vec::new();
    let mut paragraph_start: Option<usize> = None;
    // Inside a list item or blockquote, where `---` never underlines a heading.
    let mut in_container = false;
    let mut previous_blank = true;
    let mut rules_rewritten = 0usize;
    let mut headings_rewritten = 0usize;

    for line in body.split('\n') {
        if let Some(tok) = fence_token(line) {
            let is_content = stack
                .last()
                .is_some_and(|top| tok.ch != top.ch || tok.len < top.len);

            if !is_content {
                paragraph_start = None;
                if !tok.info.is_empty() {
                    stack.push(Frame {
                        ch: tok.ch,
                        len: tok.len,
                        indent: tok.indent,
                        info: tok.info,
                        open_line: out.len(),
                    });
                } else if let Some(frame) = stack.pop() {
                    if stack.is_empty() && is_mermaid(&frame.info) {
                        found.push(DiagramLines {
                            open: frame.open_line,
                            close: out.len(),
                            indent: frame.indent,
                        });
                    }
                } else {
                    stack.push(Frame {
                        ch: tok.ch,
                        len: tok.len,
                        indent: tok.indent,
                        info: String::new(),
                        open_line: out.len(),
                    });
                }
                out.push(line.to_string());
                continue;
            }
        }

        if !stack.is_empty() {
            out.push(line.to_string());
            continue;
        }

        if let Some(indent) = is_rule_line(line) {
            match paragraph_start.take() {
                Some(start) => {
                    let heading = out
                        .drain(start..)
                        .map(|l| l.trim().to_string())
                        .collect::<Vec<_>>()
                        .join(" ");
                    out.push(format!("## {heading}"));
                    headings_rewritten += 1;
                }
                None => {
                    out.push(format!("{indent}***"));
                    rules_rewritten += 1;
                }
            }
            previous_blank = false;
            continue;
        }

        let blank = line.trim().is_empty();
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if RE_CONTAINER_START.is_match(line) {
            in_container = true;
        } else if !blank && !indented && previous_blank {
            in_container = false;
        }

        if blank || in_container || RE_BLOCK_START.is_match(line) {
            paragraph_start = None;
        } else if paragraph_start.is_none() && !line.starts_with("    ") && !line.starts_with('\t') {
            paragraph_start = Some(out.len());
        }
        previous_blank = blank;
        out.push(line.to_string());
    }

    let text = out.join("\n");
    let diagrams = locate_diagrams(&out, &found);

    PreparedMarkdown {
        text,
        diagrams,
        front_matter_stripped: false,
        rules_rewritten,
        headings_rewritten,
    }
}

/// Turn line ranges into byte spans over `lines.join("\n")`.
fn locate_diagrams(lines: &[String], found: &[DiagramLines]) -> Vec<DiagramBlock> {
    let mut starts = Vec::with_capacity(lines.len());
    let mut offset = 0usize;
    for line in lines {
        starts.push(offset);
        offset += line.len() + 1;
    }

    found
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let raw_source = lines[d.open + 1..d.close]
                .iter()
                .map(|l| strip_indent(l, d.indent))
                .collect::<Vec<_>>()
                .join("\n");
            DiagramBlock {
                raw_source,
                start_offset: starts[d.open],
                end_offset: starts[d.close] + lines[d.close].len(),
                sequence_index: i + 1,
                indent: " ".repeat(d.indent),
            }
        })
        .collect()
}

/// Remove up to `n` leading spaces.
fn strip_indent(line: &str, n: usize) -> &str {
    let spaces = line.len() - line.trim_start_matches(' ').len();
    &line[spaces.min(n)..]
}

// ── Tests ────────────────────────────────────────────────────────────────────
