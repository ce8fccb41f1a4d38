//! CLI binary for docconv.
//!
//! A thin shim over the library crate that maps CLI flags (or interactive
//! answers) to a `ConversionRequest` + `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use docconv::pipeline::input::{clean_path_input, default_output_path, resolve_direction};
use docconv::{
    convert, inspect, ConversionConfig, ConversionProgressCallback, ConversionRequest,
    DiagramFailurePolicy, ProgressCallback, SourceKind, TargetFormat,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar for diagram rendering followed by
/// a spinner while Pandoc runs. Diagrams may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-diagram wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// The bar starts as a spinner; `on_conversion_start` sizes it.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Reading input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} diagrams  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_diagrams: usize) {
        if total_diagrams == 0 {
            return;
        }
        self.activate_bar(total_diagrams);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total_diagrams} diagram(s)…"))
        ));
    }

    fn on_diagram_start(&self, index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(format!("diagram {index}"));
    }

    fn on_diagram_complete(&self, index: usize, total: usize, bytes: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Diagram {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            index,
            total,
            dim(&format!("{bytes:>7} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_diagram_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Diagram {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_engine_start(&self, engine: &str) {
        self.bar.set_style(spinner_style());
        self.bar.set_prefix("Converting");
        self.bar.set_message(format!("running pandoc ({engine})…"));
    }

    fn on_conversion_complete(&self, total_diagrams: usize, rendered: usize) {
        self.bar.finish_and_clear();
        if total_diagrams == 0 {
            return;
        }
        let failed = total_diagrams.saturating_sub(rendered);
        if failed == 0 {
            eprintln!(
                "{} {} diagram(s) rendered",
                green("✔"),
                bold(&rendered.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} diagram(s) rendered  ({} replaced by a notice)",
                yellow("⚠"),
                bold(&rendered.to_string()),
                total_diagrams,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown → DOCX next to the input (demo.docx, diagrams in images/)
  convert demo.md

  # Markdown → PDF
  convert notes.md --format pdf

  # Output path decides the format when --format is omitted
  convert notes.md build/notes.pdf

  # DOCX → Markdown, embedded media extracted to media/
  convert report.docx

  # Interactive: prompts for input, output and format
  convert

  # What would happen, without Pandoc or network
  convert --inspect-only demo.md

  # Fail instead of leaving a notice when a diagram cannot be rendered
  convert demo.md --on-diagram-error fail

REQUIREMENTS:
  pandoc                 every conversion (https://pandoc.org/installing.html)
  xelatex | weasyprint   PDF output
  network access         diagram rendering (default https://mermaid.ink)

ENVIRONMENT VARIABLES:
  Every option can also be set via DOCCONV_<OPTION>, e.g. DOCCONV_PANDOC,
  DOCCONV_PDF_ENGINE, DOCCONV_MERMAID_URL. RUST_LOG overrides log filtering.
"#;

/// Convert Markdown (with Mermaid diagrams) to DOCX or PDF, and DOCX to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "convert",
    version,
    about = "Convert Markdown to DOCX/PDF with rendered Mermaid diagrams, or DOCX to Markdown",
    long_about = "Convert Markdown documents to DOCX or PDF through Pandoc. Front matter is \
removed, bare `---` rules are made safe, and fenced `mermaid` blocks are rendered to PNG \
images. DOCX input is converted back to Markdown with its media extracted. Run without \
arguments for interactive mode.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input file (.md, .markdown or .docx). Omit for interactive mode.
    input: Option<PathBuf>,

    /// Output file. Defaults to the input name with the target extension.
    output: Option<PathBuf>,

    /// Target format for Markdown input.
    #[arg(short, long, env = "DOCCONV_FORMAT", value_enum)]
    format: Option<FormatArg>,

    /// Pandoc executable.
    #[arg(long, env = "DOCCONV_PANDOC")]
    pandoc: Option<PathBuf>,

    /// Primary PDF engine.
    #[arg(long, env = "DOCCONV_PDF_ENGINE", default_value = "xelatex")]
    pdf_engine: String,

    /// PDF engine used when the primary one fails; "none" disables the fallback.
    #[arg(long, env = "DOCCONV_PDF_FALLBACK_ENGINE", default_value = "weasyprint")]
    pdf_fallback_engine: String,

    /// Base URL of a mermaid.ink-compatible rendering service.
    #[arg(long, env = "DOCCONV_MERMAID_URL", default_value = docconv::DEFAULT_MERMAID_URL)]
    mermaid_url: String,

    /// Per-diagram request timeout in seconds.
    #[arg(long, env = "DOCCONV_DIAGRAM_TIMEOUT", default_value_t = 30)]
    diagram_timeout: u64,

    /// Pandoc run timeout in seconds.
    #[arg(long, env = "DOCCONV_ENGINE_TIMEOUT", default_value_t = 300)]
    engine_timeout: u64,

    /// Retries per diagram on transient failures.
    #[arg(long, env = "DOCCONV_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Diagram requests in flight at once.
    #[arg(long, env = "DOCCONV_DIAGRAM_CONCURRENCY", default_value_t = 4)]
    diagram_concurrency: usize,

    /// What to do when a diagram cannot be rendered.
    #[arg(long, env = "DOCCONV_ON_DIAGRAM_ERROR", value_enum, default_value = "placeholder")]
    on_diagram_error: PolicyArg,

    /// Pandoc writer for DOCX → Markdown (markdown, gfm, commonmark, …).
    #[arg(long, env = "DOCCONV_MARKDOWN_FLAVOR", default_value = "markdown")]
    markdown_flavor: String,

    /// Print the conversion report as JSON on stdout.
    #[arg(long, env = "DOCCONV_JSON")]
    json: bool,

    /// Report what would be converted, without running Pandoc or rendering.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress bar.
    #[arg(long, env = "DOCCONV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCCONV_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Docx,
    Pdf,
}

impl From<FormatArg> for TargetFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Docx => TargetFormat::Docx,
            FormatArg::Pdf => TargetFormat::Pdf,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Placeholder,
    Fail,
}

impl From<PolicyArg> for DiagramFailurePolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::Placeholder => DiagramFailurePolicy::Placeholder,
            PolicyArg::Fail => DiagramFailurePolicy::Fail,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build request ────────────────────────────────────────────────────
    let request = match cli.input.clone() {
        Some(input) => {
            let mut request = ConversionRequest::new(input);
            request.output = cli.output.clone();
            request.format = cli.format.map(Into::into);
            request
        }
        None => match prompt_request(&cli)? {
            Some(request) => request,
            None => {
                eprintln!("Operation cancelled.");
                return Ok(());
            }
        },
    };

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let report = inspect(&request.input, request.format)
            .await
            .context("Failed to inspect input")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?
            );
        } else {
            println!("File:           {}", report.input.display());
            println!("Source:         {:?}", report.source);
            println!("Target:         {}", report.target);
            println!("Default output: {}", report.default_output.display());
            if report.source == SourceKind::Markdown {
                println!("Front matter:   {}", report.front_matter);
                println!("Rules rewritten:    {}", report.rules_rewritten);
                println!("Headings rewritten: {}", report.headings_rewritten);
                println!("Diagrams:       {}", report.diagram_count);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let output = convert(&request, &config)
        .await
        .with_context(|| format!("Failed to convert '{}'", request.input.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet {
        if let Some(ref fb) = output.pdf_fallback {
            eprintln!(
                "{} PDF engine '{}' unusable ({}); produced with '{}'",
                yellow("⚠"),
                fb.primary,
                fb.reason,
                fb.fallback
            );
        }
        if !show_progress && output.stats.failed_diagrams > 0 {
            eprintln!(
                "{} {} diagram(s) could not be rendered and were left as source",
                yellow("⚠"),
                output.stats.failed_diagrams
            );
        }
        if let Some(ref media) = output.media_dir {
            eprintln!("   media extracted to {}", dim(&media.display().to_string()));
        }
        eprintln!(
            "Successfully converted '{}' to '{}'.",
            output.input.display(),
            output.output.display()
        );
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let fallback = match cli.pdf_fallback_engine.trim() {
        "" | "none" => None,
        engine => Some(engine.to_string()),
    };

    let mut builder = ConversionConfig::builder()
        .mermaid_url(cli.mermaid_url.clone())
        .diagram_timeout_secs(cli.diagram_timeout)
        .engine_timeout_secs(cli.engine_timeout)
        .max_retries(cli.max_retries)
        .diagram_concurrency(cli.diagram_concurrency)
        .on_diagram_error(cli.on_diagram_error.into())
        .markdown_flavor(cli.markdown_flavor.clone())
        .pdf_engine(cli.pdf_engine.clone())
        .pdf_fallback_engine(fallback);

    if let Some(ref pandoc) = cli.pandoc {
        builder = builder.pandoc_path(pandoc.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

// ── Interactive mode ─────────────────────────────────────────────────────

/// Ask for input, output and (for Markdown without `--format`) the target
/// format. `None` means stdin hit EOF.
fn prompt_request(cli: &Cli) -> Result<Option<ConversionRequest>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock();

    let input = loop {
        let Some(answer) = prompt(&mut lines, "Enter input file path (.md or .docx): ")? else {
            return Ok(None);
        };
        if !answer.is_empty() {
            break PathBuf::from(answer);
        }
    };
    let source = SourceKind::from_path(&input)?;

    let default_ext = match (source, cli.format) {
        (SourceKind::Docx, _) => "md",
        (SourceKind::Markdown, Some(FormatArg::Pdf)) => "pdf",
        (SourceKind::Markdown, _) => "docx",
    };
    let shown = input.with_extension(default_ext);
    let Some(answer) = prompt(
        &mut lines,
        &format!("Enter output file path (default: {}): ", shown.display()),
    )?
    else {
        return Ok(None);
    };
    let output = (!answer.is_empty()).then(|| PathBuf::from(answer));

    let mut format = cli.format.map(TargetFormat::from);
    if source == SourceKind::Markdown && format.is_none() {
        let suggested = suggested_format(output.as_deref());
        format = loop {
            let Some(answer) = prompt(
                &mut lines,
                &format!("Output format [docx/pdf] (default: {suggested}): "),
            )?
            else {
                return Ok(None);
            };
            match parse_format_answer(&answer, suggested) {
                Some(fmt) => break Some(fmt),
                None => eprintln!("Please answer 'docx' or 'pdf'."),
            }
        };
    }

    let output = match output {
        Some(path) => path,
        None => {
            let direction = resolve_direction(&input, format, None)?;
            default_output_path(&input, direction)
        }
    };

    Ok(Some(ConversionRequest {
        input,
        output: Some(output),
        format,
    }))
}

/// Print `label`, read one line. `None` on EOF.
fn prompt(lines: &mut impl BufRead, label: &str) -> Result<Option<String>> {
    let mut err = io::stderr();
    write!(err, "{label}")?;
    err.flush()?;

    let mut buf = String::new();
    let read = lines.read_line(&mut buf).context("Failed to read from stdin")?;
    if read == 0 {
        eprintln!();
        return Ok(None);
    }
    Ok(Some(clean_path_input(&buf)))
}

/// Format suggested by a typed output path, docx otherwise.
fn suggested_format(output: Option<&Path>) -> TargetFormat {
    output
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse::<TargetFormat>().ok())
        .filter(|f| *f != TargetFormat::Markdown)
        .unwrap_or(TargetFormat::Docx)
}

fn parse_format_answer(answer: &str, default: TargetFormat) -> Option<TargetFormat> {
    if answer.trim().is_empty() {
        return Some(default);
    }
    match answer.parse::<TargetFormat>() {
        Ok(TargetFormat::Markdown) | Err(_) => None,
        Ok(fmt) => Some(fmt),
    }
}
