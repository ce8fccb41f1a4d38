//! Pandoc subprocess: locate the executable, build argument lists, run it
//! with a timeout, and fall back to a second PDF engine when the first one
//! is missing or fails.
//!
//! Markdown is always handed over on stdin so the preprocessed buffer never
//! touches disk. Image references are absolute, and `--resource-path` covers
//! the input's directory for anything the author linked relatively.

use crate::config::{ConversionConfig, TargetFormat};
use crate::error::ConvertError;
use crate::output::PdfFallback;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

const PANDOC_HINT: &str = "Install Pandoc from https://pandoc.org/installing.html \
     (Linux: `sudo apt install pandoc`, macOS: `brew install pandoc`), \
     or point --pandoc at the executable.";

const PDF_ENGINE_HINT: &str = "PDF output needs a LaTeX distribution providing the engine \
     (TeX Live, MiKTeX) or WeasyPrint (`pip install weasyprint`). \
     Pick another one with --pdf-engine.";

/// Longest stderr excerpt kept in a fallback reason.
const REASON_MAX_CHARS: usize = 200;

/// A Pandoc executable that answered `--version`.
#[derive(Debug, Clone)]
pub struct Pandoc {
    program: PathBuf,
    version: String,
    timeout: Duration,
}

impl Pandoc {
    /// Find Pandoc (`config.pandoc_path` or `pandoc` on `PATH`) and check it
    /// runs.
    pub async fn locate(config: &ConversionConfig) -> Result<Self, ConvertError> {
        let program = config
            .pandoc_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("pandoc"));

        let output = Command::new(&program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                debug!("Cannot start {}: {}", program.display(), e);
                ConvertError::DependencyMissing {
                    program: program.display().to_string(),
                    hint: PANDOC_HINT.to_string(),
                }
            })?;

        if !output.status.success() {
            return Err(ConvertError::DependencyMissing {
                program: program.display().to_string(),
                hint: format!(
                    "`{} --version` exited with {}.\n{}",
                    program.display(),
                    output.status,
                    PANDOC_HINT
                ),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("pandoc (unknown version)")
            .trim()
            .to_string();
        info!("Using {}", version);

        Ok(Self {
            program,
            version,
            timeout: Duration::from_secs(config.engine_timeout_secs),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run Pandoc with `args`, feeding `stdin` when given.
    pub async fn run(
        &self,
        args: &[OsString],
        stdin: Option<&str>,
        cwd: Option<&Path>,
    ) -> Result<(), ConvertError> {
        let engine = self.program.display().to_string();
        debug!("{} {:?}", engine, args);

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ConvertError::DependencyMissing {
            program: engine.clone(),
            hint: format!("{e}\n{PANDOC_HINT}"),
        })?;

        if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let bytes = text.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&bytes).await {
                    debug!("Writing to pandoc stdin: {}", e);
                }
            });
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConvertError::EngineTimeout {
                engine: engine.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ConvertError::Internal(format!("waiting for {engine}: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            warn!(stderr = %stderr.trim(), "{} failed", engine);
            return Err(ConvertError::ConversionEngineFailure {
                engine,
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            // Pandoc reports missing images and similar issues as warnings.
            warn!("pandoc: {}", stderr.trim());
        }
        Ok(())
    }

    /// Produce a PDF, trying `config.pdf_engine` first and then
    /// `config.pdf_fallback_engine`.
    ///
    /// Returns the engine that produced the file and, when it was the
    /// fallback, why the primary was abandoned.
    pub async fn markdown_to_pdf(
        &self,
        markdown: &str,
        output: &Path,
        resource_path: &OsStr,
        config: &ConversionConfig,
    ) -> Result<(String, Option<PdfFallback>), ConvertError> {
        let primary = config.pdf_engine.as_str();

        let primary_err = if engine_available(primary).await {
            let args = markdown_args(
                &config.from_format,
                TargetFormat::Pdf,
                output,
                resource_path,
                Some(primary),
            );
            match self.run(&args, Some(markdown), None).await {
                Ok(()) => return Ok((primary.to_string(), None)),
                Err(e) => e,
            }
        } else {
            ConvertError::DependencyMissing {
                program: primary.to_string(),
                hint: PDF_ENGINE_HINT.to_string(),
            }
        };

        let Some(fallback) = config.pdf_fallback_engine.as_deref() else {
            return Err(primary_err);
        };

        let reason = fallback_reason(&primary_err);
        if !engine_available(fallback).await {
            warn!("PDF fallback engine '{}' is not available either", fallback);
            return Err(match primary_err {
                ConvertError::DependencyMissing { .. } => ConvertError::DependencyMissing {
                    program: format!("{primary} (or fallback {fallback})"),
                    hint: PDF_ENGINE_HINT.to_string(),
                },
                other => other,
            });
        }

        warn!(
            "PDF engine '{}' unusable ({}); falling back to '{}'",
            primary, reason, fallback
        );
        let args = markdown_args(
            &config.from_format,
            TargetFormat::Pdf,
            output,
            resource_path,
            Some(fallback),
        );
        self.run(&args, Some(markdown), None).await?;

        Ok((
            fallback.to_string(),
            Some(PdfFallback {
                primary: primary.to_string(),
                fallback: fallback.to_string(),
                reason,
            }),
        ))
    }
}

/// Whether an engine executable can be started at all.
pub async fn engine_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok()
}

fn fallback_reason(err: &ConvertError) -> String {
    let reason = match err {
        ConvertError::DependencyMissing { program, .. } => format!("'{program}' is not installed"),
        ConvertError::ConversionEngineFailure { status, stderr, .. } => {
            let first = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            format!("{status}: {first}")
        }
        other => other.to_string(),
    };
    reason.chars().take(REASON_MAX_CHARS).collect()
}

/// Arguments for Markdown (on stdin) → DOCX or PDF.
pub fn markdown_args(
    from_format: &str,
    target: TargetFormat,
    output: &Path,
    resource_path: &OsStr,
    pdf_engine: Option<&str>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-f".into(),
        from_format.into(),
        "-t".into(),
        target.extension().into(),
        "-o".into(),
        output.as_os_str().to_owned(),
    ];

    let mut resource = OsString::from("--resource-path=");
    resource.push(resource_path);
    args.push(resource);

    if target == TargetFormat::Pdf {
        if let Some(engine) = pdf_engine {
            args.push(format!("--pdf-engine={engine}").into());
        }
    }
    args
}

/// Arguments for DOCX → Markdown. Media is extracted relative to the
/// working directory, which the caller sets to the output's directory.
pub fn docx_args(input: &Path, output: &Path, flavor: &str) -> Vec<OsString> {
    vec![
        "-f".into(),
        "docx".into(),
        "-t".into(),
        flavor.into(),
        "--wrap=none".into(),
        "--extract-media=.".into(),
        "-o".into(),
        output.as_os_str().to_owned(),
        input.as_os_str().to_owned(),
    ]
}

/// `--resource-path` value: the input's directory, then the current
/// directory.
pub fn resource_search_path(input: &Path) -> Result<OsString, ConvertError> {
    let input_dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    std::env::join_paths(search_dirs(input_dir, &cwd))
        .map_err(|e| ConvertError::Internal(format!("resource path: {e}")))
}

/// Both directories canonicalized, so a symlinked cwd equal to the input
/// directory is listed once.
fn search_dirs(input_dir: &Path, cwd: &Path) -> Vec<PathBuf> {
    let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    let input_dir = canonical(input_dir);
    let cwd = canonical(cwd);

    let mut dirs = vec![input_dir];
    if !dirs.contains(&cwd) {
        dirs.push(cwd);
    }
    dirs
}
