//! End-to-end integration tests for docconv.
//!
//! Tests that need a real Pandoc, a PDF engine and network access to
//! mermaid.ink are gated behind the `E2E_ENABLED` environment variable.
//! The rest run everywhere: on Unix they drive [`convert`] with a small
//! shell script standing in for Pandoc (it copies stdin to the `-o` file,
//! so the test can read exactly what Pandoc would have received) and a
//! local HTTP stub standing in for the diagram service.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture

use docconv::{
    convert, inspect, prepare_markdown, ConversionConfig, ConversionProgressCallback,
    ConversionRequest, ConvertError, DiagramFailurePolicy, DiagramRenderer, Direction,
    RenderFailure, TargetFormat, PNG_SIGNATURE,
};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Copy a fixture into a fresh temp dir so outputs land next to it.
fn fixture(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join(name);
    std::fs::copy(test_cases_dir().join(name), &dest).unwrap();
    (dir, dest)
}

macro_rules! e2e_skip_unless_enabled {
    () => {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    };
}

/// Writes `{source}` after a PNG signature; `FAIL` in the source → HTTP 503.
struct FakeRenderer {
    calls: AtomicUsize,
}

impl DiagramRenderer for FakeRenderer {
    fn render<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<Vec<u8>, RenderFailure>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if source.contains("FAIL") {
                return Err(RenderFailure::Status { status: 503 });
            }
            let mut png = PNG_SIGNATURE.to_vec();
            png.extend_from_slice(source.as_bytes());
            Ok(png)
        })
    }
}

/// Writes an executable shell script standing in for Pandoc.
#[cfg(unix)]
fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();

    // A sibling test forking while the script was open for writing makes
    // exec fail with ETXTBSY until that child has exec'd.
    for _ in 0..50 {
        match std::process::Command::new(&path).arg("--version").output() {
            Err(e) if e.raw_os_error() == Some(26) => {
                std::thread::sleep(std::time::Duration::from_millis(10))
            }
            _ => break,
        }
    }
    path
}

#[cfg(unix)]
fn fake_pandoc(dir: &Path) -> PathBuf {
    install_script(
        dir,
        "fake-pandoc",
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "pandoc 3.1.11"; exit 0; fi
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
  esac
  shift
done
cat > "$out"
"#,
    )
}

/// Like `pandoc -f docx --extract-media=.`: images land in `media/` under
/// the working directory.
#[cfg(unix)]
fn fake_pandoc_extracting_media(dir: &Path) -> PathBuf {
    install_script(
        dir,
        "fake-pandoc-media",
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "pandoc 3.1.11"; exit 0; fi
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
  esac
  shift
done
mkdir -p media
printf 'png' > media/image1.png
printf '# Report\n\n![](media/image1.png)\n' > "$out"
"#,
    )
}

/// Exits successfully without writing anything.
#[cfg(unix)]
fn silent_pandoc(dir: &Path) -> PathBuf {
    install_script(
        dir,
        "silent-pandoc",
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "pandoc 3.1.11"; exit 0; fi
cat > /dev/null
exit 0
"#,
    )
}

/// HTTP stub answering every request with a tiny PNG; counts requests.
async fn png_server(hits: Arc<AtomicUsize>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            hits.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let mut body = PNG_SIGNATURE.to_vec();
                body.extend_from_slice(b"stub");
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

// ── Offline tests ────────────────────────────────────────────────────────────

#[test]
fn test_demo_fixture_preprocessing() {
    let md = std::fs::read_to_string(test_cases_dir().join("demo.md")).unwrap();
    let prepared = prepare_markdown(&md);

    assert!(prepared.front_matter_stripped);
    assert!(!prepared.text.contains("title: Demo document"));
    assert_eq!(prepared.diagrams.len(), 2, "nested example must not count");
    assert!(prepared.diagrams[0].raw_source.starts_with("flowchart LR"));
    assert!(prepared.diagrams[1].raw_source.starts_with("sequenceDiagram"));
    assert!(prepared.text.contains("## Closing remarks"));
    assert!(prepared
        .text
        .lines()
        .all(|l| l.trim_end() != "---"));
}

#[tokio::test]
async fn test_inspect_demo() {
    let report = inspect(test_cases_dir().join("demo.md"), None).await.unwrap();
    assert_eq!(report.direction, Direction::MarkdownToDocx);
    assert_eq!(report.diagram_count, 2);
    assert_eq!(report.rules_rewritten, 1);
    assert_eq!(report.headings_rewritten, 1);
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    let err = inspect("/nonexistent/file.md", None).await.unwrap_err();
    assert!(matches!(err, ConvertError::InputNotFound { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_convert_demo_with_fake_pandoc() {
    let (dir, input) = fixture("demo.md");
    let renderer = Arc::new(FakeRenderer {
        calls: AtomicUsize::new(0),
    });
    let config = ConversionConfig::builder()
        .pandoc_path(fake_pandoc(dir.path()))
        .renderer(renderer.clone())
        .build()
        .unwrap();

    let output = convert(&ConversionRequest::new(&input), &config)
        .await
        .expect("conversion succeeds");

    assert_eq!(output.direction, Direction::MarkdownToDocx);
    assert_eq!(output.output, dir.path().join("demo.docx"));
    assert_eq!(output.stats.rendered_diagrams, 2);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);

    // The fake engine copied its stdin: this is what Pandoc would read.
    let fed = std::fs::read_to_string(dir.path().join("demo.docx")).unwrap();
    let img1 = dir.path().join("images/demo_diagram_1.png");
    let img2 = dir.path().join("images/demo_diagram_2.png");
    assert!(img1.exists() && img2.exists());

    let p1 = fed.find("![Diagram 1](").expect("diagram 1 referenced");
    let p2 = fed.find("![Diagram 2](").expect("diagram 2 referenced");
    assert!(p1 < p2);
    assert!(!fed.contains("![Diagram 3]"));
    assert!(fed.contains("```mermaid\ngraph TD"), "nested example kept as code");
    assert!(!fed.contains("author: Docs team"));
    assert!(fed.lines().all(|l| l.trim_end() != "---"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_convert_with_http_stub_renderer() {
    let (dir, input) = fixture("demo.md");
    let hits = Arc::new(AtomicUsize::new(0));
    let base = png_server(hits.clone()).await;
    let config = ConversionConfig::builder()
        .pandoc_path(fake_pandoc(dir.path()))
        .mermaid_url(base)
        .build()
        .unwrap();

    let out_path = dir.path().join("out/demo-report.docx");
    let request = ConversionRequest::new(&input).with_output(&out_path);
    let output = convert(&request, &config).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(output.output, out_path);
    assert!(dir.path().join("out/images/demo_diagram_1.png").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_diagram_placeholder_and_fail_policy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.md");
    std::fs::write(&input, "# Broken\n\n```mermaid\nFAIL\n```\n").unwrap();
    let pandoc = fake_pandoc(dir.path());

    let placeholder = ConversionConfig::builder()
        .pandoc_path(&pandoc)
        .renderer(Arc::new(FakeRenderer {
            calls: AtomicUsize::new(0),
        }))
        .max_retries(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let output = convert(&ConversionRequest::new(&input), &placeholder)
        .await
        .unwrap();
    assert_eq!(output.stats.failed_diagrams, 1);
    let fed = std::fs::read_to_string(dir.path().join("broken.docx")).unwrap();
    assert!(fed.contains("> **Diagram 1 could not be rendered:**"));
    assert!(fed.contains("```mermaid\nFAIL\n```"));

    let fail = ConversionConfig::builder()
        .pandoc_path(&pandoc)
        .renderer(Arc::new(FakeRenderer {
            calls: AtomicUsize::new(0),
        }))
        .max_retries(0)
        .on_diagram_error(DiagramFailurePolicy::Fail)
        .build()
        .unwrap();
    let err = convert(&ConversionRequest::new(&input), &fail)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::NetworkFailure { diagram: 1, .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_pdf_falls_back_when_primary_engine_missing() {
    let (dir, input) = fixture("notes.md");
    let config = ConversionConfig::builder()
        .pandoc_path(fake_pandoc(dir.path()))
        .pdf_engine("definitely-not-an-engine-42")
        .pdf_fallback_engine(Some("sh".into()))
        .build()
        .unwrap();

    let request = ConversionRequest::new(&input).with_format(TargetFormat::Pdf);
    let output = convert(&request, &config).await.unwrap();

    assert_eq!(output.output, dir.path().join("notes.pdf"));
    assert_eq!(output.pdf_engine.as_deref(), Some("sh"));
    let fallback = output.pdf_fallback.expect("fallback recorded");
    assert_eq!(fallback.primary, "definitely-not-an-engine-42");
    assert!(fallback.reason.contains("not installed"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_output_extension_decides_format() {
    let (dir, input) = fixture("notes.md");
    let config = ConversionConfig::builder()
        .pandoc_path(fake_pandoc(dir.path()))
        .pdf_engine("sh")
        .build()
        .unwrap();

    let request = ConversionRequest::new(&input).with_output(dir.path().join("n.pdf"));
    let output = convert(&request, &config).await.unwrap();
    assert_eq!(output.direction, Direction::MarkdownToPdf);
    assert_eq!(output.pdf_engine.as_deref(), Some("sh"));
    assert!(output.pdf_fallback.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_docx_to_markdown_extracts_media_offline() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("report.docx");
    std::fs::write(&input, b"PK\x03\x04rest").unwrap();
    let config = ConversionConfig::builder()
        .pandoc_path(fake_pandoc_extracting_media(dir.path()))
        .build()
        .unwrap();

    let output = convert(&ConversionRequest::new(&input), &config)
        .await
        .expect("conversion succeeds");

    assert_eq!(output.direction, Direction::DocxToMarkdown);
    assert_eq!(output.output, dir.path().join("report.md"));
    assert_eq!(output.media_dir, Some(dir.path().join("media")));
    assert!(dir.path().join("media/image1.png").is_file());
    let md = std::fs::read_to_string(dir.path().join("report.md")).unwrap();
    assert!(md.starts_with("# Report"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_engine_writing_nothing_fails_despite_previous_output() {
    let (dir, input) = fixture("notes.md");
    let previous = dir.path().join("notes.docx");
    std::fs::write(&previous, "from an earlier run").unwrap();
    let config = ConversionConfig::builder()
        .pandoc_path(silent_pandoc(dir.path()))
        .build()
        .unwrap();

    let err = convert(&ConversionRequest::new(&input), &config)
        .await
        .unwrap_err();

    assert!(
        matches!(err, ConvertError::ConversionEngineFailure { ref stderr, .. } if stderr.contains("no output")),
        "unexpected error: {err}"
    );
    assert!(!previous.exists());
}

#[tokio::test]
async fn test_callback_send_in_tokio_spawn() {
    struct Counting(AtomicUsize);
    impl ConversionProgressCallback for Counting {
        fn on_diagram_complete(&self, _index: usize, _total: usize, _bytes: usize) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let cb = Arc::new(Counting(AtomicUsize::new(0)));
    let cb2 = cb.clone();
    tokio::spawn(async move {
        cb2.on_diagram_complete(1, 1, 10);
    })
    .await
    .unwrap();
    assert_eq!(cb.0.load(Ordering::SeqCst), 1);
}

// ── Live tests (Pandoc + mermaid.ink) ────────────────────────────────────────

#[tokio::test]
async fn test_live_demo_to_docx() {
    e2e_skip_unless_enabled!();
    let (dir, input) = fixture("demo.md");
    let output = convert(&ConversionRequest::new(&input), &ConversionConfig::default())
        .await
        .expect("demo.md converts");

    assert_eq!(output.stats.rendered_diagrams, 2, "{:?}", output.diagrams);
    let bytes = std::fs::read(dir.path().join("demo.docx")).unwrap();
    assert!(bytes.starts_with(b"PK\x03\x04"), "DOCX is a ZIP container");
}

#[tokio::test]
async fn test_live_notes_to_pdf() {
    e2e_skip_unless_enabled!();
    let (dir, input) = fixture("notes.md");
    let request = ConversionRequest::new(&input).with_format(TargetFormat::Pdf);
    let output = convert(&request, &ConversionConfig::default())
        .await
        .expect("notes.md converts to PDF");

    println!("engine: {:?}, fallback: {:?}", output.pdf_engine, output.pdf_fallback);
    let bytes = std::fs::read(dir.path().join("notes.pdf")).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_live_docx_round_trip() {
    e2e_skip_unless_enabled!();
    let (dir, input) = fixture("demo.md");
    let config = ConversionConfig::default();

    convert(&ConversionRequest::new(&input), &config).await.unwrap();
    let docx = dir.path().join("demo.docx");

    let back = convert(&ConversionRequest::new(&docx), &config).await.unwrap();
    assert_eq!(back.direction, Direction::DocxToMarkdown);
    assert_eq!(back.output, dir.path().join("demo.md"));
    assert!(back.media_dir.is_some(), "rendered diagrams come back as media");

    // Second generation must convert again without errors.
    let again = dir.path().join("again.docx");
    convert(&ConversionRequest::new(&back.output).with_output(&again), &config)
        .await
        .expect("round-tripped markdown converts");
    assert!(again.exists());
}
