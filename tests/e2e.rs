//! End-to-end tests for edgequake-ocrsuite.
//!
//! These render real PDFs with pdfium and send pages to a live Ollama
//! server. They are gated behind `E2E_ENABLED` so they do not run in CI
//! unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! Inputs:
//!   OCRSUITE_E2E_PDF      scanned PDF to use (default: test_cases/scan.pdf)
//!   OLLAMA_HOST           server URL (default: http://localhost:11434)
//!   OLLAMA_VISION_MODEL   model name (default: llama3.2-vision)

use edgequake_ocrsuite::{check_service, convert, inspect, Config, OcrSuiteError};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn sample_pdf() -> PathBuf {
    std::env::var("OCRSUITE_E2E_PDF")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/scan.pdf"))
}

fn live_config() -> Config {
    let url = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost:11434".to_string());
    let model =
        std::env::var("OLLAMA_VISION_MODEL").unwrap_or_else(|_| "llama3.2-vision".to_string());
    Config::builder()
        .url(url)
        .model(model)
        .dpi(150) // lower DPI for faster local inference
        .max_pages(2)
        .max_retries(1)
        .build()
        .expect("config must build")
}

/// Skip this test if E2E_ENABLED is not set *or* the sample PDF is missing.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p = sample_pdf();
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            println!("       Set OCRSUITE_E2E_PDF to a scanned PDF");
            return;
        }
        p
    }};
}

// ── Inspection ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_sample() {
    let pdf = e2e_skip_unless_ready!();
    let info = inspect(&pdf).await.expect("inspect must succeed");
    assert!(info.page_count >= 1, "sample must have at least one page");
    println!("[inspect] {} pages, version {}", info.page_count, info.pdf_version);
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let err = inspect("/no/such/scan.pdf").await.unwrap_err();
    assert!(matches!(err, OcrSuiteError::FileNotFound { .. }), "{err:?}");
}

// ── Live conversion ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_first_pages_with_ollama() {
    let pdf = e2e_skip_unless_ready!();
    let config = live_config();
    if !check_service(&config).await.unwrap_or(false) {
        println!("SKIP — Ollama not reachable (start with: ollama serve)");
        return;
    }

    let out = tempfile::tempdir().unwrap();
    let summary = convert(&pdf, out.path(), &config)
        .await
        .unwrap_or_else(|e| panic!("conversion failed: {e}"));

    assert!(summary.metadata.pages_processed >= 1);
    assert!(summary.metadata.pages_processed <= 2);
    assert_eq!(
        summary.items + summary.failed_pages(),
        summary.metadata.pages_processed
    );

    let md_path = summary.markdown_path.as_ref().expect("markdown enabled by default");
    let md = std::fs::read_to_string(md_path).unwrap();
    assert!(md.starts_with("# "), "markdown must open with the title");
    assert!(!md.contains("\n\n\n\n"));

    let tex = std::fs::read_to_string(summary.latex_path.as_ref().unwrap()).unwrap();
    assert!(tex.starts_with("\\documentclass"));
    assert!(tex.trim_end().ends_with("\\end{document}"));

    let ledger = std::fs::read_to_string(&summary.metadata_path).unwrap();
    assert!(ledger.contains(&format!("pages_processed: {}", summary.metadata.pages_processed)));

    assert!(
        !out.path().join(".temp_images").exists(),
        "temporary page images must be cleaned up"
    );

    println!("[ollama] {} ({} chars):\n{}", md_path.display(), md.len(), md);
}

#[tokio::test]
async fn test_debug_mode_keeps_rendered_pages() {
    let pdf = e2e_skip_unless_ready!();
    let mut config = live_config();
    if !check_service(&config).await.unwrap_or(false) {
        println!("SKIP — Ollama not reachable (start with: ollama serve)");
        return;
    }
    config.pdf.max_pages = Some(1);
    config.output.debug_mode = true;

    let out = tempfile::tempdir().unwrap();
    convert(&pdf, out.path(), &config).await.expect("conversion must succeed");

    assert!(out.path().join(".temp_images/page_0001.png").is_file());
}
