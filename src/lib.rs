//! # edgequake-ocrsuite
//!
//! Turn scanned PDFs into structured Markdown and LaTeX by letting a
//! locally served vision-language model read each page.
//!
//! ## Why this crate?
//!
//! Scanned documents have no text layer, so classic extractors return
//! nothing. Here every page is rasterised, the model first says what kind of
//! page it is (text, table, figure, math, mixed), and a matching prompt
//! pulls out the content. Figures are kept as images and linked from the
//! document instead of being transcribed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     validate path and %PDF magic
//!  ├─ 2. Render    pdfium → page_0001.png … (spawn_blocking)
//!  ├─ 3. Classify  vision model: text | table | figure | math | mixed | unknown
//!  ├─ 4. Extract   type-specific prompt, or store the page as a figure
//!  ├─ 5. Drive     per-page outcomes, failures recorded and skipped
//!  └─ 6. Assemble  <stem>.md, <stem>.tex, <stem>/figure_NNN.png, <stem>_metadata.txt
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocrsuite::{convert, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Expects an Ollama server on http://localhost:11434
//!     let config = Config::builder().model("llama3.2-vision").build()?;
//!     let summary = convert("scan.pdf", "output", &config).await?;
//!     println!("{} sections, {} failed pages", summary.items, summary.failed_pages());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | `ocrsuite` binary: clap, anyhow, indicatif, tracing-subscriber |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-ocrsuite = { version = "0.1", default-features = false }
//! ```
//!
//! ## Logging
//!
//! The library only emits `tracing` events; each batch runs inside a `run`
//! span carrying the output stem. Installing a subscriber is left to the
//! application.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod config;
pub mod convert;
pub mod driver;
pub mod error;
pub mod latex;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{FigureSequence, OutputAssembler};
pub use config::{Config, ConfigBuilder, OcrConfig, OutputConfig, PdfConfig, VisionConfig};
pub use convert::{check_service, convert, convert_bytes, inspect};
pub use driver::{BatchDriver, BatchOutput};
pub use error::{InferenceError, OcrSuiteError};
pub use latex::{LatexError, LatexToolchain};
pub use output::{
    ClassificationResult, ContentItem, ContentType, DocumentInfo, ErrorRecord, FigureRecord,
    PageImage, PageOutcome, RunMetadata, RunSummary,
};
pub use pipeline::extract::{ExtractOptions, PageExtractor};
pub use pipeline::vision::{normalize_content_type, OllamaTransport, VisionGateway, VisionTransport};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
