//! Whole-document entry points.
//!
//! [`convert`] runs every stage for one PDF:
//!
//! ```text
//! resolve ─▶ health check ─▶ inspect ─▶ render ─▶ batch driver ─▶ documents
//!                                                                     │
//!                              metadata ledger + temp cleanup ◀───────┘ (always)
//! ```
//!
//! The metadata ledger is written on every exit path once the output
//! directory exists, so an aborted run still leaves a record of what was
//! processed and what failed.

use crate::assemble::OutputAssembler;
use crate::config::{Config, OutputConfig};
use crate::driver::BatchDriver;
use crate::error::OcrSuiteError;
use crate::latex::{self, LatexToolchain};
use crate::output::{ContentItem, DocumentInfo, RunMetadata, RunSummary};
use crate::pipeline::extract::{ExtractOptions, PageExtractor};
use crate::pipeline::vision::VisionGateway;
use crate::pipeline::{input, render};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Rasterised pages live here, under the output directory, during a run.
pub const TEMP_IMAGES_DIR: &str = ".temp_images";

/// Files written by [`write_documents`].
#[derive(Debug, Clone, Default)]
pub struct Documents {
    pub markdown: Option<PathBuf>,
    pub latex: Option<PathBuf>,
    pub compiled_pdf: Option<PathBuf>,
}

/// Convert one scanned PDF into Markdown/LaTeX plus figures under
/// `output_dir`.
///
/// # Errors
/// Only fatal problems are returned: bad configuration, an unreadable PDF,
/// an unreachable vision service, or a failed write. Individual pages that
/// fail are listed in [`RunSummary::metadata`] instead.
pub async fn convert(
    input_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &Config,
) -> Result<RunSummary, OcrSuiteError> {
    let started = Instant::now();
    config.validate()?;

    let pdf = input::resolve_input(input_path.as_ref())?;
    info!("Starting conversion: {}", pdf.display());
    let gateway = VisionGateway::from_config(&config.ollama)
        .map_err(|e| OcrSuiteError::Internal(e.to_string()))?;

    let mut metadata = RunMetadata::new();
    let assembler = OutputAssembler::new(
        output_dir.as_ref(),
        &input::source_stem(&pdf),
        &metadata.created_at,
    )?;
    let temp_dir = assembler.output_dir().join(TEMP_IMAGES_DIR);

    let outcome = run_stages(&pdf, &gateway, &assembler, config, &temp_dir, &mut metadata).await;

    // Finalisation runs whatever happened above.
    let ledger = assembler.write_metadata(&metadata).await;
    if !config.output.debug_mode {
        remove_temp_images(&temp_dir).await;
    }

    let (documents, items) = match outcome {
        Ok(done) => done,
        Err(e) => {
            if let Err(ledger_err) = &ledger {
                warn!("Could not write metadata ledger: {}", ledger_err);
            }
            return Err(e);
        }
    };
    let metadata_path = ledger?;

    let figures = assembler.figures_stored();
    let summary = RunSummary {
        markdown_path: documents.markdown,
        latex_path: documents.latex,
        compiled_pdf: documents.compiled_pdf,
        figures_dir: (figures > 0).then(|| assembler.figures_dir()),
        metadata_path,
        metadata,
        items,
        figures,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        "Processing complete: {} items, {} figures, {} errors in {}ms",
        summary.items,
        summary.figures,
        summary.failed_pages(),
        summary.duration_ms
    );
    Ok(summary)
}

/// Convert a PDF held in memory.
///
/// The bytes are staged in a temporary directory as `<stem>.pdf`, where the
/// stem comes from `file_name`, so output naming matches [`convert`]. The
/// staging copy is removed when the call returns.
pub async fn convert_bytes(
    bytes: &[u8],
    file_name: &str,
    output_dir: impl AsRef<Path>,
    config: &Config,
) -> Result<RunSummary, OcrSuiteError> {
    let staging = tempfile::tempdir()
        .map_err(|e| OcrSuiteError::Internal(format!("Failed to create staging directory: {e}")))?;
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    let pdf = staging.path().join(format!("{stem}.pdf"));
    tokio::fs::write(&pdf, bytes)
        .await
        .map_err(|e| OcrSuiteError::assembly(&pdf, e))?;
    convert(&pdf, output_dir, config).await
}

async fn run_stages(
    pdf: &Path,
    gateway: &VisionGateway,
    assembler: &OutputAssembler,
    config: &Config,
    temp_dir: &Path,
    metadata: &mut RunMetadata,
) -> Result<(Documents, usize), OcrSuiteError> {
    if !gateway.health_check().await {
        return Err(OcrSuiteError::ServiceUnavailable {
            url: gateway.endpoint().to_string(),
            model: gateway.model().to_string(),
        });
    }

    let info = render::inspect(pdf).await?;
    info!("PDF Info: {} pages", info.page_count);

    let pages = render::render_pages(pdf, config.pdf.dpi, config.pdf.max_pages, temp_dir).await?;
    info!("Converted {} pages to images", pages.len());

    let extractor = PageExtractor::new(gateway.clone(), ExtractOptions::from(&config.ocr));
    let mut driver = BatchDriver::new(extractor, assembler)
        .with_concurrency(config.ocr.concurrency)
        .with_figure_storage(config.output.extract_images);
    if let Some(cb) = &config.progress {
        driver = driver.with_progress(cb.clone());
    }
    let items = driver.run_into(&pages, metadata).await?;

    let title = document_title(&info, pdf);
    let documents =
        write_documents(assembler, &items, metadata, &config.output, Some(&title)).await?;
    Ok((documents, items.len()))
}

/// Write the enabled document formats and, if asked, compile the LaTeX.
pub async fn write_documents(
    assembler: &OutputAssembler,
    items: &[ContentItem],
    metadata: &RunMetadata,
    output: &OutputConfig,
    title: Option<&str>,
) -> Result<Documents, OcrSuiteError> {
    let mut documents = Documents::default();

    if output.format_markdown {
        documents.markdown = Some(assembler.assemble(items, metadata, title).await?);
    }

    if output.format_latex {
        let tex = assembler.assemble_latex(items, metadata, title).await?;
        for problem in latex::validate_syntax(&tex).await {
            warn!("LaTeX check: {}", problem);
        }
        if output.compile_latex {
            let toolchain = LatexToolchain::detect().await;
            documents.compiled_pdf = Some(toolchain.compile(&tex, assembler.output_dir()).await?);
        }
        documents.latex = Some(tex);
    } else if output.compile_latex {
        warn!("LaTeX compilation requested but LaTeX output is disabled; skipping");
    }

    Ok(documents)
}

/// The PDF's own title, or the file name with `_` turned into spaces and
/// each word capitalised.
pub fn document_title(info: &DocumentInfo, pdf: &Path) -> String {
    if let Some(title) = info.title.as_deref().filter(|t| !t.trim().is_empty()) {
        return title.trim().to_string();
    }
    input::source_stem(pdf)
        .replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

async fn remove_temp_images(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => info!("Cleaned up temporary images"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", dir.display(), e),
    }
}

/// Page count and document information, without contacting the vision
/// service.
pub async fn inspect(input_path: impl AsRef<Path>) -> Result<DocumentInfo, OcrSuiteError> {
    let pdf = input::resolve_input(input_path.as_ref())?;
    render::inspect(&pdf).await
}

/// `true` when the configured vision service answers its liveness check.
pub async fn check_service(config: &Config) -> Result<bool, OcrSuiteError> {
    let gateway = VisionGateway::from_config(&config.ollama)
        .map_err(|e| OcrSuiteError::Internal(e.to_string()))?;
    Ok(gateway.health_check().await)
}
