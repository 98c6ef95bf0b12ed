//! PDF rasterisation: one PNG per page via pdfium.
//!
//! pdfium is a blocking C library, so every call here runs inside
//! `tokio::task::spawn_blocking` and the async workers never stall on a
//! 600-DPI page.
//!
//! Pages are rendered at `dpi / 72` scale (PDF user space is 72 units per
//! inch) and written as `page_0001.png`, `page_0002.png`, … so the file stem
//! doubles as the page identifier in every later stage.

use crate::error::OcrSuiteError;
use crate::output::{DocumentInfo, PageImage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a pdfium library file or its directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// `page_0007.png` for the 1-based page number 7.
pub fn page_file_name(number: usize) -> String {
    format!("page_{number:04}.png")
}

/// Bind to a pdfium shared library.
///
/// Resolution order (first match wins):
/// 1. `PDFIUM_LIB_PATH`: a library file, or a directory containing one
/// 2. the directory of the running executable
/// 3. the current working directory
/// 4. the system library search path
pub fn bind_pdfium() -> Result<Pdfium, OcrSuiteError> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Ok(value) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        let p = PathBuf::from(value);
        if p.is_dir() {
            candidates.push(Pdfium::pdfium_platform_library_name_at_path(&p));
        } else {
            candidates.push(p);
        }
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(Pdfium::pdfium_platform_library_name_at_path(&exe_dir));
    }
    candidates.push(Pdfium::pdfium_platform_library_name_at_path("./"));

    for candidate in candidates.iter().filter(|c| c.exists()) {
        match Pdfium::bind_to_library(candidate) {
            Ok(bindings) => {
                debug!("Bound pdfium from {}", candidate.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => debug!("pdfium at {} unusable: {:?}", candidate.display(), e),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| OcrSuiteError::PdfiumBindingFailed(format!("{e:?}")))
}

/// Read page count and document information without rendering.
pub async fn inspect(pdf_path: &Path) -> Result<DocumentInfo, OcrSuiteError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || inspect_blocking(&path))
        .await
        .map_err(|e| OcrSuiteError::Internal(format!("Inspect task panicked: {e}")))?
}

fn inspect_blocking(pdf_path: &Path) -> Result<DocumentInfo, OcrSuiteError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path)?;

    let metadata = document.metadata();
    let tag = |kind: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(kind)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentInfo {
        page_count: document.pages().len() as usize,
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
        creator: tag(PdfDocumentMetadataTagType::Creator),
        producer: tag(PdfDocumentMetadataTagType::Producer),
        pdf_version: format!("{:?}", document.version()),
    })
}

/// Rasterise the first `max_pages` pages (all when `None`) into `out_dir`.
///
/// The directory is created if needed. Any page that fails to render or
/// save aborts the whole call.
pub async fn render_pages(
    pdf_path: &Path,
    dpi: u32,
    max_pages: Option<usize>,
    out_dir: &Path,
) -> Result<Vec<PageImage>, OcrSuiteError> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| OcrSuiteError::assembly(out_dir, e))?;

    let path = pdf_path.to_path_buf();
    let dir = out_dir.to_path_buf();
    tokio::task::spawn_blocking(move || render_pages_blocking(&path, dpi, max_pages, &dir))
        .await
        .map_err(|e| OcrSuiteError::Internal(format!("Render task panicked: {e}")))?
}

fn render_pages_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_pages: Option<usize>,
    out_dir: &Path,
) -> Result<Vec<PageImage>, OcrSuiteError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path)?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let count = max_pages.map_or(total, |m| m.min(total));
    info!("PDF loaded: {} pages, rendering {} at {} DPI", total, count, dpi);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
    let mut rendered = Vec::with_capacity(count);

    for idx in 0..count {
        let number = idx + 1;
        let failed = |detail: String| OcrSuiteError::RasterisationFailed {
            page: number,
            detail,
        };

        let page = pages.get(idx as u16).map_err(|e| failed(format!("{e:?}")))?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{e:?}")))?;
        let image = bitmap.as_image();

        let target = out_dir.join(page_file_name(number));
        image
            .save_with_format(&target, image::ImageFormat::Png)
            .map_err(|e| failed(e.to_string()))?;
        debug!(
            "Rendered page {} → {}x{} px ({})",
            number,
            image.width(),
            image.height(),
            target.display()
        );

        rendered.push(PageImage::new(number, target));
    }

    Ok(rendered)
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
) -> Result<PdfDocument<'a>, OcrSuiteError> {
    pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| OcrSuiteError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_files_are_zero_padded() {
        assert_eq!(page_file_name(1), "page_0001.png");
        assert_eq!(page_file_name(123), "page_0123.png");
        assert_eq!(page_file_name(12345), "page_12345.png");
    }

    #[test]
    fn page_file_stem_is_page_id() {
        let page = PageImage::new(3, Path::new("/tmp").join(page_file_name(3)));
        assert_eq!(page.page_id(), "page_0003");
    }
}
