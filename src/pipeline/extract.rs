//! Page classification and content-specific extraction.
//!
//! One page costs one `classify` call plus at most one extraction call.
//! Figure pages cost no extraction: they come back as an empty `figure`
//! item and the batch driver numbers and copies them in page order.

use crate::config::OcrConfig;
use crate::error::InferenceError;
use crate::output::{ContentItem, ContentType, PageImage};
use crate::pipeline::vision::VisionGateway;
use tracing::{debug, info};

/// Body used for pages the model could not place in any category.
pub const UNRECOGNIZED_BODY: &str = "[Unrecognized content]";

/// Which specialised extractions are switched on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    pub tables: bool,
    pub math: bool,
    pub figures: bool,
    /// Classifications scoring below this get plain OCR instead of a
    /// specialised prompt.
    pub min_confidence: f32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            tables: true,
            math: true,
            figures: true,
            min_confidence: 0.5,
        }
    }
}

impl From<&OcrConfig> for ExtractOptions {
    fn from(ocr: &OcrConfig) -> Self {
        Self {
            tables: ocr.extract_tables,
            math: ocr.extract_math,
            figures: ocr.extract_figures,
            min_confidence: ocr.confidence_threshold,
        }
    }
}

/// Turns a [`PageImage`] into a [`ContentItem`].
#[derive(Clone)]
pub struct PageExtractor {
    gateway: VisionGateway,
    options: ExtractOptions,
}

impl PageExtractor {
    pub fn new(gateway: VisionGateway, options: ExtractOptions) -> Self {
        Self { gateway, options }
    }

    /// Classify the page and dispatch to the matching extraction.
    ///
    /// A `figure` item is returned with an empty body and no
    /// [`crate::output::FigureRecord`]; numbering is left to the caller so
    /// it follows page order.
    pub async fn process(&self, page: &PageImage) -> Result<ContentItem, InferenceError> {
        let page_id = page.page_id();
        let classification = self.gateway.classify(&page.path).await?;
        info!("{} classified as: {}", page_id, classification.content_type);

        if classification.confidence < self.options.min_confidence {
            debug!(
                "{} confidence {:.2} below {:.2}, using plain OCR",
                page_id, classification.confidence, self.options.min_confidence
            );
            let body = self.gateway.extract_text(&page.path, None).await?;
            return Ok(ContentItem::new(page_id, ContentType::Text, body));
        }

        let item = match classification.content_type {
            ContentType::Table if self.options.tables => {
                let body = self.gateway.extract_table(&page.path).await?;
                ContentItem::new(page_id, ContentType::Table, body)
            }
            ContentType::Math if self.options.math => {
                let body = self.gateway.extract_math(&page.path).await?;
                ContentItem::new(page_id, ContentType::Math, body)
            }
            ContentType::Figure if self.options.figures => {
                ContentItem::new(page_id, ContentType::Figure, String::new())
            }
            // Figure extraction off: transcribe whatever text the page has.
            ContentType::Figure => {
                let body = self.gateway.extract_text(&page.path, None).await?;
                ContentItem::new(page_id, ContentType::Text, body)
            }
            ContentType::Unknown => {
                ContentItem::new(page_id, ContentType::Unknown, UNRECOGNIZED_BODY)
            }
            kind @ (ContentType::Text
            | ContentType::Mixed
            | ContentType::Table
            | ContentType::Math) => {
                let body = self.gateway.extract_text(&page.path, None).await?;
                ContentItem::new(page_id, kind, body)
            }
        };
        Ok(item)
    }
}
