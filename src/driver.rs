//! Batch driver: runs every page through the extractor and collects the
//! outcomes in input order.
//!
//! A page that fails to classify or extract becomes an [`ErrorRecord`] and
//! the batch moves on; only a failure to store a figure on disk stops the
//! run, because the output would then link to a missing file.
//!
//! ## Concurrency
//!
//! Pages are driven through `futures::stream::buffered`, so up to
//! `concurrency` requests are in flight while results are still consumed in
//! page order. With the default of 1 the pipeline is fully sequential.
//! Figure numbers are drawn in that ordered loop, so `figure_001.png` is
//! always the earliest figure page whatever order requests finish in.

use crate::assemble::OutputAssembler;
use crate::error::OcrSuiteError;
use crate::output::{ContentItem, ContentType, ErrorRecord, PageImage, PageOutcome, RunMetadata};
use crate::pipeline::extract::PageExtractor;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Content items plus the run ledger.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub items: Vec<ContentItem>,
    pub metadata: RunMetadata,
}

pub struct BatchDriver<'a> {
    extractor: PageExtractor,
    assembler: &'a OutputAssembler,
    concurrency: usize,
    store_figures: bool,
    progress: ProgressCallback,
}

impl<'a> BatchDriver<'a> {
    pub fn new(extractor: PageExtractor, assembler: &'a OutputAssembler) -> Self {
        Self {
            extractor,
            assembler,
            concurrency: 1,
            store_figures: true,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Pages in flight at once; values below 1 are treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// When off, figure pages keep their placeholder text and no image is
    /// copied.
    pub fn with_figure_storage(mut self, store: bool) -> Self {
        self.store_figures = store;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Process `pages` with a fresh ledger.
    pub async fn run(&self, pages: &[PageImage]) -> Result<BatchOutput, OcrSuiteError> {
        let mut metadata = RunMetadata::new();
        let items = self.run_into(pages, &mut metadata).await?;
        Ok(BatchOutput { items, metadata })
    }

    /// Process `pages`, recording into a caller-owned ledger so it survives
    /// a fatal error.
    pub async fn run_into(
        &self,
        pages: &[PageImage],
        metadata: &mut RunMetadata,
    ) -> Result<Vec<ContentItem>, OcrSuiteError> {
        let span = info_span!("run", stem = %self.assembler.stem(), pages = pages.len());
        self.drive(pages, metadata).instrument(span).await
    }

    async fn drive(
        &self,
        pages: &[PageImage],
        metadata: &mut RunMetadata,
    ) -> Result<Vec<ContentItem>, OcrSuiteError> {
        info!(
            "Processing {} pages (concurrency {})",
            pages.len(),
            self.concurrency
        );
        self.progress.on_run_start(pages.len());

        let mut outcomes = stream::iter(pages)
            .map(|page| async move { (page, self.process_page(page).await) })
            .buffered(self.concurrency);

        let mut items = Vec::with_capacity(pages.len());
        let mut failed = 0;

        while let Some((page, outcome)) = outcomes.next().await {
            metadata.record(&outcome);
            match outcome {
                Ok(mut item) => {
                    if item.content_type == ContentType::Figure {
                        self.attach_figure(&mut item, page).await?;
                    }
                    self.progress.on_page_complete(&item.page_id, item.content_type);
                    items.push(item);
                }
                Err(record) => {
                    failed += 1;
                    warn!("Error processing {}", record);
                    self.progress.on_page_error(&record.page_id, &record.message);
                }
            }
        }

        info!(
            "Extracted content from {} pages ({} failed)",
            metadata.pages_processed, failed
        );
        self.progress.on_run_complete(metadata.pages_processed, failed);
        Ok(items)
    }

    /// Number a figure page and, when storage is on, copy its image.
    async fn attach_figure(
        &self,
        item: &mut ContentItem,
        page: &PageImage,
    ) -> Result<(), OcrSuiteError> {
        let record = self.assembler.claim_figure(&page.path);
        debug!("{} is {}", item.page_id, record.file_name);
        item.body = record.placeholder();
        if self.store_figures {
            self.assembler.store_figure(&record).await?;
            item.figure = Some(record);
        }
        Ok(())
    }

    async fn process_page(&self, page: &PageImage) -> PageOutcome {
        let page_id = page.page_id();
        self.progress.on_page_start(&page_id);
        debug!("Processing {}", page.path.display());
        self.extractor
            .process(page)
            .await
            .map_err(|e| ErrorRecord::new(page_id, e.to_string()))
    }
}
