//! Data model shared by every pipeline stage.
//!
//! Values flow one way: [`PageImage`] → [`ClassificationResult`] →
//! [`ContentItem`] (or [`ErrorRecord`]) → assembled files described by
//! [`RunSummary`]. Everything here is plain data; the only mutable piece is
//! [`RunMetadata`], which the driver grows page by page.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One rasterised page on disk, produced by [`crate::pipeline::render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-based page number in the source PDF.
    pub index: usize,
    pub path: PathBuf,
}

impl PageImage {
    pub fn new(index: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
        }
    }

    /// Identifier used in headings and error records: the file stem
    /// (`page_0007`), falling back to `page_<index>`.
    pub fn page_id(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("page_{}", self.index))
    }
}

/// Closed set of page content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Table,
    Figure,
    Mixed,
    Math,
    Unknown,
}

impl ContentType {
    pub const ALL: [ContentType; 6] = [
        ContentType::Text,
        ContentType::Table,
        ContentType::Figure,
        ContentType::Mixed,
        ContentType::Math,
        ContentType::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Table => "table",
            ContentType::Figure => "figure",
            ContentType::Mixed => "mixed",
            ContentType::Math => "math",
            ContentType::Unknown => "unknown",
        }
    }

    /// Exact, case-sensitive match against the lowercase names.
    pub fn parse(word: &str) -> Option<ContentType> {
        Self::ALL.into_iter().find(|t| t.as_str() == word)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the vision model thinks a page mostly contains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub content_type: ContentType,
    pub confidence: f32,
}

/// A figure page copied into the run's figures directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureRecord {
    /// 1-based sequence number within the run.
    pub number: usize,
    /// `figure_NNN.png`.
    pub file_name: String,
    /// Rasterised page the bytes are copied from.
    pub source: PathBuf,
}

impl FigureRecord {
    pub fn new(number: usize, source: impl Into<PathBuf>) -> Self {
        Self {
            number,
            file_name: figure_file_name(number),
            source: source.into(),
        }
    }

    /// Body text standing in for the image: `[Figure 2 - see figure_002.png]`.
    pub fn placeholder(&self) -> String {
        format!("[Figure {} - see {}]", self.number, self.file_name)
    }
}

/// `figure_001.png`, `figure_002.png`, …
pub fn figure_file_name(number: usize) -> String {
    format!("figure_{number:03}.png")
}

/// The extracted representation of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub page_id: String,
    pub content_type: ContentType,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figure: Option<FigureRecord>,
}

impl ContentItem {
    pub fn new(
        page_id: impl Into<String>,
        content_type: ContentType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            page_id: page_id.into(),
            content_type,
            body: body.into(),
            figure: None,
        }
    }
}

/// A page that failed; never halts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub page_id: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(page_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.page_id, self.message)
    }
}

/// Result of processing one page.
pub type PageOutcome = Result<ContentItem, ErrorRecord>;

/// Run-level bookkeeping, written to the metadata ledger at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub created_at: DateTime<Local>,
    /// Pages attempted, successful or not.
    pub pages_processed: usize,
    /// Failures in the order they were recorded.
    pub errors: Vec<ErrorRecord>,
}

impl RunMetadata {
    pub fn new() -> Self {
        Self {
            created_at: Local::now(),
            pages_processed: 0,
            errors: Vec::new(),
        }
    }

    /// Count one page and record its failure, if any.
    pub fn record(&mut self, outcome: &PageOutcome) {
        self.pages_processed += 1;
        if let Err(e) = outcome {
            self.errors.push(e.clone());
        }
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// PDF facts available without rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: String,
}

/// Everything a completed run wrote and counted.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub markdown_path: Option<PathBuf>,
    pub latex_path: Option<PathBuf>,
    pub compiled_pdf: Option<PathBuf>,
    pub figures_dir: Option<PathBuf>,
    pub metadata_path: PathBuf,
    pub metadata: RunMetadata,
    pub items: usize,
    pub figures: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn failed_pages(&self) -> usize {
        self.metadata.errors.len()
    }

    /// All files produced, in a stable order, for display.
    pub fn written_files(&self) -> Vec<&Path> {
        [
            self.markdown_path.as_deref(),
            self.latex_path.as_deref(),
            self.compiled_pdf.as_deref(),
            Some(self.metadata_path.as_path()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_is_file_stem() {
        let page = PageImage::new(7, "/tmp/run/page_0007.png");
        assert_eq!(page.page_id(), "page_0007");
        assert_eq!(PageImage::new(3, "/").page_id(), "page_3");
    }

    #[test]
    fn figure_placeholder_names_the_file() {
        let record = FigureRecord::new(12, "/tmp/page_0040.png");
        assert_eq!(record.file_name, "figure_012.png");
        assert_eq!(record.placeholder(), "[Figure 12 - see figure_012.png]");
    }

    #[test]
    fn content_type_parse_is_exact() {
        assert_eq!(ContentType::parse("table"), Some(ContentType::Table));
        assert_eq!(ContentType::parse("Table"), None);
        assert_eq!(ContentType::parse("tables"), None);
    }

    #[test]
    fn content_type_serialises_lowercase() {
        let json = serde_json::to_string(&ContentType::Mixed).unwrap();
        assert_eq!(json, "\"mixed\"");
    }

    #[test]
    fn figure_names_are_zero_padded() {
        assert_eq!(figure_file_name(1), "figure_001.png");
        assert_eq!(figure_file_name(42), "figure_042.png");
        assert_eq!(figure_file_name(1234), "figure_1234.png");
    }

    #[test]
    fn metadata_counts_failures_as_processed() {
        let mut meta = RunMetadata::new();
        meta.record(&Ok(ContentItem::new("page_0001", ContentType::Text, "hi")));
        meta.record(&Err(ErrorRecord::new("page_0002", "boom")));
        assert_eq!(meta.pages_processed, 2);
        assert_eq!(meta.errors.len(), 1);
        assert_eq!(meta.errors[0].to_string(), "page_0002: boom");
    }
}
