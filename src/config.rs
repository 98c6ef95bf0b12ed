//! Configuration types for a digitisation run.
//!
//! Settings are grouped the way they appear in the YAML file: `pdf`
//! (rasterisation), `ollama` (the vision endpoint), `ocr` (extraction toggles)
//! and `output` (what gets written). Every field has a default, so an empty
//! file, a partial file and no file at all are all valid.
//!
//! ```yaml
//! pdf:
//!   dpi: 400
//!   max_pages: 10
//! ollama:
//!   model: deepseek-ocr
//!   timeout: 180
//! output:
//!   debug_mode: true
//! ```
//!
//! The CLI loads the file first and then applies its flags through
//! [`ConfigBuilder`], so flags always win over the file.

use crate::error::OcrSuiteError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Upper bound for `ollama.max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Top-level configuration for a run.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pdf: PdfConfig,
    pub ollama: VisionConfig,
    pub ocr: OcrConfig,
    pub output: OutputConfig,

    /// Progress sink for per-page events. Not part of the file format.
    #[serde(skip)]
    pub progress: Option<ProgressCallback>,
}

/// PDF rasterisation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Rendering resolution. Range: 72–600. Default: 300.
    ///
    /// Scanned books carry small print and footnotes; 300 DPI keeps those
    /// legible to the vision model without producing unwieldy images.
    pub dpi: u32,

    /// Only the first `max_pages` pages are processed when set.
    pub max_pages: Option<usize>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_pages: None,
        }
    }
}

/// Vision inference endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Base URL of the Ollama-compatible server.
    pub url: String,

    /// Vision model name as known to the server.
    pub model: String,

    /// Per-request timeout in seconds. Default: 120.
    ///
    /// Local vision models on CPU can take well over a minute for a dense
    /// page, so this is deliberately generous. A request that hits it is not
    /// retried.
    pub timeout: u64,

    /// Extra attempts after a connection failure. Range: 0–10. Default: 3.
    pub max_retries: u32,

    /// First backoff delay in milliseconds; doubles on each retry. Default: 1000.
    pub retry_backoff_ms: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.2-vision".to_string(),
            timeout: 120,
            max_retries: 3,
            retry_backoff_ms: 1000,
        }
    }
}

/// Extraction feature toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Classifications scoring below this are transcribed with the plain
    /// OCR prompt. Range: 0.0–1.0. Default: 0.5.
    ///
    /// The vision service reports a fixed 0.8, so only thresholds above that
    /// change anything today.
    pub confidence_threshold: f32,

    /// Use the dedicated math prompt for `math` pages.
    pub extract_math: bool,

    /// Use the dedicated table prompt for `table` pages.
    pub extract_tables: bool,

    /// Store `figure` pages as images instead of transcribing them.
    pub extract_figures: bool,

    /// Pages in flight at once. Default: 1 (strictly sequential).
    pub concurrency: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            extract_math: true,
            extract_tables: true,
            extract_figures: true,
            concurrency: 1,
        }
    }
}

/// Output feature toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write a standalone `.tex` document.
    pub format_latex: bool,

    /// Write the linked Markdown document.
    pub format_markdown: bool,

    /// Copy figure pages into the figures directory.
    pub extract_images: bool,

    /// Keep the rasterised page images after the run.
    pub debug_mode: bool,

    /// Compile the `.tex` output to PDF when a LaTeX toolchain is installed.
    pub compile_latex: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format_latex: true,
            format_markdown: true,
            extract_images: true,
            debug_mode: false,
            compile_latex: false,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("pdf", &self.pdf)
            .field("ollama", &self.ollama)
            .field("ocr", &self.ocr)
            .field("output", &self.output)
            .field(
                "progress",
                &self.progress.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

impl Config {
    /// Create a new builder starting from defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OcrSuiteError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OcrSuiteError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let contents =
            std::fs::read_to_string(path).map_err(|e| OcrSuiteError::ConfigParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        Self::from_yaml_str(&contents).map_err(|e| match e {
            OcrSuiteError::ConfigParse { detail, .. } => OcrSuiteError::ConfigParse {
                path: path.to_path_buf(),
                detail,
            },
            other => other,
        })
    }

    /// Parse configuration from YAML text. An empty document yields defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, OcrSuiteError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| OcrSuiteError::ConfigParse {
                path: "<inline>".into(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialise the file-backed part of the configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, OcrSuiteError> {
        serde_yaml::to_string(self).map_err(|e| OcrSuiteError::Internal(e.to_string()))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), OcrSuiteError> {
        if !(72..=600).contains(&self.pdf.dpi) {
            return Err(OcrSuiteError::InvalidConfig(format!(
                "pdf.dpi must be 72–600, got {}",
                self.pdf.dpi
            )));
        }
        if self.pdf.max_pages == Some(0) {
            return Err(OcrSuiteError::InvalidConfig(
                "pdf.max_pages must be ≥ 1 when set".into(),
            ));
        }
        if self.ollama.url.trim().is_empty() {
            return Err(OcrSuiteError::InvalidConfig("ollama.url is empty".into()));
        }
        if self.ollama.model.trim().is_empty() {
            return Err(OcrSuiteError::InvalidConfig("ollama.model is empty".into()));
        }
        if self.ollama.timeout == 0 {
            return Err(OcrSuiteError::InvalidConfig(
                "ollama.timeout must be ≥ 1 second".into(),
            ));
        }
        if self.ollama.max_retries > MAX_RETRIES {
            return Err(OcrSuiteError::InvalidConfig(format!(
                "ollama.max_retries must be ≤ {MAX_RETRIES}, got {}",
                self.ollama.max_retries
            )));
        }
        if !(0.0..=1.0).contains(&self.ocr.confidence_threshold) {
            return Err(OcrSuiteError::InvalidConfig(format!(
                "ocr.confidence_threshold must be 0.0–1.0, got {}",
                self.ocr.confidence_threshold
            )));
        }
        if self.ocr.concurrency == 0 {
            return Err(OcrSuiteError::InvalidConfig(
                "ocr.concurrency must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`], used to layer CLI overrides over a loaded file.
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from an existing configuration (e.g. one loaded from YAML).
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.pdf.dpi = dpi;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.pdf.max_pages = Some(n);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.ollama.url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.ollama.model = model.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.ollama.timeout = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.ollama.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.ollama.retry_backoff_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.ocr.concurrency = n.max(1);
        self
    }

    pub fn format_latex(mut self, v: bool) -> Self {
        self.config.output.format_latex = v;
        self
    }

    pub fn format_markdown(mut self, v: bool) -> Self {
        self.config.output.format_markdown = v;
        self
    }

    pub fn compile_latex(mut self, v: bool) -> Self {
        self.config.output.compile_latex = v;
        self
    }

    pub fn debug_mode(mut self, v: bool) -> Self {
        self.config.output.debug_mode = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<Config, OcrSuiteError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
