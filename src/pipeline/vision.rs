//! Vision service gateway: every call to the remote inference server.
//!
//! The gateway owns the retry and timeout policy; the wire format lives
//! behind [`VisionTransport`] so the policy can be tested against a scripted
//! transport and the real [`OllamaTransport`] stays a thin `reqwest` wrapper.
//!
//! ## Retry Strategy
//!
//! Only *connection* failures are retried: the server is down or restarting
//! and trying again soon has a real chance of working. The wait doubles each
//! time (`retry_backoff_ms * 2^attempt`), so with the 1 s default and three
//! retries the sequence is 1 s → 2 s → 4 s.
//!
//! A request that *times out* is not retried. The server was reachable and
//! already spent the full timeout on the page; sending the same page again
//! would most likely burn another timeout. Non-success statuses (unknown
//! model, bad request) are permanent and fail immediately with the body.

use crate::config::VisionConfig;
use crate::error::InferenceError;
use crate::output::{ClassificationResult, ContentType};
use crate::pipeline::{encode, postprocess};
use crate::prompts::{CLASSIFY_PROMPT, MATH_PROMPT, OCR_PROMPT, TABLE_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Fixed score reported with every classification; the service has no
/// calibrated confidence.
pub const PLACEHOLDER_CONFIDENCE: f32 = 0.8;

/// Liveness check timeout, independent of the per-request timeout.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest wait between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// saturating at [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<String>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Transport-level failure, before the gateway applies its policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server could not be reached (refused, reset, DNS).
    Connect(String),
    /// The server was reached but did not answer within the timeout.
    Timeout,
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
    /// The body was not the expected JSON.
    Decode(String),
    /// Anything else.
    Other(String),
}

/// Wire access to a vision inference server.
#[async_trait]
pub trait VisionTransport: Send + Sync {
    /// Base URL, used in error messages.
    fn endpoint(&self) -> &str;

    /// Run one non-streaming generation and return the response text.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, TransportError>;

    /// Lightweight liveness check.
    async fn ping(&self) -> Result<bool, TransportError>;
}

/// `reqwest` transport for Ollama's HTTP API.
pub struct OllamaTransport {
    url: String,
    client: reqwest::Client,
}

impl OllamaTransport {
    /// Build a transport with the given per-request timeout.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl VisionTransport for OllamaTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, TransportError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(parsed.response)
    }

    async fn ping(&self) -> Result<bool, TransportError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        Ok(response.status().is_success())
    }
}

/// Sort a `reqwest` failure into the buckets the retry policy cares about.
fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() || has_connection_io_error(&e) {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

/// A reset or aborted socket mid-request is still "unreachable".
fn has_connection_io_error(e: &reqwest::Error) -> bool {
    use std::error::Error as _;
    use std::io::ErrorKind;

    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
            );
        }
        source = err.source();
    }
    false
}

/// Map a free-text model answer onto the closed content-type set.
///
/// Exact match first, then the first whitespace token (with surrounding
/// punctuation stripped) that names a type, otherwise [`ContentType::Unknown`].
/// Only keyword presence is checked, so "not a table" reads as `table`.
pub fn normalize_content_type(response: &str) -> ContentType {
    let lowered = response.trim().to_lowercase();
    if let Some(t) = ContentType::parse(&lowered) {
        return t;
    }
    let found = lowered
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| ".,!?;:'\"".contains(c)))
        .find_map(ContentType::parse);
    match found {
        Some(t) => {
            debug!("Extracted '{}' from response: '{}'", t, lowered);
            t
        }
        None => {
            debug!("Could not classify, defaulting to unknown. Response was: '{}'", lowered);
            ContentType::Unknown
        }
    }
}

/// Retry/timeout policy wrapped around a [`VisionTransport`].
#[derive(Clone)]
pub struct VisionGateway {
    transport: Arc<dyn VisionTransport>,
    model: String,
    max_retries: u32,
    retry_backoff: Duration,
    timeout_secs: u64,
}

impl VisionGateway {
    /// Gateway over the real HTTP transport.
    pub fn from_config(config: &VisionConfig) -> Result<Self, InferenceError> {
        let transport = OllamaTransport::new(&config.url, Duration::from_secs(config.timeout))?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Gateway over any transport, taking policy values from `config`.
    pub fn new(transport: Arc<dyn VisionTransport>, config: &VisionConfig) -> Self {
        Self {
            transport,
            model: config.model.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            timeout_secs: config.timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model what kind of page this is.
    pub async fn classify(&self, image: &Path) -> Result<ClassificationResult, InferenceError> {
        let response = self.call(image, CLASSIFY_PROMPT).await?;
        Ok(ClassificationResult {
            content_type: normalize_content_type(&response),
            confidence: PLACEHOLDER_CONFIDENCE,
        })
    }

    /// Transcribe a page. `None` uses the default OCR instruction.
    pub async fn extract_text(
        &self,
        image: &Path,
        prompt: Option<&str>,
    ) -> Result<String, InferenceError> {
        let prompt = prompt.filter(|p| !p.is_empty()).unwrap_or(OCR_PROMPT);
        let text = self.call(image, prompt).await?;
        Ok(postprocess::clean_response(&text))
    }

    /// Transcribe a table as a pipe-delimited Markdown table.
    pub async fn extract_table(&self, image: &Path) -> Result<String, InferenceError> {
        let text = self.call(image, TABLE_PROMPT).await?;
        Ok(postprocess::clean_response(&text))
    }

    /// Transcribe formulas as LaTeX.
    pub async fn extract_math(&self, image: &Path) -> Result<String, InferenceError> {
        let text = self.call(image, MATH_PROMPT).await?;
        Ok(postprocess::clean_response(&text))
    }

    /// `true` when the server answers the liveness check. Never errors.
    pub async fn health_check(&self) -> bool {
        match self.transport.ping().await {
            Ok(ok) => ok,
            Err(e) => {
                debug!("Health check against {} failed: {:?}", self.endpoint(), e);
                false
            }
        }
    }

    /// One logical request: encode once, then send with retry on connection
    /// failure only.
    async fn call(&self, image: &Path, prompt: &str) -> Result<String, InferenceError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            images: vec![encode::encode_image_file(image).await?],
            stream: false,
        };

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(self.retry_backoff, attempt);
                warn!(
                    "Connection failed, retrying in {:?} (attempt {}/{})",
                    backoff, attempt, self.max_retries
                );
                sleep(backoff).await;
            }

            match self.transport.generate(&request).await {
                Ok(text) => return Ok(text.trim().to_string()),
                Err(TransportError::Connect(detail)) => {
                    debug!("Attempt {} could not connect: {}", attempt + 1, detail);
                }
                Err(TransportError::Timeout) => {
                    return Err(InferenceError::Timeout {
                        secs: self.timeout_secs,
                    })
                }
                Err(TransportError::Status { status, body }) => {
                    return Err(InferenceError::Status { status, body })
                }
                Err(TransportError::Decode(detail)) => return Err(InferenceError::Decode(detail)),
                Err(TransportError::Other(detail)) => return Err(InferenceError::Request(detail)),
            }
        }

        Err(InferenceError::Unreachable {
            url: self.endpoint().to_string(),
            attempts: self.max_retries.saturating_add(1),
        })
    }
}
