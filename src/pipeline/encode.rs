//! Image encoding: page file on disk → base64 string for the request body.
//!
//! Ollama's `/api/generate` takes raw base64 in the `images` array (no
//! `data:` URI prefix), so the bytes are sent exactly as the renderer wrote
//! them. PNG stays lossless, which matters more for OCR than payload size.

use crate::error::InferenceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// Read an image file and base64-encode it.
pub async fn encode_image_file(path: &Path) -> Result<String, InferenceError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| InferenceError::ImageRead {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), b64.len());
    Ok(b64)
}
