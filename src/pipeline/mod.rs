//! Per-page pipeline stages.
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ vision ──▶ postprocess ──▶ extract
//! (%PDF)    (pdfium)   (base64)   (HTTP)     (cleanup)       (dispatch)
//! ```
//!
//! 1. [`input`]   validate the source path
//! 2. [`render`]  rasterise pages to PNG; runs in `spawn_blocking`
//! 3. [`encode`]  base64 the page file for the request body
//! 4. [`vision`]  the only stage with network I/O; owns retry and timeout
//! 5. [`postprocess`] deterministic cleanup of model answers
//! 6. [`extract`] classify a page and pick the matching extraction

pub mod encode;
pub mod extract;
pub mod input;
pub mod postprocess;
pub mod render;
pub mod vision;

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory vision service for stage and driver tests.
    //!
    //! Each page image file holds its own page id as bytes, so the fake can
    //! tell which page a request is for even when pages run concurrently.

    use super::vision::{GenerateRequest, TransportError, VisionTransport};
    use crate::output::PageImage;
    use crate::pipeline::render::page_file_name;
    use crate::prompts::CLASSIFY_PROMPT;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    struct Script {
        classify: Result<String, TransportError>,
        extract: Result<String, TransportError>,
    }

    #[derive(Default)]
    pub(crate) struct FakeVision {
        pages: HashMap<String, Script>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeVision {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Script a page: the classification answer and the extraction answer.
        pub(crate) fn page(mut self, id: &str, classify: &str, extract: &str) -> Self {
            self.pages.insert(
                id.to_string(),
                Script {
                    classify: Ok(classify.to_string()),
                    extract: Ok(extract.to_string()),
                },
            );
            self
        }

        /// Script a page whose classification request fails.
        pub(crate) fn failing_page(mut self, id: &str, error: TransportError) -> Self {
            self.pages.insert(
                id.to_string(),
                Script {
                    classify: Err(error.clone()),
                    extract: Err(error),
                },
            );
            self
        }

        /// Prompts received for one page, in call order.
        pub(crate) fn prompts_for(&self, id: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(page, _)| page == id)
                .map(|(_, prompt)| prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl VisionTransport for FakeVision {
        fn endpoint(&self) -> &str {
            "http://fake-vision:11434"
        }

        async fn generate(&self, request: &GenerateRequest) -> Result<String, TransportError> {
            let bytes = STANDARD
                .decode(&request.images[0])
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            let id = String::from_utf8_lossy(&bytes).to_string();
            self.calls
                .lock()
                .unwrap()
                .push((id.clone(), request.prompt.clone()));

            let script = self
                .pages
                .get(&id)
                .ok_or_else(|| TransportError::Other(format!("unscripted page {id}")))?;
            if request.prompt == CLASSIFY_PROMPT {
                script.classify.clone()
            } else {
                script.extract.clone()
            }
        }

        async fn ping(&self) -> Result<bool, TransportError> {
            Ok(true)
        }
    }

    /// Write `count` fake page files whose contents are their page ids.
    pub(crate) fn write_pages(dir: &Path, count: usize) -> Vec<PageImage> {
        (1..=count)
            .map(|n| {
                let path = dir.join(page_file_name(n));
                let page = PageImage::new(n, &path);
                std::fs::write(&path, page.page_id()).unwrap();
                page
            })
            .collect()
    }
}
