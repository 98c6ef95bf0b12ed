//! Prompts sent to the vision model.
//!
//! Every instruction lives here so the gateway and extractor stay free of
//! prompt text, and tests can inspect prompts without a running model.

/// Asks for a single-word page type. The answer is normalised by
/// [`crate::pipeline::vision::normalize_content_type`], which copes with
/// models that add a sentence around the word.
pub const CLASSIFY_PROMPT: &str = "Look at this image and answer: What is the main content type? \
Is it mostly text, a table, a figure/diagram, mathematical formulas, mixed content, \
or unrecognizable? \
Answer with just one word: text, table, figure, math, mixed, or unknown.";

/// Default OCR instruction for `text` and `mixed` pages.
pub const OCR_PROMPT: &str = "Extract all text from this image. \
Preserve formatting and structure. \
For mathematical formulas, use LaTeX notation with $...$ for inline math \
and $$...$$ for display math (e.g., $x^2 + y^2 = z^2$). \
For tables, describe the structure clearly. \
Output only the extracted content, with no commentary.";

/// Instruction for `table` pages.
pub const TABLE_PROMPT: &str = "Extract the table from this image \
and convert it to Markdown format. \
Use | separators for columns and - for the header separator row. \
Preserve all data accurately. Output only the table.";

/// Instruction for `math` pages.
pub const MATH_PROMPT: &str = "Extract all mathematical formulas from this image \
and convert them to LaTeX format. \
Use $...$ for inline math and $$...$$ for display math. \
Include any surrounding text that helps context.";
