//! Output assembly: turns content items into files on disk.
//!
//! One run writes, under the output directory:
//!
//! ```text
//! 171026_142501_report.md            Markdown document
//! 171026_142501_report.tex           LaTeX document (optional)
//! 171026_142501_report/figure_001.png
//! 171026_142501_report_metadata.txt  pages processed + error ledger
//! ```
//!
//! The `DDMMYY_HHMMSS` prefix keeps repeated runs on the same input from
//! overwriting each other (unless they start within the same second).
//! Every text file is written to a temporary sibling first and renamed into
//! place, so a crash never leaves a half-written document behind.

use crate::error::OcrSuiteError;
use crate::output::{ContentItem, ContentType, FigureRecord, RunMetadata};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// `strftime` pattern for the run prefix.
pub const RUN_TIMESTAMP_FORMAT: &str = "%d%m%y_%H%M%S";

/// Figure numbers for one run.
///
/// Numbers start at 1 and are handed out exactly once each, even when pages
/// are processed concurrently.
#[derive(Debug, Default)]
pub struct FigureSequence {
    issued: AtomicUsize,
}

impl FigureSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next figure number.
    pub fn next(&self) -> usize {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// How many numbers have been handed out so far.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

/// `{DDMMYY_HHMMSS}_{source_stem}`.
pub fn run_stem(created_at: &DateTime<Local>, source_stem: &str) -> String {
    format!("{}_{}", created_at.format(RUN_TIMESTAMP_FORMAT), source_stem)
}

/// Writes every output file of one run.
pub struct OutputAssembler {
    output_dir: PathBuf,
    stem: String,
    figures: FigureSequence,
    stored: AtomicUsize,
}

impl OutputAssembler {
    /// Create the output directory and an assembler for a run started at
    /// `created_at`.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        source_stem: &str,
        created_at: &DateTime<Local>,
    ) -> Result<Self, OcrSuiteError> {
        Self::with_stem(output_dir, run_stem(created_at, source_stem))
    }

    /// Like [`OutputAssembler::new`] with an explicit file stem.
    pub fn with_stem(
        output_dir: impl Into<PathBuf>,
        stem: impl Into<String>,
    ) -> Result<Self, OcrSuiteError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| OcrSuiteError::assembly(&output_dir, e))?;
        Ok(Self {
            output_dir,
            stem: stem.into(),
            figures: FigureSequence::new(),
            stored: AtomicUsize::new(0),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Reserve the next figure number for the page image at `source`.
    pub fn claim_figure(&self, source: &Path) -> FigureRecord {
        FigureRecord::new(self.figures.next(), source)
    }

    /// Figures actually written to disk.
    pub fn figures_stored(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    /// `<output>/<stem>/`; exists only once a figure has been stored.
    pub fn figures_dir(&self) -> PathBuf {
        self.output_dir.join(&self.stem)
    }

    pub fn markdown_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.md", self.stem))
    }

    pub fn latex_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.tex", self.stem))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_metadata.txt", self.stem))
    }

    /// Link target for a stored figure, relative to the document.
    pub fn figure_link(&self, file_name: &str) -> String {
        format!("{}/{}", self.stem, file_name)
    }

    /// Store raw image bytes in the figures directory and return the path
    /// relative to the output directory. The directory is created on the
    /// first call.
    pub async fn append_figure(
        &self,
        bytes: &[u8],
        suggested_name: &str,
    ) -> Result<String, OcrSuiteError> {
        let file_name = Path::new(suggested_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                OcrSuiteError::Internal(format!("invalid figure name '{suggested_name}'"))
            })?
            .to_string();

        let dir = self.figures_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OcrSuiteError::assembly(&dir, e))?;

        let target = dir.join(&file_name);
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| OcrSuiteError::assembly(&target, e))?;
        self.stored.fetch_add(1, Ordering::SeqCst);
        debug!("Saved image to {}", target.display());

        Ok(self.figure_link(&file_name))
    }

    /// Copy a figure page's image into the figures directory.
    pub async fn store_figure(&self, record: &FigureRecord) -> Result<String, OcrSuiteError> {
        let bytes = tokio::fs::read(&record.source)
            .await
            .map_err(|e| OcrSuiteError::assembly(&record.source, e))?;
        self.append_figure(&bytes, &record.file_name).await
    }

    /// Write the Markdown document and return its path.
    pub async fn assemble(
        &self,
        items: &[ContentItem],
        metadata: &RunMetadata,
        title: Option<&str>,
    ) -> Result<PathBuf, OcrSuiteError> {
        let path = self.markdown_path();
        write_atomic(&path, self.render_markdown(items, metadata, title).as_bytes()).await?;
        info!("Saved Markdown to {}", path.display());
        Ok(path)
    }

    /// Write the LaTeX document and return its path.
    pub async fn assemble_latex(
        &self,
        items: &[ContentItem],
        metadata: &RunMetadata,
        title: Option<&str>,
    ) -> Result<PathBuf, OcrSuiteError> {
        let path = self.latex_path();
        write_atomic(&path, self.render_latex(items, metadata, title).as_bytes()).await?;
        info!("Saved LaTeX to {}", path.display());
        Ok(path)
    }

    /// Write the plaintext run ledger and return its path.
    pub async fn write_metadata(&self, metadata: &RunMetadata) -> Result<PathBuf, OcrSuiteError> {
        let path = self.metadata_path();
        write_atomic(&path, self.render_metadata(metadata).as_bytes()).await?;
        debug!("Saved metadata to {}", path.display());
        Ok(path)
    }

    // ── Renderers ────────────────────────────────────────────────────────

    pub fn render_markdown(
        &self,
        items: &[ContentItem],
        metadata: &RunMetadata,
        title: Option<&str>,
    ) -> String {
        let mut out = String::new();

        if let Some(title) = title {
            out.push_str(&format!("# {title}\n\n"));
            out.push_str(&format!(
                "*Generated: {}*\n\n",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ));
        }

        let sections: Vec<String> = items
            .iter()
            .map(|item| {
                let body = match &item.figure {
                    Some(fig) => format!(
                        "![Figure {}]({})",
                        fig.number,
                        self.figure_link(&fig.file_name)
                    ),
                    None => item.body.clone(),
                };
                format!("## {} ({})\n\n{}", item.page_id, item.content_type, body)
            })
            .collect();
        out.push_str(&sections.join("\n\n"));
        out.push('\n');

        if !metadata.errors.is_empty() {
            out.push_str("\n---\n\n## Processing Notes\n\n");
            out.push_str(&format!("- Pages processed: {}\n", metadata.pages_processed));
            out.push_str(&format!("- Errors: {}\n", metadata.errors.len()));
            for error in &metadata.errors {
                out.push_str(&format!("  - {error}\n"));
            }
        }

        out
    }

    pub fn render_latex(
        &self,
        items: &[ContentItem],
        metadata: &RunMetadata,
        title: Option<&str>,
    ) -> String {
        let mut out = String::from(
            "\\documentclass{article}\n\
             \\usepackage[utf8]{inputenc}\n\
             \\usepackage{amsmath}\n\
             \\usepackage{amssymb}\n\
             \\usepackage{graphicx}\n",
        );
        if let Some(title) = title {
            out.push_str(&format!("\\title{{{}}}\n\\date{{\\today}}\n", escape_latex(title)));
        }
        out.push_str("\n\\begin{document}\n");
        if title.is_some() {
            out.push_str("\\maketitle\n");
        }

        for item in items {
            out.push_str(&format!(
                "\n\\section*{{{} ({})}}\n",
                escape_latex(&item.page_id),
                item.content_type
            ));
            let body = match (&item.figure, item.content_type) {
                (Some(fig), _) => format!(
                    "\\begin{{figure}}[h]\n\\centering\n\
                     \\includegraphics[width=\\linewidth]{{{}}}\n\
                     \\caption{{Figure {}}}\n\\end{{figure}}",
                    self.figure_link(&fig.file_name),
                    fig.number
                ),
                (None, ContentType::Table) => pipe_tables_to_tabular(&item.body),
                (None, _) => escape_latex(&item.body),
            };
            out.push_str(&body);
            out.push('\n');
        }

        if !metadata.errors.is_empty() {
            out.push_str("\n\\section*{Processing Notes}\n\\begin{itemize}\n");
            out.push_str(&format!(
                "\\item Pages processed: {}\n\\item Errors: {}\n",
                metadata.pages_processed,
                metadata.errors.len()
            ));
            for error in &metadata.errors {
                out.push_str(&format!("\\item {}\n", escape_latex(&error.to_string())));
            }
            out.push_str("\\end{itemize}\n");
        }

        out.push_str("\n\\end{document}\n");
        out
    }

    pub fn render_metadata(&self, metadata: &RunMetadata) -> String {
        let mut out = String::new();
        out.push_str(&format!("run: {}\n", self.stem));
        out.push_str(&format!("created: {}\n", metadata.created_at.to_rfc3339()));
        out.push_str(&format!("pages_processed: {}\n", metadata.pages_processed));
        out.push_str(&format!("figures: {}\n", self.figures_stored()));
        out.push_str(&format!("errors: {}\n", metadata.errors.len()));
        for error in &metadata.errors {
            out.push_str(&format!("  - {error}\n"));
        }
        out
    }
}

/// Write `contents` to `path` via a temporary sibling and a rename.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), OcrSuiteError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            OcrSuiteError::Internal(format!("invalid output path '{}'", path.display()))
        })?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| OcrSuiteError::assembly(path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| OcrSuiteError::assembly(path, e))
}

// ── LaTeX helpers ────────────────────────────────────────────────────────────

fn escape_latex_char(c: char, out: &mut String) {
    match c {
        '\\' => out.push_str("\\textbackslash{}"),
        '&' | '%' | '#' | '_' | '{' | '}' | '$' => {
            out.push('\\');
            out.push(c);
        }
        '~' => out.push_str("\\textasciitilde{}"),
        '^' => out.push_str("\\textasciicircum{}"),
        _ => out.push(c),
    }
}

/// Escape LaTeX specials in plain text, leaving `$…$` and `$$…$$` spans
/// verbatim. Text with an unmatched delimiter is escaped in full.
pub fn escape_latex(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();

    let mut delimiters = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' {
            delimiters += 1;
            if chars.get(i + 1) == Some(&'$') {
                i += 1;
            }
        }
        i += 1;
    }
    let keep_math = delimiters % 2 == 0;

    let mut out = String::with_capacity(text.len() + 16);
    let mut in_math = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '$' && keep_math {
            if chars.get(i + 1) == Some(&'$') {
                out.push_str("$$");
                i += 1;
            } else {
                out.push('$');
            }
            in_math = !in_math;
        } else if in_math {
            out.push(c);
        } else {
            escape_latex_char(c, &mut out);
        }
        i += 1;
    }
    out
}

fn is_pipe_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.ends_with('|') && t.len() > 1
}

fn is_pipe_separator(line: &str) -> bool {
    let t = line.trim();
    t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn pipe_cells(line: &str) -> Vec<String> {
    line.trim()
        .trim_start_matches('|')
        .trim_end_matches('|')
        .split('|')
        .map(|cell| escape_latex(cell.trim()))
        .collect()
}

/// Convert Markdown pipe tables into `tabular` environments; other lines
/// are escaped as text.
pub fn pipe_tables_to_tabular(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !is_pipe_row(lines[i]) {
            out.push(escape_latex(lines[i]));
            i += 1;
            continue;
        }

        let start = i;
        while i < lines.len() && is_pipe_row(lines[i]) {
            i += 1;
        }
        let rows: Vec<Vec<String>> = lines[start..i]
            .iter()
            .filter(|l| !is_pipe_separator(l))
            .map(|l| pipe_cells(l))
            .collect();
        let columns = rows.iter().map(Vec::len).max().unwrap_or(1);

        out.push(format!("\\begin{{tabular}}{{|{}}}", "l|".repeat(columns)));
        out.push("\\hline".to_string());
        for mut row in rows {
            row.resize(columns, String::new());
            out.push(format!("{} \\\\ \\hline", row.join(" & ")));
        }
        out.push("\\end{tabular}".to_string());
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ErrorRecord;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn assembler(dir: &Path) -> OutputAssembler {
        OutputAssembler::with_stem(dir, "171026_142501_report").unwrap()
    }

    fn figure_item(page: &str, number: usize) -> ContentItem {
        let record = FigureRecord::new(number, format!("/tmp/{page}.png"));
        ContentItem {
            body: record.placeholder(),
            figure: Some(record),
            ..ContentItem::new(page, ContentType::Figure, String::new())
        }
    }

    #[test]
    fn run_stem_uses_ddmmyy_prefix() {
        let at = Local.with_ymd_and_hms(2026, 10, 17, 14, 25, 1).unwrap();
        assert_eq!(run_stem(&at, "report"), "171026_142501_report");
    }

    #[test]
    fn sequence_is_one_based_and_gapless() {
        let seq = FigureSequence::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.next(), 3);
        assert_eq!(seq.issued(), 3);
    }

    #[test]
    fn claimed_figures_are_numbered_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let first = asm.claim_figure(Path::new("/tmp/page_0004.png"));
        let second = asm.claim_figure(Path::new("/tmp/page_0009.png"));
        assert_eq!((first.number, first.file_name.as_str()), (1, "figure_001.png"));
        assert_eq!(second.source, Path::new("/tmp/page_0009.png"));
        assert_eq!(second.number, 2);
        assert_eq!(asm.figures_stored(), 0);
    }

    #[test]
    fn sequence_is_count_safe_across_threads() {
        let seq = Arc::new(FigureSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || (0..100).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=800).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn figures_dir_is_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        assert!(!asm.figures_dir().exists());

        let rel = asm.append_figure(b"img-bytes", "figure_001.png").await.unwrap();
        assert_eq!(rel, "171026_142501_report/figure_001.png");
        assert_eq!(
            std::fs::read(dir.path().join(&rel)).unwrap(),
            b"img-bytes"
        );
        assert_eq!(asm.figures_stored(), 1);
    }

    #[tokio::test]
    async fn suggested_name_cannot_escape_figures_dir() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let rel = asm.append_figure(b"x", "../../figure_009.png").await.unwrap();
        assert_eq!(rel, "171026_142501_report/figure_009.png");
    }

    #[tokio::test]
    async fn store_figure_copies_source_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("page_0002.png");
        std::fs::write(&src, b"page two").unwrap();
        let asm = assembler(&dir.path().join("out"));

        let rel = asm.store_figure(&FigureRecord::new(1, &src)).await.unwrap();
        assert_eq!(std::fs::read(asm.output_dir().join(rel)).unwrap(), b"page two");
    }

    #[tokio::test]
    async fn missing_figure_source_is_assembly_error() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let err = asm
            .store_figure(&FigureRecord::new(1, dir.path().join("gone.png")))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrSuiteError::Assembly { .. }));
    }

    #[test]
    fn markdown_sections_in_item_order() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let items = vec![
            ContentItem::new("page_0001", ContentType::Text, "Hello"),
            ContentItem::new("page_0002", ContentType::Table, "| a | b |"),
            figure_item("page_0003", 1),
        ];
        let md = asm.render_markdown(&items, &RunMetadata::new(), None);

        let p1 = md.find("## page_0001 (text)\n\nHello").unwrap();
        let p2 = md.find("## page_0002 (table)\n\n| a | b |").unwrap();
        let p3 = md
            .find("## page_0003 (figure)\n\n![Figure 1](171026_142501_report/figure_001.png)")
            .unwrap();
        assert!(p1 < p2 && p2 < p3);
        assert!(!md.contains("Processing Notes"));
    }

    #[test]
    fn markdown_title_and_generation_line() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let md = asm.render_markdown(&[], &RunMetadata::new(), Some("Annual Report"));
        assert!(md.starts_with("# Annual Report\n\n*Generated: "));
    }

    #[test]
    fn processing_notes_list_errors_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let mut meta = RunMetadata::new();
        meta.record(&Ok(ContentItem::new("page_0001", ContentType::Text, "a")));
        meta.record(&Err(ErrorRecord::new("page_0002", "timed out")));
        meta.record(&Err(ErrorRecord::new("page_0003", "unreachable")));

        let md = asm.render_markdown(&[], &meta, None);
        let notes = &md[md.find("## Processing Notes").unwrap()..];
        assert!(notes.contains("- Pages processed: 3\n"));
        assert!(notes.contains("- Errors: 2\n"));
        let first = notes.find("  - page_0002: timed out").unwrap();
        let second = notes.find("  - page_0003: unreachable").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn assemble_writes_markdown_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let items = vec![ContentItem::new("page_0001", ContentType::Text, "Hello")];
        let path = asm.assemble(&items, &RunMetadata::new(), None).await.unwrap();

        assert_eq!(path, dir.path().join("171026_142501_report.md"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("Hello"));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn metadata_ledger_contents() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let mut meta = RunMetadata::new();
        meta.record(&Err(ErrorRecord::new("page_0001", "boom")));

        let path = asm.write_metadata(&meta).await.unwrap();
        assert_eq!(path, dir.path().join("171026_142501_report_metadata.txt"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("pages_processed: 1\n"));
        assert!(text.contains("errors: 1\n  - page_0001: boom\n"));
    }

    #[tokio::test]
    async fn unwritable_output_is_assembly_error() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        // A directory squatting on the target name makes the rename fail.
        std::fs::create_dir(asm.markdown_path()).unwrap();
        std::fs::write(asm.markdown_path().join("child"), b"x").unwrap();
        let err = asm.assemble(&[], &RunMetadata::new(), None).await.unwrap_err();
        assert!(matches!(err, OcrSuiteError::Assembly { .. }));
    }

    #[test]
    fn escape_keeps_math_spans() {
        assert_eq!(
            escape_latex("50% of $x_1^2$ & more"),
            "50\\% of $x_1^2$ \\& more"
        );
        assert_eq!(escape_latex("$$a_b$$ c_d"), "$$a_b$$ c\\_d");
    }

    #[test]
    fn unmatched_dollar_is_escaped() {
        assert_eq!(escape_latex("costs $5"), "costs \\$5");
    }

    #[test]
    fn pipe_table_becomes_tabular() {
        let out = pipe_tables_to_tabular("Caption\n| a | b |\n|---|---|\n| 1 | 2 |");
        let expected = "Caption\n\\begin{tabular}{|l|l|}\n\\hline\n\
                        a & b \\\\ \\hline\n1 & 2 \\\\ \\hline\n\\end{tabular}";
        assert_eq!(out, expected);
    }

    #[test]
    fn latex_document_structure() {
        let dir = tempfile::tempdir().unwrap();
        let asm = assembler(dir.path());
        let items = vec![
            ContentItem::new("page_0001", ContentType::Text, "R&D"),
            figure_item("page_0002", 1),
        ];
        let tex = asm.render_latex(&items, &RunMetadata::new(), Some("My_Doc"));

        assert!(tex.starts_with("\\documentclass{article}"));
        assert!(tex.contains("\\title{My\\_Doc}"));
        assert!(tex.contains("\\section*{page\\_0001 (text)}\nR\\&D\n"));
        let figure = "\\includegraphics[width=\\linewidth]{171026_142501_report/figure_001.png}";
        assert!(tex.contains(figure));
        assert!(tex.trim_end().ends_with("\\end{document}"));
    }
}
