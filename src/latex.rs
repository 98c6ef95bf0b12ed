//! LaTeX toolchain: syntax checks on the generated `.tex` and optional
//! compilation to PDF.
//!
//! Two external compilers are supported. Tectonic is preferred because it is
//! a single self-contained binary that fetches packages on demand; pdflatex
//! is the fallback for systems with a TeX distribution installed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Availability check timeout per compiler.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Compilation timeout per attempt.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Compiler output lines kept in a [`LatexError::CompileFailed`] report.
pub const LOG_TAIL_LINES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compiler {
    Tectonic,
    Pdflatex,
}

impl Compiler {
    pub fn program(self) -> &'static str {
        match self {
            Compiler::Tectonic => "tectonic",
            Compiler::Pdflatex => "pdflatex",
        }
    }

    fn args(self, tex: &Path, out_dir: &Path) -> Vec<String> {
        match self {
            Compiler::Tectonic => vec![
                tex.display().to_string(),
                "-o".to_string(),
                out_dir.display().to_string(),
            ],
            Compiler::Pdflatex => vec![
                "-interaction=nonstopmode".to_string(),
                format!("-output-directory={}", out_dir.display()),
                tex.display().to_string(),
            ],
        }
    }

    /// Compiler invocation for `tex`, run from the directory holding it so
    /// that relative figure paths in the document resolve. `out_dir` should
    /// be absolute.
    fn command(self, tex: &Path, out_dir: &Path) -> Command {
        let source = tex.file_name().map(Path::new).unwrap_or(tex);
        let mut cmd = Command::new(self.program());
        cmd.args(self.args(source, out_dir))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = tex.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Why a `.tex` file did not become a PDF.
#[derive(Debug, Error)]
pub enum LatexError {
    #[error("LaTeX source not found: '{path}'")]
    SourceNotFound { path: PathBuf },

    #[error(
        "No LaTeX compiler found. Install Tectonic (https://tectonic-typesetting.github.io/) \
or pdflatex for PDF compilation."
    )]
    NoCompiler,

    #[error("{compiler} error (exit code {code:?}):\n{log}")]
    CompileFailed {
        compiler: Compiler,
        code: Option<i32>,
        /// Last lines of stdout then stderr; pdflatex reports errors on stdout.
        log: String,
    },

    #[error("{compiler} compilation timed out after {secs}s")]
    TimedOut { compiler: Compiler, secs: u64 },

    #[error("Could not run {compiler}: {source}")]
    Spawn {
        compiler: Compiler,
        #[source]
        source: std::io::Error,
    },
}

/// Which compilers are installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatexToolchain {
    pub tectonic: bool,
    pub pdflatex: bool,
}

impl LatexToolchain {
    /// Run `tectonic --version` and `pdflatex --version`.
    pub async fn detect() -> Self {
        let (tectonic, pdflatex) =
            tokio::join!(is_installed(Compiler::Tectonic), is_installed(Compiler::Pdflatex));
        debug!("LaTeX toolchain: tectonic={} pdflatex={}", tectonic, pdflatex);
        Self { tectonic, pdflatex }
    }

    /// Compilers in preference order.
    pub fn available(&self) -> Vec<Compiler> {
        let mut out = Vec::new();
        if self.tectonic {
            out.push(Compiler::Tectonic);
        }
        if self.pdflatex {
            out.push(Compiler::Pdflatex);
        }
        out
    }

    /// Compile `tex` into `out_dir/<stem>.pdf`.
    ///
    /// A compiler that cannot be started is skipped in favour of the next
    /// one; a compiler that runs and fails ends the attempt with the tail
    /// of its output.
    pub async fn compile(&self, tex: &Path, out_dir: &Path) -> Result<PathBuf, LatexError> {
        let not_found = || LatexError::SourceNotFound {
            path: tex.to_path_buf(),
        };
        if !tex.is_file() {
            return Err(not_found());
        }
        let source = tokio::fs::canonicalize(tex).await.map_err(|_| not_found())?;
        let target = std::path::absolute(out_dir).unwrap_or_else(|_| out_dir.to_path_buf());
        let stem = tex.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
        let pdf = out_dir.join(format!("{stem}.pdf"));

        let mut last_spawn_error = None;
        for compiler in self.available() {
            info!("Compiling with {}: {}", compiler, source.display());
            let mut cmd = compiler.command(&source, &target);

            let output = match timeout(COMPILE_TIMEOUT, cmd.output()).await {
                Err(_) => {
                    return Err(LatexError::TimedOut {
                        compiler,
                        secs: COMPILE_TIMEOUT.as_secs(),
                    })
                }
                Ok(Err(source)) => {
                    warn!("{} could not be started: {}", compiler, source);
                    last_spawn_error = Some(LatexError::Spawn { compiler, source });
                    continue;
                }
                Ok(Ok(output)) => output,
            };

            if !output.status.success() {
                return Err(LatexError::CompileFailed {
                    compiler,
                    code: output.status.code(),
                    log: log_tail(&output.stdout, &output.stderr),
                });
            }
            info!("Successfully compiled to {}", pdf.display());
            return Ok(pdf);
        }

        Err(last_spawn_error.unwrap_or(LatexError::NoCompiler))
    }

    /// Human-readable summary of the installed compilers.
    pub fn status(&self) -> String {
        let mut msg = String::from("LaTeX Verification Status:\n");
        if self.tectonic {
            msg.push_str("  ✓ Tectonic (recommended)\n");
        }
        if self.pdflatex {
            msg.push_str("  ✓ pdflatex\n");
        }
        if !self.tectonic && !self.pdflatex {
            msg.push_str("  ✗ No LaTeX compiler installed\n");
            msg.push_str("     For PDF compilation, install:\n");
            msg.push_str("       - Tectonic: https://tectonic-typesetting.github.io/\n");
            msg.push_str("       - Or a TeX distribution providing pdflatex\n");
        }
        msg
    }
}

/// Last [`LOG_TAIL_LINES`] non-blank lines of stdout followed by stderr.
fn log_tail(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .filter(|line| !line.trim().is_empty())
        .collect();
    lines[lines.len().saturating_sub(LOG_TAIL_LINES)..].join("\n")
}

async fn is_installed(compiler: Compiler) -> bool {
    let mut cmd = Command::new(compiler.program());
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    matches!(timeout(DETECT_TIMEOUT, cmd.status()).await, Ok(Ok(status)) if status.success())
}

/// Structural checks on a LaTeX file; an empty list means no problems found.
pub async fn validate_syntax(path: &Path) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => validate_source(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            vec![format!("File not found: {}", path.display())]
        }
        Err(e) => vec![format!("Error reading file: {e}")],
    }
}

/// Structural checks on LaTeX source text.
///
/// Brace counting ignores escaping, so `\{` in text counts as an opener.
pub fn validate_source(content: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if !content.starts_with("\\documentclass") {
        errors.push("Missing \\documentclass declaration".to_string());
    }
    if !content.contains("\\begin{document}") {
        errors.push("Missing \\begin{document}".to_string());
    }
    if !content.contains("\\end{document}") {
        errors.push("Missing \\end{document}".to_string());
    }

    let balance = |open: char, close: char| -> i64 {
        content.matches(open).count() as i64 - content.matches(close).count() as i64
    };
    let braces = balance('{', '}');
    if braces != 0 {
        errors.push(format!("Unmatched braces (difference: {braces})"));
    }
    let brackets = balance('[', ']');
    if brackets != 0 {
        errors.push(format!("Unmatched brackets (difference: {brackets})"));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\\documentclass{article}\n\\begin{document}\nHi\n\\end{document}\n";

    #[test]
    fn minimal_document_is_valid() {
        assert!(validate_source(MINIMAL).is_empty());
    }

    #[test]
    fn documentclass_must_lead() {
        let errors = validate_source(&format!("% comment\n{MINIMAL}"));
        assert_eq!(errors, vec!["Missing \\documentclass declaration"]);
    }

    #[test]
    fn reports_missing_environment_and_imbalance() {
        let errors = validate_source("\\documentclass{article}\n\\begin{document}\n{[x\n");
        assert!(errors.contains(&"Missing \\end{document}".to_string()));
        assert!(errors.contains(&"Unmatched braces (difference: 1)".to_string()));
        assert!(errors.contains(&"Unmatched brackets (difference: 1)".to_string()));
        assert!(!errors.iter().any(|e| e.contains("begin{document}")));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let errors = validate_syntax(Path::new("/no/such/doc.tex")).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("File not found"));
    }

    #[tokio::test]
    async fn validates_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.tex");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(validate_syntax(&path).await.is_empty());
    }

    #[test]
    fn preference_order_is_tectonic_first() {
        let both = LatexToolchain {
            tectonic: true,
            pdflatex: true,
        };
        assert_eq!(both.available(), vec![Compiler::Tectonic, Compiler::Pdflatex]);
    }

    #[test]
    fn status_lists_compilers() {
        let none = LatexToolchain::default().status();
        assert!(none.starts_with("LaTeX Verification Status"));
        assert!(none.contains("No LaTeX compiler installed"));

        let tectonic = LatexToolchain {
            tectonic: true,
            pdflatex: false,
        }
        .status();
        assert!(tectonic.contains("Tectonic (recommended)"));
        assert!(!tectonic.contains("pdflatex"));
    }

    #[test]
    fn compiler_arguments() {
        let tex = Path::new("/out/doc.tex");
        let out = Path::new("/out");
        assert_eq!(Compiler::Tectonic.args(tex, out), vec!["/out/doc.tex", "-o", "/out"]);
        assert_eq!(
            Compiler::Pdflatex.args(tex, out),
            vec!["-interaction=nonstopmode", "-output-directory=/out", "/out/doc.tex"]
        );
    }

    #[test]
    fn compiler_runs_beside_the_source() {
        let out = Path::new("/runs/out");
        for compiler in [Compiler::Tectonic, Compiler::Pdflatex] {
            let cmd = compiler.command(&out.join("scan.tex"), out);
            let cmd = cmd.as_std();
            assert_eq!(cmd.get_program(), compiler.program());
            assert_eq!(cmd.get_current_dir(), Some(out));
            let args: Vec<String> = cmd
                .get_args()
                .map(|a| a.to_string_lossy().to_string())
                .collect();
            assert_eq!(args, compiler.args(Path::new("scan.tex"), out));
            assert!(args.iter().any(|a| a == "scan.tex"));
        }
    }

    #[test]
    fn failure_log_keeps_stdout_and_stderr_tail() {
        let mut stdout: String = (1..=60).map(|n| format!("line {n}\n")).collect();
        stdout.push_str("! Undefined control sequence.\n\n");
        let log = log_tail(stdout.as_bytes(), b"Emergency stop.\n");

        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), LOG_TAIL_LINES);
        assert_eq!(lines[0], "line 23");
        assert_eq!(lines[LOG_TAIL_LINES - 2], "! Undefined control sequence.");
        assert_eq!(lines[LOG_TAIL_LINES - 1], "Emergency stop.");
    }

    #[test]
    fn failure_message_carries_the_log() {
        let err = LatexError::CompileFailed {
            compiler: Compiler::Pdflatex,
            code: Some(1),
            log: log_tail(b"! Missing $ inserted.\n", b""),
        };
        assert_eq!(err.to_string(), "pdflatex error (exit code Some(1)):\n! Missing $ inserted.");
    }

    #[tokio::test]
    async fn compile_without_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let tex = dir.path().join("doc.tex");
        std::fs::write(&tex, MINIMAL).unwrap();
        let err = LatexToolchain::default()
            .compile(&tex, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, LatexError::NoCompiler));
    }

    #[tokio::test]
    async fn compile_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = LatexToolchain {
            tectonic: true,
            pdflatex: true,
        }
        .compile(&dir.path().join("nope.tex"), dir.path())
        .await
        .unwrap_err();
        assert!(matches!(err, LatexError::SourceNotFound { .. }));
    }
}
