//! CLI binary for edgequake-ocrsuite.
//!
//! A thin shim over the library crate that layers CLI flags over the YAML
//! settings file, installs logging (stderr plus `<output>/log.txt`) and
//! prints a summary of the run.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ocrsuite::{
    check_service, convert, inspect, Config, ConfigBuilder, ContentType, LatexToolchain,
    ProgressCallback, RunProgressCallback, RunSummary,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress bar ─────────────────────────────────────────────────────────────

/// Terminal progress: one bar for the run plus a log line per page.
struct CliProgress {
    bar: ProgressBar,
    started: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Checking vision service and rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, page_id: &str) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut map| map.remove(page_id))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgress {
    fn on_run_start(&self, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn on_page_start(&self, page_id: &str) {
        if let Ok(mut map) = self.started.lock() {
            map.insert(page_id.to_string(), Instant::now());
        }
        self.bar.set_message(page_id.to_string());
    }

    fn on_page_complete(&self, page_id: &str, content_type: ContentType) {
        let secs = self.elapsed(page_id);
        self.bar.println(format!(
            "  {} {}  {:<7}  {}",
            green("✓"),
            page_id,
            content_type.as_str(),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_id: &str, error: &str) {
        let secs = self.elapsed(page_id);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            page_id,
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, pages_processed: usize, failed: usize) {
        self.bar.finish_and_clear();
        let ok = pages_processed.saturating_sub(failed);
        if failed == 0 {
            eprintln!("{} {} pages extracted", green("✔"), bold(&ok.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if ok == 0 { red("✘") } else { yellow("⚠") },
                bold(&ok.to_string()),
                pages_processed,
                red(&failed.to_string())
            );
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Digitise a scanned book into ./output
  ocrsuite book.pdf

  # First 10 pages, custom model, Markdown only
  ocrsuite book.pdf -o out --max-pages 10 --model llava --no-latex

  # Settings from a YAML file, CLI flags win
  ocrsuite book.pdf --config settings.yaml --dpi 400

  # Also compile the LaTeX (needs tectonic or pdflatex)
  ocrsuite paper.pdf --compile-latex

  # Is everything installed?
  ocrsuite book.pdf --check

OUTPUT LAYOUT:
  <output>/DDMMYY_HHMMSS_<name>.md             Markdown document
  <output>/DDMMYY_HHMMSS_<name>.tex            LaTeX document
  <output>/DDMMYY_HHMMSS_<name>/figure_001.png figures linked from both
  <output>/DDMMYY_HHMMSS_<name>_metadata.txt   pages processed and errors
  <output>/log.txt                             full debug log (appended)

SETUP:
  1. Start Ollama:   ollama serve
  2. Pull a model:   ollama pull llama3.2-vision
  3. Run:            ocrsuite book.pdf

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   pdfium shared library (file or directory)
  RUST_LOG          override console log filter
"#;

/// Digitise scanned PDFs with a local vision model.
#[derive(Parser, Debug)]
#[command(
    name = "ocrsuite",
    version,
    about = "Digitise scanned PDFs into Markdown and LaTeX with a local vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Scanned PDF to process.
    input: PathBuf,

    /// Output directory.
    #[arg(short, long, env = "OCRSUITE_OUTPUT", default_value = "./output")]
    output: PathBuf,

    /// YAML settings file.
    #[arg(long, env = "OCRSUITE_CONFIG")]
    config: Option<PathBuf>,

    /// Vision model name (e.g. llama3.2-vision, llava).
    #[arg(long, env = "OCRSUITE_MODEL")]
    model: Option<String>,

    /// Vision service base URL.
    #[arg(long, env = "OCRSUITE_URL")]
    url: Option<String>,

    /// Process only the first N pages.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_pages: Option<u64>,

    /// Rendering DPI (72–600).
    #[arg(long, value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// Pages in flight at once.
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: Option<u64>,

    /// Connection retries per request.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip the LaTeX document.
    #[arg(long)]
    no_latex: bool,

    /// Skip the Markdown document.
    #[arg(long)]
    no_markdown: bool,

    /// Compile the LaTeX document to PDF.
    #[arg(long)]
    compile_latex: bool,

    /// Keep rendered page images in <output>/.temp_images.
    #[arg(long)]
    debug: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Print PDF information only.
    #[arg(long)]
    inspect_only: bool,

    /// Check the vision service and LaTeX toolchain, then exit.
    #[arg(long)]
    check: bool,

    /// DEBUG-level console logs and full error chains.
    #[arg(short, long)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn show_progress(&self) -> bool {
        !self.quiet && !self.no_progress && !self.json && !self.inspect_only && !self.check
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            if cli.verbose {
                eprintln!("{} {e:?}", red("Error:"));
            } else {
                eprintln!("{} {e:#}", red("Error:"));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    if cli.inspect_only {
        init_logging(cli, None)?;
        return print_inspection(cli).await;
    }

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create output directory {}", cli.output.display()))?;
    init_logging(cli, Some(&cli.output.join("log.txt")))?;

    let progress: Option<ProgressCallback> = if cli.show_progress() {
        Some(CliProgress::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress)?;
    tracing::debug!("Effective configuration:\n{}", config.to_yaml().unwrap_or_default());

    if cli.check {
        return print_check(&config).await;
    }

    if !cli.quiet {
        eprintln!(
            "{} model {} at {}",
            bold("◆"),
            bold(&config.ollama.model),
            config.ollama.url
        );
    }

    let summary = convert(&cli.input, &cli.output, &config)
        .await
        .with_context(|| format!("Processing {} failed", cli.input.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary, &cli.output);
    }
    Ok(ExitCode::SUCCESS)
}

/// Console at the requested level; the log file always at DEBUG for this
/// crate.
fn init_logging(cli: &Cli, log_file: Option<&Path>) -> Result<()> {
    let console_level = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.show_progress() {
        "error"
    } else {
        "info"
    };
    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_level)),
        );

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new("info,edgequake_ocrsuite=debug,ocrsuite=debug")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install logging")?;
    Ok(())
}

/// Settings file (or defaults) with CLI flags layered on top.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => Config::from_file(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    let mut builder = ConfigBuilder::from_config(base);
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(url) = &cli.url {
        builder = builder.url(url);
    }
    if let Some(n) = cli.max_pages {
        builder = builder.max_pages(n as usize);
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n as usize);
    }
    if let Some(n) = cli.max_retries {
        builder = builder.max_retries(n);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout_secs(secs);
    }
    if cli.no_latex {
        builder = builder.format_latex(false);
    }
    if cli.no_markdown {
        builder = builder.format_markdown(false);
    }
    if cli.compile_latex {
        builder = builder.compile_latex(true);
    }
    if cli.debug {
        builder = builder.debug_mode(true);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn print_inspection(cli: &Cli) -> Result<ExitCode> {
    let info = inspect(&cli.input).await.context("Failed to inspect PDF")?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
        );
        return Ok(ExitCode::SUCCESS);
    }

    println!("File:         {}", cli.input.display());
    if let Some(ref t) = info.title {
        println!("Title:        {t}");
    }
    if let Some(ref a) = info.author {
        println!("Author:       {a}");
    }
    if let Some(ref s) = info.subject {
        println!("Subject:      {s}");
    }
    println!("Pages:        {}", info.page_count);
    println!("PDF Version:  {}", info.pdf_version);
    if let Some(ref p) = info.producer {
        println!("Producer:     {p}");
    }
    if let Some(ref c) = info.creator {
        println!("Creator:      {c}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_check(config: &Config) -> Result<ExitCode> {
    let reachable = check_service(config).await?;
    if reachable {
        println!("{} Connected to vision service at {}", green("✓"), config.ollama.url);
    } else {
        println!(
            "{} Vision service not running at {}\n   Start it with: {}\n   Then pull a model: {}",
            red("✗"),
            config.ollama.url,
            bold("ollama serve"),
            bold(&format!("ollama pull {}", config.ollama.model))
        );
    }
    print!("{}", LatexToolchain::detect().await.status());
    Ok(if reachable {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(summary: &RunSummary, output: &Path) {
    let mark = if summary.failed_pages() == 0 {
        green("✔")
    } else {
        yellow("⚠")
    };
    eprintln!(
        "\n{} {}  {} sections, {} figures, {} errors  {}ms",
        mark,
        bold("Processing complete"),
        summary.items,
        summary.figures,
        summary.failed_pages(),
        summary.duration_ms
    );
    eprintln!("{} {}", bold("Output directory:"), output.display());
    for path in summary.written_files() {
        eprintln!("  - {}", path.display());
    }
    if let Some(dir) = &summary.figures_dir {
        eprintln!("  - {}/ ({} figures)", dir.display(), summary.figures);
    }
    for error in &summary.metadata.errors {
        eprintln!("  {} {}", red("✗"), error);
    }
}
