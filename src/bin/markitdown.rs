//! CLI binary for markitdown-bridge.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use markitdown_bridge::{
    ConversionOutput, ConversionProgressCallback, Converter, ConverterConfig, ProgressCallback,
    PythonRuntime,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::error;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress for multi-file batches. Files finish out of order, so
/// start times are keyed by source path.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, source: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(source))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_files} files…"))
        ));
    }

    fn on_file_start(&self, source: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(source.to_string(), Instant::now());
        }
        self.bar.set_message(source.to_string());
    }

    fn on_file_complete(&self, source: &str, markdown_len: usize) {
        let secs = self.elapsed_secs(source);
        self.bar.println(format!(
            "  {} {}  {:<8}  {}",
            green("✓"),
            source,
            dim(&format!("{markdown_len:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, source: &str, error: &str) {
        let secs = self.elapsed_secs(source);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            source,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let failed = total_files.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if failed == total_files {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout)
  markitdown report.docx

  # Convert to file
  markitdown slides.pptx -o slides.md

  # Several files, Markdown separated by source comments
  markitdown a.pdf b.xlsx c.html > all.md

  # JSON output with title and timing
  markitdown --json report.docx > report.json

  # Use markitdown from a virtualenv that is not on sys.path
  markitdown --python-path .venv/lib/python3.12/site-packages report.docx

ENVIRONMENT VARIABLES:
  MARKITDOWN_PYTHONPATH   Extra sys.path entries, ':'-separated
  MARKITDOWN_MAX_HANDLES  Upper bound on live interpreter handles
  RUST_LOG                Override the log filter (e.g. markitdown_bridge=debug)

SETUP:
  1. Install the library:  pip install 'markitdown[all]'
  2. Convert:              markitdown document.pdf -o output.md

  Ctrl-C or SIGTERM drains in-flight conversions and exits with status 0.
"#;

/// Convert documents to Markdown with the Python markitdown library.
#[derive(Parser, Debug)]
#[command(
    name = "markitdown",
    version,
    about = "Convert documents to Markdown with the Python markitdown library",
    long_about = "Convert documents (PDF, DOCX, PPTX, XLSX, HTML, and more) to Markdown by \
calling the markitdown Python library through an embedded interpreter. The interpreter \
stays resident for the life of the process; each input is converted on a pooled handle.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to convert.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write Markdown to this file instead of stdout (single input only).
    #[arg(short, long, env = "MARKITDOWN_OUTPUT")]
    output: Option<PathBuf>,

    /// Output structured JSON (ConversionOutput) instead of Markdown.
    #[arg(long, env = "MARKITDOWN_JSON")]
    json: bool,

    /// Extra directory to put on the interpreter's sys.path (repeatable).
    #[arg(long = "python-path", env = "MARKITDOWN_PYTHONPATH", value_delimiter = ':')]
    python_paths: Vec<PathBuf>,

    /// Maximum number of interpreter handles kept alive at once.
    #[arg(long, env = "MARKITDOWN_MAX_HANDLES", default_value_t = 4,
          value_parser = clap::value_parser!(u64).range(1..=64))]
    max_handles: u64,

    /// Disable progress bar.
    #[arg(long, env = "MARKITDOWN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MARKITDOWN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MARKITDOWN_QUIET")]
    quiet: bool,
}

/// Parse arguments; usage errors exit with status 1, `--help`/`--version` with 0.
fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli();

    if cli.output.is_some() && cli.inputs.len() > 1 {
        eprintln!("error: --output accepts exactly one input ({} given)", cli.inputs.len());
        std::process::exit(1);
    }

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let batch = cli.inputs.len() > 1;
    let show_progress = batch && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build converter ──────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // Interpreter start-up and the first import are blocking; keep them off
    // the async worker's hot path.
    let converter = tokio::task::block_in_place(|| Converter::python(config))
        .context("Failed to start the Python runtime")?;

    converter.shutdown_coordinator().spawn();

    // ── Run conversion ───────────────────────────────────────────────────
    let outcome = if batch {
        run_batch(&cli, &converter).await
    } else {
        run_single(&cli, &converter).await
    };

    tokio::task::block_in_place(|| converter.shutdown());
    outcome
}

/// Map CLI args to `ConverterConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::builder()
        .max_handles(cli.max_handles as usize)
        .prewarm_handles(1);

    for dir in &cli.python_paths {
        builder = builder.python_path(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run_single(cli: &Cli, converter: &Converter<PythonRuntime>) -> Result<()> {
    let input = &cli.inputs[0];

    if let Some(ref output_path) = cli.output {
        let output = converter
            .convert_to_file(input, output_path)
            .await
            .with_context(|| format!("Conversion of '{input}' failed"))?;

        if !cli.quiet {
            eprintln!(
                "{}  {} chars  {}ms  →  {}",
                green("✔"),
                output.markdown.len(),
                output.duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
        return Ok(());
    }

    let output = converter
        .convert(input)
        .await
        .with_context(|| format!("Conversion of '{input}' failed"))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        write_markdown(&output, false)?;
    }

    if !cli.quiet && !cli.json {
        eprintln!(
            "{}",
            dim(&format!("Converted {} in {}ms", output.source, output.duration_ms))
        );
    }
    Ok(())
}

async fn run_batch(cli: &Cli, converter: &Converter<PythonRuntime>) -> Result<()> {
    let (results, stats) = converter.convert_many(&cli.inputs).await;

    if cli.json {
        let ok: Vec<&ConversionOutput> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "outputs": ok,
            "stats": stats,
        }))
        .context("Failed to serialise output")?;
        println!("{json}");
    } else {
        for output in results.iter().filter_map(|r| r.as_ref().ok()) {
            write_markdown(output, true)?;
        }
    }

    for (input, result) in cli.inputs.iter().zip(&results) {
        if let Err(e) = result {
            error!("{}: {}", input, e);
        }
    }

    if stats.failed > 0 {
        anyhow::bail!("{} of {} inputs failed", stats.failed, stats.total_files);
    }
    Ok(())
}

fn write_markdown(output: &ConversionOutput, with_source: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if with_source {
        writeln!(handle, "<!-- source: {} -->\n", output.source)
            .context("Failed to write to stdout")?;
    }
    handle
        .write_all(output.markdown.as_bytes())
        .context("Failed to write to stdout")?;
    // Ensure a trailing newline on stdout.
    if !output.markdown.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}
