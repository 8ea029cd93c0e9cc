//! CLI binary for fileconv.
//!
//! A thin shim over the library crate: maps flags to `ToolkitConfig`, opens
//! one tool through the `Dispatcher`, feeds it files from disk and saves the
//! result into an output directory.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fileconv::{
    ConversionError, DirectoryPlatform, Dispatcher, FileCandidate, InputArity, ToolInfo,
    ToolRegistry, ToolkitConfig, ValidationError, WidgetError, WidgetObserver, WidgetState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner driven by widget lifecycle events.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        Arc::new(Self { bar })
    }
}

impl WidgetObserver for CliObserver {
    fn on_validation_error(&self, tool_id: &str, error: &ValidationError) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), dim(tool_id), red(&error.to_string())));
    }

    fn on_conversion_start(&self, tool_id: &str, inputs: usize) {
        self.bar.set_prefix(tool_id.to_string());
        self.bar.set_message(format!("converting {inputs} file(s)…"));
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_conversion_complete(&self, _tool_id: &str, artifacts: usize, elapsed_ms: u64) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} file(s) produced  {}",
            green("✔"),
            bold(&artifacts.to_string()),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        );
    }

    fn on_conversion_error(&self, _tool_id: &str, error: &ConversionError) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(&error.to_string()));
    }

    fn on_state_change(&self, _tool_id: &str, _from: WidgetState, to: WidgetState) {
        if to == WidgetState::Idle {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List every tool
  fileconv list

  # Describe one tool (accepted types, size limit, output)
  fileconv info merge-pdf --json

  # Convert a JPG to PNG into ./out
  fileconv convert jpg-to-png photo.jpg -o out

  # Merge PDFs in the given order
  fileconv convert merge-pdf b.pdf a.pdf c.pdf -o out

  # Rasterise a PDF with a specific pdfium build
  PDFIUM_LIB_PATH=/opt/pdfium fileconv convert pdf-to-jpg deck.pdf

  # OCR with explicit languages
  fileconv convert image-to-text scan.png --ocr-lang eng+ara

ENVIRONMENT VARIABLES:
  FILECONV_OUTPUT_DIR     Output directory (default: current directory)
  FILECONV_TIMEOUT        Conversion timeout in seconds
  FILECONV_QUALITY        JPEG / compression quality (1-100)
  FILECONV_ICON_SIZE      ICO edge length in pixels (16-256)
  FILECONV_OCR_LANG       Tesseract language list, e.g. eng+ara
  FILECONV_TESSERACT      Path to the tesseract executable
  FILECONV_LABEL          Volume label for create-disc-bundle
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Override the log filter
"#;

/// Convert images, PDFs and archives with a catalog of single-purpose tools.
#[derive(Parser, Debug)]
#[command(
    name = "fileconv",
    version,
    about = "Convert images, PDFs and archives with a catalog of single-purpose tools",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FILECONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FILECONV_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every registered tool, grouped by category.
    List {
        /// Print the catalog as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the descriptor of one tool.
    Info {
        /// Tool id, e.g. jpg-to-png.
        tool: String,

        /// Print the descriptor as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run one tool over the given files and save the results.
    Convert(ConvertArgs),
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Tool id, e.g. jpg-to-png.
    tool: String,

    /// Input files, in the order the tool should see them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory the results are saved into.
    #[arg(short, long, env = "FILECONV_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Conversion timeout in seconds (overrides the tool default).
    #[arg(long, env = "FILECONV_TIMEOUT")]
    timeout: Option<u64>,

    /// JPEG and compression quality (1-100).
    #[arg(long, env = "FILECONV_QUALITY",
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// ICO edge length in pixels.
    #[arg(long, env = "FILECONV_ICON_SIZE",
          value_parser = clap::value_parser!(u32).range(16..=256))]
    icon_size: Option<u32>,

    /// Tesseract language list.
    #[arg(long, env = "FILECONV_OCR_LANG")]
    ocr_lang: Option<String>,

    /// Path to the tesseract executable.
    #[arg(long, env = "FILECONV_TESSERACT")]
    tesseract: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium: Option<PathBuf>,

    /// Volume label for create-disc-bundle.
    #[arg(long, env = "FILECONV_LABEL")]
    label: Option<String>,

    /// Archive name (without extension) for create-archive.
    #[arg(long, env = "FILECONV_ARCHIVE_NAME")]
    archive_name: Option<String>,

    /// Print a JSON summary of the result on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || matches!(cli.command, Command::Convert(_)) {
        // the spinner carries the feedback during a conversion
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::List { json } => {
            let registry = ToolRegistry::builtin(&ToolkitConfig::default())?;
            print_catalog(&registry.catalog(), json)
        }
        Command::Info { ref tool, json } => {
            let registry = ToolRegistry::builtin(&ToolkitConfig::default())?;
            let info = registry.lookup(tool)?.info();
            print_info(&info, json)
        }
        Command::Convert(ref args) => run_convert(args, cli.quiet).await,
    }
}

fn print_catalog(catalog: &[ToolInfo], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(catalog).context("Failed to serialise catalog")?
        );
        return Ok(());
    }
    let mut current = None;
    for tool in catalog {
        if current != Some(tool.category) {
            println!("{}", bold(tool.category.label()));
            current = Some(tool.category);
        }
        println!("  {:<20} {}", cyan(&tool.id), dim(&tool.description));
    }
    Ok(())
}

fn print_info(info: &ToolInfo, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(info).context("Failed to serialise tool info")?
        );
        return Ok(());
    }
    let accepted: Vec<_> = info.accepted.iter().map(|m| m.as_str()).collect();
    println!("Tool:         {}", info.id);
    println!("Title:        {}", info.title);
    println!("Category:     {}", info.category);
    println!("Accepts:      {}", accepted.join(", "));
    println!("Max size:     {}", info.max_size);
    println!("Inputs:       {}", describe_arity(&info.arity));
    println!("Output:       {} ({})", info.target.label, info.target.mime_type);
    if let Some(t) = info.timeout_secs {
        println!("Timeout:      {t}s");
    }
    Ok(())
}

fn describe_arity(arity: &InputArity) -> String {
    match arity {
        InputArity::Single => "1 file".to_string(),
        InputArity::Multiple { min, max } => format!("{min}-{max} files"),
    }
}

/// Map CLI args to `ToolkitConfig`.
fn build_config(args: &ConvertArgs) -> Result<ToolkitConfig> {
    let mut builder = ToolkitConfig::builder();
    if let Some(t) = args.timeout {
        builder = builder.default_timeout_secs(t);
    }
    if let Some(q) = args.quality {
        builder = builder.jpeg_quality(q).compression_quality(q);
    }
    if let Some(px) = args.icon_size {
        builder = builder.icon_size(px);
    }
    if let Some(ref l) = args.ocr_lang {
        builder = builder.ocr_languages(l.clone());
    }
    if let Some(ref t) = args.tesseract {
        builder = builder.tesseract_binary(t.clone());
    }
    if let Some(ref p) = args.pdfium {
        builder = builder.pdfium_library_path(p.clone());
    }
    if let Some(ref l) = args.label {
        builder = builder.volume_label(l.clone());
    }
    if let Some(ref n) = args.archive_name {
        builder = builder.archive_name(n.clone());
    }
    builder.build().context("Invalid configuration")
}

async fn read_candidate(path: &Path) -> Result<FileCandidate> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input")
        .to_string();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(FileCandidate::new(name, mime.essence_str(), data))
}

async fn run_convert(args: &ConvertArgs, quiet: bool) -> Result<()> {
    let config = build_config(args)?;
    let registry = ToolRegistry::builtin(&config)?;
    let platform = Arc::new(
        DirectoryPlatform::new(&args.output_dir)
            .with_context(|| format!("Cannot use output directory {}", args.output_dir.display()))?,
    );

    let mut dispatcher = Dispatcher::new(registry, platform.clone(), config.default_timeout());
    if !quiet {
        dispatcher = dispatcher.with_observer(CliObserver::new());
    }
    let widget = dispatcher.open(&args.tool)?;

    let mut candidates = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        candidates.push(read_candidate(path).await?);
    }
    widget.select(candidates).context("Input rejected")?;

    // Ctrl-C resets the widget; the spawned conversion then resolves to Cancelled.
    let mut task = tokio::spawn({
        let widget = widget.clone();
        async move { widget.convert().await }
    });
    let outcome = tokio::select! {
        r = &mut task => r.context("Conversion task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            widget.reset()?;
            task.await.context("Conversion task panicked")?
        }
    };

    match outcome {
        Ok(WidgetState::Ready) => {}
        Ok(_) => {
            let cause = widget
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".into());
            bail!("Conversion failed: {cause}");
        }
        Err(WidgetError::Cancelled) => bail!("Conversion cancelled"),
        Err(e) => return Err(e).context("Conversion refused"),
    }

    let summary = widget.summary();
    let saved = widget.export().context("Failed to save results")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !quiet {
        for path in platform.saved_paths() {
            eprintln!("   {}  {}", green("→"), bold(&path.display().to_string()));
        }
        eprintln!("{} {saved} file(s) saved", green("✔"));
    }

    dispatcher.close();
    Ok(())
}
