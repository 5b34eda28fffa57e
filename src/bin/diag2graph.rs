//! CLI binary for diag2graph.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig` and prints the analysis result as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use diag2graph::{analyze_bytes, detect_kind, AnalysisConfig, AnalysisOutput};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "diag2graph",
    version,
    about = "Convert diagram images (PNG/JPEG/PDF/SVG) into structured step graphs",
    long_about = "Extract a structured step graph from a diagram image.\n\n\
        SVGs exported by draw.io / diagrams.net or bpmn-js are parsed \
        structurally and never leave the machine. Everything else is \
        rasterised and read by a Vision Language Model configured via \
        DIAG2GRAPH_API_BASE (any OpenAI-compatible endpoint, e.g. a local \
        LM Studio server) or OPENAI_API_KEY."
)]
struct Cli {
    /// Input diagram: PNG, JPEG, GIF, WEBP, PDF, or SVG file.
    input: PathBuf,

    /// Output file for the JSON result (default: stdout).
    #[arg(short, long, env = "DIAG2GRAPH_OUTPUT")]
    output: Option<PathBuf>,

    /// Model id passed to the provider.
    #[arg(short, long, env = "DIAG2GRAPH_MODEL")]
    model: Option<String>,

    /// Rendering resolution for PDF pages.
    #[arg(long, env = "DIAG2GRAPH_DPI", default_value_t = 150)]
    dpi: u32,

    /// Maximum concurrent page analyses.
    #[arg(short, long, env = "DIAG2GRAPH_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Long-side pixel cap applied to every page before tiling.
    #[arg(long, env = "DIAG2GRAPH_MAX_IMAGE_SIDE", default_value_t = 1536)]
    max_image_side: u32,

    /// Scale factor for rendering SVG input.
    #[arg(long, env = "DIAG2GRAPH_SVG_SCALE", default_value_t = 2.0)]
    svg_scale: f32,

    /// Password for protected PDFs.
    #[arg(long, env = "DIAG2GRAPH_PASSWORD")]
    password: Option<String>,

    /// Path to a custom system prompt file.
    #[arg(long, env = "DIAG2GRAPH_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Maximum tokens in the model response.
    #[arg(long, env = "DIAG2GRAPH_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Sampling temperature.
    #[arg(long, env = "DIAG2GRAPH_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on transient model failures.
    #[arg(long, env = "DIAG2GRAPH_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Timeout per model call, in seconds.
    #[arg(long, env = "DIAG2GRAPH_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Do not attach the extracted text hint to model requests.
    #[arg(long, env = "DIAG2GRAPH_NO_HINT")]
    no_hint: bool,

    /// Emit compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Print the detected format and exit without analysing.
    #[arg(long)]
    detect_only: bool,

    /// Hide the progress spinner.
    #[arg(long, env = "DIAG2GRAPH_NO_PROGRESS")]
    no_progress: bool,

    /// Verbose logging (-v for debug).
    #[arg(short, long, env = "DIAG2GRAPH_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, env = "DIAG2GRAPH_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = !cli.quiet && !cli.no_progress;
    // The spinner owns stderr while it runs; keep library logs out of the
    // way unless the user asked for them.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    if cli.detect_only {
        return print_detection(&bytes);
    }

    let config = build_config(&cli).await?;

    let spinner = show_progress.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Analysing");
        bar.set_message(cli.input.display().to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let result = analyze_bytes(&bytes, &config).await;

    if let Some(bar) = &spinner {
        bar.finish_and_clear();
    }

    let output = result.context("Analysis failed")?;
    report_summary(&cli, &output);

    let json = if cli.compact {
        serde_json::to_string(&output)
    } else {
        serde_json::to_string_pretty(&output)
    }
    .context("Failed to serialise result")?;

    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, json.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }

    // Partial success still exits non-zero so scripts notice missing pages.
    if output.stats().failed_pages > 0 {
        std::process::exit(2);
    }
    Ok(())
}

fn print_detection(bytes: &[u8]) -> Result<()> {
    match detect_kind(bytes) {
        Some(kind) => {
            let doc = diag2graph::RawDocument {
                kind,
                bytes: bytes.to_vec(),
            };
            match doc.svg_flavor() {
                Some(flavor) => println!("{kind} ({flavor:?})"),
                None => println!("{kind}"),
            }
            Ok(())
        }
        None => anyhow::bail!("Unsupported or unrecognised file format"),
    }
}

fn report_summary(cli: &Cli, output: &AnalysisOutput) {
    if cli.quiet {
        return;
    }
    let stats = output.stats();
    let via = if stats.structural_pages > 0 {
        "structural extraction"
    } else {
        "perception model"
    };
    eprintln!(
        "{}/{} page(s) analysed via {} in {:.1}s ({} model call(s))",
        stats.analyzed_pages,
        stats.total_pages,
        via,
        stats.total_duration_ms as f64 / 1000.0,
        stats.model_calls,
    );
    for report in output.pages() {
        if let Some(err) = &report.error {
            eprintln!("  page {} failed: {err}", report.page_index + 1);
        }
    }
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli) -> Result<AnalysisConfig> {
    let system_prompt = match &cli.system_prompt {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {}", path.display()))?,
        ),
        None => None,
    };

    let mut config = AnalysisConfig::builder()
        .pdf_dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_image_side(cli.max_image_side)
        .svg_scale(cli.svg_scale)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .use_hint(!cli.no_hint)
        .build()
        .context("Invalid configuration")?;

    config.model = cli.model.clone();
    config.password = cli.password.clone();
    config.system_prompt = system_prompt;

    Ok(config)
}
