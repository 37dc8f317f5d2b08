//! CLI binary for reportdeck.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one service operation and prints the result.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reportdeck::{
    audit, AuditSink, DirectoryCatalog, GenerationProgressCallback, JobReport, JsonlAuditSink,
    PipelineConfig, PreviewArtifact, ProgressCallback, ReportService, RewriteRequest,
};
use serde_json::{Map, Value};
use std::io;
use std::path::PathBuf;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress for the live generation tier: a bar over batches plus
/// one log line per settled batch.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Extracting facts…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, total_batches: usize, total_slides: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} batches  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_batches as u64);
        self.bar.set_prefix("Generating");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{total_slides} slide(s) with AI content in {total_batches} batch(es)…"
            ))
        ));
    }

    fn on_batch_start(&self, batch: usize, attempt: u32) {
        if attempt > 1 {
            self.bar
                .set_message(format!("batch {} attempt {attempt}", batch + 1));
        } else {
            self.bar.set_message(format!("batch {}", batch + 1));
        }
    }

    fn on_batch_complete(&self, batch: usize, slides: usize) {
        self.bar.println(format!(
            "  {} Batch {:>3}  {}",
            green("✓"),
            batch + 1,
            dim(&format!("{slides} slide(s)"))
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, batch: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Batch {:>3}  {}",
            red("✗"),
            batch + 1,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_generation_complete(&self, total_batches: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = total_batches.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!("{} {} batch(es) generated live", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} batch(es) generated live  ({} fell back)",
                yellow("⚠"),
                bold(&succeeded.to_string()),
                total_batches,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate a deck (live LLM when a provider is configured)
  reportdeck generate acme executive_summary

  # Offline: recorded responses, then deterministic text
  ENABLE_LLM=false reportdeck --recorded-dir data/recorded generate acme executive_summary

  # Rewrite one slide with extra guidance
  reportdeck rewrite acme:executive_summary overview --instruction "Two sentences max"

  # Override a token directly (JSON values are parsed, anything else is text)
  reportdeck rewrite acme:executive_summary overview --set 'KEY_RISKS=["Phishing","Stale patches"]'

  # Page images for the current deck
  reportdeck preview acme:executive_summary

  # Last 20 audit events
  reportdeck logs --limit 20

DATA LAYOUT:
  <templates-dir>/catalog.json   {"templates": [{"template_id", "descriptor_file", "pptx_file"}]}
  <inputs-dir>/catalog.json      {"datasets": [{"id", "file"}]}
  Without a catalog entry, <id>.json (and <id>.pptx) are used.

  <output-dir>/reports/          rendered decks
  <output-dir>/jobs/             job records (slidespec, warnings, revision)
  <output-dir>/previews/         preview cache, keyed by deck hash
  <output-dir>/logs/audit.jsonl  audit trail

ENVIRONMENT VARIABLES:
  ENABLE_LLM              Live generation on/off (default on)
  REPORTDECK_MODEL        Model ID
  REPORTDECK_PROVIDER     Provider (openai, anthropic, gemini, ollama, …)
  EDGEQUAKE_LLM_PROVIDER  Provider fallback when --provider is unset
  EDGEQUAKE_MODEL         Model fallback when --provider is unset
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  PDFIUM_LIB_PATH         Path to libpdfium for preview rasterisation

EXTERNAL TOOLS (preview only):
  soffice   LibreOffice, PPTX → PDF
  pdfium    first-choice rasteriser (shared library)
  pdftoppm  poppler, fallback rasteriser
"#;

/// Fill PPTX report templates from tenant telemetry.
#[derive(Parser, Debug)]
#[command(
    name = "reportdeck",
    version,
    about = "Fill PPTX report templates from tenant telemetry with extracted facts and LLM narrative",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    opts: Opts,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate (or regenerate) the deck for an input/template pair.
    Generate { input_id: String, template_id: String },

    /// Regenerate one slide of an existing job.
    Rewrite {
        /// `<input_id>:<template_id>`
        job_id: String,
        slide_key: String,

        /// Extra guidance for the slide's AI slots.
        #[arg(long)]
        instruction: Option<String>,

        /// Token override, `TOKEN=VALUE`; repeatable.
        #[arg(long = "set", value_name = "TOKEN=VALUE")]
        overrides: Vec<String>,
    },

    /// Render page images for a job's current deck.
    Preview { job_id: String },

    /// Print the most recent audit events.
    Logs {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct Opts {
    /// Directory with template descriptors and PPTX documents.
    #[arg(long, global = true, env = "REPORTDECK_TEMPLATES_DIR", default_value = "data/templates")]
    templates_dir: PathBuf,

    /// Directory with tenant input JSON files.
    #[arg(long, global = true, env = "REPORTDECK_INPUTS_DIR", default_value = "data/inputs")]
    inputs_dir: PathBuf,

    /// Root for decks, job records, previews and the audit log.
    #[arg(short, long, global = true, env = "REPORTDECK_OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Directory of pre-recorded slidespecs (second content tier).
    #[arg(long, global = true, env = "REPORTDECK_RECORDED_DIR")]
    recorded_dir: Option<PathBuf>,

    /// Use the live LLM tier.
    #[arg(long, global = true, env = "ENABLE_LLM", default_value_t = true,
          action = ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
    enable_llm: bool,

    /// LLM model ID.
    #[arg(long, global = true, env = "REPORTDECK_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "REPORTDECK_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "REPORTDECK_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Concurrent generation batches.
    #[arg(short, long, global = true, env = "REPORTDECK_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Request-size ceiling per batch, in characters.
    #[arg(long, global = true, env = "REPORTDECK_MAX_BATCH_CHARS", default_value_t = 12_000)]
    max_batch_chars: usize,

    /// Attempts per batch on transient LLM failures.
    #[arg(long, global = true, env = "REPORTDECK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-request LLM timeout in seconds.
    #[arg(long, global = true, env = "REPORTDECK_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "REPORTDECK_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Absolute fact-check tolerance.
    #[arg(long, global = true, env = "REPORTDECK_ABS_TOLERANCE", default_value_t = 0.5)]
    abs_tolerance: f64,

    /// Relative fact-check tolerance.
    #[arg(long, global = true, env = "REPORTDECK_REL_TOLERANCE", default_value_t = 0.01)]
    rel_tolerance: f64,

    /// LibreOffice binary.
    #[arg(long, global = true, env = "REPORTDECK_SOFFICE", default_value = "soffice")]
    soffice: PathBuf,

    /// poppler pdftoppm binary.
    #[arg(long, global = true, env = "REPORTDECK_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    /// libpdfium shared library; system search when unset.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Wall-clock limit for each converter process, in seconds.
    #[arg(long, global = true, env = "REPORTDECK_CONVERTER_TIMEOUT", default_value_t = 90)]
    converter_timeout: u64,

    /// Preview DPI (48–300).
    #[arg(long, global = true, env = "REPORTDECK_DPI", default_value_t = 110,
          value_parser = clap::value_parser!(u32).range(48..=300))]
    dpi: u32,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "REPORTDECK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "REPORTDECK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "REPORTDECK_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during generation.
    let show_progress = !opts.quiet
        && !opts.no_progress
        && !opts.json
        && opts.enable_llm
        && matches!(cli.command, Command::Generate { .. } | Command::Rewrite { .. });
    let filter = if opts.verbose {
        "debug"
    } else if opts.quiet || show_progress {
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

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };
    let config = build_config(opts, progress).await?;

    // ── Logs need no service ─────────────────────────────────────────────
    if let Command::Logs { limit } = cli.command {
        let events = audit::read_recent(&config.audit_log_path(), limit)
            .await
            .with_context(|| format!("Failed to read {}", config.audit_log_path().display()))?;
        for event in events {
            println!(
                "{}",
                serde_json::to_string(&event).context("Failed to serialise audit event")?
            );
        }
        return Ok(());
    }

    let audit_sink = Arc::new(JsonlAuditSink::new(config.audit_log_path()));
    let catalog = Arc::new(DirectoryCatalog::new(&opts.templates_dir, &opts.inputs_dir));
    let service = ReportService::new(
        config,
        catalog,
        Arc::clone(&audit_sink) as Arc<dyn AuditSink>,
    );

    let outcome = run(&service, cli.command, opts).await;
    audit_sink.flush().await;
    outcome
}

async fn run(service: &ReportService, command: Command, opts: &Opts) -> Result<()> {
    match command {
        Command::Generate {
            input_id,
            template_id,
        } => {
            let report = service
                .generate(&input_id, &template_id)
                .await
                .with_context(|| format!("Generation failed for {input_id}:{template_id}"))?;
            print_report(&report, opts)
        }
        Command::Rewrite {
            job_id,
            slide_key,
            instruction,
            overrides,
        } => {
            let request = RewriteRequest {
                slide_key,
                instruction,
                overrides: parse_overrides(&overrides)?,
            };
            let report = service
                .rewrite(&job_id, request)
                .await
                .with_context(|| format!("Rewrite failed for {job_id}"))?;
            print_report(&report, opts)
        }
        Command::Preview { job_id } => {
            let outcome = service
                .preview(&job_id)
                .await
                .with_context(|| format!("Preview failed for {job_id}"))?;
            if opts.json {
                let json = serde_json::to_string_pretty(&outcome.artifact)
                    .context("Failed to serialise preview")?;
                println!("{json}");
                return Ok(());
            }
            for path in outcome.artifact.paths() {
                println!("{}", path.display());
            }
            if !opts.quiet {
                let what = match &outcome.artifact {
                    PreviewArtifact::Images(pages) => format!("{} page image(s)", pages.len()),
                    PreviewArtifact::Document(_) => "PDF only (rasterisation failed)".to_string(),
                };
                eprintln!(
                    "{}  {}{}",
                    if outcome.failures.is_empty() { green("✔") } else { yellow("⚠") },
                    what,
                    if outcome.cached { dim("  (cached)") } else { String::new() }
                );
                for failure in &outcome.failures {
                    eprintln!("   {} {}", dim("↳"), dim(failure));
                }
            }
            Ok(())
        }
        Command::Logs { .. } => Ok(()),
    }
}

fn print_report(report: &JobReport, opts: &Opts) -> Result<()> {
    if opts.json {
        let json = serde_json::to_string_pretty(report).context("Failed to serialise report")?;
        println!("{json}");
        return Ok(());
    }
    println!("{}", report.artifact_path.display());
    if opts.quiet {
        return Ok(());
    }
    eprintln!(
        "{}  {}  revision {}  →  {}",
        if report.warnings.is_empty() { green("✔") } else { yellow("⚠") },
        bold(&report.job_id),
        report.revision,
        bold(&report.artifact_path.display().to_string()),
    );
    for (slide, source) in &report.sources {
        eprintln!("   {} {:<24} {}", dim("·"), slide, dim(&source.to_string()));
    }
    for w in &report.warnings {
        eprintln!("   {} {}", yellow("!"), w);
    }
    Ok(())
}

/// Parse `TOKEN=VALUE` pairs. Values that parse as JSON keep their type.
fn parse_overrides(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (token, raw) = pair
            .split_once('=')
            .with_context(|| format!("Override '{pair}' is not TOKEN=VALUE"))?;
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("Override '{pair}' has an empty token");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(token.to_string(), value);
    }
    Ok(map)
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(opts: &Opts, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .output_dir(&opts.output_dir)
        .enable_generation(opts.enable_llm)
        .concurrency(opts.concurrency)
        .max_batch_chars(opts.max_batch_chars)
        .max_retries(opts.max_retries)
        .api_timeout_secs(opts.api_timeout)
        .temperature(opts.temperature)
        .absolute_tolerance(opts.abs_tolerance)
        .relative_tolerance(opts.rel_tolerance)
        .soffice_path(&opts.soffice)
        .pdftoppm_path(&opts.pdftoppm)
        .converter_timeout_secs(opts.converter_timeout)
        .preview_dpi(opts.dpi);

    if let Some(ref path) = opts.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref dir) = opts.recorded_dir {
        builder = builder.recorded_dir(dir);
    }
    if let Some(ref model) = opts.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = opts.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref lib) = opts.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
