//! CLI binary for pdf2md-formula.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `FormulaOcrConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use pdf2md_formula::pipeline::{input, render};
use pdf2md_formula::{
    provider_from_name, write_atomic, FormulaOcrConfig, FormulaPipeline, OcrProgressCallback,
    PatchOutcome, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Page break character separating pages in the markdown input.
const PAGE_BREAK: char = '\u{c}';

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over OCR batches, one log line per
/// batch. Batches finish out of order, so the line carries the batch number.
struct CliProgressCallback {
    bar: ProgressBar,
    recognised: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading PDF layout…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            recognised: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total_batches: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_batches as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    /// Clear the spinner when OCR never started (no formulas, no key).
    fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl OcrProgressCallback for CliProgressCallback {
    fn on_ocr_start(&self, total_regions: usize, total_batches: usize) {
        self.activate_bar(total_batches);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Recognising {total_regions} formulas in {total_batches} batches…"
            ))
        ));
    }

    fn on_batch_complete(&self, batch: usize, total: usize, recognised: usize) {
        self.recognised.fetch_add(recognised, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            green("✓"),
            batch,
            total,
            dim(&format!("{recognised:>3} formulas")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, batch: usize, total: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            let mut short: String = error.chars().take(79).collect();
            short.push('\u{2026}');
            short
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            red("✗"),
            batch,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_ocr_complete(&self, total_batches: usize, failed_batches: usize) {
        self.bar.finish_and_clear();
        let recognised = self.recognised.load(Ordering::SeqCst);
        if failed_batches == 0 {
            eprintln!(
                "{} {} formulas recognised",
                green("✔"),
                bold(&recognised.to_string())
            );
        } else {
            eprintln!(
                "{} {} formulas recognised  ({}/{} batches failed)",
                if failed_batches == total_batches {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&recognised.to_string()),
                red(&failed_batches.to_string()),
                total_batches,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Patch an extractor's markdown (pages separated by form feeds)
  pdf2md-formula paper.pdf --markdown paper.md -o paper.latex.md

  # No markdown: patch pdfium's own page text
  pdf2md-formula paper.pdf

  # Smaller batches, fewer parallel requests
  pdf2md-formula --batch-size 10 --max-workers 4 paper.pdf --markdown paper.md

  # Use an edgequake-llm provider instead of OpenRouter
  pdf2md-formula --provider openai --model gpt-4.1-mini paper.pdf --markdown paper.md

  # Show what would be sent to OCR (no API key needed)
  pdf2md-formula --regions-only paper.pdf > regions.json

  # From a URL
  pdf2md-formula https://arxiv.org/pdf/1706.03762 -o attention.md

HOW IT WORKS:
  Text set in math fonts (CMMI, CMSY, CMEX, CMR, CMSS, MSBM, EUFM, MSAM) is
  grouped into formula regions, cropped from pages rendered at 300 DPI and sent
  to a vision model 30 images per request. Recognised LaTeX replaces the
  garbled text in the markdown as $…$ (inline) or $$…$$ (display).

  Without a credential, or when OCR fails, the markdown is written unchanged.

ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY      OpenRouter API key (enables OCR)
  PDF2MD_OCR_MODEL        Vision model (default google/gemini-2.5-flash)
  PDF2MD_OCR_ENDPOINT     OpenAI-compatible chat-completions URL
  PDF2MD_OCR_PROVIDER     edgequake-llm provider (openai, anthropic, gemini, ollama)
  PDF2MD_BATCH_SIZE       Images per OCR request (default 30)
  PDF2MD_MAX_WORKERS      Concurrent OCR requests (default 10)
  PDF2MD_TIMEOUT          Limit for render + OCR + patch in seconds (default 300)

SETUP:
  libpdfium must be in the working directory or on the system library path.
"#;

/// Recover LaTeX for math-font formulas in PDF-extracted Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-formula",
    version,
    about = "Recover LaTeX for math-font formulas in PDF-extracted Markdown",
    long_about = "Detect formulas in a PDF by their fonts, transcribe them with a vision model in \
numbered batches, and patch the LaTeX into the Markdown extracted from the same PDF. Works with \
OpenRouter or any OpenAI-compatible endpoint, or any edgequake-llm vision provider.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Per-page Markdown to patch, pages separated by form feeds.
    #[arg(short, long, env = "PDF2MD_MARKDOWN")]
    markdown: Option<PathBuf>,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// API key for the OCR endpoint.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Vision model ID.
    #[arg(long, env = "PDF2MD_OCR_MODEL", default_value = pdf2md_formula::config::DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible chat-completions URL.
    #[arg(long, env = "PDF2MD_OCR_ENDPOINT", default_value = pdf2md_formula::config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// edgequake-llm provider (openai, anthropic, gemini, ollama, …) used
    /// instead of the HTTP endpoint.
    #[arg(long, env = "PDF2MD_OCR_PROVIDER")]
    provider: Option<String>,

    /// Formula images per OCR request.
    #[arg(long, env = "PDF2MD_BATCH_SIZE", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..=200))]
    batch_size: u64,

    /// Concurrent OCR requests.
    #[arg(long, env = "PDF2MD_MAX_WORKERS", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..=64))]
    max_workers: u64,

    /// Page render DPI for cropping (72–600).
    #[arg(long, env = "PDF2MD_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    password: Option<String>,

    /// Print detected formula regions as JSON and exit (no OCR).
    #[arg(long)]
    regions_only: bool,

    /// Output the full outcome as JSON instead of Markdown.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-batch OCR timeout in seconds.
    #[arg(long, env = "PDF2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Overall limit for render, OCR and patch in seconds; past it the
    /// markdown is returned unchanged.
    #[arg(long, env = "PDF2MD_TIMEOUT", default_value_t = 300,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.regions_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    let started = Instant::now();
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|cb| cb as ProgressCallback))?;
    let pipeline = FormulaPipeline::new(config);

    // ── Regions-only mode ────────────────────────────────────────────────
    if cli.regions_only {
        let cfg = pipeline.config();
        let resolved =
            input::resolve_input(&cli.input, cfg.download_timeout_secs, cfg.max_download_bytes)
                .await
                .context("Failed to open input")?;
        let layouts = render::extract_layouts(resolved.path(), cfg.password.as_deref())
            .await
            .context("Failed to read PDF layout")?;
        let regions = pipeline.detect(&layouts);
        let json = serde_json::to_string_pretty(&regions).context("Failed to serialise regions")?;
        emit(&cli, &json).await?;
        if !cli.quiet {
            eprintln!("{} formula regions on {} pages", regions.len(), layouts.len());
        }
        return Ok(());
    }

    // ── Patch ────────────────────────────────────────────────────────────
    let markdowns = match cli.markdown {
        Some(ref path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read markdown from {:?}", path))?;
            Some(split_pages(&text))
        }
        None => None,
    };
    let rejoin = page_separator(markdowns.is_some());

    let outcome = pipeline
        .patch_pdf(&cli.input, markdowns)
        .await
        .context("Formula OCR failed")?;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise output")?;
        emit(&cli, &json).await?;
    } else {
        emit(&cli, &outcome.pages().join(rejoin)).await?;
    }

    if !cli.quiet {
        print_summary(&outcome, started.elapsed());
    }
    Ok(())
}

fn split_pages(markdown: &str) -> Vec<String> {
    markdown.split(PAGE_BREAK).map(str::to_string).collect()
}

/// Supplied markdown keeps its form-feed page breaks; pdfium text is joined
/// with newlines.
fn page_separator(markdown_supplied: bool) -> &'static str {
    if markdown_supplied {
        "\u{c}"
    } else {
        "\n"
    }
}

/// Map CLI args to `FormulaOcrConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<FormulaOcrConfig> {
    let mut builder = FormulaOcrConfig::builder()
        .model(cli.model.as_str())
        .endpoint(cli.endpoint.as_str())
        .batch_size(cli.batch_size as usize)
        .max_workers(cli.max_workers as usize)
        .render_dpi(cli.dpi)
        .api_timeout_secs(cli.api_timeout)
        .conversion_timeout_secs(cli.timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.as_str());
    }
    if let Some(ref name) = cli.provider {
        let provider = provider_from_name(name, &cli.model).context("Failed to create provider")?;
        builder = builder.provider(provider);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Write `text` to `--output` (atomically) or stdout.
async fn emit(cli: &Cli, text: &str) -> Result<()> {
    if let Some(ref path) = cli.output {
        write_atomic(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        return Ok(());
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(text.as_bytes())
        .context("Failed to write to stdout")?;
    if !text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

fn print_summary(outcome: &PatchOutcome, elapsed: Duration) {
    let ms = elapsed.as_millis();
    match outcome {
        PatchOutcome::Patched { stats, .. } => eprintln!(
            "{}  {}/{} formulas patched  {}  {}ms",
            if stats.unmatched == 0 { green("✔") } else { cyan("⚠") },
            bold(&stats.patched.to_string()),
            stats.regions,
            dim(&format!(
                "({} recognised, {} not found in markdown)",
                stats.recognised, stats.unmatched
            )),
            ms,
        ),
        PatchOutcome::Unchanged { reason, .. } => {
            eprintln!("{}  markdown unchanged: {}  {}ms", dim("–"), reason, ms)
        }
        PatchOutcome::Degraded { error, .. } => eprintln!(
            "{}  markdown unchanged, formula OCR failed: {}",
            red("✘"),
            red(error)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("pdf2md-formula").chain(args.iter().copied()))
    }

    #[test]
    fn form_feed_pages_round_trip() {
        let md = "# Page one\n_x_ [2]\u{c}Page two\u{c}";
        let pages = split_pages(md);
        assert_eq!(pages, ["# Page one\n_x_ [2]", "Page two", ""]);
        assert_eq!(pages.join(page_separator(true)), md);
    }

    #[test]
    fn markdown_without_breaks_is_one_page() {
        assert_eq!(split_pages("just text\n"), ["just text\n"]);
    }

    #[test]
    fn pdfium_text_pages_join_with_newlines() {
        let pages = ["one".to_string(), "two".to_string()];
        assert_eq!(pages.join(page_separator(false)), "one\ntwo");
    }

    #[test]
    fn flag_ranges_are_enforced() {
        assert!(parse(&["a.pdf", "--dpi", "71"]).is_err());
        assert!(parse(&["a.pdf", "--dpi", "601"]).is_err());
        assert!(parse(&["a.pdf", "--batch-size", "0"]).is_err());
        assert!(parse(&["a.pdf", "--max-workers", "65"]).is_err());
        assert!(parse(&["a.pdf", "--timeout", "0"]).is_err());

        let cli = parse(&["a.pdf", "--dpi", "150", "--batch-size", "200", "--timeout", "30"]).unwrap();
        assert_eq!(cli.dpi, 150);
        assert_eq!(cli.batch_size, 200);
        assert_eq!(cli.timeout, 30);
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = parse(&["a.pdf", "--api-key", "sk-test", "--max-workers", "3", "--timeout", "45"]).unwrap();
        let config = build_config(&cli, None).unwrap();
        assert!(config.has_credential());
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.conversion_timeout_secs, 45);
    }
}
