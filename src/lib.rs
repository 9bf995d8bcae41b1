//! # pdf2md-formula
//!
//! Recover LaTeX for the formulas a PDF-to-Markdown extractor garbles.
//!
//! ## Why this crate?
//!
//! Rule-based PDF text extraction reads math glyph by glyph: `x² + y² = 1`
//! comes out as `_x_ [2] + _y_ [2] = 1`, and anything with fractions, radicals
//! or stacked operators is unreadable. This crate finds the formulas by the
//! fonts they are set in (Computer Modern math, AMS symbol fonts), crops them
//! out of the rendered page, asks a vision model for LaTeX in large numbered
//! batches, and patches the result back into the extracted Markdown.
//!
//! OCR is strictly an enhancement: without a credential, with no formulas,
//! or when anything inside the pass fails, the original Markdown comes back
//! unchanged (see [`PatchOutcome`]).
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + per-page Markdown
//!  │
//!  ├─ 1. Layout  per-character fonts and boxes via pdfium
//!  ├─ 2. Detect  runs of math-font text → formula regions
//!  ├─ 3. Merge   join adjacent fragments of one formula
//!  ├─ 4. Render  only pages with formulas, 300 DPI (spawn_blocking)
//!  ├─ 5. Crop    padded PNG per region
//!  ├─ 6. OCR     30 images per request, 10 requests in flight
//!  └─ 7. Patch   fuzzy-match raw glyphs in the Markdown → $…$ / $$…$$
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_formula::{patch_pdf, FormulaOcrConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FormulaOcrConfig::builder()
//!         .api_key(std::env::var("OPENROUTER_API_KEY")?)
//!         .build()?;
//!     let markdown = std::fs::read_to_string("paper.md")?;
//!     let pages = markdown.split('\u{c}').map(str::to_string).collect();
//!
//!     let outcome = patch_pdf("paper.pdf", Some(pages), config).await?;
//!     if let Some(stats) = outcome.stats() {
//!         eprintln!("patched {} of {} formulas", stats.patched, stats.regions);
//!     }
//!     println!("{}", outcome.markdown());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md-formula` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf2md-formula = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod formula;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{client_from_config, provider_from_name, OcrClient, OcrRequest, OpenRouterClient, ProviderClient};
pub use config::{DetectionConfig, FormulaOcrConfig, FormulaOcrConfigBuilder};
pub use convert::{patch_document, patch_pdf, write_atomic, FormulaPipeline};
pub use error::FormulaError;
pub use formula::FormulaRegion;
pub use layout::{BBox, PageLayout, RawSpan, TextLine, TextRun};
pub use output::{PatchOutcome, PatchStats, SkipReason};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{NoopProgressCallback, OcrProgressCallback, ProgressCallback};
