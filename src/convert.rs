//! Document-level entry points: detect → render → OCR → patch.
//!
//! ## Why nothing escapes
//!
//! Formula recovery sits on top of markdown that is already good enough to
//! ship. [`FormulaPipeline::patch`] therefore never returns an error: a
//! missing credential or a formula-free document short-circuits to
//! [`PatchOutcome::Unchanged`], and any failure (or panic) in rendering, OCR
//! or patching becomes [`PatchOutcome::Degraded`] carrying the original
//! pages. So does a pass that outlives `conversion_timeout_secs`. Only [`patch_pdf`], which also has to open the PDF, can fail, and
//! only before the pipeline starts.
//!
//! ## Why a pipeline value?
//!
//! The OCR client is built from the config the first time a document
//! actually needs it and reused afterwards. Holding it in
//! [`FormulaPipeline`] keeps that "build once" handle explicit and owned by
//! the caller instead of living in a global.

use crate::client::{client_from_config, OcrClient};
use crate::config::FormulaOcrConfig;
use crate::error::FormulaError;
use crate::formula::FormulaRegion;
use crate::layout::PageLayout;
use crate::output::{PatchOutcome, PatchStats, SkipReason};
use crate::pipeline::detect::detect_document_regions;
use crate::pipeline::ocr::ocr_formulas;
use crate::pipeline::patch::patch_pages;
use crate::pipeline::input;
use crate::pipeline::render::{self, PageRenderer, PdfiumRenderer};
use futures::FutureExt;
use once_cell::sync::OnceCell;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Formula OCR pipeline bound to one configuration.
pub struct FormulaPipeline {
    config: FormulaOcrConfig,
    client: OnceCell<Arc<dyn OcrClient>>,
}

impl std::fmt::Debug for FormulaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaPipeline")
            .field("config", &self.config)
            .field("client_ready", &self.client.get().is_some())
            .finish()
    }
}

impl FormulaPipeline {
    pub fn new(config: FormulaOcrConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    /// Use `client` instead of building one from the config.
    pub fn with_client(config: FormulaOcrConfig, client: Arc<dyn OcrClient>) -> Self {
        Self {
            config,
            client: OnceCell::with_value(client),
        }
    }

    pub fn config(&self) -> &FormulaOcrConfig {
        &self.config
    }

    /// Detect and merge formula regions without rendering or OCR.
    pub fn detect(&self, layouts: &[PageLayout]) -> Vec<FormulaRegion> {
        detect_document_regions(layouts, &self.config.detection)
    }

    /// Patch per-page markdown with LaTeX recovered from the PDF.
    ///
    /// `layouts` and `markdowns` are indexed by page. The returned outcome
    /// always carries a full set of pages.
    pub async fn patch(
        &self,
        layouts: &[PageLayout],
        renderer: &dyn PageRenderer,
        markdowns: Vec<String>,
    ) -> PatchOutcome {
        if !self.config.has_credential() {
            info!("No OCR credential configured, leaving formulas as extracted");
            return PatchOutcome::Unchanged {
                pages: markdowns,
                reason: SkipReason::NoCredential,
            };
        }

        let start = Instant::now();
        let limit = Duration::from_secs(self.config.conversion_timeout_secs);
        let attempt = tokio::time::timeout(
            limit,
            AssertUnwindSafe(self.run(layouts, renderer, &markdowns)).catch_unwind(),
        )
        .await;

        let attempt = match attempt {
            Ok(attempt) => attempt,
            Err(_) => {
                let error = format!("timed out after {}s", limit.as_secs());
                warn!("Formula OCR {}, returning original markdown", error);
                return PatchOutcome::Degraded {
                    pages: markdowns,
                    error,
                };
            }
        };

        match attempt {
            Ok(Ok(Some((pages, stats)))) => {
                info!(
                    "Patched {}/{} formulas ({} recognised) in {}ms",
                    stats.patched,
                    stats.regions,
                    stats.recognised,
                    start.elapsed().as_millis()
                );
                PatchOutcome::Patched { pages, stats }
            }
            Ok(Ok(None)) => {
                info!("No formulas detected, skipping OCR");
                PatchOutcome::Unchanged {
                    pages: markdowns,
                    reason: SkipReason::NoFormulas,
                }
            }
            Ok(Err(e)) => {
                warn!("Formula OCR failed, returning original markdown: {}", e);
                PatchOutcome::Degraded {
                    pages: markdowns,
                    error: e.to_string(),
                }
            }
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                warn!("Formula OCR panicked, returning original markdown: {}", error);
                PatchOutcome::Degraded {
                    pages: markdowns,
                    error,
                }
            }
        }
    }

    /// `Ok(None)` when the document has no formulas.
    async fn run(
        &self,
        layouts: &[PageLayout],
        renderer: &dyn PageRenderer,
        markdowns: &[String],
    ) -> Result<Option<(Vec<String>, PatchStats)>, FormulaError> {
        let regions = self.detect(layouts);
        if regions.is_empty() {
            return Ok(None);
        }
        let client = self
            .client
            .get_or_try_init(|| client_from_config(&self.config))?;

        let pages: Vec<usize> = regions
            .iter()
            .map(|r| r.page_index)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        info!(
            "{} formula regions on {} of {} pages",
            regions.len(),
            pages.len(),
            layouts.len()
        );

        let rendered = renderer.render_pages(&pages, self.config.render_dpi).await?;
        debug!("Renderer returned {} of {} pages", rendered.len(), pages.len());
        let page_images: HashMap<usize, _> = rendered.into_iter().collect();

        let regions = ocr_formulas(regions, &page_images, &self.config, &**client).await;
        Ok(Some(patch_pages(markdowns, &regions)))
    }

    /// Open a PDF (path or URL), extract its layout and patch `markdowns`.
    ///
    /// Without `markdowns`, pdfium's plain page text is patched instead.
    pub async fn patch_pdf(
        &self,
        input_str: &str,
        markdowns: Option<Vec<String>>,
    ) -> Result<PatchOutcome, FormulaError> {
        let resolved = input::resolve_input(
            input_str,
            self.config.download_timeout_secs,
            self.config.max_download_bytes,
        )
        .await?;
        let pdf_path = resolved.path();
        let password = self.config.password.as_deref();

        let layouts = render::extract_layouts(pdf_path, password).await?;
        let markdowns = match markdowns {
            Some(pages) => {
                if pages.len() != layouts.len() {
                    warn!(
                        "Markdown has {} pages but the PDF has {}; unmatched pages are left alone",
                        pages.len(),
                        layouts.len()
                    );
                }
                pages
            }
            None => render::extract_page_text(pdf_path, password).await?,
        };

        let renderer = PdfiumRenderer::new(pdf_path, self.config.password.clone());
        Ok(self.patch(&layouts, &renderer, markdowns).await)
    }
}

/// Single-call form of [`FormulaPipeline::patch`].
pub async fn patch_document(
    layouts: &[PageLayout],
    renderer: &dyn PageRenderer,
    markdowns: Vec<String>,
    config: FormulaOcrConfig,
) -> PatchOutcome {
    FormulaPipeline::new(config)
        .patch(layouts, renderer, markdowns)
        .await
}

/// Single-call form of [`FormulaPipeline::patch_pdf`].
pub async fn patch_pdf(
    input_str: impl AsRef<str>,
    markdowns: Option<Vec<String>>,
    config: FormulaOcrConfig,
) -> Result<PatchOutcome, FormulaError> {
    FormulaPipeline::new(config)
        .patch_pdf(input_str.as_ref(), markdowns)
        .await
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub async fn write_atomic(path: impl AsRef<Path>, contents: &str) -> Result<(), FormulaError> {
    let path = path.as_ref();
    let write_failed = |e: std::io::Error| FormulaError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let caught = std::panic::catch_unwind(|| panic!("bad page")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "panic: bad page");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "panic with non-string payload");
    }

    #[tokio::test]
    async fn write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("doc.md");

        write_atomic(&out, "first").await.unwrap();
        write_atomic(&out, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "second");
        assert!(!out.with_extension("md.tmp").exists());
    }

    #[test]
    fn pipeline_debug_hides_client() {
        let pipeline = FormulaPipeline::new(FormulaOcrConfig::default());
        let dbg = format!("{pipeline:?}");
        assert!(dbg.contains("client_ready: false"));
    }
}
