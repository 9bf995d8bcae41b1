//! pdfium glue: page rasterisation and per-character text layout.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why per-character layout?
//!
//! The formula detector needs font names and script position, which pdfium
//! only exposes per character. Characters are regrouped here into lines and
//! same-font runs, so the rest of the pipeline sees the same [`PageLayout`]
//! shape whatever produced it.

use crate::error::FormulaError;
use crate::layout::{BBox, PageLayout, TextLine, TextRun, FLAG_SUPERSCRIPT};
use futures::future::BoxFuture;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A character smaller than this fraction of its line's dominant size is
/// treated as a superscript or subscript.
const SCRIPT_SIZE_RATIO: f32 = 0.85;

/// A character whose bottom edge moves more than this fraction of the line's
/// font size starts a new line.
const BASELINE_JUMP_RATIO: f32 = 0.5;

/// Something that can rasterise pages of the current document.
pub trait PageRenderer: Send + Sync {
    /// Render the given zero-based pages at `dpi`.
    ///
    /// Returns `(page_index, image)` pairs; pages that do not exist are
    /// skipped rather than reported.
    fn render_pages<'a>(
        &'a self,
        page_indices: &'a [usize],
        dpi: u32,
    ) -> BoxFuture<'a, Result<Vec<(usize, DynamicImage)>, FormulaError>>;
}

/// [`PageRenderer`] backed by a PDF file on disk.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    path: PathBuf,
    password: Option<String>,
}

impl PdfiumRenderer {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
        }
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render_pages<'a>(
        &'a self,
        page_indices: &'a [usize],
        dpi: u32,
    ) -> BoxFuture<'a, Result<Vec<(usize, DynamicImage)>, FormulaError>> {
        let path = self.path.clone();
        let password = self.password.clone();
        let indices = page_indices.to_vec();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                render_pages_blocking(&path, dpi, password.as_deref(), &indices)
            })
            .await
            .map_err(|e| FormulaError::Internal(format!("Render task panicked: {}", e)))?
        })
    }
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    pdf_path: &Path,
    dpi: u32,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, FormulaError> {
    let start = Instant::now();
    let pdfium = Pdfium::default();
    let document = open_document(&pdfium, pdf_path, password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let mut results = Vec::with_capacity(page_indices.len());
    for &idx in page_indices {
        if idx >= total_pages {
            warn!(
                "Skipping page {} (out of range, total={})",
                idx + 1,
                total_pages
            );
            continue;
        }

        let page = pages
            .get(idx as u16)
            .map_err(|e| FormulaError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            FormulaError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        results.push((idx, image));
    }

    info!(
        "Rendered {} pages at {} DPI in {}ms",
        results.len(),
        dpi,
        start.elapsed().as_millis()
    );
    Ok(results)
}

/// Extract the text layout of every page.
pub async fn extract_layouts(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<Vec<PageLayout>, FormulaError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_layouts_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| FormulaError::Internal(format!("Layout task panicked: {}", e)))?
}

fn extract_layouts_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<Vec<PageLayout>, FormulaError> {
    let pdfium = Pdfium::default();
    let document = open_document(&pdfium, pdf_path, password)?;

    let mut layouts = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let text = page.text().map_err(|e| FormulaError::LayoutFailed {
            page: idx + 1,
            detail: format!("{:?}", e),
        })?;
        let page_height = page.height().value;

        let glyphs: Vec<Glyph> = text
            .chars()
            .iter()
            .filter_map(|c| {
                let ch = c.unicode_char()?;
                let bbox = c.loose_bounds().ok().map(|r| {
                    BBox::new(
                        r.left().value,
                        page_height - r.top().value,
                        r.right().value,
                        page_height - r.bottom().value,
                    )
                });
                Some(Glyph {
                    ch,
                    font_name: strip_subset_tag(&c.font_name()).to_string(),
                    size: c.scaled_font_size().value,
                    bbox,
                })
            })
            .collect();

        let lines = group_glyphs(glyphs);
        debug!("Page {}: {} text lines", idx + 1, lines.len());
        layouts.push(PageLayout::new(idx, page.width().value, page_height, lines));
    }

    info!("Extracted layout for {} pages", layouts.len());
    Ok(layouts)
}

/// Plain text of every page, for callers without a markdown rendition.
pub async fn extract_page_text(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<Vec<String>, FormulaError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || {
        let pdfium = Pdfium::default();
        let document = open_document(&pdfium, &path, pwd.as_deref())?;
        let texts: Result<Vec<String>, FormulaError> = document
            .pages()
            .iter()
            .enumerate()
            .map(|(idx, page)| {
                page.text()
                    .map(|t| t.all())
                    .map_err(|e| FormulaError::LayoutFailed {
                        page: idx + 1,
                        detail: format!("{:?}", e),
                    })
            })
            .collect();
        texts
    })
    .await
    .map_err(|e| FormulaError::Internal(format!("Text task panicked: {}", e)))?
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, FormulaError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                FormulaError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                FormulaError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            FormulaError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

// ── Character grouping ───────────────────────────────────────────────────

/// One character as read from the PDF, top-left coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub font_name: String,
    pub size: f32,
    /// `None` for characters pdfium synthesised (spaces, line breaks).
    pub bbox: Option<BBox>,
}

/// Drop a six-letter subset prefix: `ABCDEF+CMMI10` → `CMMI10`.
pub fn strip_subset_tag(font_name: &str) -> &str {
    match font_name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => rest,
        _ => font_name,
    }
}

/// Group characters in content order into lines of same-font runs.
///
/// A line ends at an explicit line break or when a character's bottom edge
/// moves by more than half the line's font size. Within a line, a run ends
/// when the font or the script flag changes; whitespace joins the current run.
pub fn group_glyphs(glyphs: Vec<Glyph>) -> Vec<TextLine> {
    let mut lines = Vec::new();
    let mut current: Vec<Glyph> = Vec::new();
    let mut anchor: Option<(f32, f32)> = None;

    for glyph in glyphs {
        if glyph.ch == '\n' || glyph.ch == '\r' {
            flush_line(&mut current, &mut lines);
            anchor = None;
            continue;
        }
        if glyph.ch.is_whitespace() {
            current.push(glyph);
            continue;
        }
        if let (Some(bbox), Some((base, size))) = (glyph.bbox, anchor) {
            if (bbox.y1 - base).abs() > size * BASELINE_JUMP_RATIO {
                flush_line(&mut current, &mut lines);
                anchor = None;
            }
        }
        if anchor.is_none() {
            anchor = glyph.bbox.map(|b| (b.y1, glyph.size));
        }
        current.push(glyph);
    }
    flush_line(&mut current, &mut lines);
    lines
}

fn flush_line(glyphs: &mut Vec<Glyph>, lines: &mut Vec<TextLine>) {
    let line = build_runs(std::mem::take(glyphs));
    if !line.runs.is_empty() {
        lines.push(line);
    }
}

fn build_runs(glyphs: Vec<Glyph>) -> TextLine {
    let dominant = dominant_size(&glyphs);
    let mut runs = Vec::new();
    let mut pending: Option<(String, String, u32, Option<BBox>)> = None;

    for glyph in glyphs {
        if glyph.ch.is_whitespace() {
            if let Some((ref mut text, ..)) = pending {
                text.push(glyph.ch);
            }
            continue;
        }

        let flags = if dominant > 0.0 && glyph.size < dominant * SCRIPT_SIZE_RATIO {
            FLAG_SUPERSCRIPT
        } else {
            0
        };
        let continues = matches!(&pending, Some((_, font, f, _)) if *font == glyph.font_name && *f == flags);
        if !continues {
            if let Some(run) = pending.take().and_then(finish_run) {
                runs.push(run);
            }
            pending = Some((String::new(), glyph.font_name.clone(), flags, None));
        }
        if let Some((ref mut text, _, _, ref mut bbox)) = pending {
            text.push(glyph.ch);
            if let Some(b) = glyph.bbox {
                *bbox = Some(bbox.map_or(b, |acc| acc.union(&b)));
            }
        }
    }
    if let Some(run) = pending.and_then(finish_run) {
        runs.push(run);
    }
    TextLine::new(runs)
}

fn finish_run((text, font, flags, bbox): (String, String, u32, Option<BBox>)) -> Option<TextRun> {
    match bbox {
        Some(bbox) => Some(TextRun::new(text, font, flags, bbox)),
        None => {
            debug!("Dropping run {:?} without geometry", text);
            None
        }
    }
}

/// Most common non-whitespace size on the line, in half-point buckets.
fn dominant_size(glyphs: &[Glyph]) -> f32 {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for g in glyphs.iter().filter(|g| !g.ch.is_whitespace() && g.size > 0.0) {
        *counts.entry((g.size * 2.0).round() as i32).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(bucket, count)| (count, bucket))
        .map(|(bucket, _)| bucket as f32 / 2.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(ch: char, font: &str, size: f32, x: f32, bottom: f32) -> Glyph {
        Glyph {
            ch,
            font_name: font.to_string(),
            size,
            bbox: Some(BBox::new(x, bottom - size, x + size * 0.5, bottom)),
        }
    }

    fn space() -> Glyph {
        Glyph {
            ch: ' ',
            font_name: String::new(),
            size: 0.0,
            bbox: None,
        }
    }

    fn word(text: &str, font: &str, size: f32, x: f32, bottom: f32) -> Vec<Glyph> {
        text.chars()
            .enumerate()
            .map(|(i, c)| glyph(c, font, size, x + i as f32 * 5.0, bottom))
            .collect()
    }

    #[test]
    fn subset_tag_is_stripped() {
        assert_eq!(strip_subset_tag("ABCDEF+CMMI10"), "CMMI10");
        assert_eq!(strip_subset_tag("CMMI10"), "CMMI10");
        assert_eq!(strip_subset_tag("abcdef+CMMI10"), "abcdef+CMMI10");
        assert_eq!(strip_subset_tag("AB+CMMI10"), "AB+CMMI10");
    }

    #[test]
    fn runs_split_on_font_change() {
        let mut glyphs = word("let", "SFRM1000", 10.0, 0.0, 100.0);
        glyphs.push(space());
        glyphs.extend(word("xy", "CMMI10", 10.0, 20.0, 100.0));
        let lines = group_glyphs(glyphs);

        assert_eq!(lines.len(), 1);
        let runs = &lines[0].runs;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "let ");
        assert_eq!(runs[0].font_name, "SFRM1000");
        assert_eq!(runs[1].text, "xy");
        assert_eq!(runs[1].bbox.x0, 20.0);
    }

    #[test]
    fn small_raised_glyph_is_flagged_script() {
        let glyphs = vec![
            glyph('x', "CMMI10", 10.0, 0.0, 100.0),
            glyph('2', "CMR7", 7.0, 6.0, 97.0),
            glyph('+', "CMR10", 10.0, 12.0, 100.0),
        ];
        let lines = group_glyphs(glyphs);

        assert_eq!(lines.len(), 1);
        let runs = &lines[0].runs;
        assert_eq!(runs.len(), 3);
        assert!(!runs[0].is_superscript());
        assert!(runs[1].is_superscript());
        assert!(!runs[2].is_superscript());
    }

    #[test]
    fn explicit_break_and_baseline_jump_start_new_lines() {
        let mut glyphs = word("ab", "SFRM1000", 10.0, 0.0, 100.0);
        glyphs.push(Glyph {
            ch: '\n',
            ..space()
        });
        glyphs.extend(word("cd", "SFRM1000", 10.0, 0.0, 114.0));
        glyphs.extend(word("ef", "SFRM1000", 10.0, 20.0, 128.0));
        let lines = group_glyphs(glyphs);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].runs[0].text, "cd");
        assert_eq!(lines[2].runs[0].text, "ef");
    }

    #[test]
    fn whitespace_only_input_has_no_lines() {
        assert!(group_glyphs(vec![space(), space()]).is_empty());
        assert!(group_glyphs(Vec::new()).is_empty());
    }

    #[test]
    fn dominant_size_prefers_most_common() {
        let glyphs = vec![
            glyph('a', "F", 10.0, 0.0, 10.0),
            glyph('b', "F", 10.0, 5.0, 10.0),
            glyph('c', "F", 7.0, 10.0, 10.0),
        ];
        assert_eq!(dominant_size(&glyphs), 10.0);
    }
}
