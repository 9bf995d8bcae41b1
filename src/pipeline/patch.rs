//! Markdown patching: replace garbled formula text with recognised LaTeX.
//!
//! ## Why fuzzy matching
//!
//! The upstream markdown extractor re-emits math glyphs with its own markup
//! interleaved: `x²` arrives as `_x_ [2]`, operators gain stray spaces, and
//! emphasis markers wrap single letters. An exact search for a region's raw
//! characters almost never hits. The search pattern therefore demands every
//! raw character in order, but tolerates up to six filler characters
//! (whitespace, `_`, `*`, `[`, `]`) between consecutive ones.
//!
//! Leading and trailing filler is limited to markup so a match never
//! swallows the spaces around the formula.
//!
//! ## Order
//!
//! Within a page, regions are applied longest raw text first. A short
//! sub-expression (`x2`) would otherwise match inside the span of the larger
//! formula containing it (`x2+y2=1`) and leave the larger one unmatchable.
//! Each replacement is applied to the current text before the next search,
//! so byte offsets are always fresh. Spans already replaced on a page are
//! tracked and skipped: LaTeX such as `n + 1` still fuzzy-matches the raw
//! text `n+1`, and a repeated formula must land on its own occurrence.

use crate::formula::FormulaRegion;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::debug;

const INNER_FILLER: &str = r"[\s_*\[\]]{0,6}";
const EDGE_FILLER: &str = r"[_*\[\]]{0,6}";

/// Counters describing one patch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchStats {
    /// Regions handed to the patcher.
    pub regions: usize,
    /// Regions carrying non-empty LaTeX.
    pub recognised: usize,
    /// Regions whose text was found and replaced.
    pub patched: usize,
    /// Recognised regions left in place because no match was found.
    pub unmatched: usize,
}

/// Build the fuzzy pattern for a region's raw characters.
///
/// Returns `None` for fewer than two characters: a single glyph matches far
/// too much body text to patch safely.
pub fn build_search_pattern(raw_chars: &str) -> Option<Regex> {
    let chars: Vec<char> = raw_chars.chars().collect();
    if chars.len() < 2 {
        return None;
    }

    let body = chars
        .iter()
        .map(|c| regex::escape(c.encode_utf8(&mut [0u8; 4])))
        .collect::<Vec<_>>()
        .join(INNER_FILLER);
    match Regex::new(&format!("{EDGE_FILLER}{body}{EDGE_FILLER}")) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("No search pattern for {} raw chars: {}", chars.len(), e);
            None
        }
    }
}

/// Patch every page, returning the new page texts and counters.
///
/// Never fails: regions that cannot be placed leave their page untouched.
pub fn patch_pages(pages: &[String], regions: &[FormulaRegion]) -> (Vec<String>, PatchStats) {
    let mut out: Vec<String> = pages.to_vec();
    let mut stats = PatchStats {
        regions: regions.len(),
        ..PatchStats::default()
    };

    let mut by_page: BTreeMap<usize, Vec<&FormulaRegion>> = BTreeMap::new();
    for region in regions.iter().filter(|r| r.has_latex()) {
        stats.recognised += 1;
        by_page.entry(region.page_index).or_default().push(region);
    }

    for (page_index, mut page_regions) in by_page {
        let Some(text) = out.get_mut(page_index) else {
            debug!("No markdown for page {}, {} regions unplaced", page_index + 1, page_regions.len());
            stats.unmatched += page_regions.len();
            continue;
        };

        // Stable: equal lengths keep reading order.
        page_regions.sort_by_key(|r| std::cmp::Reverse(r.char_count()));

        let mut replaced: Vec<Range<usize>> = Vec::new();
        for region in page_regions {
            if replace_first(text, region, &mut replaced) {
                stats.patched += 1;
            } else {
                debug!(
                    "Formula {:?} not found on page {}",
                    region.raw_chars,
                    page_index + 1
                );
                stats.unmatched += 1;
            }
        }
    }

    (out, stats)
}

/// Patch and join pages with a newline.
pub fn patch_markdown(pages: &[String], regions: &[FormulaRegion]) -> String {
    patch_pages(pages, regions).0.join("\n")
}

/// Replace the first match outside `replaced`, then record the new span.
fn replace_first(text: &mut String, region: &FormulaRegion, replaced: &mut Vec<Range<usize>>) -> bool {
    let Some(pattern) = build_search_pattern(&region.raw_chars) else {
        return false;
    };

    let mut from = 0;
    let found = loop {
        let Some(m) = pattern.find_at(text, from) else {
            return false;
        };
        if !replaced.iter().any(|r| m.start() < r.end && r.start < m.end()) {
            break m.range();
        }
        // Retry one character further on.
        from = m.start() + text[m.start()..].chars().next().map_or(1, char::len_utf8);
    };

    let latex = region.latex.trim();
    let replacement = if region.is_display {
        format!("$${latex}$$")
    } else {
        format!("${latex}$")
    };
    text.replace_range(found.clone(), &replacement);

    let (old_len, new_len) = (found.len(), replacement.len());
    for r in replaced.iter_mut().filter(|r| r.start >= found.end) {
        *r = r.start - old_len + new_len..r.end - old_len + new_len;
    }
    replaced.push(found.start..found.start + new_len);
    true
}
