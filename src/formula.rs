//! The formula region: one detected (possibly merged) formula occurrence.

use crate::layout::{BBox, TextRun};
use serde::{Deserialize, Serialize};

/// A candidate formula on one page.
///
/// Created by the detector, possibly replaced by a merged region, given its
/// `latex` by the OCR dispatcher and read by the patcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaRegion {
    /// Zero-based page ordinal. Regions never span pages.
    pub page_index: usize,
    /// Union of the content runs' boxes, in page points.
    pub bbox: BBox,
    /// Displayed formula (own line) rather than inline.
    pub is_display: bool,
    /// Math-font runs that produced the region, in reading order.
    pub source_runs: Vec<TextRun>,
    /// Non-whitespace characters of `source_runs`; the fuzzy-match anchor.
    pub raw_chars: String,
    /// Recognised LaTeX; empty until OCR succeeds.
    #[serde(default)]
    pub latex: String,
}

impl FormulaRegion {
    /// Build a region from its runs; `raw_chars` is derived, `latex` empty.
    pub fn new(page_index: usize, bbox: BBox, is_display: bool, source_runs: Vec<TextRun>) -> Self {
        let raw_chars = extract_raw_chars(&source_runs);
        Self {
            page_index,
            bbox,
            is_display,
            source_runs,
            raw_chars,
            latex: String::new(),
        }
    }

    /// Number of characters (not bytes) in `raw_chars`.
    pub fn char_count(&self) -> usize {
        self.raw_chars.chars().count()
    }

    pub fn has_latex(&self) -> bool {
        !self.latex.trim().is_empty()
    }
}

/// Concatenate every non-whitespace character of `runs`, preserving order.
pub fn extract_raw_chars(runs: &[TextRun]) -> String {
    runs.iter()
        .flat_map(|run| run.text.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> TextRun {
        TextRun::new(text, "CMMI10", 0, BBox::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn raw_chars_strip_whitespace_across_runs() {
        assert_eq!(extract_raw_chars(&[run("x "), run("+ y")]), "x+y");
        assert_eq!(extract_raw_chars(&[run("x + y")]), "x+y");
    }

    #[test]
    fn raw_chars_of_blank_input() {
        assert_eq!(extract_raw_chars(&[run("   ")]), "");
        assert_eq!(extract_raw_chars(&[]), "");
    }

    #[test]
    fn new_region_derives_raw_chars() {
        let region = FormulaRegion::new(
            2,
            BBox::new(0.0, 0.0, 10.0, 10.0),
            false,
            vec![run("α "), run("≤ β")],
        );
        assert_eq!(region.raw_chars, "α≤β");
        assert_eq!(region.char_count(), 3);
        assert!(!region.has_latex());
    }
}
