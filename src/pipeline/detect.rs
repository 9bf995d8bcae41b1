//! Region detection: group consecutive math-font runs into formula regions.
//!
//! Each line is scanned left to right. Math-font runs accumulate into a
//! working group; a body-text run (or the end of the line) closes the group
//! and turns it into a candidate. Candidates that look like a lone variable
//! (`x`, `p`) are dropped: they cost an OCR slot and the extractor already
//! renders them correctly.

use crate::config::DetectionConfig;
use crate::formula::{extract_raw_chars, FormulaRegion};
use crate::layout::{PageLayout, TextLine, TextRun};
use crate::pipeline::fonts::is_math_font;
use crate::pipeline::merge::merge_adjacent_regions;
use std::collections::HashSet;
use tracing::debug;

/// Detect formula regions on one page, in reading order, before merging.
pub fn detect_page_regions(page: &PageLayout, config: &DetectionConfig) -> Vec<FormulaRegion> {
    let mut regions = Vec::new();

    for line in &page.lines {
        let mut group: Vec<&TextRun> = Vec::new();

        for run in &line.runs {
            if is_math_font(&run.font_name) {
                group.push(run);
            } else if !group.is_empty() {
                regions.extend(build_region(page, line, &group, config));
                group.clear();
            }
        }

        if !group.is_empty() {
            regions.extend(build_region(page, line, &group, config));
        }
    }

    debug!(
        "Page {}: {} candidate formula regions",
        page.page_index + 1,
        regions.len()
    );
    regions
}

/// Detect every page, then merge adjacent fragments across the whole list.
pub fn detect_document_regions(pages: &[PageLayout], config: &DetectionConfig) -> Vec<FormulaRegion> {
    let regions: Vec<FormulaRegion> = pages
        .iter()
        .flat_map(|page| detect_page_regions(page, config))
        .collect();
    merge_adjacent_regions(regions, config)
}

/// Superscript/subscript runs or a change of font inside the group.
pub fn has_math_structure(runs: &[&TextRun]) -> bool {
    let has_script = runs.iter().any(|r| r.is_superscript());
    let fonts: HashSet<&str> = runs.iter().map(|r| r.font_name.as_str()).collect();
    has_script || fonts.len() > 1
}

/// Turn a group of math runs into a region, or `None` if it is too trivial.
fn build_region(
    page: &PageLayout,
    line: &TextLine,
    group: &[&TextRun],
    config: &DetectionConfig,
) -> Option<FormulaRegion> {
    let runs: Vec<TextRun> = group.iter().map(|r| (*r).clone()).collect();
    let raw_chars = extract_raw_chars(&runs);
    let char_count = raw_chars.chars().count();

    if char_count < config.min_formula_chars
        && (char_count < config.min_structured_chars || !has_math_structure(group))
    {
        return None;
    }

    // Whitespace-only runs at either end reach into neighbouring body text;
    // keep them out of the box so the crop stays on the formula.
    let start = group.iter().position(|r| !r.is_blank());
    let end = group.iter().rposition(|r| !r.is_blank());
    let content = match (start, end) {
        (Some(s), Some(e)) => &group[s..=e],
        _ => group,
    };
    let bbox = content
        .iter()
        .skip(1)
        .fold(content[0].bbox, |acc, r| acc.union(&r.bbox));

    let body_chars: usize = line
        .runs
        .iter()
        .filter(|r| !is_math_font(&r.font_name))
        .map(|r| r.text.trim().chars().count())
        .sum();
    let width_ratio = if page.width > 0.0 {
        bbox.width() / page.width
    } else {
        0.0
    };
    let is_display =
        width_ratio > config.display_width_ratio && body_chars < config.display_max_body_chars;

    Some(FormulaRegion {
        page_index: page.page_index,
        bbox,
        is_display,
        source_runs: runs,
        raw_chars,
        latex: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BBox, FLAG_SUPERSCRIPT};

    const PAGE_WIDTH: f32 = 600.0;

    fn math(text: &str, x0: f32, x1: f32) -> TextRun {
        TextRun::new(text, "CMMI10", 0, BBox::new(x0, 100.0, x1, 110.0))
    }

    fn body(text: &str, x0: f32, x1: f32) -> TextRun {
        TextRun::new(text, "SFRM1000", 0, BBox::new(x0, 100.0, x1, 110.0))
    }

    fn page(lines: Vec<Vec<TextRun>>) -> PageLayout {
        PageLayout::new(
            0,
            PAGE_WIDTH,
            800.0,
            lines.into_iter().map(TextLine::new).collect(),
        )
    }

    #[test]
    fn empty_layout_has_no_regions() {
        let cfg = DetectionConfig::default();
        assert!(detect_page_regions(&page(vec![]), &cfg).is_empty());
        assert!(detect_page_regions(&page(vec![vec![]]), &cfg).is_empty());
    }

    #[test]
    fn single_char_without_structure_is_discarded() {
        let layout = page(vec![vec![body("Let ", 0.0, 20.0), math("x", 20.0, 25.0), body(" be", 25.0, 40.0)]]);
        assert!(detect_page_regions(&layout, &DetectionConfig::default()).is_empty());
    }

    #[test]
    fn two_chars_without_structure_are_discarded() {
        let layout = page(vec![vec![math("ab", 20.0, 30.0)]]);
        assert!(detect_page_regions(&layout, &DetectionConfig::default()).is_empty());
    }

    #[test]
    fn two_chars_with_superscript_are_kept() {
        let mut sup = math("2", 25.0, 28.0);
        sup.flags = FLAG_SUPERSCRIPT;
        let layout = page(vec![vec![math("x", 20.0, 25.0), sup]]);
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].raw_chars, "x2");
    }

    #[test]
    fn two_chars_with_mixed_fonts_are_kept() {
        let op = TextRun::new("+", "CMR10", 0, BBox::new(25.0, 100.0, 30.0, 110.0));
        let layout = page(vec![vec![math("x", 20.0, 25.0), op]]);
        assert_eq!(detect_page_regions(&layout, &DetectionConfig::default()).len(), 1);
    }

    #[test]
    fn body_run_splits_groups() {
        let layout = page(vec![vec![
            math("a+b", 0.0, 20.0),
            body(" and ", 20.0, 40.0),
            math("c+d", 40.0, 60.0),
        ]]);
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].raw_chars, "a+b");
        assert_eq!(regions[1].raw_chars, "c+d");
    }

    #[test]
    fn groups_do_not_span_lines() {
        let layout = page(vec![vec![math("a+", 0.0, 10.0)], vec![math("b", 0.0, 5.0)]]);
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert!(regions.is_empty());
    }

    #[test]
    fn blank_edge_runs_are_excluded_from_bbox() {
        let layout = page(vec![vec![
            math(" ", 0.0, 18.0),
            math("x+y", 20.0, 40.0),
            math("  ", 40.0, 70.0),
        ]]);
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox.x0, 20.0);
        assert_eq!(regions[0].bbox.x1, 40.0);
        assert_eq!(regions[0].source_runs.len(), 3);
    }

    #[test]
    fn wide_formula_alone_on_line_is_display() {
        let layout = page(vec![vec![math("x2+y2=1", 100.0, 400.0), body("(1)", 500.0, 520.0)]]);
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert!(regions[0].is_display);
    }

    #[test]
    fn wide_formula_in_running_text_is_inline() {
        let layout = page(vec![vec![
            body("The equation ", 0.0, 90.0),
            math("x2+y2=1", 100.0, 400.0),
            body(" is a circle", 400.0, 480.0),
        ]]);
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert!(!regions[0].is_display);
    }

    #[test]
    fn narrow_formula_alone_is_inline() {
        let layout = page(vec![vec![math("x+y", 100.0, 150.0)]]);
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert!(!regions[0].is_display);
    }

    #[test]
    fn zero_width_page_never_displays() {
        let mut layout = page(vec![vec![math("x+y", 100.0, 400.0)]]);
        layout.width = 0.0;
        let regions = detect_page_regions(&layout, &DetectionConfig::default());
        assert!(!regions[0].is_display);
    }

    #[test]
    fn document_detection_merges_fragments() {
        let layout = page(vec![vec![
            math("a+b", 10.0, 50.0),
            TextRun::new("", "SFRM1000", 0, BBox::new(50.0, 100.0, 51.0, 110.0)),
            math("=c2", 52.0, 90.0),
        ]]);
        let regions = detect_document_regions(&[layout], &DetectionConfig::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].raw_chars, "a+b=c2");
    }
}
