//! Region merging: coalesce horizontally adjacent fragments of one formula.
//!
//! Font changes inside a formula (an operator set in `CMR` between two
//! `CMMI` variables with a zero-width body-font glyph in between, for
//! instance) split it into several regions. A single greedy forward pass
//! stitches them back together. The pass never revisits emitted regions, so
//! the input must be ordered by page, then line, then left to right, exactly
//! as the detector produces it.

use crate::config::DetectionConfig;
use crate::formula::FormulaRegion;

/// Merge adjacent regions that sit on the same visual line.
///
/// Two neighbours merge when they are on the same page, their vertical
/// overlap ratio exceeds `merge_min_y_overlap`, and the gap between
/// `current.x1` and `next.x0` is below `merge_max_x_gap`.
pub fn merge_adjacent_regions(
    regions: Vec<FormulaRegion>,
    config: &DetectionConfig,
) -> Vec<FormulaRegion> {
    let mut iter = regions.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for next in iter {
        if should_merge(&current, &next, config) {
            current = absorb(current, next);
        } else {
            merged.push(std::mem::replace(&mut current, next));
        }
    }
    merged.push(current);
    merged
}

fn should_merge(current: &FormulaRegion, next: &FormulaRegion, config: &DetectionConfig) -> bool {
    let same_page = current.page_index == next.page_index;
    let y_overlap = current.bbox.vertical_overlap_ratio(&next.bbox) > config.merge_min_y_overlap;
    let x_gap = next.bbox.x0 - current.bbox.x1;
    same_page && y_overlap && x_gap < config.merge_max_x_gap
}

fn absorb(mut current: FormulaRegion, next: FormulaRegion) -> FormulaRegion {
    current.bbox = current.bbox.union(&next.bbox);
    current.is_display |= next.is_display;
    current.source_runs.extend(next.source_runs);
    current.raw_chars.push_str(&next.raw_chars);
    current
}
