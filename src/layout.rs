//! Page text layout: the fixed-shape records the region detector walks.
//!
//! A page is an ordered list of [`TextLine`]s, each an ordered list of
//! [`TextRun`]s (a run is a maximal stretch of text sharing one font and one
//! style). Order matters: the detector and merger both assume top-to-bottom,
//! left-to-right reading order.
//!
//! External layout producers often hand over loosely-typed records. Those are
//! modelled by [`RawSpan`] (every field optional) and validated once, here,
//! via `TextRun::try_from`, so the rest of the pipeline never sees a missing
//! font name or an inverted bounding box.

use crate::error::FormulaError;
use serde::{Deserialize, Serialize};

/// Style-flag bit set on superscript and subscript runs.
pub const FLAG_SUPERSCRIPT: u32 = 1;

/// Axis-aligned rectangle in page points (72/inch), top-left origin.
///
/// Always normalised: `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    /// Build a box from two corners in any order.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Overlap of the two y-ranges divided by the smaller height.
    ///
    /// Returns 0.0 when either box is flat.
    pub fn vertical_overlap_ratio(&self, other: &BBox) -> f32 {
        let overlap = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        let min_height = self.height().min(other.height());
        if min_height > 0.0 {
            overlap / min_height
        } else {
            0.0
        }
    }
}

/// One run of text sharing a font and style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub font_name: String,
    /// Style bitmap; see [`FLAG_SUPERSCRIPT`].
    pub flags: u32,
    pub bbox: BBox,
}

impl TextRun {
    pub fn new(text: impl Into<String>, font_name: impl Into<String>, flags: u32, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            font_name: font_name.into(),
            flags,
            bbox,
        }
    }

    pub fn is_superscript(&self) -> bool {
        self.flags & FLAG_SUPERSCRIPT != 0
    }

    /// True when the run carries no visible characters.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// An ordered sequence of runs sharing one visual line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub runs: Vec<TextRun>,
}

impl TextLine {
    pub fn new(runs: Vec<TextRun>) -> Self {
        Self { runs }
    }
}

/// The text layout of a single page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    /// Zero-based page ordinal.
    pub page_index: usize,
    /// Page width in points; used for display/inline classification.
    pub width: f32,
    /// Page height in points.
    pub height: f32,
    pub lines: Vec<TextLine>,
}

impl PageLayout {
    pub fn new(page_index: usize, width: f32, height: f32, lines: Vec<TextLine>) -> Self {
        Self {
            page_index,
            width,
            height,
            lines,
        }
    }

    /// Build a page from loosely-typed line records, validating every span.
    pub fn from_raw(
        page_index: usize,
        width: f32,
        height: f32,
        raw_lines: Vec<Vec<RawSpan>>,
    ) -> Result<Self, FormulaError> {
        let lines = raw_lines
            .into_iter()
            .map(|spans| {
                spans
                    .into_iter()
                    .map(TextRun::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .map(TextLine::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(page_index, width, height, lines))
    }
}

/// A span record as emitted by an external layout producer.
///
/// Text, font and flags default when missing; the bounding box is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSpan {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "font_name")]
    pub font: Option<String>,
    #[serde(default)]
    pub flags: Option<u32>,
    #[serde(default)]
    pub bbox: Option<[f32; 4]>,
}

impl TryFrom<RawSpan> for TextRun {
    type Error = FormulaError;

    fn try_from(raw: RawSpan) -> Result<Self, Self::Error> {
        let [x0, y0, x1, y1] = raw.bbox.ok_or_else(|| {
            FormulaError::InvalidLayout(format!(
                "span {:?} has no bounding box",
                raw.text.as_deref().unwrap_or("")
            ))
        })?;
        if [x0, y0, x1, y1].iter().any(|v| !v.is_finite()) {
            return Err(FormulaError::InvalidLayout(format!(
                "span bounding box is not finite: [{x0}, {y0}, {x1}, {y1}]"
            )));
        }
        Ok(TextRun {
            text: raw.text.unwrap_or_default(),
            font_name: raw.font.unwrap_or_default(),
            flags: raw.flags.unwrap_or(0),
            bbox: BBox::new(x0, y0, x1, y1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_is_normalised() {
        let b = BBox::new(50.0, 30.0, 10.0, 10.0);
        assert_eq!(b, BBox { x0: 10.0, y0: 10.0, x1: 50.0, y1: 30.0 });
        assert_eq!(b.width(), 40.0);
        assert_eq!(b.height(), 20.0);
    }

    #[test]
    fn bbox_union() {
        let a = BBox::new(10.0, 10.0, 50.0, 20.0);
        let b = BBox::new(52.0, 8.0, 90.0, 19.0);
        assert_eq!(a.union(&b), BBox::new(10.0, 8.0, 90.0, 20.0));
    }

    #[test]
    fn vertical_overlap_uses_smaller_height() {
        let tall = BBox::new(0.0, 0.0, 10.0, 20.0);
        let short = BBox::new(20.0, 5.0, 30.0, 10.0);
        assert_eq!(tall.vertical_overlap_ratio(&short), 1.0);

        let disjoint = BBox::new(0.0, 30.0, 10.0, 40.0);
        assert_eq!(tall.vertical_overlap_ratio(&disjoint), 0.0);

        let flat = BBox::new(0.0, 5.0, 10.0, 5.0);
        assert_eq!(tall.vertical_overlap_ratio(&flat), 0.0);
    }

    #[test]
    fn raw_span_defaults_missing_fields() {
        let raw: RawSpan = serde_json::from_str(r#"{"bbox": [1, 2, 3, 4]}"#).unwrap();
        let run = TextRun::try_from(raw).unwrap();
        assert_eq!(run.text, "");
        assert_eq!(run.font_name, "");
        assert_eq!(run.flags, 0);
    }

    #[test]
    fn raw_span_without_bbox_is_rejected() {
        let raw = RawSpan {
            text: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            TextRun::try_from(raw),
            Err(FormulaError::InvalidLayout(_))
        ));
    }

    #[test]
    fn raw_span_accepts_font_name_alias() {
        let raw: RawSpan = serde_json::from_str(
            r#"{"text": "x", "font_name": "CMMI10", "flags": 1, "bbox": [9, 9, 1, 1]}"#,
        )
        .unwrap();
        let run = TextRun::try_from(raw).unwrap();
        assert_eq!(run.font_name, "CMMI10");
        assert!(run.is_superscript());
        assert_eq!(run.bbox, BBox::new(1.0, 1.0, 9.0, 9.0));
    }

    #[test]
    fn page_from_raw_propagates_errors() {
        let ok = vec![vec![RawSpan {
            text: Some("a".into()),
            bbox: Some([0.0, 0.0, 1.0, 1.0]),
            ..Default::default()
        }]];
        let page = PageLayout::from_raw(0, 612.0, 792.0, ok).unwrap();
        assert_eq!(page.lines.len(), 1);

        let bad = vec![vec![RawSpan::default()]];
        assert!(PageLayout::from_raw(0, 612.0, 792.0, bad).is_err());
    }
}
