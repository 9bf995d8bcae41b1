//! Prompts for batched formula OCR.
//!
//! The batch prompt defines a strict numbered-output contract; the parser in
//! [`crate::pipeline::ocr::parse_numbered_response`] relies on it. Change the
//! two together.

/// Marker the model emits for an image it cannot read.
pub const UNREADABLE_MARKER: &str = "???";

/// Instruction block sent ahead of the numbered formula images.
pub fn batch_prompt(image_count: usize) -> String {
    format!(
        "You are a LaTeX OCR engine. Below are {image_count} numbered images of \
mathematical formulas cropped from a PDF.

For EACH image, output ONLY the raw LaTeX (no $$ delimiters, no commentary) \
on a single line, prefixed by its number.

Format:
1: x^2 + y^2 = 1
2: \\sum_{{i=1}}^{{n}} a_i
...

Rules:
- Output raw LaTeX only, no markdown code fences
- One formula per line, numbered in order
- If an image is unreadable, output the number followed by: {UNREADABLE_MARKER}"
    )
}

/// Text label placed immediately before the `seq`-th image (1-indexed).
pub fn image_label(seq: usize) -> String {
    format!("Image {seq}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_states_count_and_contract() {
        let p = batch_prompt(7);
        assert!(p.contains("Below are 7 numbered images"));
        assert!(p.contains("1: x^2 + y^2 = 1"));
        assert!(p.contains(r"\sum_{i=1}^{n} a_i"));
        assert!(p.ends_with("???"));
    }

    #[test]
    fn labels_are_one_indexed() {
        assert_eq!(image_label(1), "Image 1:");
        assert_eq!(image_label(30), "Image 30:");
    }
}
