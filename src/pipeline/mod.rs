//! Pipeline stages for formula recovery.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different layout source or OCR backend)
//! without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ detect ──▶ merge ──▶ crop ──▶ encode ──▶ ocr ──▶ patch
//! (URL/path) (pdfium)  (fonts)   (adjacent) (page px) (base64)  (VLM)   (markdown)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`] — per-character text layout and page rasters; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`fonts`] + [`detect`] — find runs of math-font text on each line
//! 4. [`merge`]  — join fragments of one formula split across runs
//! 5. [`crop`]   — cut each region out of its rendered page, padded
//! 6. [`encode`] — PNG-encode and base64-wrap each crop
//! 7. [`ocr`]    — concurrent numbered batches; the only stage with network
//!    I/O
//! 8. [`patch`]  — fuzzy-find each formula in the markdown and swap in LaTeX

pub mod crop;
pub mod detect;
pub mod encode;
pub mod fonts;
pub mod input;
pub mod merge;
pub mod ocr;
pub mod patch;
pub mod render;
