//! Result of one formula-patching pass.
//!
//! ## Why an outcome enum instead of `Result`?
//!
//! Formula OCR is an enhancement on top of markdown that already exists. A
//! failure anywhere inside it must hand back the original pages, not an
//! error the caller might propagate and lose the document over. The three
//! variants make "degraded, original text returned" a value that every call
//! site has to look at, while every variant still carries usable pages.

use serde::{Deserialize, Serialize};

pub use crate::pipeline::patch::PatchStats;

/// Why the pipeline returned the input without trying OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No API key or provider was configured.
    NoCredential,
    /// Detection found no math-font text.
    NoFormulas,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCredential => write!(f, "no OCR credential configured"),
            SkipReason::NoFormulas => write!(f, "no formulas detected"),
        }
    }
}

/// Per-page markdown after a patching pass, plus how it got there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PatchOutcome {
    /// OCR ran and the patcher was applied (possibly matching nothing).
    Patched { pages: Vec<String>, stats: PatchStats },
    /// OCR was not attempted; `pages` is the input.
    Unchanged { pages: Vec<String>, reason: SkipReason },
    /// A stage failed; `pages` is the input and `error` says what broke.
    Degraded { pages: Vec<String>, error: String },
}

impl PatchOutcome {
    pub fn pages(&self) -> &[String] {
        match self {
            PatchOutcome::Patched { pages, .. }
            | PatchOutcome::Unchanged { pages, .. }
            | PatchOutcome::Degraded { pages, .. } => pages,
        }
    }

    pub fn into_pages(self) -> Vec<String> {
        match self {
            PatchOutcome::Patched { pages, .. }
            | PatchOutcome::Unchanged { pages, .. }
            | PatchOutcome::Degraded { pages, .. } => pages,
        }
    }

    /// All pages joined with a newline.
    pub fn markdown(&self) -> String {
        self.pages().join("\n")
    }

    pub fn stats(&self) -> Option<&PatchStats> {
        match self {
            PatchOutcome::Patched { stats, .. } => Some(stats),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PatchOutcome::Degraded { .. })
    }
}
