//! Configuration for formula detection, OCR dispatch and patching.
//!
//! Everything the pipeline can be tuned with lives in [`FormulaOcrConfig`],
//! built through [`FormulaOcrConfigBuilder`]. The geometric thresholds used by
//! the detector and merger are empirical; they are named constants here and
//! grouped in [`DetectionConfig`] so they can be adjusted without touching the
//! algorithms.

use crate::error::FormulaError;
use crate::pipeline::input::DEFAULT_MAX_DOWNLOAD_BYTES;
use crate::progress::OcrProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ── Detection thresholds ─────────────────────────────────────────────────

/// Formula width over page width above which a formula may be displayed.
pub const DISPLAY_WIDTH_RATIO: f32 = 0.3;

/// A displayed formula's line carries fewer non-math characters than this.
pub const DISPLAY_MAX_BODY_CHARS: usize = 5;

/// Regions at or above this many raw characters are always kept.
pub const MIN_FORMULA_CHARS: usize = 3;

/// Regions with math structure are kept from this many raw characters.
pub const MIN_STRUCTURED_FORMULA_CHARS: usize = 2;

/// Largest horizontal gap (points) across which two regions still merge.
pub const MERGE_MAX_X_GAP: f32 = 3.0;

/// Vertical overlap ratio two regions must exceed to merge.
pub const MERGE_MIN_Y_OVERLAP: f32 = 0.5;

// ── OCR defaults ─────────────────────────────────────────────────────────

/// Page render resolution for formula crops.
pub const RENDER_DPI: u32 = 300;

/// White border (pixels at render DPI) added around each crop.
pub const CROP_PADDING: u32 = 5;

pub const DEFAULT_BATCH_SIZE: usize = 30;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Wall-clock limit for one document's render + OCR + patch pass.
pub const DEFAULT_CONVERSION_TIMEOUT_SECS: u64 = 300;

/// Geometric thresholds for the region detector and merger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub display_width_ratio: f32,
    pub display_max_body_chars: usize,
    pub min_formula_chars: usize,
    pub min_structured_chars: usize,
    pub merge_max_x_gap: f32,
    pub merge_min_y_overlap: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            display_width_ratio: DISPLAY_WIDTH_RATIO,
            display_max_body_chars: DISPLAY_MAX_BODY_CHARS,
            min_formula_chars: MIN_FORMULA_CHARS,
            min_structured_chars: MIN_STRUCTURED_FORMULA_CHARS,
            merge_max_x_gap: MERGE_MAX_X_GAP,
            merge_min_y_overlap: MERGE_MIN_Y_OVERLAP,
        }
    }
}

/// Configuration for a formula OCR pass.
///
/// # Example
/// ```rust
/// use pdf2md_formula::FormulaOcrConfig;
///
/// let config = FormulaOcrConfig::builder()
///     .api_key("sk-or-...")
///     .batch_size(20)
///     .max_workers(4)
///     .build()
///     .unwrap();
/// assert!(config.has_credential());
/// ```
#[derive(Clone)]
pub struct FormulaOcrConfig {
    /// Bearer token for the OCR endpoint. Empty disables OCR entirely.
    pub api_key: String,

    /// Vision model identifier sent with every batch.
    pub model: String,

    /// Chat-completions URL of an OpenAI-compatible vision endpoint.
    pub endpoint: String,

    /// Pre-constructed vision provider. Takes precedence over `endpoint`
    /// and counts as a credential on its own.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Images per OCR request. Default: 30.
    ///
    /// Larger batches amortise round-trip latency but grow the request body;
    /// most endpoints reject bodies past ~20 MB.
    pub batch_size: usize,

    /// Concurrent in-flight batches. Default: 10.
    pub max_workers: usize,

    /// Page render DPI for cropping. Range: 72–600. Default: 300.
    pub render_dpi: u32,

    /// White padding in pixels around each crop. Default: 5.
    pub crop_padding: u32,

    /// Maximum tokens per OCR completion. Default: 4096.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0, so reruns are reproducible.
    pub temperature: f32,

    /// Per-request timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Limit for the whole pass after detection, in seconds. Default: 300.
    ///
    /// A hung render or a slow provider past this point degrades to the
    /// original markdown instead of blocking the caller.
    pub conversion_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Timeout for downloading URL inputs. Default: 120.
    pub download_timeout_secs: u64,

    /// Largest PDF accepted from a URL. Default: 50 MB.
    pub max_download_bytes: u64,

    /// Detector and merger thresholds.
    pub detection: DetectionConfig,

    /// Optional batch-level progress events.
    pub progress_callback: Option<Arc<dyn OcrProgressCallback>>,
}

impl Default for FormulaOcrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            provider: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            render_dpi: RENDER_DPI,
            crop_padding: CROP_PADDING,
            max_tokens: 4096,
            temperature: 0.0,
            api_timeout_secs: 120,
            conversion_timeout_secs: DEFAULT_CONVERSION_TIMEOUT_SECS,
            password: None,
            download_timeout_secs: 120,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            detection: DetectionConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FormulaOcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormulaOcrConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("batch_size", &self.batch_size)
            .field("max_workers", &self.max_workers)
            .field("render_dpi", &self.render_dpi)
            .field("crop_padding", &self.crop_padding)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("conversion_timeout_secs", &self.conversion_timeout_secs)
            .field("detection", &self.detection)
            .finish()
    }
}

impl FormulaOcrConfig {
    pub fn builder() -> FormulaOcrConfigBuilder {
        FormulaOcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// OCR is opt-in: it runs only with an API key or an explicit provider.
    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty() || self.provider.is_some()
    }
}

/// Builder for [`FormulaOcrConfig`].
pub struct FormulaOcrConfigBuilder {
    config: FormulaOcrConfig,
}

impl FormulaOcrConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n.max(1);
        self
    }

    pub fn render_dpi(mut self, dpi: u32) -> Self {
        self.config.render_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn crop_padding(mut self, px: u32) -> Self {
        self.config.crop_padding = px;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_download_bytes(mut self, bytes: u64) -> Self {
        self.config.max_download_bytes = bytes;
        self
    }

    pub fn detection(mut self, detection: DetectionConfig) -> Self {
        self.config.detection = detection;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn OcrProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FormulaOcrConfig, FormulaError> {
        let c = &self.config;
        if c.batch_size == 0 || c.max_workers == 0 {
            return Err(FormulaError::InvalidConfig(
                "batch size and worker count must be ≥ 1".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(FormulaError::InvalidConfig("model must not be empty".into()));
        }
        if c.provider.is_none() && !c.endpoint.starts_with("http://") && !c.endpoint.starts_with("https://") {
            return Err(FormulaError::InvalidConfig(format!(
                "endpoint must be an HTTP(S) URL, got '{}'",
                c.endpoint
            )));
        }
        let d = &c.detection;
        if !(d.display_width_ratio >= 0.0 && d.merge_max_x_gap.is_finite() && d.merge_min_y_overlap >= 0.0) {
            return Err(FormulaError::InvalidConfig(format!(
                "detection thresholds out of range: {d:?}"
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = FormulaOcrConfig::default();
        assert_eq!(c.batch_size, 30);
        assert_eq!(c.max_workers, 10);
        assert_eq!(c.render_dpi, 300);
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.conversion_timeout_secs, 300);
        assert!(!c.has_credential());
    }

    #[test]
    fn builder_clamps() {
        let c = FormulaOcrConfig::builder()
            .batch_size(0)
            .max_workers(0)
            .render_dpi(10_000)
            .conversion_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.conversion_timeout_secs, 1);
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.max_workers, 1);
        assert_eq!(c.render_dpi, 600);
    }

    #[test]
    fn blank_key_is_not_a_credential() {
        let c = FormulaOcrConfig::builder().api_key("   ").build().unwrap();
        assert!(!c.has_credential());
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let err = FormulaOcrConfig::builder().endpoint("ftp://x").build();
        assert!(matches!(err, Err(FormulaError::InvalidConfig(_))));
    }

    #[test]
    fn debug_redacts_key() {
        let c = FormulaOcrConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
