//! Configuration for diagram analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across tasks and to diff two runs to understand
//! why their outputs differ.

use crate::error::AnalyzeError;
use crate::vision::{TextRecognizer, VisionModel};
use std::fmt;
use std::sync::Arc;

/// Configuration for a diagram-to-graph analysis run.
///
/// Built via [`AnalysisConfig::builder()`] or with
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use diag2graph::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .pdf_dpi(150)
///     .concurrency(4)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Rendering DPI for PDF pages. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps node labels sharp for the vision model while staying
    /// below typical API upload limits. Raise it for diagrams with small
    /// fonts; the long-side cap still applies afterwards.
    pub pdf_dpi: u32,

    /// Maximum long-side dimension of a decoded page in pixels. Default: 1536.
    ///
    /// Downscale only — a small diagram is never upscaled, because
    /// interpolation blurs thin connector lines without adding information.
    pub max_image_side: u32,

    /// Scale factor applied when rasterising SVG input. Default: 2.0.
    ///
    /// SVG text renders at its nominal size, which is frequently tiny;
    /// rendering at 2× before the long-side cap keeps labels legible.
    pub svg_scale: f32,

    /// Aspect ratio (long side / short side) beyond which a page is treated
    /// as panoramic and split into overlapping strips. Default: 2.4.
    pub panorama_ratio: f32,

    /// Pixel-area threshold beyond which a non-panoramic page is split into
    /// an overlapping 2-D grid. Default: 1,700,000 (~1300² px), so a dense
    /// near-square page at the long-side cap still tiles while ordinary
    /// portrait pages stay whole.
    pub tile_area_threshold: u64,

    /// Fraction of tile extent shared between adjacent tiles on each split
    /// edge. Default: 0.15. Overlap guarantees no label is fully severed at
    /// a tile boundary.
    pub tile_overlap: f32,

    /// Cap on tile count per axis. Default: 4.
    ///
    /// When the natural split would exceed the cap, tiles grow instead, so
    /// a pathological input can never fan out into hundreds of model images.
    pub max_tiles_per_axis: u32,

    /// Number of pages analysed concurrently. Default: 4.
    pub concurrency: usize,

    /// Vision model identifier passed to the provider, e.g. "gpt-4.1-mini".
    /// If None, the provider's default is used.
    pub model: Option<String>,

    /// Pre-constructed vision model. When unset, the orchestrator resolves
    /// an OpenAI-compatible provider from the environment.
    pub provider: Option<Arc<dyn VisionModel>>,

    /// Optional OCR capability for raster/PDF text hints. When unset,
    /// raster pages carry an empty hint — hints are an aid, never a
    /// requirement.
    pub recognizer: Option<Arc<dyn TextRecognizer>>,

    /// Sampling temperature for the model call. Default: 0.0.
    ///
    /// Graph transcription wants determinism, not creativity.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Attach the extracted text hint to the model payload. Default: true.
    ///
    /// Disable when the OCR capability is known to be unreliable for the
    /// input script, to avoid grounding the model on garbage.
    pub use_hint: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pdf_dpi: 150,
            max_image_side: 1536,
            svg_scale: 2.0,
            panorama_ratio: 2.4,
            tile_area_threshold: 1_700_000,
            tile_overlap: 0.15,
            max_tiles_per_axis: 4,
            concurrency: 4,
            model: None,
            provider: None,
            recognizer: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            password: None,
            system_prompt: None,
            use_hint: true,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("pdf_dpi", &self.pdf_dpi)
            .field("max_image_side", &self.max_image_side)
            .field("svg_scale", &self.svg_scale)
            .field("panorama_ratio", &self.panorama_ratio)
            .field("tile_area_threshold", &self.tile_area_threshold)
            .field("tile_overlap", &self.tile_overlap)
            .field("max_tiles_per_axis", &self.max_tiles_per_axis)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn VisionModel>"))
            .field("recognizer", &self.recognizer.as_ref().map(|_| "<dyn TextRecognizer>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("use_hint", &self.use_hint)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn pdf_dpi(mut self, dpi: u32) -> Self {
        self.config.pdf_dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_image_side(mut self, px: u32) -> Self {
        self.config.max_image_side = px.max(256);
        self
    }

    pub fn svg_scale(mut self, scale: f32) -> Self {
        self.config.svg_scale = scale.clamp(0.5, 8.0);
        self
    }

    pub fn panorama_ratio(mut self, ratio: f32) -> Self {
        self.config.panorama_ratio = ratio.max(1.0);
        self
    }

    pub fn tile_area_threshold(mut self, area: u64) -> Self {
        self.config.tile_area_threshold = area.max(65_536);
        self
    }

    pub fn tile_overlap(mut self, fraction: f32) -> Self {
        self.config.tile_overlap = fraction.clamp(0.0, 0.45);
        self
    }

    pub fn max_tiles_per_axis(mut self, n: u32) -> Self {
        self.config.max_tiles_per_axis = n.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn VisionModel>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.config.recognizer = Some(recognizer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn use_hint(mut self, v: bool) -> Self {
        self.config.use_hint = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalyzeError> {
        let c = &self.config;
        if c.pdf_dpi < 72 || c.pdf_dpi > 400 {
            return Err(AnalyzeError::InvalidConfig(format!(
                "PDF DPI must be 72–400, got {}",
                c.pdf_dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(AnalyzeError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if !(0.0..0.5).contains(&c.tile_overlap) {
            return Err(AnalyzeError::InvalidConfig(format!(
                "Tile overlap must be in [0, 0.5), got {}",
                c.tile_overlap
            )));
        }
        if c.panorama_ratio < 1.0 {
            return Err(AnalyzeError::InvalidConfig(
                "Panorama ratio must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = AnalysisConfig::builder()
            .pdf_dpi(10_000)
            .tile_overlap(0.9)
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.pdf_dpi, 400);
        assert!((c.tile_overlap - 0.45).abs() < f32::EPSILON);
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn defaults_build_cleanly() {
        let c = AnalysisConfig::builder().build().unwrap();
        assert_eq!(c.pdf_dpi, 150);
        assert_eq!(c.max_tiles_per_axis, 4);
        assert!(c.use_hint);
        assert!(c.provider.is_none());
    }
}
