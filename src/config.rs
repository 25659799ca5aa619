use crate::core::estimators::MapMode;
use crate::core::grid::{AspectRatio, HorizontalFov, MAX_DISPLAY_WIDTH};
use crate::core::hybrid_stft::NUM_BANDS;
use crate::core::sh::MAX_ORDER;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per host callback fed to the analysis worker.
    #[serde(default = "AudioConfig::default_block_size")]
    pub block_size: usize,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        48_000
    }
    fn default_block_size() -> usize {
        512
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            block_size: Self::default_block_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    /// Master SH order (1..=7); channel count is `(order + 1)²`.
    #[serde(default = "AnalysisConfig::default_master_order")]
    pub master_order: usize,
    /// Per-band analysis order. Empty means every band uses the master order;
    /// a short list leaves the remaining bands at the master order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub band_orders: Vec<usize>,
    /// Per-band EQ weight. Empty means 1.0 everywhere; zero disables a band.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub band_weights: Vec<f32>,
    /// Covariance averaging coefficient α, clamped to `[0, cov_avg_cap]`.
    #[serde(default = "AnalysisConfig::default_cov_avg")]
    pub cov_avg: f32,
    /// Map smoothing coefficient β, clamped to `[0, 0.999]`.
    #[serde(default = "AnalysisConfig::default_map_avg")]
    pub map_avg: f32,
    #[serde(default)]
    pub mode: MapMode,
    /// Assumed number of sources for the subspace estimators.
    #[serde(default = "AnalysisConfig::default_n_sources")]
    pub n_sources: usize,
    #[serde(default)]
    pub hfov: HorizontalFov,
    #[serde(default)]
    pub aspect: AspectRatio,
    /// Display width in pixels; the height follows from the aspect ratio.
    #[serde(default = "AnalysisConfig::default_display_width")]
    pub display_width: usize,
    #[serde(default = "AnalysisConfig::default_cov_avg_cap")]
    pub cov_avg_cap: f32,
    /// Scale applied to every EQ weight when bands are grouped.
    #[serde(default = "AnalysisConfig::default_eq_scale")]
    pub eq_scale: f32,
    #[serde(default = "AnalysisConfig::default_cropac_lambda")]
    pub cropac_lambda: f32,
    /// MVDR diagonal loading relative to the mean eigenvalue.
    #[serde(default = "AnalysisConfig::default_mvdr_loading")]
    pub mvdr_loading: f32,
}

impl AnalysisConfig {
    fn default_master_order() -> usize {
        1
    }
    fn default_cov_avg() -> f32 {
        0.5
    }
    fn default_map_avg() -> f32 {
        0.25
    }
    fn default_n_sources() -> usize {
        1
    }
    fn default_display_width() -> usize {
        96
    }
    fn default_cov_avg_cap() -> f32 {
        0.99
    }
    fn default_eq_scale() -> f32 {
        1e3
    }
    fn default_cropac_lambda() -> f32 {
        1.0
    }
    fn default_mvdr_loading() -> f32 {
        1e-3
    }

    /// Per-band order for band `b`, falling back to the master order.
    pub fn band_order(&self, b: usize) -> usize {
        self.band_orders.get(b).copied().unwrap_or(self.master_order)
    }

    /// Per-band weight for band `b`, falling back to 1.0.
    pub fn band_weight(&self, b: usize) -> f32 {
        self.band_weights.get(b).copied().unwrap_or(1.0)
    }

    /// Clamp every field into its valid range, logging what changed.
    pub fn clamped(mut self) -> Self {
        let order = self.master_order.clamp(1, MAX_ORDER);
        if order != self.master_order {
            warn!(requested = self.master_order, used = order, "master order clamped");
            self.master_order = order;
        }
        if self.band_orders.len() > NUM_BANDS {
            warn!(len = self.band_orders.len(), "extra band orders ignored");
            self.band_orders.truncate(NUM_BANDS);
        }
        if self.band_weights.len() > NUM_BANDS {
            warn!(len = self.band_weights.len(), "extra band weights ignored");
            self.band_weights.truncate(NUM_BANDS);
        }
        for w in self.band_weights.iter_mut() {
            if !w.is_finite() || *w < 0.0 {
                *w = 0.0;
            }
        }
        let cap = if self.cov_avg_cap.is_finite() {
            self.cov_avg_cap.clamp(0.0, 0.9999)
        } else {
            Self::default_cov_avg_cap()
        };
        self.cov_avg_cap = cap;
        self.cov_avg = clamp_or_warn("cov_avg", self.cov_avg, 0.0, cap);
        self.map_avg = clamp_or_warn("map_avg", self.map_avg, 0.0, 0.999);
        let width = self.display_width.clamp(1, MAX_DISPLAY_WIDTH);
        if width != self.display_width {
            warn!(requested = self.display_width, used = width, "display width clamped");
            self.display_width = width;
        }
        self.n_sources = self.n_sources.max(1);
        self
    }
}

fn clamp_or_warn(name: &str, v: f32, lo: f32, hi: f32) -> f32 {
    let c = if v.is_finite() { v.clamp(lo, hi) } else { lo };
    if c != v {
        warn!(param = name, requested = v, used = c, "value clamped");
    }
    c
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            master_order: Self::default_master_order(),
            band_orders: Vec::new(),
            band_weights: Vec::new(),
            cov_avg: Self::default_cov_avg(),
            map_avg: Self::default_map_avg(),
            mode: MapMode::default(),
            n_sources: Self::default_n_sources(),
            hfov: HorizontalFov::default(),
            aspect: AspectRatio::default(),
            display_width: Self::default_display_width(),
            cov_avg_cap: Self::default_cov_avg_cap(),
            eq_scale: Self::default_eq_scale(),
            cropac_lambda: Self::default_cropac_lambda(),
            mvdr_loading: Self::default_mvdr_loading(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    fn format_f32_compact(x: f32) -> String {
        let mut s = format!("{:.6}", x);
        while s.contains('.') && s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        if s.is_empty() { "0".to_string() } else { s }
    }

    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Write this config as plain TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Defaults rendered as TOML with every value commented out.
    pub fn commented_defaults() -> Result<String> {
        let text = toml::to_string_pretty(&Self::default())?;
        let mut commented = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                commented.push('\n');
            } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
                commented.push_str(line);
                commented.push('\n');
            } else {
                let mut out_line = line.to_string();
                if let Some((lhs, rhs)) = line.split_once('=') {
                    let rhs_trim = rhs.trim();
                    let has_decimal = rhs_trim.contains('.');
                    if (has_decimal || rhs_trim.contains('e') || rhs_trim.contains('E'))
                        && !rhs_trim.contains('"')
                    {
                        if let Ok(val) = rhs_trim.parse::<f32>() {
                            let mut formatted = Self::format_f32_compact(val);
                            if !formatted.contains('.') {
                                formatted.push_str(".0");
                            }
                            out_line = format!("{} = {}", lhs.trim(), formatted);
                        }
                    }
                }
                commented.push_str("# ");
                commented.push_str(&out_line);
                commented.push('\n');
            }
        }
        Ok(commented)
    }

    pub fn load_or_default(path: &str) -> Self {
        let path_obj = Path::new(path);
        if path_obj.exists() {
            return match Self::load(path_obj) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to load config {path}: {err}. Using defaults.");
                    Self::default()
                }
            };
        }

        // File does not exist: write commented defaults and return them.
        match Self::commented_defaults() {
            Ok(text) => {
                if let Err(err) = fs::write(path_obj, text) {
                    warn!("Failed to write default config to {path}: {err}");
                }
            }
            Err(err) => warn!("Failed to serialize default config: {err}"),
        }
        Self::default()
    }
}
