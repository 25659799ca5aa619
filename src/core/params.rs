//! core/params.rs — Lock-free parameter block shared by control and engine.
//!
//! Non-structural parameters (per-band orders and weights, averaging
//! coefficients, estimator mode and knobs) are stored as atomics so the
//! control thread can change them at any time without a reinit. The engine
//! copies them into a `ParamsSnapshot` at the start of every recompute, so one
//! map is always generated from one consistent-enough parameter set.
//! f32 values travel as their bit patterns in `AtomicU32`.

use crate::config::AnalysisConfig;
use crate::core::estimators::{EstimatorParams, MapMode};
use crate::core::hybrid_stft::NUM_BANDS;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering};

/// Upper bound for the map smoothing coefficient.
pub const MAP_AVG_MAX: f32 = 0.999;

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }
    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
    #[inline]
    fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// Atomics mirrored from `AnalysisConfig`.
#[derive(Debug)]
pub struct SharedParams {
    band_orders: [AtomicU8; NUM_BANDS],
    band_weights: [AtomicF32; NUM_BANDS],
    cov_avg: AtomicF32,
    map_avg: AtomicF32,
    cov_avg_cap: AtomicF32,
    eq_scale: AtomicF32,
    mode: AtomicU8,
    n_sources: AtomicUsize,
    cropac_lambda: AtomicF32,
    mvdr_loading: AtomicF32,
    recompute: AtomicBool,
}

/// Engine-side copy taken once per recompute.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamsSnapshot {
    pub band_orders: [usize; NUM_BANDS],
    pub band_weights: [f32; NUM_BANDS],
    /// Clamped to `[0, cap]`.
    pub cov_alpha: f64,
    /// Clamped to `[0, MAP_AVG_MAX]`.
    pub map_beta: f64,
    pub eq_scale: f64,
    pub mode: MapMode,
    pub estimator: EstimatorParams,
}

impl Default for ParamsSnapshot {
    fn default() -> Self {
        Self {
            band_orders: [1; NUM_BANDS],
            band_weights: [1.0; NUM_BANDS],
            cov_alpha: 0.0,
            map_beta: 0.0,
            eq_scale: 1.0,
            mode: MapMode::Pwd,
            estimator: EstimatorParams::default(),
        }
    }
}

impl SharedParams {
    pub fn from_config(cfg: &AnalysisConfig) -> Self {
        Self {
            band_orders: std::array::from_fn(|b| AtomicU8::new(cfg.band_order(b).min(255) as u8)),
            band_weights: std::array::from_fn(|b| AtomicF32::new(cfg.band_weight(b))),
            cov_avg: AtomicF32::new(cfg.cov_avg),
            map_avg: AtomicF32::new(cfg.map_avg),
            cov_avg_cap: AtomicF32::new(cfg.cov_avg_cap),
            eq_scale: AtomicF32::new(cfg.eq_scale),
            mode: AtomicU8::new(cfg.mode.as_u8()),
            n_sources: AtomicUsize::new(cfg.n_sources),
            cropac_lambda: AtomicF32::new(cfg.cropac_lambda),
            mvdr_loading: AtomicF32::new(cfg.mvdr_loading),
            recompute: AtomicBool::new(false),
        }
    }

    pub fn set_band_order(&self, band: usize, order: usize) {
        if let Some(a) = self.band_orders.get(band) {
            a.store(order.min(255) as u8, Ordering::Relaxed);
        }
    }

    pub fn set_band_weight(&self, band: usize, weight: f32) {
        if let Some(a) = self.band_weights.get(band) {
            a.store(weight);
        }
    }

    pub fn set_cov_avg(&self, v: f32) {
        self.cov_avg.store(v);
    }

    pub fn set_map_avg(&self, v: f32) {
        self.map_avg.store(v);
    }

    pub fn set_mode(&self, mode: MapMode) {
        self.mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    pub fn mode(&self) -> MapMode {
        MapMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_n_sources(&self, n: usize) {
        self.n_sources.store(n, Ordering::Relaxed);
    }

    /// Covariance averaging coefficient clamped to `[0, cap]`.
    pub fn cov_alpha(&self) -> f64 {
        let cap = self.cov_avg_cap.load().clamp(0.0, 0.9999);
        let v = self.cov_avg.load();
        if v.is_finite() { v.clamp(0.0, cap) as f64 } else { 0.0 }
    }

    /// Ask the engine to regenerate the map after its next frame.
    pub fn request_recompute(&self) {
        self.recompute.store(true, Ordering::Release);
    }

    /// Consume a pending request.
    pub fn take_recompute(&self) -> bool {
        self.recompute.swap(false, Ordering::AcqRel)
    }

    /// Copy the current values into `out` without allocating.
    pub fn snapshot_into(&self, out: &mut ParamsSnapshot) {
        for (o, a) in out.band_orders.iter_mut().zip(&self.band_orders) {
            *o = a.load(Ordering::Relaxed) as usize;
        }
        for (o, a) in out.band_weights.iter_mut().zip(&self.band_weights) {
            let w = a.load();
            *o = if w.is_finite() { w.max(0.0) } else { 0.0 };
        }
        out.cov_alpha = self.cov_alpha();
        let beta = self.map_avg.load();
        out.map_beta = if beta.is_finite() { beta.clamp(0.0, MAP_AVG_MAX) as f64 } else { 0.0 };
        out.eq_scale = self.eq_scale.load().max(0.0) as f64;
        out.mode = self.mode();
        out.estimator = EstimatorParams {
            n_sources: self.n_sources.load(Ordering::Relaxed),
            cropac_lambda: self.cropac_lambda.load() as f64,
            mvdr_loading: self.mvdr_loading.load() as f64,
        };
    }

    pub fn snapshot(&self) -> ParamsSnapshot {
        let mut s = ParamsSnapshot::default();
        self.snapshot_into(&mut s);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_mirrors_config() {
        let cfg = AnalysisConfig {
            master_order: 3,
            band_orders: vec![2, 1],
            band_weights: vec![0.0],
            mode: MapMode::Music,
            n_sources: 2,
            ..AnalysisConfig::default()
        };
        let s = SharedParams::from_config(&cfg).snapshot();
        assert_eq!(s.band_orders[0], 2);
        assert_eq!(s.band_orders[1], 1);
        assert_eq!(s.band_orders[2], 3);
        assert_eq!(s.band_weights[0], 0.0);
        assert_eq!(s.band_weights[NUM_BANDS - 1], 1.0);
        assert_eq!(s.mode, MapMode::Music);
        assert_eq!(s.estimator.n_sources, 2);
        assert!((s.cov_alpha - 0.5).abs() < 1e-9);
    }

    #[test]
    fn averaging_coefficients_are_clamped() {
        let p = SharedParams::from_config(&AnalysisConfig::default());
        p.set_cov_avg(1.0);
        p.set_map_avg(5.0);
        let s = p.snapshot();
        assert!((s.cov_alpha - 0.99).abs() < 1e-6);
        assert!((s.map_beta - MAP_AVG_MAX as f64).abs() < 1e-6);
        p.set_cov_avg(f32::NAN);
        p.set_map_avg(-1.0);
        let s = p.snapshot();
        assert_eq!(s.cov_alpha, 0.0);
        assert_eq!(s.map_beta, 0.0);
    }

    #[test]
    fn recompute_request_is_consumed_once() {
        let p = SharedParams::from_config(&AnalysisConfig::default());
        assert!(!p.take_recompute());
        p.request_recompute();
        p.request_recompute();
        assert!(p.take_recompute());
        assert!(!p.take_recompute());
    }

    #[test]
    fn out_of_range_band_is_ignored() {
        let p = SharedParams::from_config(&AnalysisConfig::default());
        p.set_band_order(NUM_BANDS, 4);
        p.set_band_weight(NUM_BANDS + 3, 0.0);
        assert_eq!(p.snapshot(), SharedParams::from_config(&AnalysisConfig::default()).snapshot());
    }
}
