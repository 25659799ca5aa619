//! core/estimators.rs — Power-map estimators.
//!
//! Every estimator shares one contract: given the working order, the group
//! covariance, the SH basis on the coarse grid and the estimator parameters,
//! write one non-negative (or log-domain) value per grid direction.
//! `MapMode` is closed; adding an estimator means adding a variant and one
//! function with the shared signature, and `generate_map` stops compiling
//! until it is dispatched.

use crate::core::linalg::{CMatrix, HermitianEigen};
use crate::core::sh::{BasisTable, n_sh};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Group covariance trace below which every non-PWD estimator outputs zeros.
pub const TRACE_FLOOR: f64 = 1e-8;

/// Denominator floor for spectra of the form 1/x.
const DEN_FLOOR: f64 = 1e-12;

/// Power-map estimator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MapMode {
    /// Plane-wave decomposition (steered beam energy).
    #[default]
    Pwd,
    /// Minimum-variance distortionless response.
    Mvdr,
    /// MVDR weighted by cross-pattern coherence of two static beams.
    CropacLcmv,
    Music,
    MusicLog,
    MinNorm,
    MinNormLog,
}

impl MapMode {
    pub const ALL: [MapMode; 7] = [
        MapMode::Pwd,
        MapMode::Mvdr,
        MapMode::CropacLcmv,
        MapMode::Music,
        MapMode::MusicLog,
        MapMode::MinNorm,
        MapMode::MinNormLog,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            MapMode::Pwd => 0,
            MapMode::Mvdr => 1,
            MapMode::CropacLcmv => 2,
            MapMode::Music => 3,
            MapMode::MusicLog => 4,
            MapMode::MinNorm => 5,
            MapMode::MinNormLog => 6,
        }
    }

    /// Unknown tags fall back to PWD.
    pub fn from_u8(v: u8) -> Self {
        Self::ALL.get(v as usize).copied().unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            MapMode::Pwd => "pwd",
            MapMode::Mvdr => "mvdr",
            MapMode::CropacLcmv => "cropac-lcmv",
            MapMode::Music => "music",
            MapMode::MusicLog => "music-log",
            MapMode::MinNorm => "min-norm",
            MapMode::MinNormLog => "min-norm-log",
        }
    }
}

impl fmt::Display for MapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MapMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name() == key)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|m| m.name()).collect();
                format!("unknown map mode '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Scalar knobs shared by the estimators.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorParams {
    /// Assumed number of sources (signal-subspace size).
    pub n_sources: usize,
    /// CroPaC coherence scale λ.
    pub cropac_lambda: f64,
    /// MVDR diagonal loading, relative to the mean eigenvalue.
    pub mvdr_loading: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            n_sources: 1,
            cropac_lambda: 1.0,
            mvdr_loading: 1e-3,
        }
    }
}

/// Scratch reused across recomputes; sized once for the master order.
#[derive(Clone, Debug)]
pub struct MapWorkspace {
    eig: HermitianEigen,
    proj: Vec<f64>,
    u: Vec<Complex64>,
}

impl MapWorkspace {
    pub fn new(max_order: usize) -> Self {
        let n = n_sh(max_order);
        Self {
            eig: HermitianEigen::with_capacity(n),
            proj: Vec::with_capacity(n),
            u: Vec::with_capacity(n),
        }
    }
}

/// Subspace split clamped to `[1, n_ch − 1]`.
#[inline]
pub fn clamp_sources(n_sources: usize, n_ch: usize) -> usize {
    n_sources.clamp(1, n_ch.saturating_sub(1).max(1))
}

/// Fill `out` (one value per grid direction) with the `mode` estimate.
pub fn generate_map(
    mode: MapMode,
    order: usize,
    group: &CMatrix,
    basis: &BasisTable,
    params: &EstimatorParams,
    ws: &mut MapWorkspace,
    out: &mut [f64],
) {
    debug_assert_eq!(out.len(), basis.n_dirs());
    let order = order.min(basis.order());
    if mode != MapMode::Pwd && group.trace() < TRACE_FLOOR {
        out.fill(0.0);
        return;
    }
    match mode {
        MapMode::Pwd => pwd(order, group, basis, out),
        MapMode::Mvdr => mvdr(order, group, basis, params, ws, out),
        MapMode::CropacLcmv => cropac_lcmv(order, group, basis, params, ws, out),
        MapMode::Music => music(order, group, basis, params, ws, false, out),
        MapMode::MusicLog => music(order, group, basis, params, ws, true, out),
        MapMode::MinNorm => min_norm(order, group, basis, params, ws, false, out),
        MapMode::MinNormLog => min_norm(order, group, basis, params, ws, true, out),
    }
}

fn pwd(order: usize, group: &CMatrix, basis: &BasisTable, out: &mut [f64]) {
    let n = n_sh(order).min(group.dim());
    for (d, o) in out.iter_mut().enumerate() {
        *o = group.quad_form_real(basis.steering(d, n)).max(0.0);
    }
}

/// `|v_kᴴ y|²` for every eigenvector into `ws.proj`.
fn project(eig: &HermitianEigen, y: &[f64], proj: &mut Vec<f64>) {
    proj.clear();
    for k in 0..eig.dim() {
        let v = eig.vector(k);
        let z: Complex64 = v.iter().zip(y).map(|(vi, &yi)| vi.conj() * yi).sum();
        proj.push(z.norm_sqr());
    }
}

/// `yᴴ(C + δI)⁻¹y` from the eigendecomposition in `ws`.
fn inverse_form(ws: &mut MapWorkspace, y: &[f64], delta: f64) -> f64 {
    project(&ws.eig, y, &mut ws.proj);
    ws.proj
        .iter()
        .enumerate()
        .map(|(k, &p)| p / (ws.eig.value(k).max(0.0) + delta))
        .sum()
}

fn loading(ws: &MapWorkspace, params: &EstimatorParams) -> f64 {
    let n = ws.eig.dim().max(1);
    let mean: f64 = (0..ws.eig.dim()).map(|k| ws.eig.value(k).max(0.0)).sum::<f64>() / n as f64;
    (params.mvdr_loading.max(0.0) * mean).max(DEN_FLOOR)
}

fn mvdr(
    order: usize,
    group: &CMatrix,
    basis: &BasisTable,
    params: &EstimatorParams,
    ws: &mut MapWorkspace,
    out: &mut [f64],
) {
    let n = n_sh(order).min(group.dim());
    ws.eig.compute(group);
    let delta = loading(ws, params);
    for (d, o) in out.iter_mut().enumerate() {
        let den = inverse_form(ws, basis.steering(d, n), delta);
        *o = 1.0 / den.max(DEN_FLOOR);
    }
}

fn cropac_lcmv(
    order: usize,
    group: &CMatrix,
    basis: &BasisTable,
    params: &EstimatorParams,
    ws: &mut MapWorkspace,
    out: &mut [f64],
) {
    let n_hi = n_sh(order).min(group.dim());
    let n_lo = n_sh(order.saturating_sub(1));
    ws.eig.compute(group);
    let delta = loading(ws, params);
    for (d, o) in out.iter_mut().enumerate() {
        let y = basis.steering(d, n_hi);
        let power = 1.0 / inverse_form(ws, y, delta).max(DEN_FLOOR);

        // Unity-gain static beams of order N and N−1 toward d.
        let g_hi: f64 = y.iter().map(|v| v * v).sum();
        let y_lo = &y[..n_lo];
        let g_lo: f64 = y_lo.iter().map(|v| v * v).sum();
        let p_hi = group.quad_form_real(y) / (g_hi * g_hi);
        let p_lo = group.quad_form_real(y_lo) / (g_lo * g_lo);
        let cross = group.bilinear_real(y, y_lo) / (g_hi * g_lo);
        let norm = 0.5 * (p_hi + p_lo);
        let coherence = if norm > DEN_FLOOR {
            (params.cropac_lambda * cross / norm).clamp(0.0, 1.0)
        } else {
            0.0
        };
        *o = power * coherence;
    }
}

/// Noise subspace eigenvectors start at this index.
fn noise_start(ws: &MapWorkspace, params: &EstimatorParams) -> usize {
    clamp_sources(params.n_sources, ws.eig.dim())
}

#[inline]
fn spectrum(x: f64, log: bool) -> f64 {
    let inv = 1.0 / x.max(DEN_FLOOR);
    if log { inv.ln() } else { inv }
}

fn music(
    order: usize,
    group: &CMatrix,
    basis: &BasisTable,
    params: &EstimatorParams,
    ws: &mut MapWorkspace,
    log: bool,
    out: &mut [f64],
) {
    let n = n_sh(order).min(group.dim());
    ws.eig.compute(group);
    let k0 = noise_start(ws, params);
    for (d, o) in out.iter_mut().enumerate() {
        project(&ws.eig, basis.steering(d, n), &mut ws.proj);
        let noise: f64 = ws.proj[k0..].iter().sum();
        *o = spectrum(noise, log);
    }
}

fn min_norm(
    order: usize,
    group: &CMatrix,
    basis: &BasisTable,
    params: &EstimatorParams,
    ws: &mut MapWorkspace,
    log: bool,
    out: &mut [f64],
) {
    let n = n_sh(order).min(group.dim());
    ws.eig.compute(group);
    let k0 = noise_start(ws, params);

    // u = V_n V_nᴴ e₁ / (e₁ᴴ V_n V_nᴴ e₁)
    ws.u.clear();
    ws.u.resize(n, Complex64::new(0.0, 0.0));
    for k in k0..ws.eig.dim() {
        let v = ws.eig.vector(k);
        let c = v[0].conj();
        for (ui, vi) in ws.u.iter_mut().zip(v) {
            *ui += vi * c;
        }
    }
    let u0 = ws.u.first().map(|z| z.re).unwrap_or(0.0);
    if u0 <= DEN_FLOOR {
        out.fill(0.0);
        return;
    }
    for ui in ws.u.iter_mut() {
        *ui /= u0;
    }

    for (d, o) in out.iter_mut().enumerate() {
        let y = basis.steering(d, n);
        let z: Complex64 = y.iter().zip(&ws.u).map(|(&yi, ui)| ui * yi).sum();
        *o = spectrum(z.norm_sqr(), log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::{SphereGrid, angular_distance};
    use crate::core::sh::real_sh;

    /// Rank-one source at `dir` plus white noise, at order `order`.
    fn plane_wave_cov(order: usize, dir: [f64; 2], noise: f64) -> CMatrix {
        let n = n_sh(order);
        let mut y = vec![0.0; n];
        real_sh(order, dir[0], dir[1], &mut y);
        let mut c = CMatrix::zeros(n);
        for i in 0..n {
            for j in 0..n {
                let v = y[i] * y[j] + if i == j { noise } else { 0.0 };
                c.set(i, j, Complex64::new(v, 0.0));
            }
        }
        c
    }

    fn peak(out: &[f64]) -> usize {
        out.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    #[test]
    fn mode_names_round_trip() {
        for m in MapMode::ALL {
            assert_eq!(m.name().parse::<MapMode>(), Ok(m));
            assert_eq!(MapMode::from_u8(m.as_u8()), m);
        }
        assert_eq!("MUSIC_LOG".parse::<MapMode>(), Ok(MapMode::MusicLog));
        assert!("beamforming".parse::<MapMode>().is_err());
        assert_eq!(MapMode::from_u8(200), MapMode::Pwd);
    }

    #[test]
    fn every_mode_peaks_at_the_source() {
        let order = 3;
        let grid = SphereGrid::geodesic(6);
        let basis = BasisTable::new(order, &grid.dirs_rad);
        let src = [0.8f64, 0.35f64];
        let cov = plane_wave_cov(order, src, 0.05);
        let mut ws = MapWorkspace::new(order);
        let mut out = vec![0.0; basis.n_dirs()];
        let cell = 2.0 * (180.0f64 / 6.0 / 3.0).to_radians();
        for mode in MapMode::ALL {
            generate_map(mode, order, &cov, &basis, &EstimatorParams::default(), &mut ws, &mut out);
            assert!(out.iter().all(|v| v.is_finite()), "{mode}");
            let p = peak(&out);
            let err = angular_distance(grid.dirs_rad[p], src);
            assert!(err < cell, "{mode}: peak {:?} off by {err} rad", grid.dirs_rad[p]);
        }
    }

    #[test]
    fn degenerate_covariance_gives_zero_maps() {
        let order = 2;
        let grid = SphereGrid::geodesic(3);
        let basis = BasisTable::new(order, &grid.dirs_rad);
        let cov = CMatrix::zeros(n_sh(order));
        let mut ws = MapWorkspace::new(order);
        let mut out = vec![1.0; basis.n_dirs()];
        for mode in MapMode::ALL {
            out.fill(1.0);
            generate_map(mode, order, &cov, &basis, &EstimatorParams::default(), &mut ws, &mut out);
            assert!(out.iter().all(|&v| v == 0.0), "{mode}");
        }
    }

    #[test]
    fn lower_working_order_uses_prefix() {
        let grid = SphereGrid::geodesic(4);
        let basis = BasisTable::new(3, &grid.dirs_rad);
        let cov = plane_wave_cov(1, [1.5, 0.0], 0.1);
        let mut ws = MapWorkspace::new(3);
        let mut out = vec![0.0; basis.n_dirs()];
        generate_map(MapMode::Pwd, 1, &cov, &basis, &EstimatorParams::default(), &mut ws, &mut out);
        let p = peak(&out);
        assert!(angular_distance(grid.dirs_rad[p], [1.5, 0.0]) < 0.5);
    }

    #[test]
    fn source_count_is_clamped() {
        assert_eq!(clamp_sources(0, 16), 1);
        assert_eq!(clamp_sources(40, 16), 15);
        assert_eq!(clamp_sources(3, 4), 3);
    }
}
