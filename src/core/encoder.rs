//! Synthetic Ambisonic scenes.
//!
//! Plane-wave sources carrying independent white noise, encoded with the same
//! N3D/ACN basis the analysis uses, plus an optional uncorrelated noise floor
//! per channel. Used by the CLI demo, tests and benches.

use crate::core::sh::{n_sh, real_sh};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// SH encoding gains of a plane wave from (azimuth, elevation) in degrees.
pub fn encoding_gains(order: usize, azi_deg: f32, elev_deg: f32) -> Vec<f32> {
    let mut y = vec![0.0f64; n_sh(order)];
    real_sh(
        order,
        (azi_deg as f64).to_radians(),
        (elev_deg as f64).to_radians(),
        &mut y,
    );
    y.into_iter().map(|v| v as f32).collect()
}

/// Encode a mono `signal` into `out[ch]` (overwrites).
pub fn encode_plane_wave(gains: &[f32], signal: &[f32], out: &mut [Vec<f32>]) {
    for (ch, g) in out.iter_mut().zip(gains) {
        ch.clear();
        ch.extend(signal.iter().map(|s| s * g));
    }
}

#[derive(Clone, Debug)]
struct Source {
    gains: Vec<f32>,
    amplitude: f32,
}

/// Block generator for a static multi-source scene.
#[derive(Clone, Debug)]
pub struct SceneGenerator {
    order: usize,
    sources: Vec<Source>,
    noise_floor: f32,
    rng: StdRng,
}

impl SceneGenerator {
    pub fn new(order: usize, seed: u64) -> Self {
        Self {
            order,
            sources: Vec::new(),
            noise_floor: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_source(mut self, azi_deg: f32, elev_deg: f32, amplitude: f32) -> Self {
        self.sources.push(Source {
            gains: encoding_gains(self.order, azi_deg, elev_deg),
            amplitude,
        });
        self
    }

    /// Independent white noise of this RMS-ish level on every channel.
    pub fn with_noise_floor(mut self, level: f32) -> Self {
        self.noise_floor = level;
        self
    }

    pub fn n_channels(&self) -> usize {
        n_sh(self.order)
    }

    /// Next `n_samples` of every channel into `out` (resized as needed).
    pub fn next_block(&mut self, n_samples: usize, out: &mut Vec<Vec<f32>>) {
        let n_ch = self.n_channels();
        out.resize_with(n_ch, Vec::new);
        for ch in out.iter_mut() {
            ch.clear();
            ch.resize(n_samples, 0.0);
        }
        for src in &self.sources {
            for t in 0..n_samples {
                let s = src.amplitude * self.rng.random_range(-1.0f32..1.0);
                for (ch, &g) in out.iter_mut().zip(&src.gains) {
                    ch[t] += g * s;
                }
            }
        }
        if self.noise_floor > 0.0 {
            for ch in out.iter_mut() {
                for v in ch.iter_mut() {
                    *v += self.noise_floor * self.rng.random_range(-1.0f32..1.0);
                }
            }
        }
    }
}
