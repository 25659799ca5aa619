//! core/hybrid_stft.rs — Hybrid short-time filterbank (analysis + synthesis)
//!
//! Design
//! -----
//! - Uniform stage: sine-windowed STFT, window = 2·hop, weighted overlap-add.
//!   sin²(n) + sin²(n + hop) = 1, so analysis·synthesis windows sum to one.
//! - Hybrid stage: the lowest `NUM_SPLIT_BANDS` uniform bands are split in two
//!   along the time-slot axis by complex-modulated half-band FIRs. The two
//!   filters of a pair sum to a pure delay of `HYBRID_DELAY_SLOTS` slots, and
//!   unsplit bands go through a matching delay line, so synthesis is a plain sum.
//! - Layout of the output bands (ascending frequency):
//!   `[0lo, 0hi, 1lo, 1hi, …, (S-1)hi, S, S+1, …, hop]`.
//!
//! Notes
//! -----
//! - forward∘inverse reproduces the input delayed by `processing_delay()`.
//! - No per-frame allocation; FFT plans and scratch are reused.
//! - `set_channels()` resizes state in place and keeps plans/windows/filters.

use rustfft::{Fft, FftPlanner, num_complex::Complex32};
use std::f32::consts::PI;
use std::sync::Arc;

/// Samples per time slot.
pub const HOP_SIZE: usize = 128;
/// Analysis/synthesis window length.
pub const WINDOW_SIZE: usize = 2 * HOP_SIZE;
/// Uniform bands (bins 0..=hop).
pub const NUM_UNIFORM_BANDS: usize = HOP_SIZE + 1;
/// Lowest uniform bands that are split in two.
pub const NUM_SPLIT_BANDS: usize = 4;
/// Total bands after hybrid splitting.
pub const NUM_BANDS: usize = NUM_UNIFORM_BANDS + NUM_SPLIT_BANDS;

const HYBRID_TAPS: usize = 7;
/// Group delay of the hybrid stage in slots.
pub const HYBRID_DELAY_SLOTS: usize = (HYBRID_TAPS - 1) / 2;

/// Complex subband frame `[band][channel][time-slot]`.
#[derive(Clone, Debug)]
pub struct SpectralFrame {
    n_channels: usize,
    n_slots: usize,
    data: Vec<Complex32>,
}

impl SpectralFrame {
    pub fn new(n_channels: usize, n_slots: usize) -> Self {
        Self {
            n_channels,
            n_slots,
            data: vec![Complex32::new(0.0, 0.0); NUM_BANDS * n_channels * n_slots],
        }
    }

    #[inline]
    pub fn n_bands(&self) -> usize {
        NUM_BANDS
    }
    #[inline]
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }
    #[inline]
    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    #[inline]
    fn idx(&self, band: usize, ch: usize, slot: usize) -> usize {
        (band * self.n_channels + ch) * self.n_slots + slot
    }

    #[inline]
    pub fn get(&self, band: usize, ch: usize, slot: usize) -> Complex32 {
        self.data[self.idx(band, ch, slot)]
    }

    #[inline]
    pub fn set(&mut self, band: usize, ch: usize, slot: usize, v: Complex32) {
        let i = self.idx(band, ch, slot);
        self.data[i] = v;
    }

    /// One band as a row-major `channels × slots` matrix.
    #[inline]
    pub fn band(&self, band: usize) -> &[Complex32] {
        let n = self.n_channels * self.n_slots;
        &self.data[band * n..(band + 1) * n]
    }

    pub fn clear(&mut self) {
        self.data.fill(Complex32::new(0.0, 0.0));
    }
}

/// Centre frequency [Hz] of every hybrid band at sample rate `fs`.
///
/// A split band reports the centre of its half inside the nominal bin width
/// (k ± ¼ bin); the DC pair folds onto +¼ bin.
pub fn band_centre_freqs(fs: f32) -> Vec<f32> {
    let df = fs / WINDOW_SIZE as f32;
    let mut out = Vec::with_capacity(NUM_BANDS);
    for k in 0..NUM_SPLIT_BANDS {
        for q in 0..2 {
            out.push((k as f32 + 0.5 * (q as f32 - 0.5)).abs() * df);
        }
    }
    for k in NUM_SPLIT_BANDS..NUM_UNIFORM_BANDS {
        out.push(k as f32 * df);
    }
    out
}

/// Hybrid filters for uniform band `k`, sub-band `q` (0 = lower half).
fn hybrid_filter(k: usize, q: usize) -> [Complex32; HYBRID_TAPS] {
    let d = HYBRID_DELAY_SLOTS as i32;
    // (-1)^k slot modulation of bin k is folded into the centre frequency.
    let phi = 0.5 * k as f32 + 0.5 * (q as f32 - 0.5);
    let mut h = [Complex32::new(0.0, 0.0); HYBRID_TAPS];
    for (tau, hv) in h.iter_mut().enumerate() {
        let m = tau as i32 - d;
        let g = if m == 0 {
            0.5
        } else if m % 2 == 0 {
            0.0
        } else {
            let x = PI * m as f32 / 2.0;
            let win = 0.5 * (1.0 + (PI * m as f32 / (d + 1) as f32).cos());
            0.5 * x.sin() / x * win
        };
        *hv = Complex32::from_polar(g, 2.0 * PI * phi * m as f32);
    }
    h
}

/// Multichannel hybrid filterbank.
#[derive(Clone)]
pub struct HybridFilterbank {
    fs: f32,
    n_channels: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex32>,
    filters: Vec<[Complex32; HYBRID_TAPS]>,
    centre_freqs: Vec<f32>,

    // per-channel streaming state (no per-frame alloc)
    in_buf: Vec<f32>,
    out_acc: Vec<f32>,
    hist: Vec<Complex32>,
    hist_pos: usize,
}

impl HybridFilterbank {
    pub fn new(fs: f32, n_channels: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(WINDOW_SIZE);
        let ifft = planner.plan_fft_inverse(WINDOW_SIZE);
        let window = (0..WINDOW_SIZE)
            .map(|n| (PI * (n as f32 + 0.5) / WINDOW_SIZE as f32).sin())
            .collect();
        let filters = (0..NUM_SPLIT_BANDS)
            .flat_map(|k| (0..2).map(move |q| hybrid_filter(k, q)))
            .collect();

        let mut fb = Self {
            fs,
            n_channels: 0,
            window,
            fft,
            ifft,
            fft_buf: vec![Complex32::new(0.0, 0.0); WINDOW_SIZE],
            filters,
            centre_freqs: band_centre_freqs(fs),
            in_buf: Vec::new(),
            out_acc: Vec::new(),
            hist: Vec::new(),
            hist_pos: 0,
        };
        fb.set_channels(n_channels);
        fb
    }

    /// Change the channel count in place. Streaming state is cleared; FFT
    /// plans, windows and hybrid filters are kept.
    pub fn set_channels(&mut self, n_channels: usize) {
        self.n_channels = n_channels;
        self.in_buf.resize(n_channels * WINDOW_SIZE, 0.0);
        self.out_acc.resize(n_channels * WINDOW_SIZE, 0.0);
        self.hist
            .resize(n_channels * NUM_UNIFORM_BANDS * HYBRID_TAPS, Complex32::new(0.0, 0.0));
        self.reset();
    }

    /// Clear streaming state.
    pub fn reset(&mut self) {
        self.in_buf.fill(0.0);
        self.out_acc.fill(0.0);
        self.hist.fill(Complex32::new(0.0, 0.0));
        self.hist_pos = 0;
    }

    #[inline]
    pub fn fs(&self) -> f32 {
        self.fs
    }
    #[inline]
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }
    #[inline]
    pub fn n_bands(&self) -> usize {
        NUM_BANDS
    }
    /// Centre frequencies [Hz].
    #[inline]
    pub fn centre_freqs(&self) -> &[f32] {
        &self.centre_freqs
    }

    /// Input→output latency of forward followed by inverse, in samples.
    #[inline]
    pub fn processing_delay(&self) -> usize {
        HOP_SIZE * (1 + HYBRID_DELAY_SLOTS)
    }

    /// Analyse `out.n_slots()` hops of every channel.
    ///
    /// `frame[ch]` must hold at least `n_slots · HOP_SIZE` samples; missing
    /// channels are treated as silence.
    pub fn forward<S: AsRef<[f32]>>(&mut self, frame: &[S], out: &mut SpectralFrame) {
        debug_assert_eq!(out.n_channels(), self.n_channels);
        let taps = HYBRID_TAPS;
        for t in 0..out.n_slots() {
            let pos = self.hist_pos;
            for ch in 0..self.n_channels {
                let buf = &mut self.in_buf[ch * WINDOW_SIZE..(ch + 1) * WINDOW_SIZE];
                buf.copy_within(HOP_SIZE.., 0);
                let tail = &mut buf[WINDOW_SIZE - HOP_SIZE..];
                match frame.get(ch) {
                    Some(src) => tail.copy_from_slice(&src.as_ref()[t * HOP_SIZE..(t + 1) * HOP_SIZE]),
                    None => tail.fill(0.0),
                }

                for ((z, &s), &w) in self.fft_buf.iter_mut().zip(buf.iter()).zip(&self.window) {
                    *z = Complex32::new(s * w, 0.0);
                }
                self.fft.process(&mut self.fft_buf);

                let base_ch = ch * NUM_UNIFORM_BANDS;
                for k in 0..NUM_UNIFORM_BANDS {
                    let base = (base_ch + k) * taps;
                    self.hist[base + pos] = self.fft_buf[k];
                    if k < NUM_SPLIT_BANDS {
                        for q in 0..2 {
                            let h = &self.filters[2 * k + q];
                            let mut acc = Complex32::new(0.0, 0.0);
                            for (tau, &hv) in h.iter().enumerate() {
                                acc += hv * self.hist[base + (pos + taps - tau) % taps];
                            }
                            out.set(2 * k + q, ch, t, acc);
                        }
                    } else {
                        let delayed = self.hist[base + (pos + taps - HYBRID_DELAY_SLOTS) % taps];
                        out.set(k + NUM_SPLIT_BANDS, ch, t, delayed);
                    }
                }
            }
            self.hist_pos = (pos + 1) % taps;
        }
    }

    /// Synthesise `input.n_slots()` hops per channel into `out[ch]`.
    pub fn inverse(&mut self, input: &SpectralFrame, out: &mut [Vec<f32>]) {
        debug_assert_eq!(input.n_channels(), self.n_channels);
        let inv_n = 1.0 / WINDOW_SIZE as f32;
        for t in 0..input.n_slots() {
            for ch in 0..self.n_channels {
                for k in 0..NUM_UNIFORM_BANDS {
                    self.fft_buf[k] = if k < NUM_SPLIT_BANDS {
                        input.get(2 * k, ch, t) + input.get(2 * k + 1, ch, t)
                    } else {
                        input.get(k + NUM_SPLIT_BANDS, ch, t)
                    };
                }
                // Reconstruct Hermitian symmetry
                for k in 1..HOP_SIZE {
                    self.fft_buf[WINDOW_SIZE - k] = self.fft_buf[k].conj();
                }
                self.ifft.process(&mut self.fft_buf);

                let acc = &mut self.out_acc[ch * WINDOW_SIZE..(ch + 1) * WINDOW_SIZE];
                for ((a, z), &w) in acc.iter_mut().zip(&self.fft_buf).zip(&self.window) {
                    *a += z.re * inv_n * w;
                }
                if let Some(dst) = out.get_mut(ch) {
                    dst[t * HOP_SIZE..(t + 1) * HOP_SIZE].copy_from_slice(&acc[..HOP_SIZE]);
                }
                acc.copy_within(HOP_SIZE.., 0);
                acc[WINDOW_SIZE - HOP_SIZE..].fill(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SLOTS: usize = 8;

    #[test]
    fn hybrid_pairs_sum_to_pure_delay() {
        for k in 0..NUM_SPLIT_BANDS {
            let lo = hybrid_filter(k, 0);
            let hi = hybrid_filter(k, 1);
            for tau in 0..HYBRID_TAPS {
                let s = lo[tau] + hi[tau];
                let expect = if tau == HYBRID_DELAY_SLOTS { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(s.re, expect, epsilon = 1e-6);
                assert_abs_diff_eq!(s.im, 0.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn impulse_reconstructs_at_processing_delay() {
        let n_ch = 2;
        let mut fb = HybridFilterbank::new(48_000.0, n_ch);
        let delay = fb.processing_delay();
        assert_eq!(delay, 512);

        let frame_len = SLOTS * HOP_SIZE;
        let n_frames = 3;
        let impulse_at = 37;
        let mut input = vec![vec![0.0f32; frame_len * n_frames]; n_ch];
        input[0][impulse_at] = 1.0;
        input[1][impulse_at + 5] = -0.5;

        let mut spec = SpectralFrame::new(n_ch, SLOTS);
        let mut out_frame = vec![vec![0.0f32; frame_len]; n_ch];
        let mut output = vec![Vec::new(); n_ch];
        for f in 0..n_frames {
            let chunk: Vec<&[f32]> = input
                .iter()
                .map(|c| &c[f * frame_len..(f + 1) * frame_len])
                .collect();
            fb.forward(&chunk, &mut spec);
            fb.inverse(&spec, &mut out_frame);
            for ch in 0..n_ch {
                output[ch].extend_from_slice(&out_frame[ch]);
            }
        }

        for ch in 0..n_ch {
            for (i, &y) in output[ch].iter().enumerate() {
                let x = if i >= delay { input[ch][i - delay] } else { 0.0 };
                assert_abs_diff_eq!(y, x, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn centre_freqs_scale_with_sample_rate() {
        let f48 = band_centre_freqs(48_000.0);
        let f441 = band_centre_freqs(44_100.0);
        assert_eq!(f48.len(), NUM_BANDS);
        assert_abs_diff_eq!(*f48.last().unwrap(), 24_000.0, epsilon = 1e-2);
        assert_abs_diff_eq!(*f441.last().unwrap(), 22_050.0, epsilon = 1e-2);
        // ascending above the DC pair
        for w in f48[1..].windows(2) {
            assert!(w[1] > w[0], "{} !> {}", w[1], w[0]);
        }
    }

    #[test]
    fn sinusoid_lands_in_its_band() {
        let fs = 48_000.0;
        let mut fb = HybridFilterbank::new(fs, 1);
        let freqs = fb.centre_freqs().to_vec();
        let f0 = 3_000.0;
        let x: Vec<f32> = (0..SLOTS * HOP_SIZE * 2)
            .map(|i| (2.0 * PI * f0 * i as f32 / fs).sin())
            .collect();
        let mut spec = SpectralFrame::new(1, SLOTS);
        fb.forward(&[&x[..SLOTS * HOP_SIZE]], &mut spec);
        fb.forward(&[&x[SLOTS * HOP_SIZE..]], &mut spec);

        let energy: Vec<f32> = (0..NUM_BANDS)
            .map(|b| spec.band(b).iter().map(|z| z.norm_sqr()).sum())
            .collect();
        let peak = energy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!((freqs[peak] - f0).abs() <= fs / WINDOW_SIZE as f32, "peak at {} Hz", freqs[peak]);
    }

    #[test]
    fn set_channels_keeps_reconstruction() {
        let mut fb = HybridFilterbank::new(48_000.0, 1);
        fb.set_channels(4);
        assert_eq!(fb.n_channels(), 4);

        let frame_len = SLOTS * HOP_SIZE;
        let mut x = vec![vec![0.0f32; frame_len]; 4];
        x[3][10] = 1.0;
        let mut spec = SpectralFrame::new(4, SLOTS);
        let mut y = vec![vec![0.0f32; frame_len]; 4];
        fb.forward(&x, &mut spec);
        fb.inverse(&spec, &mut y);
        assert_abs_diff_eq!(y[3][10 + fb.processing_delay()], 1.0, epsilon = 1e-5);
    }
}
