//! Per-band spatial covariance with recursive averaging.

use crate::core::hybrid_stft::{NUM_BANDS, SpectralFrame};
use rustfft::num_complex::Complex64;

/// One Hermitian `n_ch × n_ch` matrix per band, row-major, contiguous.
#[derive(Clone, Debug)]
pub struct CovarianceBank {
    n_ch: usize,
    data: Vec<Complex64>,
}

impl CovarianceBank {
    pub fn new(n_ch: usize) -> Self {
        Self {
            n_ch,
            data: vec![Complex64::new(0.0, 0.0); NUM_BANDS * n_ch * n_ch],
        }
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.n_ch
    }

    /// Band `b` as a row-major `n_ch × n_ch` slice.
    #[inline]
    pub fn band(&self, b: usize) -> &[Complex64] {
        let m = self.n_ch * self.n_ch;
        &self.data[b * m..(b + 1) * m]
    }

    pub fn reset(&mut self) {
        self.data.fill(Complex64::new(0.0, 0.0));
    }

    /// `C ← α·C + (1−α)·XXᴴ/T` for every band of `frame`.
    ///
    /// `alpha` must already be clamped to `[0, cap]`. Only the upper triangle
    /// is computed; the lower one is its conjugate mirror.
    pub fn update(&mut self, frame: &SpectralFrame, alpha: f64) {
        debug_assert_eq!(frame.n_channels(), self.n_ch);
        let n = self.n_ch;
        let t = frame.n_slots();
        if t == 0 {
            return;
        }
        let inv_t = 1.0 / t as f64;
        let beta = 1.0 - alpha;
        for b in 0..NUM_BANDS {
            let x = frame.band(b);
            let c = &mut self.data[b * n * n..(b + 1) * n * n];
            for i in 0..n {
                let xi = &x[i * t..(i + 1) * t];
                for j in i..n {
                    let xj = &x[j * t..(j + 1) * t];
                    let mut acc = Complex64::new(0.0, 0.0);
                    for (a, bv) in xi.iter().zip(xj) {
                        let a = Complex64::new(a.re as f64, a.im as f64);
                        let bc = Complex64::new(bv.re as f64, -(bv.im as f64));
                        acc += a * bc;
                    }
                    let v = c[i * n + j] * alpha + acc * (inv_t * beta);
                    if i == j {
                        c[i * n + j] = Complex64::new(v.re, 0.0);
                    } else {
                        c[i * n + j] = v;
                        c[j * n + i] = v.conj();
                    }
                }
            }
        }
    }
}
