//! Small dense complex matrices for spatial covariance work.
//!
//! - `CMatrix`: square, row-major, `Complex64`. Capacity is fixed at creation
//!   and `set_dim()` never reallocates below it, so the per-frame path can
//!   shrink/grow the working size without touching the allocator.
//! - `HermitianEigen`: cyclic complex Jacobi; eigenvalues sorted descending.

use rustfft::num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Square complex matrix, row-major.
#[derive(Clone, Debug)]
pub struct CMatrix {
    n: usize,
    data: Vec<Complex64>,
}

impl CMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![ZERO; n * n],
        }
    }

    /// Zero matrix of size `n` with room for `cap × cap` without reallocating.
    pub fn with_capacity(n: usize, cap: usize) -> Self {
        let mut data = Vec::with_capacity(cap.max(n) * cap.max(n));
        data.resize(n * n, ZERO);
        Self { n, data }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.n
    }

    /// Resize to `n × n` and zero.
    pub fn set_dim(&mut self, n: usize) {
        self.n = n;
        self.data.clear();
        self.data.resize(n * n, ZERO);
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Complex64 {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: Complex64) {
        self.data[i * self.n + j] = v;
    }

    #[inline]
    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(ZERO);
    }

    pub fn copy_from(&mut self, other: &CMatrix) {
        self.set_dim(other.n);
        self.data.copy_from_slice(&other.data);
    }

    /// Real part of the trace.
    pub fn trace(&self) -> f64 {
        (0..self.n).map(|i| self.get(i, i).re).sum()
    }

    /// `self[..m, ..m] += scale · src[..m, ..m]` where `src` is row-major with
    /// leading dimension `ld`.
    pub fn add_scaled_block(&mut self, src: &[Complex64], ld: usize, m: usize, scale: f64) {
        debug_assert!(m <= self.n && m <= ld);
        for i in 0..m {
            let dst = &mut self.data[i * self.n..i * self.n + m];
            let s = &src[i * ld..i * ld + m];
            for (d, &v) in dst.iter_mut().zip(s) {
                *d += v * scale;
            }
        }
    }

    /// Largest |A − Aᴴ| element.
    pub fn hermitian_defect(&self) -> f64 {
        let mut worst = 0.0f64;
        for i in 0..self.n {
            for j in i..self.n {
                worst = worst.max((self.get(i, j) - self.get(j, i).conj()).norm());
            }
        }
        worst
    }

    /// `xᴴ A x` for a complex vector.
    pub fn quad_form(&self, x: &[Complex64]) -> Complex64 {
        let mut acc = ZERO;
        for i in 0..self.n {
            let row = &self.data[i * self.n..(i + 1) * self.n];
            let ax: Complex64 = row.iter().zip(x).map(|(a, b)| a * b).sum();
            acc += x[i].conj() * ax;
        }
        acc
    }

    /// `yᴴ A y` for a real vector `y`, restricted to `y.len()` leading rows/cols.
    /// Real for Hermitian `A`.
    pub fn quad_form_real(&self, y: &[f64]) -> f64 {
        let m = y.len().min(self.n);
        let mut acc = 0.0f64;
        for i in 0..m {
            let row = &self.data[i * self.n..i * self.n + m];
            let mut ri = 0.0f64;
            for (a, &yj) in row.iter().zip(&y[..m]) {
                ri += a.re * yj;
            }
            acc += y[i] * ri;
        }
        acc
    }

    /// `Re(aᵀ A b)` for real vectors of possibly different lengths; the
    /// shorter one is treated as zero-padded.
    pub fn bilinear_real(&self, a: &[f64], b: &[f64]) -> f64 {
        let ma = a.len().min(self.n);
        let mb = b.len().min(self.n);
        let mut acc = 0.0f64;
        for (i, &ai) in a[..ma].iter().enumerate() {
            let row = &self.data[i * self.n..i * self.n + mb];
            let ri: f64 = row.iter().zip(&b[..mb]).map(|(z, &bj)| z.re * bj).sum();
            acc += ai * ri;
        }
        acc
    }
}

/// Eigendecomposition workspace for Hermitian matrices.
///
/// After `compute()`, `value(i)` is the i-th largest eigenvalue and
/// `vector(i)` its unit-norm eigenvector.
#[derive(Clone, Debug)]
pub struct HermitianEigen {
    a: CMatrix,
    v: CMatrix,
    values: Vec<f64>,
    order: Vec<usize>,
    sorted: CMatrix,
}

const MAX_SWEEPS: usize = 64;

impl HermitianEigen {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            a: CMatrix::with_capacity(0, cap),
            v: CMatrix::with_capacity(0, cap),
            values: Vec::with_capacity(cap),
            order: Vec::with_capacity(cap),
            sorted: CMatrix::with_capacity(0, cap),
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }

    /// Eigenvector `i` (descending eigenvalue order), stored contiguous.
    #[inline]
    pub fn vector(&self, i: usize) -> &[Complex64] {
        let n = self.values.len();
        &self.sorted.as_slice()[i * n..(i + 1) * n]
    }

    /// Decompose the Hermitian matrix `m`.
    pub fn compute(&mut self, m: &CMatrix) {
        let n = m.dim();
        self.a.copy_from(m);
        self.v.set_dim(n);
        for i in 0..n {
            self.v.set(i, i, Complex64::new(1.0, 0.0));
        }

        let total: f64 = self.a.as_slice().iter().map(|z| z.norm_sqr()).sum();
        let tol = 1e-24 * total.max(f64::MIN_POSITIVE);
        for _ in 0..MAX_SWEEPS {
            let mut off = 0.0f64;
            for p in 0..n {
                for q in (p + 1)..n {
                    off += self.a.get(p, q).norm_sqr();
                }
            }
            if off <= tol {
                break;
            }
            for p in 0..n {
                for q in (p + 1)..n {
                    self.rotate(p, q);
                }
            }
        }

        self.values.clear();
        self.values.extend((0..n).map(|i| self.a.get(i, i).re));
        self.order.clear();
        self.order.extend(0..n);
        let vals = &self.values;
        self.order
            .sort_unstable_by(|&i, &j| vals[j].total_cmp(&vals[i]));

        // Column k of V → row k of `sorted` (contiguous eigenvectors).
        self.sorted.set_dim(n);
        for (k, &src) in self.order.iter().enumerate() {
            for r in 0..n {
                self.sorted.set(k, r, self.v.get(r, src));
            }
        }
        for k in 0..n {
            self.values[k] = self.a.get(self.order[k], self.order[k]).re;
        }
    }

    /// One Jacobi rotation zeroing a[p][q].
    fn rotate(&mut self, p: usize, q: usize) {
        let apq = self.a.get(p, q);
        let abs = apq.norm();
        if abs < 1e-300 {
            return;
        }
        let ph = apq / abs;
        let app = self.a.get(p, p).re;
        let aqq = self.a.get(q, q).re;
        let tau = (aqq - app) / (2.0 * abs);
        let t = if tau >= 0.0 {
            1.0 / (tau + (1.0 + tau * tau).sqrt())
        } else {
            -1.0 / (-tau + (1.0 + tau * tau).sqrt())
        };
        let c = 1.0 / (1.0 + t * t).sqrt();
        let s = t * c;
        let n = self.a.dim();

        // U = [[c, s·ph], [-s·conj(ph), c]] on (p, q); A ← Uᴴ A U, V ← V U
        for k in 0..n {
            let akp = self.a.get(k, p);
            let akq = self.a.get(k, q);
            self.a.set(k, p, akp * c - akq * ph.conj() * s);
            self.a.set(k, q, akp * ph * s + akq * c);

            let vkp = self.v.get(k, p);
            let vkq = self.v.get(k, q);
            self.v.set(k, p, vkp * c - vkq * ph.conj() * s);
            self.v.set(k, q, vkp * ph * s + vkq * c);
        }
        for k in 0..n {
            let apk = self.a.get(p, k);
            let aqk = self.a.get(q, k);
            self.a.set(p, k, apk * c - aqk * ph * s);
            self.a.set(q, k, apk * ph.conj() * s + aqk * c);
        }
        self.a.set(p, q, ZERO);
        self.a.set(q, p, ZERO);
        let (dp, dq) = (self.a.get(p, p).re, self.a.get(q, q).re);
        self.a.set(p, p, Complex64::new(dp, 0.0));
        self.a.set(q, q, Complex64::new(dq, 0.0));
    }
}
