//! core/sh.rs — Real spherical harmonics (ACN order, N3D normalisation).
//!
//! N3D is the orthonormal basis scaled by √(4π): Y₀₀ = 1 and
//! (1/4π)∮ Yᵢ Yⱼ dΩ = δᵢⱼ. Associated Legendre functions are evaluated
//! without the Condon–Shortley phase, so first order reads W, Y, Z, X.

/// Highest supported analysis order.
pub const MAX_ORDER: usize = 7;

/// Number of SH channels for `order`.
#[inline]
pub const fn n_sh(order: usize) -> usize {
    (order + 1) * (order + 1)
}

/// Evaluate all `(order+1)²` real SH at (azimuth, elevation) [rad] into `out`.
pub fn real_sh(order: usize, azi: f64, elev: f64, out: &mut [f64]) {
    debug_assert!(out.len() >= n_sh(order));
    let x = elev.sin();
    let s = elev.cos().max(0.0);

    // P[n][m] stored flat as n*(order+1)+m
    let stride = order + 1;
    let mut p = vec![0.0f64; stride * stride];
    let mut pmm = 1.0f64;
    for m in 0..=order {
        if m > 0 {
            pmm *= (2 * m - 1) as f64 * s;
        }
        p[m * stride + m] = pmm;
        if m < order {
            p[(m + 1) * stride + m] = x * (2 * m + 1) as f64 * pmm;
        }
        for n in (m + 2)..=order {
            p[n * stride + m] = ((2 * n - 1) as f64 * x * p[(n - 1) * stride + m]
                - (n + m - 1) as f64 * p[(n - 2) * stride + m])
                / (n - m) as f64;
        }
    }

    for n in 0..=order {
        for m in 0..=n {
            // (n-m)!/(n+m)!
            let mut ratio = 1.0f64;
            for k in (n - m + 1)..=(n + m) {
                ratio /= k as f64;
            }
            let delta = if m == 0 { 1.0 } else { 2.0 };
            let norm = ((2 * n + 1) as f64 * delta * ratio).sqrt();
            let pv = norm * p[n * stride + m];
            let acn = n * n + n;
            if m == 0 {
                out[acn] = pv;
            } else {
                let mf = m as f64;
                out[acn + m] = pv * (mf * azi).cos();
                out[acn - m] = pv * (mf * azi).sin();
            }
        }
    }
}

/// SH basis sampled on a direction grid, stored direction-major so that the
/// steering vector of one direction is contiguous.
#[derive(Clone, Debug)]
pub struct BasisTable {
    order: usize,
    n_sh: usize,
    n_dirs: usize,
    data: Vec<f64>,
}

impl BasisTable {
    /// `dirs_rad`: `[azimuth, elevation]` pairs in radians.
    pub fn new(order: usize, dirs_rad: &[[f64; 2]]) -> Self {
        let n = n_sh(order);
        let mut data = vec![0.0; n * dirs_rad.len()];
        for (d, chunk) in dirs_rad.iter().zip(data.chunks_exact_mut(n)) {
            real_sh(order, d[0], d[1], chunk);
        }
        Self {
            order,
            n_sh: n,
            n_dirs: dirs_rad.len(),
            data,
        }
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }
    #[inline]
    pub fn n_sh(&self) -> usize {
        self.n_sh
    }
    #[inline]
    pub fn n_dirs(&self) -> usize {
        self.n_dirs
    }

    /// Steering vector of direction `dir`, truncated to the first `n` channels.
    /// ACN ordering makes a lower order a prefix of a higher one.
    #[inline]
    pub fn steering(&self, dir: usize, n: usize) -> &[f64] {
        let start = dir * self.n_sh;
        &self.data[start..start + n.min(self.n_sh)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn first_order_matches_closed_form() {
        let mut y = [0.0; 4];
        let (az, el) = (0.7f64, -0.3f64);
        real_sh(1, az, el, &mut y);
        let r3 = 3.0f64.sqrt();
        assert_abs_diff_eq!(y[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y[1], r3 * az.sin() * el.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(y[2], r3 * el.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(y[3], r3 * az.cos() * el.cos(), epsilon = 1e-12);

        real_sh(1, FRAC_PI_2, 0.0, &mut y);
        assert_abs_diff_eq!(y[1], r3, epsilon = 1e-12);
        assert_abs_diff_eq!(y[3], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn n3d_is_orthonormal_up_to_four_pi() {
        let order = 3;
        let n = n_sh(order);
        let (n_az, n_el) = (144usize, 72usize);
        let mut gram = vec![0.0f64; n * n];
        let mut y = vec![0.0; n];
        let d_az = 2.0 * PI / n_az as f64;
        let d_el = PI / n_el as f64;
        for j in 0..n_el {
            let el = -FRAC_PI_2 + (j as f64 + 0.5) * d_el;
            let w = el.cos() * d_az * d_el / (4.0 * PI);
            for i in 0..n_az {
                let az = (i as f64 + 0.5) * d_az;
                real_sh(order, az, el, &mut y);
                for a in 0..n {
                    for b in 0..n {
                        gram[a * n + b] += w * y[a] * y[b];
                    }
                }
            }
        }
        for a in 0..n {
            for b in 0..n {
                let expect = if a == b { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[a * n + b], expect, epsilon = 2e-3);
            }
        }
    }

    #[test]
    fn lower_order_is_prefix() {
        let dirs = [[0.3, 0.1], [2.0, -1.0]];
        let hi = BasisTable::new(4, &dirs);
        let lo = BasisTable::new(2, &dirs);
        for d in 0..2 {
            let a = hi.steering(d, n_sh(2));
            let b = lo.steering(d, n_sh(2));
            for (x, y) in a.iter().zip(b) {
                assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
            }
        }
    }
}
