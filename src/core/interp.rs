//! Sparse coarse-grid → display-grid interpolation.
//!
//! Each display direction is expressed with VBAP gains of the coarse-grid
//! triangle that contains it (g = L⁻¹p with the triangle's unit vectors as the
//! columns of L), normalised to sum to one. The result is a linear weighted sum
//! of at most three coarse values per display pixel.

use crate::core::grid::{SphereGrid, dot, unit_vector};

/// Up to three `(coarse index, weight)` pairs for one display direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpWeights {
    pub idx: [usize; 3],
    pub w: [f32; 3],
}

/// Interpolation table for one display geometry.
#[derive(Clone, Debug)]
pub struct InterpTable {
    n_src: usize,
    weights: Vec<InterpWeights>,
}

#[inline]
fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Rows of L⁻¹ for a triangle (b×c, c×a, a×b)/det.
fn inverse_rows(a: &[f64; 3], b: &[f64; 3], c: &[f64; 3]) -> [[f64; 3]; 3] {
    let (bc, ca, ab) = (cross(b, c), cross(c, a), cross(a, b));
    let det = dot(a, &bc);
    let inv = if det.abs() > 1e-15 { 1.0 / det } else { 0.0 };
    [
        [bc[0] * inv, bc[1] * inv, bc[2] * inv],
        [ca[0] * inv, ca[1] * inv, ca[2] * inv],
        [ab[0] * inv, ab[1] * inv, ab[2] * inv],
    ]
}

impl InterpTable {
    /// Build weights from `grid` to the display directions `dense_deg`
    /// (`[azimuth, elevation]` in degrees).
    pub fn new(grid: &SphereGrid, dense_deg: &[[f32; 2]]) -> Self {
        let inv: Vec<[[f64; 3]; 3]> = grid
            .triangles
            .iter()
            .map(|t| inverse_rows(&grid.xyz[t[0]], &grid.xyz[t[1]], &grid.xyz[t[2]]))
            .collect();
        let mut vertex_tris = vec![Vec::new(); grid.n_dirs()];
        for (ti, t) in grid.triangles.iter().enumerate() {
            for &v in t {
                vertex_tris[v].push(ti);
            }
        }

        let gains = |ti: usize, p: &[f64; 3]| -> [f64; 3] {
            let r = &inv[ti];
            [dot(&r[0], p), dot(&r[1], p), dot(&r[2], p)]
        };
        let min3 = |g: &[f64; 3]| g[0].min(g[1]).min(g[2]);

        let weights = dense_deg
            .iter()
            .map(|d| {
                let p = unit_vector((d[0] as f64).to_radians(), (d[1] as f64).to_radians());
                let nearest = grid
                    .xyz
                    .iter()
                    .enumerate()
                    .max_by(|a, b| dot(a.1, &p).total_cmp(&dot(b.1, &p)))
                    .map(|(i, _)| i)
                    .unwrap_or(0);

                let best_of = |cands: &mut dyn Iterator<Item = usize>| {
                    cands
                        .map(|ti| (ti, gains(ti, &p)))
                        .max_by(|a, b| min3(&a.1).total_cmp(&min3(&b.1)))
                };
                let mut best = best_of(&mut vertex_tris[nearest].iter().copied());
                if best.is_none_or(|(_, g)| min3(&g) < -1e-9) {
                    best = best_of(&mut (0..grid.triangles.len()));
                }

                match best {
                    Some((ti, g)) => {
                        let g = [g[0].max(0.0), g[1].max(0.0), g[2].max(0.0)];
                        let sum = g[0] + g[1] + g[2];
                        if sum > 0.0 {
                            let t = grid.triangles[ti];
                            InterpWeights {
                                idx: t,
                                w: [(g[0] / sum) as f32, (g[1] / sum) as f32, (g[2] / sum) as f32],
                            }
                        } else {
                            single(nearest)
                        }
                    }
                    None => single(nearest),
                }
            })
            .collect();

        Self {
            n_src: grid.n_dirs(),
            weights,
        }
    }

    #[inline]
    pub fn n_src(&self) -> usize {
        self.n_src
    }

    #[inline]
    pub fn n_dst(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn weights(&self) -> &[InterpWeights] {
        &self.weights
    }

    /// `dst[i] = Σ w·src[idx]`.
    pub fn apply(&self, src: &[f64], dst: &mut [f32]) {
        debug_assert_eq!(src.len(), self.n_src);
        for (out, iw) in dst.iter_mut().zip(&self.weights) {
            let mut acc = 0.0f64;
            for k in 0..3 {
                acc += iw.w[k] as f64 * src[iw.idx[k]];
            }
            *out = acc as f32;
        }
    }
}

fn single(i: usize) -> InterpWeights {
    InterpWeights {
        idx: [i, i, i],
        w: [1.0, 0.0, 0.0],
    }
}
