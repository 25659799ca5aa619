//! core/grid.rs — Direction grids.
//!
//! - Coarse analysis grid: geodesic sphere (icosahedron with every face split
//!   into f² triangles, projected to the unit sphere). 10f²+2 vertices; f = 9
//!   gives the 812-direction grid used for map generation.
//! - Display grid: equirectangular pixel centres for a horizontal field of view
//!   and aspect ratio, azimuth decreasing left→right, elevation top→bottom.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subdivision frequency of the coarse analysis grid.
pub const GEOSPHERE_FREQ: usize = 9;

/// Unit-sphere point set with its triangulation.
#[derive(Clone, Debug)]
pub struct SphereGrid {
    /// Unit vectors.
    pub xyz: Vec<[f64; 3]>,
    /// `[azimuth, elevation]` in radians.
    pub dirs_rad: Vec<[f64; 2]>,
    /// Vertex indices of every triangle.
    pub triangles: Vec<[usize; 3]>,
}

const PHI: f64 = 1.618_033_988_749_895;

const ICO_VERTS: [[f64; 3]; 12] = [
    [-1.0, PHI, 0.0],
    [1.0, PHI, 0.0],
    [-1.0, -PHI, 0.0],
    [1.0, -PHI, 0.0],
    [0.0, -1.0, PHI],
    [0.0, 1.0, PHI],
    [0.0, -1.0, -PHI],
    [0.0, 1.0, -PHI],
    [PHI, 0.0, -1.0],
    [PHI, 0.0, 1.0],
    [-PHI, 0.0, -1.0],
    [-PHI, 0.0, 1.0],
];

const ICO_FACES: [[usize; 3]; 20] = [
    [0, 11, 5],
    [0, 5, 1],
    [0, 1, 7],
    [0, 7, 10],
    [0, 10, 11],
    [1, 5, 9],
    [5, 11, 4],
    [11, 10, 2],
    [10, 7, 6],
    [7, 1, 8],
    [3, 9, 4],
    [3, 4, 2],
    [3, 2, 6],
    [3, 6, 8],
    [3, 8, 9],
    [4, 9, 5],
    [2, 4, 11],
    [6, 2, 10],
    [8, 6, 7],
    [9, 8, 1],
];

#[inline]
pub fn normalize(v: [f64; 3]) -> [f64; 3] {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    [v[0] / n, v[1] / n, v[2] / n]
}

#[inline]
pub fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// (azimuth, elevation) [rad] → unit vector.
#[inline]
pub fn unit_vector(azi: f64, elev: f64) -> [f64; 3] {
    [elev.cos() * azi.cos(), elev.cos() * azi.sin(), elev.sin()]
}

/// Unit vector → (azimuth, elevation) [rad].
#[inline]
pub fn to_azi_elev(v: &[f64; 3]) -> [f64; 2] {
    [v[1].atan2(v[0]), v[2].clamp(-1.0, 1.0).asin()]
}

/// Great-circle angle [rad] between two directions given in radians.
pub fn angular_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (u, v) = (unit_vector(a[0], a[1]), unit_vector(b[0], b[1]));
    dot(&u, &v).clamp(-1.0, 1.0).acos()
}

impl SphereGrid {
    /// Geodesic grid of subdivision frequency `freq` (≥ 1).
    pub fn geodesic(freq: usize) -> Self {
        let f = freq.max(1);
        let corners: Vec<[f64; 3]> = ICO_VERTS.iter().map(|&v| normalize(v)).collect();

        let mut xyz: Vec<[f64; 3]> = Vec::with_capacity(10 * f * f + 2);
        let mut lookup: HashMap<[i64; 3], usize> = HashMap::new();
        let mut vertex = |p: [f64; 3], xyz: &mut Vec<[f64; 3]>| -> usize {
            let u = normalize(p);
            let key = [
                (u[0] * 1e7).round() as i64,
                (u[1] * 1e7).round() as i64,
                (u[2] * 1e7).round() as i64,
            ];
            *lookup.entry(key).or_insert_with(|| {
                xyz.push(u);
                xyz.len() - 1
            })
        };

        let mut triangles = Vec::with_capacity(20 * f * f);
        let ff = f as f64;
        for face in ICO_FACES {
            let (a, b, c) = (corners[face[0]], corners[face[1]], corners[face[2]]);
            // row i walks a→b, column j walks a→c
            let mut idx = vec![vec![0usize; f + 1]; f + 1];
            for i in 0..=f {
                for j in 0..=(f - i) {
                    let (wi, wj) = (i as f64 / ff, j as f64 / ff);
                    let p = [
                        a[0] + (b[0] - a[0]) * wi + (c[0] - a[0]) * wj,
                        a[1] + (b[1] - a[1]) * wi + (c[1] - a[1]) * wj,
                        a[2] + (b[2] - a[2]) * wi + (c[2] - a[2]) * wj,
                    ];
                    idx[i][j] = vertex(p, &mut xyz);
                }
            }
            for i in 0..f {
                for j in 0..(f - i) {
                    triangles.push([idx[i][j], idx[i + 1][j], idx[i][j + 1]]);
                    if i + j + 1 < f {
                        triangles.push([idx[i + 1][j], idx[i + 1][j + 1], idx[i][j + 1]]);
                    }
                }
            }
        }

        let dirs_rad = xyz.iter().map(to_azi_elev).collect();
        Self {
            xyz,
            dirs_rad,
            triangles,
        }
    }

    #[inline]
    pub fn n_dirs(&self) -> usize {
        self.xyz.len()
    }
}

/// Horizontal field of view of the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HorizontalFov {
    #[default]
    Deg360,
    Deg180,
    Deg90,
    Deg60,
}

impl HorizontalFov {
    pub fn degrees(self) -> f32 {
        match self {
            Self::Deg360 => 360.0,
            Self::Deg180 => 180.0,
            Self::Deg90 => 90.0,
            Self::Deg60 => 60.0,
        }
    }
}

/// Display aspect ratio (width : height).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AspectRatio {
    #[default]
    TwoOne,
    SixteenNine,
    FourThree,
}

impl AspectRatio {
    pub fn ratio(self) -> f32 {
        match self {
            Self::TwoOne => 2.0,
            Self::SixteenNine => 16.0 / 9.0,
            Self::FourThree => 4.0 / 3.0,
        }
    }
}

/// Widest display grid accepted; larger requests are clamped.
pub const MAX_DISPLAY_WIDTH: usize = 1024;

/// Display pixel layout.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayGeometry {
    pub hfov: HorizontalFov,
    pub aspect: AspectRatio,
    pub width: usize,
}

impl DisplayGeometry {
    /// Pixel rows; at least one.
    pub fn height(&self) -> usize {
        ((self.width as f32 / self.aspect.ratio()).round() as usize).max(1)
    }

    pub fn n_dirs(&self) -> usize {
        self.width * self.height()
    }

    /// Vertical field of view [deg], never beyond the poles.
    pub fn vfov_deg(&self) -> f32 {
        (self.hfov.degrees() / self.aspect.ratio()).min(180.0)
    }

    /// Pixel-centre directions `[azimuth, elevation]` in degrees, row-major,
    /// top-left first.
    pub fn directions_deg(&self) -> Vec<[f32; 2]> {
        let (w, h) = (self.width, self.height());
        let hfov = self.hfov.degrees();
        let vfov = self.vfov_deg();
        let mut out = Vec::with_capacity(w * h);
        for row in 0..h {
            let el = vfov / 2.0 - (row as f32 + 0.5) * vfov / h as f32;
            for col in 0..w {
                let az = hfov / 2.0 - (col as f32 + 0.5) * hfov / w as f32;
                out.push([az, el]);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn geodesic_counts() {
        for f in [1usize, 2, 4, 9] {
            let g = SphereGrid::geodesic(f);
            assert_eq!(g.n_dirs(), 10 * f * f + 2, "f={f}");
            assert_eq!(g.triangles.len(), 20 * f * f, "f={f}");
        }
        assert_eq!(SphereGrid::geodesic(GEOSPHERE_FREQ).n_dirs(), 812);
    }

    #[test]
    fn geodesic_points_are_unit_and_round_trip() {
        let g = SphereGrid::geodesic(3);
        for (v, d) in g.xyz.iter().zip(&g.dirs_rad) {
            assert_abs_diff_eq!(dot(v, v), 1.0, epsilon = 1e-12);
            let u = unit_vector(d[0], d[1]);
            for k in 0..3 {
                assert_abs_diff_eq!(u[k], v[k], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn display_grid_layout() {
        let geo = DisplayGeometry {
            hfov: HorizontalFov::Deg360,
            aspect: AspectRatio::TwoOne,
            width: 36,
        };
        assert_eq!(geo.height(), 18);
        let dirs = geo.directions_deg();
        assert_eq!(dirs.len(), geo.n_dirs());
        assert_abs_diff_eq!(dirs[0][0], 175.0, epsilon = 1e-4);
        assert_abs_diff_eq!(dirs[0][1], 85.0, epsilon = 1e-4);
        let last = dirs[dirs.len() - 1];
        assert_abs_diff_eq!(last[0], -175.0, epsilon = 1e-4);
        assert_abs_diff_eq!(last[1], -85.0, epsilon = 1e-4);
    }
}
