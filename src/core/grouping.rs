//! Band grouping: working order and group covariance.

use crate::core::covariance::CovarianceBank;
use crate::core::linalg::CMatrix;
use crate::core::sh::n_sh;

/// Per-band order clamped to `[1, master]`.
#[inline]
pub fn band_order(order: usize, master: usize) -> usize {
    order.clamp(1, master.max(1))
}

/// Highest clamped order among bands with a positive EQ weight, at least 1.
pub fn working_order(band_orders: &[usize], weights: &[f32], master: usize) -> usize {
    band_orders
        .iter()
        .zip(weights)
        .filter(|(_, w)| **w > 0.0)
        .map(|(&o, _)| band_order(o, master))
        .max()
        .unwrap_or(1)
        .max(1)
}

/// Assemble the group covariance into `out` and return the working order.
///
/// Every active band adds `eq_scale · weight · C_band` into the leading
/// `(o+1)²` block, `o` being that band's own clamped order. The result is a
/// non-negative sum of Hermitian PSD terms.
pub fn build_group(
    bank: &CovarianceBank,
    band_orders: &[usize],
    weights: &[f32],
    master: usize,
    eq_scale: f64,
    out: &mut CMatrix,
) -> usize {
    let order = working_order(band_orders, weights, master);
    let n_ch = bank.n_channels();
    out.set_dim(n_sh(order).min(n_ch));
    for (b, (&o, &w)) in band_orders.iter().zip(weights).enumerate() {
        if w <= 0.0 {
            continue;
        }
        let m = n_sh(band_order(o, master)).min(out.dim());
        out.add_scaled_block(bank.band(b), n_ch, m, eq_scale * w as f64);
    }
    order
}
