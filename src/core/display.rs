//! core/display.rs — Temporal smoothing, display interpolation and the
//! lock-free display handoff.
//!
//! Design
//! -----
//! - `DisplayStore` holds two slots of `AtomicU32` (f32 bits). The engine
//!   always writes the slot that is *not* the latest completed one, then
//!   publishes it by flipping `latest` and bumping the generation.
//! - Each slot carries a sequence counter (odd while being written) so a
//!   reader that raced two publishes retries instead of returning a torn map.
//! - Directions, width and field of view are immutable per store; a new
//!   display geometry means a new store built during reinit.

use crate::core::estimators::MapMode;
use crate::core::grid::{AspectRatio, DisplayGeometry, HorizontalFov};
use crate::core::interp::InterpTable;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering, fence};
use std::thread;

/// Guards min-max normalisation of a flat map.
pub const NORM_EPS: f32 = 1e-11;

const READ_RETRIES: usize = 16;
/// Retry bursts, separated by a yield, before a read gives up.
const READ_ROUNDS: usize = 8;

/// `prev ← (1−β)·new + β·prev`; non-finite inputs count as zero.
pub fn smooth(prev: &mut [f64], new: &[f64], beta: f64) {
    for (p, &n) in prev.iter_mut().zip(new) {
        let n = if n.is_finite() { n } else { 0.0 };
        let v = (1.0 - beta) * n + beta * *p;
        *p = if v.is_finite() { v } else { 0.0 };
    }
}

/// Min-max normalise into `[0, 1]`. Non-finite values become 0 first; a
/// flat map becomes all zeros.
pub fn normalise(values: &mut [f32]) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
        lo = lo.min(*v);
        hi = hi.max(*v);
    }
    if values.is_empty() {
        return;
    }
    let range = (hi - lo) + NORM_EPS;
    for v in values.iter_mut() {
        *v = ((*v - lo) / range).clamp(0.0, 1.0);
    }
}

/// Double-buffered display map for one display geometry.
#[derive(Debug)]
pub struct DisplayStore {
    geometry: DisplayGeometry,
    dirs_deg: Arc<[[f32; 2]]>,
    slots: [Box<[AtomicU32]>; 2],
    seq: [AtomicU64; 2],
    latest: AtomicUsize,
    ready: AtomicBool,
    generation: AtomicU64,
    mode: AtomicU8,
}

/// What a reader gets: the latest completed map and its context.
#[derive(Clone, Debug)]
pub struct DisplaySnapshot {
    /// False until the first map has been published for this geometry.
    pub ready: bool,
    pub map: Vec<f32>,
    /// `[azimuth, elevation]` in degrees, row-major, same order as `map`.
    pub dirs_deg: Arc<[[f32; 2]]>,
    pub width: usize,
    pub height: usize,
    pub hfov: HorizontalFov,
    pub aspect: AspectRatio,
    /// Number of maps published so far.
    pub generation: u64,
    pub mode: MapMode,
}

impl DisplaySnapshot {
    /// Direction `[azimuth, elevation]` of the brightest pixel.
    pub fn peak_direction(&self) -> Option<[f32; 2]> {
        self.map
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .and_then(|(i, _)| self.dirs_deg.get(i).copied())
    }

    /// Text rendering, one character per pixel, darkest to brightest.
    pub fn to_ascii(&self) -> String {
        const RAMP: &[u8] = b" .:-=+*#%@";
        let mut s = String::with_capacity((self.width + 1) * self.height);
        for row in self.map.chunks(self.width.max(1)) {
            for &v in row {
                let k = (v.clamp(0.0, 1.0) * (RAMP.len() - 1) as f32).round() as usize;
                s.push(RAMP[k] as char);
            }
            s.push('\n');
        }
        s
    }
}

fn slot(n: usize) -> Box<[AtomicU32]> {
    (0..n).map(|_| AtomicU32::new(0.0f32.to_bits())).collect()
}

impl DisplayStore {
    pub fn new(geometry: DisplayGeometry) -> Self {
        let dirs: Vec<[f32; 2]> = geometry.directions_deg();
        let n = dirs.len();
        Self {
            geometry,
            dirs_deg: dirs.into(),
            slots: [slot(n), slot(n)],
            seq: [AtomicU64::new(0), AtomicU64::new(0)],
            latest: AtomicUsize::new(1),
            ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            mode: AtomicU8::new(MapMode::Pwd.as_u8()),
        }
    }

    #[inline]
    pub fn geometry(&self) -> DisplayGeometry {
        self.geometry
    }

    #[inline]
    pub fn n_dirs(&self) -> usize {
        self.dirs_deg.len()
    }

    pub fn dirs_deg(&self) -> &Arc<[[f32; 2]]> {
        &self.dirs_deg
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Write `values` into the free slot and make it the latest. Engine only.
    pub(crate) fn publish(&self, values: &[f32], mode: MapMode) {
        let target = 1 - self.latest.load(Ordering::Acquire);
        let seq = &self.seq[target];
        seq.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        for (dst, &v) in self.slots[target].iter().zip(values) {
            dst.store(v.to_bits(), Ordering::Relaxed);
        }
        seq.fetch_add(1, Ordering::Release);

        self.mode.store(mode.as_u8(), Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.latest.store(target, Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    /// Copy the latest completed map into `out`; returns `(generation, mode)`.
    ///
    /// `None` before the first publish, or when every attempt raced a
    /// publish; `out` is then left empty rather than holding a mixed copy.
    pub fn read_into(&self, out: &mut Vec<f32>) -> Option<(u64, MapMode)> {
        if !self.is_ready() {
            return None;
        }
        out.clear();
        out.resize(self.n_dirs(), 0.0);
        for round in 0..READ_ROUNDS {
            if round > 0 {
                thread::yield_now();
            }
            for _ in 0..READ_RETRIES {
                let idx = self.latest.load(Ordering::Acquire);
                let generation = self.generation.load(Ordering::Relaxed);
                let mode = MapMode::from_u8(self.mode.load(Ordering::Relaxed));
                let s1 = self.seq[idx].load(Ordering::Acquire);
                if s1 % 2 == 1 {
                    std::hint::spin_loop();
                    continue;
                }
                for (o, a) in out.iter_mut().zip(self.slots[idx].iter()) {
                    *o = f32::from_bits(a.load(Ordering::Relaxed));
                }
                fence(Ordering::Acquire);
                if self.seq[idx].load(Ordering::Relaxed) == s1 {
                    return Some((generation, mode));
                }
            }
        }
        out.clear();
        None
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        let mut map = Vec::new();
        let (ready, generation, mode) = match self.read_into(&mut map) {
            Some((g, m)) => (true, g, m),
            None => (false, 0, MapMode::from_u8(self.mode.load(Ordering::Relaxed))),
        };
        DisplaySnapshot {
            ready,
            map,
            dirs_deg: Arc::clone(&self.dirs_deg),
            width: self.geometry.width,
            height: self.geometry.height(),
            hfov: self.geometry.hfov,
            aspect: self.geometry.aspect,
            generation,
            mode,
        }
    }
}

/// Engine-side display resources for one geometry.
#[derive(Debug)]
pub struct DisplayCache {
    interp: InterpTable,
    store: Arc<DisplayStore>,
    dense: Vec<f32>,
}

impl DisplayCache {
    pub fn new(interp: InterpTable, store: Arc<DisplayStore>) -> Self {
        let dense = vec![0.0; interp.n_dst()];
        Self { interp, store, dense }
    }

    pub fn store(&self) -> &Arc<DisplayStore> {
        &self.store
    }

    pub fn interp(&self) -> &InterpTable {
        &self.interp
    }

    /// Interpolate, normalise and publish a smoothed coarse map.
    pub fn render(&mut self, smoothed: &[f64], mode: MapMode) {
        self.interp.apply(smoothed, &mut self.dense);
        normalise(&mut self.dense);
        self.store.publish(&self.dense, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::SphereGrid;
    use rand::{Rng, SeedableRng};

    fn geometry(width: usize) -> DisplayGeometry {
        DisplayGeometry {
            hfov: HorizontalFov::Deg360,
            aspect: AspectRatio::TwoOne,
            width,
        }
    }

    #[test]
    fn smoothing_blends_and_drops_non_finite() {
        let mut prev = vec![1.0, 1.0, 1.0];
        smooth(&mut prev, &[3.0, f64::NAN, f64::INFINITY], 0.5);
        assert_eq!(prev, vec![2.0, 0.5, 0.5]);
        smooth(&mut prev, &[4.0, 4.0, 4.0], 0.0);
        assert_eq!(prev, vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn normalise_maps_into_unit_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let mut v: Vec<f32> = (0..64).map(|_| rng.random_range(-1e6..1e6)).collect();
            normalise(&mut v);
            assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
        }
        let mut flat = vec![0.3f32; 10];
        normalise(&mut flat);
        assert!(flat.iter().all(|&x| x == 0.0));
        let mut bad = vec![f32::NAN, 2.0, f32::NEG_INFINITY];
        normalise(&mut bad);
        assert!(bad.iter().all(|x| (0.0..=1.0).contains(x)));
        assert!((bad[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn store_alternates_slots_and_counts_generations() {
        let store = DisplayStore::new(geometry(8));
        let n = store.n_dirs();
        let mut out = Vec::new();
        assert!(store.read_into(&mut out).is_none());
        assert!(!store.snapshot().ready);

        store.publish(&vec![0.25; n], MapMode::Music);
        let first = store.latest.load(Ordering::Relaxed);
        assert_eq!(store.read_into(&mut out), Some((1, MapMode::Music)));
        assert!(out.iter().all(|&v| v == 0.25));

        store.publish(&vec![0.75; n], MapMode::Pwd);
        assert_ne!(store.latest.load(Ordering::Relaxed), first);
        let snap = store.snapshot();
        assert!(snap.ready);
        assert_eq!(snap.generation, 2);
        assert_eq!(snap.mode, MapMode::Pwd);
        assert_eq!(snap.map.len(), snap.width * snap.height);
        assert!(snap.map.iter().all(|&v| v == 0.75));

        let art = snap.to_ascii();
        assert_eq!(art.lines().count(), snap.height);
        assert!(art.lines().all(|l| l.chars().count() == snap.width));
        assert!(art.chars().filter(|&c| c != '\n').all(|c| c == '#'));
    }

    #[test]
    fn concurrent_reader_never_sees_a_torn_map() {
        let store = Arc::new(DisplayStore::new(geometry(32)));
        let n = store.n_dirs();
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for k in 0..2000u32 {
                    let v = (k % 100) as f32 / 100.0;
                    store.publish(&vec![v; n], MapMode::Pwd);
                }
            })
        };
        let mut out = Vec::new();
        let mut torn = 0;
        for _ in 0..2000 {
            if store.read_into(&mut out).is_some() && out.iter().any(|&v| v != out[0]) {
                torn += 1;
            }
        }
        writer.join().unwrap();
        assert_eq!(torn, 0, "torn reads: {torn}");
    }

    #[test]
    fn read_gives_up_on_a_slot_that_stays_mid_write() {
        let store = DisplayStore::new(geometry(8));
        let n = store.n_dirs();
        store.publish(&vec![0.5; n], MapMode::Pwd);
        let idx = store.latest.load(Ordering::Relaxed);
        // writer stalled halfway through the latest slot
        store.seq[idx].fetch_add(1, Ordering::Relaxed);
        store.slots[idx][0].store(1.0f32.to_bits(), Ordering::Relaxed);

        let mut out = vec![0.25; 3];
        assert!(store.read_into(&mut out).is_none());
        assert!(out.is_empty());
        let snap = store.snapshot();
        assert!(!snap.ready);
        assert!(snap.map.is_empty());

        store.seq[idx].fetch_add(1, Ordering::Relaxed);
        assert_eq!(store.read_into(&mut out), Some((1, MapMode::Pwd)));
        assert_eq!(out.len(), n);
    }

    #[test]
    fn render_publishes_normalised_map() {
        let grid = SphereGrid::geodesic(3);
        let geo = geometry(24);
        let store = Arc::new(DisplayStore::new(geo));
        let interp = InterpTable::new(&grid, store.dirs_deg());
        let mut cache = DisplayCache::new(interp, Arc::clone(&store));
        let raw: Vec<f64> = grid.xyz.iter().map(|v| v[1] * 5.0 + 2.0).collect();
        cache.render(&raw, MapMode::Mvdr);
        let snap = store.snapshot();
        assert!(snap.ready);
        assert_eq!(snap.mode, MapMode::Mvdr);
        assert!(snap.map.iter().all(|x| (0.0..=1.0).contains(x)));
        let peak = snap.peak_direction().unwrap();
        assert!((peak[0] - 90.0).abs() < 30.0, "peak {peak:?}");
    }
}
