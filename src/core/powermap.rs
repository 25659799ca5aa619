//! core/powermap.rs — The power-map context.
//!
//! `create()` splits one analyser into two halves:
//! - `PowerMapControl` (control/UI thread): setters, `init_codec()`, display reads.
//! - `PowerMapEngine` (real-time thread): `analyse()`.
//!
//! Design
//! -----
//! - Structural parameters (master order, sample rate, display geometry) only
//!   mark the codec `NotInitialised`. `init_codec()` waits for the in-flight
//!   frame, builds every stale cache on the control thread, sends them to the
//!   engine over a channel and only then reports `Initialised`.
//! - The engine installs pending caches at the start of a frame and sends the
//!   replaced ones back, so nothing is allocated or freed on the audio thread
//!   apart from the channel node itself.
//! - Everything else (band orders/weights, averaging, mode, source count) lives
//!   in `SharedParams` atomics and takes effect at the next recompute.
//! - A map is generated only after `request_map_update()`, inside the next
//!   completed frame.

use crate::config::AnalysisConfig;
use crate::core::covariance::CovarianceBank;
use crate::core::display::{DisplayCache, DisplaySnapshot, DisplayStore, smooth};
use crate::core::estimators::{MapMode, MapWorkspace, generate_map};
use crate::core::fifo::FrameBuffer;
use crate::core::grid::{
    AspectRatio, DisplayGeometry, GEOSPHERE_FREQ, HorizontalFov, MAX_DISPLAY_WIDTH, SphereGrid,
};
use crate::core::grouping::build_group;
use crate::core::hybrid_stft::{
    HOP_SIZE, HYBRID_DELAY_SLOTS, HybridFilterbank, NUM_BANDS, SpectralFrame, band_centre_freqs,
};
use crate::core::interp::InterpTable;
use crate::core::lifecycle::{CodecStatus, Lifecycle};
use crate::core::linalg::CMatrix;
use crate::core::params::{ParamsSnapshot, SharedParams};
use crate::core::sh::{BasisTable, MAX_ORDER, n_sh};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Samples per channel in one analysis frame.
pub const FRAME_SIZE: usize = 1024;
/// Time slots per frame.
pub const TIME_SLOTS: usize = FRAME_SIZE / HOP_SIZE;

const DEFAULT_FS: f32 = 48_000.0;
const POLL: Duration = Duration::from_millis(1);
const DROP_MAX_POLLS: usize = 2_000;

struct Shared {
    lifecycle: Lifecycle,
    params: SharedParams,
    frames: AtomicU64,
}

/// Channel-count / sample-rate dependent state.
struct ChannelState {
    fifo: FrameBuffer,
    transform: HybridFilterbank,
    spec: SpectralFrame,
    cov: CovarianceBank,
}

impl ChannelState {
    fn new(transform: HybridFilterbank) -> Self {
        let n_ch = transform.n_channels();
        Self {
            fifo: FrameBuffer::new(n_ch, FRAME_SIZE),
            spec: SpectralFrame::new(n_ch, TIME_SLOTS),
            cov: CovarianceBank::new(n_ch),
            transform,
        }
    }
}

/// Master-order dependent state.
struct MapState {
    master_order: usize,
    basis: BasisTable,
    group: CMatrix,
    ws: MapWorkspace,
    raw: Vec<f64>,
    prev: Vec<f64>,
    prev_mode: Option<MapMode>,
}

impl MapState {
    fn new(master_order: usize, grid: &SphereGrid) -> Self {
        let n = n_sh(master_order);
        Self {
            master_order,
            basis: BasisTable::new(master_order, &grid.dirs_rad),
            group: CMatrix::with_capacity(n, n),
            ws: MapWorkspace::new(master_order),
            raw: vec![0.0; grid.n_dirs()],
            prev: vec![0.0; grid.n_dirs()],
            prev_mode: None,
        }
    }

    fn recompute(&mut self, cov: &CovarianceBank, snap: &ParamsSnapshot) {
        let order = build_group(
            cov,
            &snap.band_orders,
            &snap.band_weights,
            self.master_order,
            snap.eq_scale,
            &mut self.group,
        );
        generate_map(
            snap.mode,
            order,
            &self.group,
            &self.basis,
            &snap.estimator,
            &mut self.ws,
            &mut self.raw,
        );
        // Maps of different estimators live on different scales; restart smoothing.
        let beta = if self.prev_mode == Some(snap.mode) {
            snap.map_beta
        } else {
            0.0
        };
        smooth(&mut self.prev, &self.raw, beta);
        self.prev_mode = Some(snap.mode);
    }
}

/// Caches travelling between the two halves.
#[derive(Default)]
struct Rebuild {
    channels: Option<ChannelState>,
    map: Option<MapState>,
    display: Option<DisplayCache>,
}

impl Rebuild {
    fn is_empty(&self) -> bool {
        self.channels.is_none() && self.map.is_none() && self.display.is_none()
    }
}

/// What one `init_codec()` call rebuilt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Transform, frame buffer and covariance bank.
    pub channels: bool,
    /// SH basis table and map buffers.
    pub basis: bool,
    /// Interpolation table and display store.
    pub display: bool,
}

impl RebuildSummary {
    pub fn is_empty(&self) -> bool {
        !(self.channels || self.basis || self.display)
    }
}

/// Create a power-map analyser. The codec starts `NotInitialised`; call
/// `init()` and `init_codec()` on the control half before analysing.
pub fn create(cfg: AnalysisConfig) -> (PowerMapControl, PowerMapEngine) {
    let cfg = cfg.clamped();
    let shared = Arc::new(Shared {
        lifecycle: Lifecycle::default(),
        params: SharedParams::from_config(&cfg),
        frames: AtomicU64::new(0),
    });
    let (rebuild_tx, rebuild_rx) = unbounded();
    let (retire_tx, retire_rx) = unbounded();
    let grid = Arc::new(SphereGrid::geodesic(GEOSPHERE_FREQ));
    debug!(n_dirs = grid.n_dirs(), "coarse grid ready");

    let control = PowerMapControl {
        shared: Arc::clone(&shared),
        cfg,
        fs: DEFAULT_FS,
        centre_freqs: band_centre_freqs(DEFAULT_FS),
        grid,
        store: None,
        built_channels: None,
        built_order: None,
        built_geometry: None,
        spare_transform: None,
        rebuild_tx,
        retire_rx,
    };
    let engine = PowerMapEngine {
        shared,
        rebuild_rx,
        retire_tx,
        channels: None,
        map: None,
        display: None,
        snapshot: ParamsSnapshot::default(),
    };
    (control, engine)
}

/// Control half: configuration, reinit and display reads.
pub struct PowerMapControl {
    shared: Arc<Shared>,
    cfg: AnalysisConfig,
    fs: f32,
    centre_freqs: Vec<f32>,
    grid: Arc<SphereGrid>,
    store: Option<Arc<DisplayStore>>,
    built_channels: Option<(f32, usize)>,
    built_order: Option<usize>,
    built_geometry: Option<DisplayGeometry>,
    spare_transform: Option<HybridFilterbank>,
    rebuild_tx: Sender<Rebuild>,
    retire_rx: Receiver<Rebuild>,
}

impl PowerMapControl {
    /// Set the host sample rate.
    pub fn init(&mut self, fs: f32) {
        let fs = if fs.is_finite() && fs > 0.0 {
            fs
        } else {
            warn!(requested = fs, used = DEFAULT_FS, "invalid sample rate");
            DEFAULT_FS
        };
        if fs != self.fs {
            self.fs = fs;
            self.centre_freqs = band_centre_freqs(fs);
            self.shared.lifecycle.invalidate();
            debug!(fs, "sample rate changed");
        }
    }

    /// Rebuild whatever the structural setters invalidated. No-op when the
    /// codec is already `Initialised`.
    pub fn init_codec(&mut self) -> RebuildSummary {
        let shared = Arc::clone(&self.shared);
        if shared.lifecycle.codec_status() == CodecStatus::Initialised {
            return RebuildSummary::default();
        }
        let guard = shared.lifecycle.begin_rebuild(POLL);
        self.collect_retired();

        let order = self.cfg.master_order;
        let n_ch = n_sh(order);
        let geometry = self.geometry();
        let mut rebuild = Rebuild::default();

        if self.built_channels != Some((self.fs, n_ch)) {
            let transform = match self.spare_transform.take() {
                Some(mut t) if t.fs() == self.fs => {
                    t.set_channels(n_ch);
                    t
                }
                _ => HybridFilterbank::new(self.fs, n_ch),
            };
            rebuild.channels = Some(ChannelState::new(transform));
        }
        if self.built_order != Some(order) {
            rebuild.map = Some(MapState::new(order, &self.grid));
        }
        let mut new_store = None;
        if self.built_geometry != Some(geometry) {
            let store = Arc::new(DisplayStore::new(geometry));
            let interp = InterpTable::new(&self.grid, store.dirs_deg());
            rebuild.display = Some(DisplayCache::new(interp, Arc::clone(&store)));
            new_store = Some(store);
        }

        let summary = RebuildSummary {
            channels: rebuild.channels.is_some(),
            basis: rebuild.map.is_some(),
            display: rebuild.display.is_some(),
        };
        if !rebuild.is_empty() && self.rebuild_tx.send(rebuild).is_err() {
            warn!("analysis engine is gone; rebuilt caches dropped");
        }
        self.built_channels = Some((self.fs, n_ch));
        self.built_order = Some(order);
        self.built_geometry = Some(geometry);
        if let Some(store) = new_store {
            self.store = Some(store);
        }
        guard.finish();

        info!(
            order,
            fs = self.fs,
            width = geometry.width,
            height = geometry.height(),
            channels = summary.channels,
            basis = summary.basis,
            display = summary.display,
            "power map initialised"
        );
        summary
    }

    /// Release caches the engine has handed back, keeping one transform for reuse.
    fn collect_retired(&mut self) {
        for retired in self.retire_rx.try_iter() {
            if let Some(ch) = retired.channels {
                self.spare_transform = Some(ch.transform);
            }
        }
    }

    fn geometry(&self) -> DisplayGeometry {
        DisplayGeometry {
            hfov: self.cfg.hfov,
            aspect: self.cfg.aspect,
            width: self.cfg.display_width,
        }
    }

    fn ensure_band_tables(&mut self) {
        let master = self.cfg.master_order;
        if self.cfg.band_orders.len() < NUM_BANDS {
            self.cfg.band_orders.resize(NUM_BANDS, master);
        }
        if self.cfg.band_weights.len() < NUM_BANDS {
            self.cfg.band_weights.resize(NUM_BANDS, 1.0);
        }
    }

    /// Master order, clamped to `1..=MAX_ORDER`. Every band follows the new
    /// order; per-band orders can be lowered afterwards.
    pub fn set_master_order(&mut self, order: usize) {
        let clamped = order.clamp(1, MAX_ORDER);
        if clamped != order {
            warn!(requested = order, used = clamped, "master order clamped");
        }
        if clamped != self.cfg.master_order {
            self.cfg.master_order = clamped;
            self.set_all_band_orders(clamped);
            self.shared.lifecycle.invalidate();
            debug!(order = clamped, "master order changed");
        }
    }

    /// Per-band analysis order; clamped to the master order when grouped.
    pub fn set_band_order(&mut self, band: usize, order: usize) {
        if band >= NUM_BANDS {
            warn!(band, "band index out of range");
            return;
        }
        let order = order.clamp(1, MAX_ORDER);
        self.ensure_band_tables();
        self.cfg.band_orders[band] = order;
        self.shared.params.set_band_order(band, order);
    }

    pub fn set_all_band_orders(&mut self, order: usize) {
        let order = order.clamp(1, MAX_ORDER);
        self.ensure_band_tables();
        for b in 0..NUM_BANDS {
            self.cfg.band_orders[b] = order;
            self.shared.params.set_band_order(b, order);
        }
    }

    /// Per-band EQ weight; zero (or negative) disables the band.
    pub fn set_band_weight(&mut self, band: usize, weight: f32) {
        if band >= NUM_BANDS {
            warn!(band, "band index out of range");
            return;
        }
        let weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
        self.ensure_band_tables();
        self.cfg.band_weights[band] = weight;
        self.shared.params.set_band_weight(band, weight);
    }

    pub fn set_all_band_weights(&mut self, weight: f32) {
        for b in 0..NUM_BANDS {
            self.set_band_weight(b, weight);
        }
    }

    /// Covariance averaging coefficient; clamped to `[0, cov_avg_cap]` when used.
    pub fn set_cov_avg(&mut self, v: f32) {
        self.cfg.cov_avg = v;
        self.shared.params.set_cov_avg(v);
    }

    /// Map smoothing coefficient; clamped to `[0, 0.999]` when used.
    pub fn set_map_avg(&mut self, v: f32) {
        self.cfg.map_avg = v;
        self.shared.params.set_map_avg(v);
    }

    /// Switch estimator. Takes effect at the next recompute; no reinit.
    pub fn set_mode(&mut self, mode: MapMode) {
        if mode != self.cfg.mode {
            debug!(%mode, "map mode changed");
        }
        self.cfg.mode = mode;
        self.shared.params.set_mode(mode);
    }

    pub fn set_n_sources(&mut self, n: usize) {
        let n = n.max(1);
        self.cfg.n_sources = n;
        self.shared.params.set_n_sources(n);
    }

    pub fn set_hfov(&mut self, hfov: HorizontalFov) {
        if hfov != self.cfg.hfov {
            self.cfg.hfov = hfov;
            self.shared.lifecycle.invalidate();
            debug!(?hfov, "field of view changed");
        }
    }

    pub fn set_aspect(&mut self, aspect: AspectRatio) {
        if aspect != self.cfg.aspect {
            self.cfg.aspect = aspect;
            self.shared.lifecycle.invalidate();
            debug!(?aspect, "aspect ratio changed");
        }
    }

    /// Display width in pixels, clamped to `1..=MAX_DISPLAY_WIDTH`.
    pub fn set_display_width(&mut self, width: usize) {
        let clamped = width.clamp(1, MAX_DISPLAY_WIDTH);
        if clamped != width {
            warn!(requested = width, used = clamped, "display width clamped");
        }
        let width = clamped;
        if width != self.cfg.display_width {
            self.cfg.display_width = width;
            self.shared.lifecycle.invalidate();
            debug!(width, "display width changed");
        }
    }

    /// Ask the engine to generate a new map inside its next frame.
    pub fn request_map_update(&self) {
        self.shared.params.request_recompute();
    }

    /// Latest completed display map with its directions and geometry.
    pub fn display_map(&self) -> DisplaySnapshot {
        match &self.store {
            Some(store) => store.snapshot(),
            None => {
                let geo = self.geometry();
                DisplaySnapshot {
                    ready: false,
                    map: Vec::new(),
                    dirs_deg: Arc::from(Vec::new()),
                    width: geo.width,
                    height: geo.height(),
                    hfov: geo.hfov,
                    aspect: geo.aspect,
                    generation: 0,
                    mode: self.cfg.mode,
                }
            }
        }
    }

    /// Copy the latest display map into `out` without reallocating once sized.
    /// Returns `(generation, mode)`, or `None` when no map is ready yet.
    pub fn read_display_map(&self, out: &mut Vec<f32>) -> Option<(u64, MapMode)> {
        self.store.as_ref().and_then(|s| s.read_into(out))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.cfg
    }

    pub fn sample_rate(&self) -> f32 {
        self.fs
    }

    pub fn centre_freqs(&self) -> &[f32] {
        &self.centre_freqs
    }

    /// Input→output latency of the transform in samples.
    pub fn processing_delay(&self) -> usize {
        HOP_SIZE * (1 + HYBRID_DELAY_SLOTS)
    }

    pub fn master_order(&self) -> usize {
        self.cfg.master_order
    }

    pub fn n_sh(&self) -> usize {
        n_sh(self.cfg.master_order)
    }

    pub fn grid_n_dirs(&self) -> usize {
        self.grid.n_dirs()
    }

    /// Display directions of the current store (0 before the first reinit).
    pub fn interp_n_dirs(&self) -> usize {
        self.store.as_ref().map(|s| s.n_dirs()).unwrap_or(0)
    }

    pub fn codec_status(&self) -> CodecStatus {
        self.shared.lifecycle.codec_status()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.shared.lifecycle
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }
}

impl Drop for PowerMapControl {
    fn drop(&mut self) {
        self.shared.lifecycle.invalidate();
        if !self.shared.lifecycle.wait_quiescent(POLL, DROP_MAX_POLLS) {
            warn!("analysis engine still busy at shutdown");
        }
    }
}

/// Real-time half: feed it host blocks.
pub struct PowerMapEngine {
    shared: Arc<Shared>,
    rebuild_rx: Receiver<Rebuild>,
    retire_tx: Sender<Rebuild>,
    channels: Option<ChannelState>,
    map: Option<MapState>,
    display: Option<DisplayCache>,
    snapshot: ParamsSnapshot,
}

impl PowerMapEngine {
    /// Analyse `n_samples` of every input channel; returns the number of
    /// frames completed. Does nothing unless the codec is `Initialised`.
    ///
    /// Extra input channels are ignored; missing or short ones are zero-padded.
    pub fn analyse<S: AsRef<[f32]>>(&mut self, inputs: &[S], n_samples: usize) -> usize {
        let Self {
            shared,
            rebuild_rx,
            retire_tx,
            channels,
            map,
            display,
            snapshot,
        } = self;
        let Some(_processing) = shared.lifecycle.try_begin_processing() else {
            return 0;
        };
        install_pending(rebuild_rx, retire_tx, channels, map, display);
        let (Some(ch), Some(map), Some(display)) = (channels.as_mut(), map.as_mut(), display.as_mut())
        else {
            return 0;
        };

        let mut frames = 0;
        let mut offset = 0;
        while offset < n_samples {
            offset += ch.fifo.fill(inputs, offset, n_samples);
            if ch.fifo.is_full() {
                ch.fifo.reset();
                process_frame(shared, ch, map, display, snapshot);
                frames += 1;
            }
        }
        frames
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.shared.lifecycle
    }
}

fn install_pending(
    rebuild_rx: &Receiver<Rebuild>,
    retire_tx: &Sender<Rebuild>,
    channels: &mut Option<ChannelState>,
    map: &mut Option<MapState>,
    display: &mut Option<DisplayCache>,
) {
    while let Ok(mut rb) = rebuild_rx.try_recv() {
        if rb.channels.is_some() {
            std::mem::swap(channels, &mut rb.channels);
        }
        if rb.map.is_some() {
            std::mem::swap(map, &mut rb.map);
        }
        if rb.display.is_some() {
            std::mem::swap(display, &mut rb.display);
        }
        trace!("caches installed");
        if !rb.is_empty() {
            let _ = retire_tx.send(rb);
        }
    }
}

fn process_frame(
    shared: &Shared,
    ch: &mut ChannelState,
    map: &mut MapState,
    display: &mut DisplayCache,
    snapshot: &mut ParamsSnapshot,
) {
    ch.transform.forward(ch.fifo.frame(), &mut ch.spec);
    ch.cov.update(&ch.spec, shared.params.cov_alpha());
    shared.frames.fetch_add(1, Ordering::Relaxed);

    if shared.params.take_recompute() {
        shared.params.snapshot_into(snapshot);
        map.recompute(&ch.cov, snapshot);
        display.render(&map.prev, snapshot.mode);
        trace!(mode = %snapshot.mode, "map published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AnalysisConfig {
        AnalysisConfig {
            display_width: 24,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn frames_are_skipped_until_initialised() {
        let (mut ctl, mut eng) = create(small_config());
        let block = vec![vec![0.1f32; FRAME_SIZE]; 4];
        assert_eq!(eng.analyse(&block, FRAME_SIZE), 0);
        assert_eq!(ctl.codec_status(), CodecStatus::NotInitialised);

        let summary = ctl.init_codec();
        assert!(summary.channels && summary.basis && summary.display);
        assert_eq!(ctl.codec_status(), CodecStatus::Initialised);
        assert_eq!(eng.analyse(&block, FRAME_SIZE), 1);
        assert_eq!(ctl.frames_processed(), 1);
    }

    #[test]
    fn init_codec_rebuilds_only_what_changed() {
        let (mut ctl, _eng) = create(small_config());
        ctl.init_codec();
        assert!(ctl.init_codec().is_empty());

        ctl.set_display_width(32);
        assert_eq!(
            ctl.init_codec(),
            RebuildSummary {
                channels: false,
                basis: false,
                display: true
            }
        );

        ctl.set_master_order(2);
        assert_eq!(
            ctl.init_codec(),
            RebuildSummary {
                channels: true,
                basis: true,
                display: false
            }
        );

        ctl.init(44_100.0);
        assert_eq!(
            ctl.init_codec(),
            RebuildSummary {
                channels: true,
                basis: false,
                display: false
            }
        );
        assert_eq!(ctl.lifecycle().rebuild_count(), 4);
    }

    #[test]
    fn non_structural_setters_keep_codec_initialised() {
        let (mut ctl, _eng) = create(small_config());
        ctl.init_codec();
        ctl.set_mode(MapMode::Music);
        ctl.set_band_order(3, 1);
        ctl.set_band_weight(4, 0.0);
        ctl.set_cov_avg(0.9);
        ctl.set_map_avg(0.5);
        ctl.set_n_sources(2);
        ctl.set_master_order(ctl.master_order());
        ctl.set_hfov(HorizontalFov::Deg360);
        assert_eq!(ctl.codec_status(), CodecStatus::Initialised);
    }

    #[test]
    fn master_order_is_clamped_and_bands_follow() {
        let (mut ctl, _eng) = create(small_config());
        ctl.set_master_order(11);
        assert_eq!(ctl.master_order(), MAX_ORDER);
        assert_eq!(ctl.n_sh(), 64);
        assert!(ctl.config().band_orders.iter().all(|&o| o == MAX_ORDER));
        ctl.set_master_order(0);
        assert_eq!(ctl.master_order(), 1);
    }

    #[test]
    fn display_width_is_clamped() {
        let (mut ctl, _eng) = create(small_config());
        ctl.set_display_width(1 << 40);
        assert_eq!(ctl.config().display_width, MAX_DISPLAY_WIDTH);
        let snap = ctl.display_map();
        assert_eq!(snap.width, MAX_DISPLAY_WIDTH);
        assert_eq!(snap.height, MAX_DISPLAY_WIDTH / 2);

        ctl.set_display_width(0);
        assert_eq!(ctl.config().display_width, 1);
    }

    #[test]
    fn getters_report_fixed_geometry() {
        let (mut ctl, _eng) = create(small_config());
        assert_eq!(ctl.interp_n_dirs(), 0);
        assert!(!ctl.display_map().ready);
        ctl.init_codec();
        assert_eq!(ctl.grid_n_dirs(), 812);
        assert_eq!(ctl.interp_n_dirs(), 24 * 12);
        assert_eq!(ctl.processing_delay(), 512);
        assert_eq!(ctl.centre_freqs().len(), NUM_BANDS);
    }
}
