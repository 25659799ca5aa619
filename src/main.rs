// Entry point: analyses a synthetic plane wave or an Ambisonic WAV file on a
// worker thread and logs where the power map peaks.
use clap::Parser;
use crossbeam_channel::bounded;
use powermap::cli::Args;
use powermap::core::analysis_worker::{self, Block};
use powermap::core::encoder::SceneGenerator;
use powermap::core::sh::n_sh;
use powermap::{AppConfig, PowerMapError, Result, create};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Blocks between two map update requests.
const UPDATE_EVERY: usize = 16;

enum Input {
    Synthetic(SceneGenerator),
    /// Planar samples and read position.
    Wav(Vec<Vec<f32>>, usize),
}

impl Input {
    /// Fill `block` with the next `n` samples; false at end of input.
    fn next_block(&mut self, n: usize, block: &mut Block) -> bool {
        match self {
            Input::Synthetic(scene) => {
                scene.next_block(n, block);
                true
            }
            Input::Wav(data, pos) => {
                let len = data.first().map(|c| c.len()).unwrap_or(0);
                if *pos >= len {
                    return false;
                }
                let end = (*pos + n).min(len);
                block.resize_with(data.len(), Vec::new);
                for (dst, src) in block.iter_mut().zip(data.iter()) {
                    dst.clear();
                    dst.extend_from_slice(&src[*pos..end]);
                }
                *pos = end;
                true
            }
        }
    }
}

/// Read a WAV file into planar f32 channels.
fn read_wav(path: &str, order: usize) -> Result<(Vec<Vec<f32>>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let n_ch = spec.channels as usize;
    let expected = n_sh(order);
    if n_ch < expected {
        return Err(PowerMapError::UnsupportedChannelCount {
            got: n_ch,
            expected,
            order,
        });
    }
    if n_ch > expected {
        warn!(channels = n_ch, used = expected, "extra WAV channels ignored");
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    let mut planar = vec![Vec::with_capacity(interleaved.len() / n_ch.max(1)); expected];
    for frame in interleaved.chunks_exact(n_ch) {
        for (ch, &v) in planar.iter_mut().zip(frame) {
            ch.push(v);
        }
    }
    info!(path, channels = n_ch, sample_rate = spec.sample_rate, "WAV loaded");
    Ok((planar, spec.sample_rate))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = AppConfig::load_or_default(&args.config);
    if let Some(order) = args.order {
        cfg.analysis.master_order = order;
    }
    if let Some(mode) = args.mode {
        cfg.analysis.mode = mode;
    }
    let analysis = cfg.analysis.clone().clamped();
    let order = analysis.master_order;
    let block_size = cfg.audio.block_size.max(1);

    let (mut input, fs, total) = match &args.wav {
        Some(path) => {
            let (data, fs) = read_wav(path, order)?;
            let len = data.first().map(|c| c.len()).unwrap_or(0);
            (Input::Wav(data, 0), fs, len)
        }
        None => {
            let fs = cfg.audio.sample_rate;
            let scene = SceneGenerator::new(order, 1)
                .with_source(args.azimuth, args.elevation, 1.0)
                .with_noise_floor(0.01);
            info!(
                azimuth = args.azimuth,
                elevation = args.elevation,
                "synthetic plane wave"
            );
            let total = (args.seconds.max(0.0) * fs as f32) as usize;
            (Input::Synthetic(scene), fs, total)
        }
    };

    let (mut control, engine) = create(analysis);
    control.init(fs as f32);
    control.init_codec();
    info!(
        order,
        mode = %control.config().mode,
        delay = control.processing_delay(),
        grid = control.grid_n_dirs(),
        pixels = control.interp_n_dirs(),
        "analysis ready"
    );

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_ctrlc = stop_flag.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        stop_flag_for_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!("Ctrl-C handler unavailable: {err}");
    }

    let (block_tx, block_rx) = bounded::<Block>(8);
    let (recycle_tx, recycle_rx) = bounded::<Block>(16);
    let worker = thread::Builder::new()
        .name("powermap-analysis".into())
        .spawn(move || analysis_worker::run(engine, block_rx, recycle_tx))?;

    let mut sent = 0usize;
    let mut blocks = 0usize;
    let mut last_generation = 0u64;
    let mut map = Vec::new();
    while sent < total && !stop_flag.load(Ordering::SeqCst) {
        let n = block_size.min(total - sent);
        let mut block = recycle_rx.try_recv().unwrap_or_default();
        if !input.next_block(n, &mut block) {
            break;
        }
        sent += n;
        blocks += 1;
        if block_tx.send(block).is_err() {
            warn!("analysis worker stopped early");
            break;
        }
        if blocks % UPDATE_EVERY == 0 {
            control.request_map_update();
        }
        if let Some((generation, mode)) = control.read_display_map(&mut map) {
            if generation != last_generation {
                last_generation = generation;
                debug!(generation, %mode, "map updated");
            }
        }
    }
    drop(block_tx);
    let engine = match worker.join() {
        Ok(engine) => engine,
        Err(_) => {
            warn!("analysis worker panicked");
            return Ok(());
        }
    };

    let snapshot = control.display_map();
    info!(
        frames = engine.frames_processed(),
        seconds = sent as f32 / fs as f32,
        generation = snapshot.generation,
        "analysis finished"
    );
    match snapshot.peak_direction() {
        Some([azi, elev]) if snapshot.ready => {
            info!(azimuth = azi, elevation = elev, mode = %snapshot.mode, "map peak");
            print!("{}", snapshot.to_ascii());
        }
        _ => warn!("no map was completed; analyse a longer signal"),
    }
    Ok(())
}
