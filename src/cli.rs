use crate::core::estimators::MapMode;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to config TOML (written with commented defaults when missing)
    #[arg(long, default_value = "powermap.toml")]
    pub config: String,

    /// Analyse an Ambisonic WAV file (ACN/N3D) instead of a synthetic scene
    #[arg(long)]
    pub wav: Option<String>,

    /// Azimuth of the synthetic plane wave in degrees
    #[arg(long, default_value_t = 90.0, allow_hyphen_values = true)]
    pub azimuth: f32,

    /// Elevation of the synthetic plane wave in degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub elevation: f32,

    /// Master SH order (overrides config)
    #[arg(long)]
    pub order: Option<usize>,

    /// Estimator: pwd, mvdr, cropac-lcmv, music, music-log, min-norm, min-norm-log
    #[arg(long)]
    pub mode: Option<MapMode>,

    /// Seconds of synthetic signal to analyse
    #[arg(long, default_value_t = 2.0)]
    pub seconds: f32,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}
