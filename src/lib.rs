//! Real-time power-map analysis of spherical-harmonic (Ambisonic) signals.
//!
//! ```no_run
//! use powermap::{AnalysisConfig, MapMode, create};
//!
//! let (mut control, mut engine) = create(AnalysisConfig::default());
//! control.init(48_000.0);
//! control.set_mode(MapMode::Mvdr);
//! control.init_codec();
//!
//! let block = vec![vec![0.0f32; 512]; control.n_sh()];
//! engine.analyse(&block, 512);
//! control.request_map_update();
//! engine.analyse(&block, 512);
//! let map = control.display_map();
//! # let _ = map;
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;

pub use crate::config::{AnalysisConfig, AppConfig, AudioConfig};
pub use crate::core::display::DisplaySnapshot;
pub use crate::core::estimators::MapMode;
pub use crate::core::grid::{AspectRatio, HorizontalFov};
pub use crate::core::lifecycle::{CodecStatus, ProcStatus};
pub use crate::core::powermap::{PowerMapControl, PowerMapEngine, RebuildSummary, create};
pub use crate::error::{PowerMapError, Result};
