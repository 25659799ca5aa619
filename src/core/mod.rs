//! Analysis core: transform, spatial statistics, estimators and the
//! real-time/control split that ties them together.

pub mod analysis_worker;
pub mod covariance;
pub mod display;
pub mod encoder;
pub mod estimators;
pub mod fifo;
pub mod grid;
pub mod grouping;
pub mod hybrid_stft;
pub mod interp;
pub mod lifecycle;
pub mod linalg;
pub mod params;
pub mod powermap;
pub mod sh;
