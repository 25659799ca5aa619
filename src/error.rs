//! Error types for the I/O surfaces (config files, WAV input, CLI).
//!
//! The real-time path never returns errors: out-of-range values are clamped
//! and degenerate numerics produce an all-zero map.

use thiserror::Error;

/// Errors that can occur outside the per-frame analysis path.
#[derive(Error, Debug)]
pub enum PowerMapError {
    /// Reading or writing a file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A config file could not be parsed.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The default config could not be serialized.
    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Decoding a WAV file failed.
    #[error(transparent)]
    Wav(#[from] hound::Error),

    /// The input does not carry the `(order + 1)²` channels the analysis needs.
    #[error("unsupported channel count {got}: expected {expected} for order {order}")]
    UnsupportedChannelCount {
        /// Channels found in the input.
        got: usize,
        /// Channels required by the configured order.
        expected: usize,
        /// Configured master order.
        order: usize,
    },
}

/// Convenience Result type for fallible powermap operations.
pub type Result<T> = std::result::Result<T, PowerMapError>;
