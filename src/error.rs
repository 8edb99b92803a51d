//! Error type shared by every stage of the pipeline.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while acquiring or displaying EEG data.
#[derive(Debug, Error)]
pub enum Error {
    /// Discovery finished without a single matching headset.
    #[error("No Muse device found")]
    NoDeviceFound,

    /// No EEG stream is advertised on the network.
    #[error("Can't find EEG stream")]
    StreamNotFound,

    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    /// `lsl::Error` does not implement `std::error::Error`, so it is kept
    /// as a plain value and only formatted with `Debug`.
    #[error("LSL error: {0:?}")]
    Lsl(lsl::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The streaming bridge failed to start or stopped unexpectedly.
    #[error("Streaming bridge error: {0}")]
    Bridge(String),

    /// The stream carries fewer channels than the plot needs.
    #[error("Stream has {found} channels, expected at least {expected}")]
    ChannelCount { expected: usize, found: usize },

    /// A setting is outside the range the pipeline can work with.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A notification from the headset could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<lsl::Error> for Error {
    fn from(err: lsl::Error) -> Self {
        Error::Lsl(err)
    }
}
