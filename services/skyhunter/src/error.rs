//! Error taxonomy for the detector
//!
//! Hardware and configuration errors are fatal at startup. Data errors are
//! recovered locally: the offending block/spectrum/region is dropped and a
//! counter is bumped.

use thiserror::Error;

/// Radio front-end failures
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("no HackRF device found at index {0}")]
    DeviceNotFound(u32),

    #[error("HackRF device {0} is busy (already claimed by another process)")]
    DeviceBusy(u32),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no samples received within {0} ms")]
    Timeout(u64),

    #[error("sample stream lost: {0}")]
    TransportLost(String),

    #[error("device is closed")]
    Closed,

    #[error("invalid device setting: {0}")]
    InvalidSetting(String),
}

impl HardwareError {
    /// Whether a streaming read that failed with this error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::TransportLost(_))
    }
}

/// Out-of-range or contradictory configuration
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero (got {value})")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must be in [0, 1) (got {value})")]
    FractionOutOfRange { name: &'static str, value: f64 },

    #[error("{min_name} ({min}) is greater than {max_name} ({max})")]
    InvertedRange {
        min_name: &'static str,
        min: f64,
        max_name: &'static str,
        max: f64,
    },

    #[error("nfft must be an even number of at least 16 (got {0})")]
    InvalidNfft(usize),

    #[error("persist-window ({window}) must be at least persist-hits ({hits})")]
    WindowShorterThanHits { hits: usize, window: usize },

    #[error("baseline percentile must be in (0, 100) (got {0})")]
    PercentileOutOfRange(f64),

    #[error("LNA gain must be 0..=40 dB in steps of 8 (got {0})")]
    InvalidLnaGain(u32),

    #[error("VGA gain must be 0..=62 dB in steps of 2 (got {0})")]
    InvalidVgaGain(u32),

    #[error("invalid band range '{0}' (expected <low_mhz>:<high_mhz> with low < high)")]
    InvalidBand(String),

    #[error("invalid simulated emitter '{0}' (expected <freq_mhz>:<width_mhz>:<snr_db>)")]
    InvalidEmitter(String),

    #[error("no bands selected")]
    NoBands,
}

/// Malformed data produced by an upstream stage
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("sample block has {got} samples, need at least {need}")]
    ShortBlock { got: usize, need: usize },

    #[error("spectrum is empty")]
    EmptySpectrum,

    #[error("spectrum contains non-finite power values")]
    NonFiniteSpectrum,

    #[error("malformed region: {0}")]
    MalformedRegion(&'static str),
}
