//! Spectral estimation

pub mod psd;

pub use psd::{SpectrumAverager, WelchEstimator};
