//! SkyHunter - real-time drone RF detection on HackRF IQ samples
//!
//! Sweeps the 2.4 / 5.8 GHz drone bands, estimates a Welch PSD per block,
//! tracks a rolling per-bin noise floor per sweep center, groups hot bins
//! into regions, and confirms DJI / FPV emitters once they persist.

pub mod config;
pub mod detect;
pub mod dsp;
pub mod error;
pub mod pipeline;
pub mod sdr;
pub mod sink;
pub mod stats;
pub mod sweep;
pub mod types;
