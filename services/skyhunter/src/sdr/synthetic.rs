//! Simulated front end
//!
//! Produces seeded complex Gaussian noise at the commanded center. Simulated
//! emitters are synthesised in the frequency domain (random-phase flat
//! spectrum over their width, inverse FFT) so their power stays inside the
//! requested bandwidth.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rustfft::{num_traits::Zero, FftPlanner};
use tracing::{debug, info};

use crate::error::HardwareError;
use crate::types::SampleBlock;

use super::source::SampleSource;

/// Circular complex Gaussian sample with total power `power`
fn complex_gaussian(rng: &mut impl Rng, power: f32) -> Complex32 {
    let sigma = (power / 2.0).sqrt();
    let re: f32 = StandardNormal.sample(rng);
    let im: f32 = StandardNormal.sample(rng);
    Complex32::new(sigma * re, sigma * im)
}

/// A band-limited plateau injected into the simulated spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimEmitter {
    pub freq_hz: f64,
    pub width_hz: f64,
    /// Power spectral density over the noise floor inside the width
    pub snr_db: f32,
}

impl SimEmitter {
    pub fn from_mhz(freq_mhz: f64, width_mhz: f64, snr_db: f32) -> Self {
        Self {
            freq_hz: freq_mhz * 1e6,
            width_hz: width_mhz * 1e6,
            snr_db,
        }
    }
}

/// Tunables for [`SyntheticSource`]
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    /// Total noise power per sample (linear, full scale = 1.0)
    pub noise_power: f32,
    pub emitters: Vec<SimEmitter>,
    /// Reads at a center before its emitters switch on
    pub onset_blocks: u64,
    /// Sleep for the block's air time on every read
    pub realtime: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            noise_power: 1e-4,
            emitters: Vec::new(),
            onset_blocks: 8,
            realtime: true,
        }
    }
}

/// Seeded noise generator with optional emitters
pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    planner: FftPlanner<f32>,
    sample_rate: f64,
    center_hz: u64,
    reads_per_center: HashMap<u64, u64>,
    closed: bool,
}

impl SyntheticSource {
    pub fn open(config: SyntheticConfig) -> Self {
        info!(
            "Opened synthetic source (seed {}, {} emitter(s))",
            config.seed,
            config.emitters.len()
        );
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            planner: FftPlanner::new(),
            sample_rate: 20e6,
            center_hz: 0,
            reads_per_center: HashMap::new(),
            closed: false,
        }
    }

    /// FFT bin range (signed, unshifted) covered by `emitter` at the current tuning
    fn emitter_bins(&self, emitter: &SimEmitter, count: usize) -> Option<(i64, i64)> {
        let half = count as i64 / 2;
        let hz_per_bin = self.sample_rate / count as f64;
        let offset = emitter.freq_hz - self.center_hz as f64;
        let lo = ((offset - emitter.width_hz / 2.0) / hz_per_bin).ceil() as i64;
        let hi = ((offset + emitter.width_hz / 2.0) / hz_per_bin).floor() as i64;
        let (lo, hi) = (lo.max(-half), hi.min(half - 1));
        (lo <= hi).then_some((lo, hi))
    }

    fn add_emitter(&mut self, samples: &mut [Complex32], emitter: &SimEmitter) {
        let count = samples.len();
        let Some((lo, hi)) = self.emitter_bins(emitter, count) else {
            return;
        };

        let nbins = (hi - lo + 1) as usize;
        let mut spectrum = vec![Complex32::zero(); count];
        for k in lo..=hi {
            spectrum[k.rem_euclid(count as i64) as usize] = complex_gaussian(&mut self.rng, 1.0);
        }
        self.planner.plan_fft_inverse(count).process(&mut spectrum);

        // Density ratio over the noise floor, integrated over the emitter's bins
        let occupied = nbins as f32 / count as f32;
        let power = self.config.noise_power * 10f32.powf(emitter.snr_db / 10.0) * occupied;
        let scale = (power / nbins as f32).sqrt();
        for (s, e) in samples.iter_mut().zip(&spectrum) {
            *s += e * scale;
        }
    }
}

impl SampleSource for SyntheticSource {
    fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), HardwareError> {
        if self.closed {
            return Err(HardwareError::Closed);
        }
        self.sample_rate = rate_hz;
        Ok(())
    }

    fn set_center_frequency(&mut self, freq_hz: u64) -> Result<(), HardwareError> {
        if self.closed {
            return Err(HardwareError::Closed);
        }
        self.center_hz = freq_hz;
        Ok(())
    }

    fn read_samples(&mut self, count: usize) -> Result<SampleBlock, HardwareError> {
        if self.closed {
            return Err(HardwareError::Closed);
        }

        let noise_power = self.config.noise_power;
        let mut samples: Vec<Complex32> = (0..count)
            .map(|_| complex_gaussian(&mut self.rng, noise_power))
            .collect();

        let reads = self.reads_per_center.entry(self.center_hz).or_insert(0);
        *reads += 1;
        if *reads > self.config.onset_blocks {
            let emitters = self.config.emitters.clone();
            for emitter in &emitters {
                self.add_emitter(&mut samples, emitter);
            }
        }

        if self.config.realtime {
            thread::sleep(Duration::from_secs_f64(count as f64 / self.sample_rate));
        }

        Ok(SampleBlock {
            samples,
            sample_rate: self.sample_rate,
            center_hz: self.center_hz,
            captured_at: Utc::now(),
        })
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Closing synthetic source");
            self.closed = true;
        }
    }

    fn describe(&self) -> String {
        format!("synthetic (seed {})", self.config.seed)
    }
}
