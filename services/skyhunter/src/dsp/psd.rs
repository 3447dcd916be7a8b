//! Welch power spectral density
//!
//! Hann-windowed, overlapping segments of `nfft` samples are transformed with
//! `rustfft`, their squared magnitudes averaged and scaled to a two-sided
//! density. The result is reordered so bin 0 is the lowest frequency
//! (`center - sample_rate/2`) and converted to dB.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};

use crate::error::DataError;
use crate::types::{SampleBlock, Spectrum};

/// Added to linear power before `log10` so silent bins stay finite
pub const POWER_FLOOR: f64 = 1e-15;

/// Reusable Welch estimator for a fixed FFT size
pub struct WelchEstimator {
    nfft: usize,
    step: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_power: f64,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    accum: Vec<f64>,
}

impl WelchEstimator {
    /// `overlap` is the fraction of each segment shared with the next one
    pub fn new(nfft: usize, overlap: f64) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nfft);
        let scratch = vec![Complex32::zero(); fft.get_inplace_scratch_len()];

        let window = hann(nfft);
        let window_power = window.iter().map(|&w| (w as f64) * (w as f64)).sum();
        let noverlap = (nfft as f64 * overlap.clamp(0.0, 0.99)) as usize;

        Self {
            nfft,
            step: (nfft - noverlap).max(1),
            fft,
            window,
            window_power,
            buffer: vec![Complex32::zero(); nfft],
            scratch,
            accum: vec![0.0; nfft],
        }
    }

    pub fn nfft(&self) -> usize {
        self.nfft
    }

    /// Number of segments averaged for a block of `len` samples
    pub fn segment_count(&self, len: usize) -> usize {
        if len < self.nfft {
            0
        } else {
            (len - self.nfft) / self.step + 1
        }
    }

    /// Linear two-sided PSD, lowest frequency first
    pub fn estimate_linear(
        &mut self,
        samples: &[Complex32],
        sample_rate: f64,
    ) -> Result<Vec<f64>, DataError> {
        let segments = self.segment_count(samples.len());
        if segments == 0 {
            return Err(DataError::ShortBlock {
                got: samples.len(),
                need: self.nfft,
            });
        }

        self.accum.iter_mut().for_each(|a| *a = 0.0);
        for seg in 0..segments {
            let offset = seg * self.step;
            let segment = &samples[offset..offset + self.nfft];
            for ((dst, &s), &w) in self.buffer.iter_mut().zip(segment).zip(&self.window) {
                *dst = s * w;
            }
            self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
            for (acc, x) in self.accum.iter_mut().zip(&self.buffer) {
                *acc += x.norm_sqr() as f64;
            }
        }

        let scale = 1.0 / (sample_rate * self.window_power * segments as f64);
        let half = self.nfft / 2;
        // fftshift: negative frequencies first
        let psd = (0..self.nfft)
            .map(|k| self.accum[(k + half) % self.nfft] * scale)
            .collect();
        Ok(psd)
    }

    /// One dB spectrum for a sample block
    pub fn estimate(&mut self, block: &SampleBlock) -> Result<Spectrum, DataError> {
        let linear = self.estimate_linear(&block.samples, block.sample_rate)?;
        Ok(Spectrum {
            power_db: to_db(&linear),
            center_hz: block.center_hz,
            sample_rate: block.sample_rate,
            captured_at: block.captured_at,
        })
    }
}

/// Periodic Hann window
pub fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// `10 * log10(power + POWER_FLOOR)`
pub fn to_db(linear: &[f64]) -> Vec<f32> {
    linear
        .iter()
        .map(|&p| (10.0 * (p + POWER_FLOOR).log10()) as f32)
        .collect()
}

/// Sliding average of the last `depth` linear PSDs captured at one center
///
/// Retuning discards the history: spectra from different centers never mix.
pub struct SpectrumAverager {
    depth: usize,
    center_hz: Option<u64>,
    history: VecDeque<Vec<f64>>,
}

impl SpectrumAverager {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            center_hz: None,
            history: VecDeque::with_capacity(depth.max(1)),
        }
    }

    /// Push one linear PSD; returns the averaged dB power once `depth`
    /// spectra from the same center are available
    pub fn push(&mut self, center_hz: u64, linear: Vec<f64>) -> Option<Vec<f32>> {
        let geometry_changed = self
            .history
            .front()
            .map(|h| h.len() != linear.len())
            .unwrap_or(false);
        if self.center_hz != Some(center_hz) || geometry_changed {
            self.history.clear();
            self.center_hz = Some(center_hz);
        }

        self.history.push_back(linear);
        while self.history.len() > self.depth {
            self.history.pop_front();
        }
        if self.history.len() < self.depth {
            return None;
        }

        let n = self.history.len() as f64;
        let bins = self.history[0].len();
        let mean: Vec<f64> = (0..bins)
            .map(|k| self.history.iter().map(|h| h[k]).sum::<f64>() / n)
            .collect();
        Some(to_db(&mean))
    }
}
