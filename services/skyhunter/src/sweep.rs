//! Sweep scheduler
//!
//! Splits every configured band into overlapping capture footprints and
//! cycles through the resulting centers forever. Consecutive centers are
//! `sample_rate * (1 - center_overlap)` apart so that band transitions are
//! never left uncovered.

use std::time::Duration;

use tracing::debug;

use crate::types::Band;

/// One retune target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStep {
    /// Index into the scheduler's band list
    pub band_index: usize,
    pub center_hz: u64,
}

/// Ordered, cyclic list of sweep centers
pub struct SweepScheduler {
    bands: Vec<Band>,
    sample_rate: f64,
    dwell: Duration,
    steps: Vec<SweepStep>,
    position: usize,
}

impl SweepScheduler {
    pub fn new(bands: Vec<Band>, sample_rate: f64, center_overlap: f64, dwell_secs: f64) -> Self {
        let mut steps = Vec::new();
        for (band_index, band) in bands.iter().enumerate() {
            let centers = centers_for_band(band, sample_rate, center_overlap);
            debug!(
                "Band {} ({:.0}-{:.0} MHz): {} centers",
                band.name,
                band.low_hz / 1e6,
                band.high_hz / 1e6,
                centers.len()
            );
            steps.extend(centers.into_iter().map(|center_hz| SweepStep {
                band_index,
                center_hz,
            }));
        }

        Self {
            bands,
            sample_rate,
            dwell: Duration::from_secs_f64(dwell_secs.max(0.0)),
            steps,
            position: 0,
        }
    }

    /// Next center to visit, wrapping around after the last band
    pub fn next_step(&mut self) -> Option<SweepStep> {
        if self.steps.is_empty() {
            return None;
        }
        let step = self.steps[self.position % self.steps.len()];
        self.position = (self.position + 1) % self.steps.len();
        Some(step)
    }

    pub fn steps(&self) -> &[SweepStep] {
        &self.steps
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Time for one full pass over every center
    pub fn cycle_time(&self) -> Duration {
        self.dwell * self.steps.len() as u32
    }
}

/// Centers covering `band` edge to edge with the configured footprint overlap
pub fn centers_for_band(band: &Band, sample_rate: f64, center_overlap: f64) -> Vec<u64> {
    let span = sample_rate;
    let width = band.width_hz();
    if span <= 0.0 || width <= 0.0 {
        return Vec::new();
    }
    if span >= width {
        return vec![((band.low_hz + band.high_hz) / 2.0).round() as u64];
    }

    let step = (span * (1.0 - center_overlap)).max(1.0);
    let half = span / 2.0;
    let mut centers = Vec::new();
    let mut center = band.low_hz + half;
    while center + half <= band.high_hz {
        centers.push(center.round() as u64);
        center += step;
    }

    let last_edge = centers.last().map(|&c| c as f64 + half).unwrap_or(band.low_hz);
    if last_edge < band.high_hz {
        centers.push((band.high_hz - half).round() as u64);
    }
    centers
}
