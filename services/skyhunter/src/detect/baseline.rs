//! Adaptive noise-floor baseline
//!
//! Every bin keeps the last `depth` power values observed at that bin for one
//! sweep center. The configured low percentile of that window is the local
//! noise floor. State is kept per quantized center so revisiting a center
//! during the sweep continues its history instead of starting over.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::types::Spectrum;

/// Centers are bucketed to 1 kHz before keying baseline state
const CENTER_QUANTUM_HZ: u64 = 1_000;

/// Rolling per-bin history for one sweep center
#[derive(Debug, Clone)]
pub struct BaselineState {
    windows: Vec<VecDeque<f32>>,
    floor: Vec<f32>,
    frames: u64,
}

impl BaselineState {
    fn new(bins: usize, depth: usize) -> Self {
        Self {
            windows: (0..bins).map(|_| VecDeque::with_capacity(depth)).collect(),
            floor: vec![0.0; bins],
            frames: 0,
        }
    }

    /// Current floor estimate per bin, in dB
    pub fn floor(&self) -> &[f32] {
        &self.floor
    }

    /// Frames folded into this state so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Samples currently held for `bin`
    pub fn window_len(&self, bin: usize) -> usize {
        self.windows.get(bin).map(VecDeque::len).unwrap_or(0)
    }
}

/// Bin count and sample rate that fix what each bin index means
#[derive(Debug, Clone, Copy, PartialEq)]
struct Geometry {
    nfft: usize,
    sample_rate: f64,
}

/// Owns every center's [`BaselineState`]
pub struct BaselineTracker {
    depth: usize,
    percentile: f64,
    geometry: Option<Geometry>,
    states: HashMap<u64, BaselineState>,
    scratch: Vec<f32>,
}

impl BaselineTracker {
    pub fn new(depth: usize, percentile: f64) -> Self {
        Self {
            depth: depth.max(1),
            percentile: percentile.clamp(0.0, 100.0),
            geometry: None,
            states: HashMap::new(),
            scratch: Vec::with_capacity(depth.max(1)),
        }
    }

    fn key(center_hz: u64) -> u64 {
        (center_hz + CENTER_QUANTUM_HZ / 2) / CENTER_QUANTUM_HZ
    }

    /// Fold `spectrum` into its center's history and return per-bin excess
    /// over the refreshed floor (`power_db - baseline_db`)
    pub fn update(&mut self, spectrum: &Spectrum) -> Vec<f32> {
        let bins = spectrum.nfft();
        let geometry = Geometry {
            nfft: bins,
            sample_rate: spectrum.sample_rate,
        };
        if self.geometry != Some(geometry) {
            if let Some(old) = self.geometry {
                warn!(
                    "Spectrum geometry changed ({} bins @ {:.3} MS/s -> {} bins @ {:.3} MS/s), resetting baseline",
                    old.nfft,
                    old.sample_rate / 1e6,
                    bins,
                    spectrum.sample_rate / 1e6
                );
            }
            self.reset();
            self.geometry = Some(geometry);
        }

        let key = Self::key(spectrum.center_hz);
        let depth = self.depth;
        let state = self.states.entry(key).or_insert_with(|| {
            debug!("New baseline for center {:.3} MHz", spectrum.center_hz as f64 / 1e6);
            BaselineState::new(bins, depth)
        });

        let mut excess = Vec::with_capacity(bins);
        for (bin, &power) in spectrum.power_db.iter().enumerate() {
            let window = &mut state.windows[bin];
            if window.len() == depth {
                window.pop_front();
            }
            window.push_back(power);

            self.scratch.clear();
            self.scratch.extend(window.iter().copied());
            let floor = percentile_of(&mut self.scratch, self.percentile);
            state.floor[bin] = floor;
            excess.push(power - floor);
        }
        state.frames += 1;
        excess
    }

    /// Baseline state for the center nearest `center_hz`, if any
    pub fn state(&self, center_hz: u64) -> Option<&BaselineState> {
        self.states.get(&Self::key(center_hz))
    }

    pub fn tracked_centers(&self) -> usize {
        self.states.len()
    }

    /// Drop every history; needed when sample rate or NFFT changes
    pub fn reset(&mut self) {
        self.states.clear();
        self.geometry = None;
    }
}

/// Linearly interpolated percentile (`q` in 0..=100) of `values`
///
/// Sorts in place with a stable sort so equal values keep index order and the
/// result is deterministic.
pub fn percentile_of(values: &mut [f32], q: f64) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    values.sort_by(f32::total_cmp);
    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    values[lo] + (values[hi] - values[lo]) * frac
}
