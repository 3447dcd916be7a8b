//! Hot-bin extraction and contiguous region grouping
//!
//! Gap tolerance is zero: two hot bins separated by a single cold bin always
//! form two regions.

use serde::Serialize;

use crate::error::DataError;
use crate::types::FrequencyMap;

/// A bin whose excess over the baseline reached the hot threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotBin {
    pub bin: usize,
    pub excess_db: f32,
}

/// Maximal run of adjacent hot bins within one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub start_bin: usize,
    pub bin_count: usize,
    /// Absolute frequency of the lowest bin
    pub start_hz: f64,
    /// `start_hz + bandwidth_hz`
    pub end_hz: f64,
    /// `bin_count * sample_rate / nfft`
    pub bandwidth_hz: f64,
    pub mean_excess_db: f32,
    pub peak_excess_db: f32,
    pub peak_bin: usize,
    /// Center frequency of the capture the region came from
    pub frame_center_hz: f64,
}

impl Region {
    fn from_run(run: &[HotBin], map: &FrequencyMap) -> Self {
        let start_bin = run[0].bin;
        let bin_count = run.len();
        let bandwidth_hz = bin_count as f64 * map.bin_width();
        let start_hz = map.bin_to_hz(start_bin);

        let mean_excess_db = run.iter().map(|h| h.excess_db).sum::<f32>() / bin_count as f32;
        let peak = run
            .iter()
            .max_by(|a, b| a.excess_db.total_cmp(&b.excess_db))
            .copied()
            .unwrap_or(run[0]);

        Self {
            start_bin,
            bin_count,
            start_hz,
            end_hz: start_hz + bandwidth_hz,
            bandwidth_hz,
            mean_excess_db,
            peak_excess_db: peak.excess_db,
            peak_bin: peak.bin,
            frame_center_hz: map.center_hz,
        }
    }

    /// Midpoint of the region's footprint
    pub fn center_hz(&self) -> f64 {
        (self.start_hz + self.end_hz) / 2.0
    }

    pub fn bandwidth_mhz(&self) -> f64 {
        self.bandwidth_hz / 1e6
    }

    pub fn contains_bin(&self, bin: usize) -> bool {
        bin >= self.start_bin && bin < self.start_bin + self.bin_count
    }

    /// Structural sanity check before classification
    pub fn validate(&self, bin_width: f64) -> Result<(), DataError> {
        if self.bin_count == 0 || self.bandwidth_hz <= 0.0 {
            return Err(DataError::MalformedRegion("zero width"));
        }
        if self.end_hz <= self.start_hz {
            return Err(DataError::MalformedRegion("inverted bounds"));
        }
        let expected = self.bin_count as f64 * bin_width;
        if (self.bandwidth_hz - expected).abs() > bin_width * 1e-6 {
            return Err(DataError::MalformedRegion("bandwidth does not match bin count"));
        }
        if !self.mean_excess_db.is_finite() || !self.peak_excess_db.is_finite() {
            return Err(DataError::MalformedRegion("non-finite excess"));
        }
        Ok(())
    }
}

/// Bins with `excess >= delta_db`, in frequency order
pub fn hot_bins(excess: &[f32], delta_db: f32) -> Vec<HotBin> {
    excess
        .iter()
        .enumerate()
        .filter(|(_, e)| **e >= delta_db)
        .map(|(bin, &excess_db)| HotBin { bin, excess_db })
        .collect()
}

/// Merge strictly adjacent hot bins into regions
pub fn group_regions(hot: &[HotBin], map: &FrequencyMap) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut run_start = 0;
    for i in 1..=hot.len() {
        let run_ends = i == hot.len() || hot[i].bin != hot[i - 1].bin + 1;
        if run_ends && i > run_start {
            regions.push(Region::from_run(&hot[run_start..i], map));
            run_start = i;
        }
    }
    regions
}
