//! Periodic one-line statistics

use std::fmt;
use std::sync::atomic::Ordering;

use serde::Serialize;

use crate::pipeline::{DetectorSnapshot, PipelineStats};
use crate::sdr::CaptureStats;

/// Point-in-time counters from every stage
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub center_mhz: f64,
    pub floor_db: f32,
    pub min_floor_db: Option<f32>,
    pub peak_db: f32,
    pub blocks_captured: u64,
    pub blocks_dropped: u64,
    pub read_retries: u64,
    pub sweeps: u64,
    pub frames: u64,
    pub blocks_rejected: u64,
    pub regions_rejected: u64,
    pub tracked: usize,
    pub confirmed: usize,
    pub floor_rise_hits: u64,
    pub alerts: u64,
    pub alerts_dropped: u64,
}

impl StatsSummary {
    pub fn collect(
        capture: &CaptureStats,
        pipeline: &PipelineStats,
        snapshot: &DetectorSnapshot,
    ) -> Self {
        Self {
            center_mhz: snapshot.center_hz as f64 / 1e6,
            floor_db: snapshot.floor_db,
            min_floor_db: snapshot.min_floor_db,
            peak_db: snapshot.peak_db,
            blocks_captured: capture.get_captured(),
            blocks_dropped: capture.get_dropped(),
            read_retries: capture.get_retries(),
            sweeps: capture.sweeps_completed.load(Ordering::Relaxed),
            frames: snapshot.frames,
            blocks_rejected: pipeline.get_rejected(),
            regions_rejected: snapshot.classifier.regions_rejected,
            tracked: snapshot.tracked,
            confirmed: snapshot.confirmed,
            floor_rise_hits: snapshot.floor_rise_hits,
            alerts: pipeline.get_alerts(),
            alerts_dropped: pipeline.get_alerts_dropped(),
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@ {:.3} MHz | floor {:.1} dB (min {}) peak {:.1} dB | blocks {} (dropped {}, rejected {}, retries {}) | sweeps {} | frames {} | tracked {} confirmed {} | floor-rise {} | alerts {} (dropped {}) | bad regions {}",
            self.center_mhz,
            self.floor_db,
            self.min_floor_db
                .map(|m| format!("{:.1}", m))
                .unwrap_or_else(|| "-".to_string()),
            self.peak_db,
            self.blocks_captured,
            self.blocks_dropped,
            self.blocks_rejected,
            self.read_retries,
            self.sweeps,
            self.frames,
            self.tracked,
            self.confirmed,
            self.floor_rise_hits,
            self.alerts,
            self.alerts_dropped,
            self.regions_rejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_line() {
        let capture = CaptureStats::default();
        capture.record_block(100);
        capture.record_block(100);
        capture.record_drop();
        let pipeline = PipelineStats::default();
        let snapshot = DetectorSnapshot {
            center_hz: 2_440_000_000,
            floor_db: -92.31,
            peak_db: -60.0,
            frames: 7,
            ..DetectorSnapshot::default()
        };

        let summary = StatsSummary::collect(&capture, &pipeline, &snapshot);
        assert_eq!(summary.blocks_captured, 2);
        let line = summary.to_string();
        assert!(line.starts_with("@ 2440.000 MHz | floor -92.3 dB (min -)"), "{}", line);
        assert!(line.contains("blocks 2 (dropped 1, rejected 0, retries 0)"));
        assert!(line.contains("frames 7"));
    }
}
