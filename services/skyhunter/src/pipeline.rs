//! Processing worker
//!
//! One ordered pipeline per delivered block:
//! PSD -> averaging -> baseline -> hot bins -> regions -> classification.
//! Every stage's state lives in [`Detector`], owned by the `dsp-worker`
//! thread. Readers only ever get [`DetectorSnapshot`] copies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::detect::classifier::ClassifierStats;
use crate::detect::{
    group_regions, hot_bins, Alert, BaselineTracker, ClassifierConfig, PersistenceClassifier,
};
use crate::dsp::{SpectrumAverager, WelchEstimator};
use crate::error::DataError;
use crate::types::{SampleBlock, Spectrum};

/// Detector tunables
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub nfft: usize,
    /// Welch segment overlap fraction
    pub overlap: f64,
    pub avg_frames: usize,
    pub delta_db: f32,
    pub baseline_depth: usize,
    pub baseline_percentile: f64,
    pub classifier: ClassifierConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            nfft: 4096,
            overlap: 0.5,
            avg_frames: 2,
            delta_db: 6.0,
            baseline_depth: 5,
            baseline_percentile: 20.0,
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Immutable view of the detector after the latest frame
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectorSnapshot {
    pub center_hz: u64,
    pub low_hz: f64,
    pub high_hz: f64,
    /// Median bin power of the latest frame
    pub floor_db: f32,
    pub peak_db: f32,
    /// Lowest floor seen since start
    pub min_floor_db: Option<f32>,
    pub regions: usize,
    pub tracked: usize,
    pub confirmed: usize,
    pub floor_rise_hits: u64,
    pub frames: u64,
    pub baseline_centers: usize,
    pub classifier: ClassifierStats,
}

/// Single-writer detection state
pub struct Detector {
    welch: WelchEstimator,
    averager: SpectrumAverager,
    baseline: BaselineTracker,
    classifier: PersistenceClassifier,
    delta_db: f32,
    snapshot: DetectorSnapshot,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            welch: WelchEstimator::new(config.nfft, config.overlap),
            averager: SpectrumAverager::new(config.avg_frames),
            baseline: BaselineTracker::new(config.baseline_depth, config.baseline_percentile),
            classifier: PersistenceClassifier::new(config.classifier),
            delta_db: config.delta_db,
            snapshot: DetectorSnapshot::default(),
        }
    }

    /// Run one block through the pipeline
    ///
    /// Returns no alerts while the averager is still filling at this center.
    pub fn process_block(&mut self, block: &SampleBlock) -> Result<Vec<Alert>, DataError> {
        let linear = self.welch.estimate_linear(&block.samples, block.sample_rate)?;
        let Some(power_db) = self.averager.push(block.center_hz, linear) else {
            return Ok(Vec::new());
        };
        let spectrum = Spectrum {
            power_db,
            center_hz: block.center_hz,
            sample_rate: block.sample_rate,
            captured_at: block.captured_at,
        };
        self.process_spectrum(&spectrum)
    }

    /// Baseline, grouping and classification for one spectrum
    pub fn process_spectrum(&mut self, spectrum: &Spectrum) -> Result<Vec<Alert>, DataError> {
        spectrum.validate()?;
        let map = spectrum.map();

        let excess = self.baseline.update(spectrum);
        let regions = group_regions(&hot_bins(&excess, self.delta_db), &map);
        if !regions.is_empty() {
            debug!(
                "{} region(s) at {:.3} MHz",
                regions.len(),
                spectrum.center_hz as f64 / 1e6
            );
        }
        let alerts = self.classifier.process_frame(spectrum, &regions);

        let floor_db = spectrum.median_db();
        let classifier = self.classifier.snapshot();
        let snap = &mut self.snapshot;
        snap.center_hz = spectrum.center_hz;
        snap.low_hz = map.low_hz();
        snap.high_hz = map.high_hz();
        snap.floor_db = floor_db;
        snap.peak_db = spectrum.peak_db();
        snap.min_floor_db = Some(snap.min_floor_db.map_or(floor_db, |m| m.min(floor_db)));
        snap.regions = regions.len();
        snap.tracked = classifier.tracked;
        snap.confirmed = classifier.confirmed;
        snap.floor_rise_hits = classifier.floor_rise_hits;
        snap.frames += 1;
        snap.baseline_centers = self.baseline.tracked_centers();
        snap.classifier = classifier.stats;

        Ok(alerts)
    }

    pub fn snapshot(&self) -> DetectorSnapshot {
        self.snapshot.clone()
    }
}

/// Worker counters (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub blocks_processed: AtomicU64,
    pub blocks_rejected: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub alerts_dropped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    pub fn get_rejected(&self) -> u64 {
        self.blocks_rejected.load(Ordering::Relaxed)
    }

    pub fn get_alerts(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }

    pub fn get_alerts_dropped(&self) -> u64 {
        self.alerts_dropped.load(Ordering::Relaxed)
    }
}

/// Spawn the `dsp-worker` thread
///
/// The worker runs until every block sender is gone and the queue is drained,
/// then drops `alert_tx` so the sink sees the channel close.
pub fn spawn_worker(
    mut detector: Detector,
    blocks: Receiver<SampleBlock>,
    alert_tx: Sender<Alert>,
    snapshot_tx: watch::Sender<DetectorSnapshot>,
    stats: Arc<PipelineStats>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("dsp-worker".to_string())
        .spawn(move || {
            info!("DSP worker started");
            for block in blocks.iter() {
                let alerts = match detector.process_block(&block) {
                    Ok(alerts) => alerts,
                    Err(e) => {
                        stats.blocks_rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Dropping block at {:.3} MHz: {}",
                            block.center_hz as f64 / 1e6,
                            e
                        );
                        continue;
                    }
                };
                stats.blocks_processed.fetch_add(1, Ordering::Relaxed);
                snapshot_tx.send_replace(detector.snapshot());

                for alert in alerts {
                    stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                    match alert_tx.try_send(alert) {
                        Ok(()) => {}
                        Err(TrySendError::Full(alert)) => {
                            stats.alerts_dropped.fetch_add(1, Ordering::Relaxed);
                            warn!("Alert channel full, dropped: {}", alert);
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            debug!("Alert sink gone");
                        }
                    }
                }
            }
            info!(
                "DSP worker stopped after {} blocks ({} rejected)",
                stats.get_processed(),
                stats.get_rejected()
            );
        })
        .context("Failed to spawn DSP worker thread")
}
