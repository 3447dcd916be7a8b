//! Persistence classification
//!
//! Regions are first matched against the DJI/FPV shape rules, the FPV band
//! floor against its rolling reference. Every match is routed into one keyed
//! store of tracked signals that confirms a bucket only after it recurs.
//!
//! Time is counted in *observed frames*: a tracked signal only ages on frames
//! whose footprint covers it, so a sweep that is busy elsewhere does not
//! evict a bucket it has not looked at.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::{Band, FrequencyMap, Spectrum};

use super::alert::{Alert, AlertKind, AlertSource};
use super::regions::Region;

/// Classifier thresholds
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub dji_min_width_mhz: f64,
    pub dji_max_width_mhz: f64,
    pub dji_mean_excess_db: f32,
    pub fpv_min_width_mhz: f64,
    pub fpv_max_width_mhz: f64,
    pub fpv_peak_excess_db: f32,
    pub fpv_mean_excess_db: f32,
    pub persist_hits: usize,
    pub persist_window: u64,
    /// Frequency bucket size; `None` uses half of each rule's minimum width
    pub bucket_tolerance_mhz: Option<f64>,
    /// `None` disables the floor-rise rule
    pub floor_rise: Option<FloorRiseConfig>,
    pub dji_bands: Vec<Band>,
    pub fpv_band: Band,
}

/// Floor-rise rule thresholds
#[derive(Debug, Clone)]
pub struct FloorRiseConfig {
    pub rise_db: f32,
    pub persist_hits: usize,
    /// Quiet frames averaged into the reference level per center
    pub reference_frames: usize,
}

impl Default for FloorRiseConfig {
    fn default() -> Self {
        Self {
            rise_db: 10.0,
            persist_hits: 2,
            reference_frames: 32,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            dji_min_width_mhz: 10.0,
            dji_max_width_mhz: 40.0,
            dji_mean_excess_db: 8.0,
            fpv_min_width_mhz: 4.0,
            fpv_max_width_mhz: 12.0,
            fpv_peak_excess_db: 12.0,
            fpv_mean_excess_db: 6.0,
            persist_hits: 2,
            persist_window: 5,
            bucket_tolerance_mhz: None,
            floor_rise: Some(FloorRiseConfig::default()),
            dji_bands: vec![Band::dji_24(), Band::dji_58()],
            fpv_band: Band::fpv(),
        }
    }
}

/// Band-type tag of a tracked bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignalKind {
    Dji,
    Fpv,
    FloorRise,
}

/// Key of the tracked-signal store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BucketKey {
    pub kind: SignalKind,
    /// Quantized frequency; 0 for band-keyed floor-rise tracking
    pub bucket: i64,
}

/// Lifecycle of a tracked signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    New,
    Accumulating,
    Confirmed,
}

/// Thresholds handed to the shared persistence routine
#[derive(Debug, Clone, Copy)]
struct Persistence {
    hits: usize,
    /// Matches older than this many observed frames do not count
    confirm_window: u64,
    /// Evict after this many observed frames without a match
    stale_after: u64,
}

/// What a match looked like on the frame it happened
#[derive(Debug, Clone, Copy)]
struct Observation {
    freq_hz: f64,
    width_hz: f64,
    mean_excess_db: f32,
    peak_excess_db: f32,
}

/// A rule match routed into persistence tracking
#[derive(Debug, Clone, Copy)]
enum Candidate {
    Shape {
        kind: SignalKind,
        observation: Observation,
    },
    FloorRise {
        observation: Observation,
    },
}

/// Persistent per-bucket detection state
#[derive(Debug, Clone, Serialize)]
pub struct TrackedSignal {
    pub key: BucketKey,
    pub state: TrackState,
    /// Matches since creation
    pub hit_count: u64,
    /// Frames that covered this signal since creation
    pub observed_frames: u64,
    pub last_match_frame: u64,
    /// Frequency span that must be inside a frame for it to count as observed
    pub coverage_hz: (f64, f64),
    pub last_freq_hz: f64,
    pub last_width_hz: f64,
    pub last_mean_excess_db: f32,
    pub last_peak_excess_db: f32,
    width_sum_hz: f64,
    /// Classifier frame that last aged this signal
    #[serde(skip)]
    last_seen_frame: u64,
    #[serde(skip)]
    recent_matches: VecDeque<u64>,
}

impl TrackedSignal {
    fn new(key: BucketKey, coverage_hz: (f64, f64), frame: u64) -> Self {
        Self {
            key,
            state: TrackState::New,
            hit_count: 0,
            observed_frames: 0,
            last_match_frame: 0,
            coverage_hz,
            last_freq_hz: 0.0,
            last_width_hz: 0.0,
            last_mean_excess_db: 0.0,
            last_peak_excess_db: 0.0,
            width_sum_hz: 0.0,
            last_seen_frame: frame,
            recent_matches: VecDeque::new(),
        }
    }

    fn is_covered_by(&self, map: &FrequencyMap) -> bool {
        self.coverage_hz.0 <= map.high_hz() && self.coverage_hz.1 >= map.low_hz()
    }

    /// Count `frame` as observed, at most once
    fn observe(&mut self, frame: u64) {
        if self.last_seen_frame != frame {
            self.observed_frames += 1;
            self.last_seen_frame = frame;
        }
    }

    fn is_stale(&self, policy: &Persistence) -> bool {
        self.observed_frames - self.last_match_frame >= policy.stale_after
    }

    /// Mean width over every match since creation
    pub fn average_width_hz(&self) -> f64 {
        if self.hit_count == 0 {
            0.0
        } else {
            self.width_sum_hz / self.hit_count as f64
        }
    }

    /// Fold one match in; returns true on the transition into `Confirmed`
    fn record_match(&mut self, obs: &Observation, policy: &Persistence) -> bool {
        if self.last_match_frame == self.observed_frames && self.hit_count > 0 {
            // Second region in the same bucket on one frame: refresh stats only
            self.refresh(obs);
            return false;
        }

        self.hit_count += 1;
        self.last_match_frame = self.observed_frames;
        self.width_sum_hz += obs.width_hz;
        self.refresh(obs);

        self.recent_matches.push_back(self.observed_frames);
        while let Some(&oldest) = self.recent_matches.front() {
            if self.observed_frames - oldest >= policy.confirm_window {
                self.recent_matches.pop_front();
            } else {
                break;
            }
        }

        if self.state == TrackState::New {
            self.state = TrackState::Accumulating;
        }
        if self.state == TrackState::Accumulating && self.recent_matches.len() >= policy.hits {
            self.state = TrackState::Confirmed;
            return true;
        }
        false
    }

    fn refresh(&mut self, obs: &Observation) {
        self.last_freq_hz = obs.freq_hz;
        self.last_width_hz = obs.width_hz;
        self.last_mean_excess_db = obs.mean_excess_db;
        self.last_peak_excess_db = obs.peak_excess_db;
    }
}

/// Rolling quiet-floor reference for one sweep center
#[derive(Debug, Default)]
struct FloorReference {
    levels: VecDeque<f32>,
}

impl FloorReference {
    fn mean(&self) -> Option<f32> {
        if self.levels.is_empty() {
            None
        } else {
            Some(self.levels.iter().sum::<f32>() / self.levels.len() as f32)
        }
    }

    fn push(&mut self, level: f32, depth: usize) {
        self.levels.push_back(level);
        while self.levels.len() > depth.max(1) {
            self.levels.pop_front();
        }
    }
}

/// Counters exposed to the stats reporter
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ClassifierStats {
    pub frames: u64,
    pub candidates: u64,
    pub regions_rejected: u64,
    pub confirmations: u64,
    pub evictions: u64,
}

/// Immutable view of the store for display
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifierSnapshot {
    pub tracked: usize,
    pub confirmed: usize,
    pub floor_rise_hits: u64,
    pub stats: ClassifierStats,
}

/// Keyed persistence state machine (single writer)
pub struct PersistenceClassifier {
    config: ClassifierConfig,
    signals: HashMap<BucketKey, TrackedSignal>,
    floor_refs: HashMap<u64, FloorReference>,
    stats: ClassifierStats,
}

impl PersistenceClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            signals: HashMap::new(),
            floor_refs: HashMap::new(),
            stats: ClassifierStats::default(),
        }
    }

    /// Run one frame's regions (and the band floor) through the rules and
    /// the persistence store; returns alerts for buckets that just confirmed
    pub fn process_frame(&mut self, spectrum: &Spectrum, regions: &[Region]) -> Vec<Alert> {
        let map = spectrum.map();
        self.stats.frames += 1;
        let frame = self.stats.frames;

        for signal in self.signals.values_mut() {
            if signal.is_covered_by(&map) {
                signal.observe(frame);
            }
        }

        let mut candidates = Vec::new();
        for region in regions {
            if let Err(e) = region.validate(map.bin_width()) {
                self.stats.regions_rejected += 1;
                warn!("Dropping region at bin {}: {}", region.start_bin, e);
                continue;
            }
            if let Some(kind) = self.classify_region(region) {
                candidates.push(Candidate::Shape {
                    kind,
                    observation: Observation {
                        freq_hz: region.center_hz(),
                        width_hz: region.bandwidth_hz,
                        mean_excess_db: region.mean_excess_db,
                        peak_excess_db: region.peak_excess_db,
                    },
                });
            }
        }
        if let Some(candidate) = self.floor_rise_candidate(spectrum, regions) {
            candidates.push(candidate);
        }
        self.stats.candidates += candidates.len() as u64;

        let mut alerts = Vec::new();
        for candidate in &candidates {
            if let Some(alert) = self.track(candidate, spectrum) {
                alerts.push(alert);
            }
        }

        self.evict_stale(&map);
        alerts
    }

    /// Shape rules; DJI takes precedence where both would match
    pub fn classify_region(&self, region: &Region) -> Option<SignalKind> {
        let cfg = &self.config;
        let freq = region.center_hz();
        let width = region.bandwidth_mhz();

        let in_dji = cfg.dji_bands.iter().any(|b| b.contains(freq));
        if in_dji
            && width >= cfg.dji_min_width_mhz
            && width <= cfg.dji_max_width_mhz
            && region.mean_excess_db >= cfg.dji_mean_excess_db
        {
            return Some(SignalKind::Dji);
        }

        if cfg.fpv_band.contains(freq)
            && width >= cfg.fpv_min_width_mhz
            && width <= cfg.fpv_max_width_mhz
            && (region.peak_excess_db >= cfg.fpv_peak_excess_db
                || region.mean_excess_db >= cfg.fpv_mean_excess_db)
        {
            return Some(SignalKind::Fpv);
        }
        None
    }

    /// FPV band average against the quiet reference for this center
    fn floor_rise_candidate(
        &mut self,
        spectrum: &Spectrum,
        regions: &[Region],
    ) -> Option<Candidate> {
        let floor_cfg = self.config.floor_rise.as_ref()?;
        let band = &self.config.fpv_band;
        let level = spectrum.band_average_db(band)?;

        let reference = self
            .floor_refs
            .entry((spectrum.center_hz + 500) / 1_000)
            .or_default();
        let rise = match reference.mean() {
            Some(mean) => level - mean,
            None => {
                reference.push(level, floor_cfg.reference_frames);
                return None;
            }
        };
        if rise < floor_cfg.rise_db {
            reference.push(level, floor_cfg.reference_frames);
            return None;
        }

        // Locate the strongest bin in the band and the hot region around it
        let map = spectrum.map();
        let bins = map.bins_in(band);
        let peak_bin = bins
            .clone()
            .max_by(|&a, &b| spectrum.power_db[a].total_cmp(&spectrum.power_db[b]))
            .unwrap_or(bins.start);
        let width_hz = regions
            .iter()
            .find(|r| r.contains_bin(peak_bin))
            .map(|r| r.bandwidth_hz)
            .unwrap_or(0.0);

        Some(Candidate::FloorRise {
            observation: Observation {
                freq_hz: map.bin_to_hz(peak_bin),
                width_hz,
                mean_excess_db: rise,
                peak_excess_db: rise,
            },
        })
    }

    fn bucket_size_hz(&self, kind: SignalKind) -> f64 {
        let min_width_mhz = match kind {
            SignalKind::Dji => self.config.dji_min_width_mhz,
            _ => self.config.fpv_min_width_mhz,
        };
        self.config
            .bucket_tolerance_mhz
            .unwrap_or(min_width_mhz / 2.0)
            .max(1e-3)
            * 1e6
    }

    /// Store key and footprint for a candidate
    ///
    /// A shape match covers the span it was seen at, not the bucket center,
    /// which may lie outside the frame when the tolerance is wide.
    fn key_and_coverage(&self, candidate: &Candidate) -> (BucketKey, (f64, f64)) {
        match candidate {
            Candidate::Shape { kind, observation } => {
                let size = self.bucket_size_hz(*kind);
                let bucket = (observation.freq_hz / size).round() as i64;
                let half = observation.width_hz / 2.0;
                (
                    BucketKey { kind: *kind, bucket },
                    (observation.freq_hz - half, observation.freq_hz + half),
                )
            }
            Candidate::FloorRise { .. } => {
                let band = &self.config.fpv_band;
                (
                    BucketKey {
                        kind: SignalKind::FloorRise,
                        bucket: 0,
                    },
                    (band.low_hz, band.high_hz),
                )
            }
        }
    }

    /// Reuse a neighbouring bucket when a match lands just across a bucket
    /// edge from a signal already tracked within one bucket width
    fn resolve_key(&self, key: BucketKey, obs: &Observation) -> BucketKey {
        if key.kind == SignalKind::FloorRise || self.signals.contains_key(&key) {
            return key;
        }
        let size = self.bucket_size_hz(key.kind);
        [key.bucket - 1, key.bucket + 1]
            .into_iter()
            .map(|bucket| BucketKey { bucket, ..key })
            .filter_map(|k| {
                self.signals
                    .get(&k)
                    .map(|s| (k, (s.last_freq_hz - obs.freq_hz).abs()))
            })
            .filter(|(_, distance)| *distance <= size)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k)
            .unwrap_or(key)
    }

    fn policy_for(&self, key: &BucketKey) -> Persistence {
        match key.kind {
            // Consecutive frames only: one quiet frame evicts
            SignalKind::FloorRise => Persistence {
                hits: self
                    .config
                    .floor_rise
                    .as_ref()
                    .map(|f| f.persist_hits)
                    .unwrap_or(usize::MAX),
                confirm_window: u64::MAX,
                stale_after: 1,
            },
            _ => Persistence {
                hits: self.config.persist_hits,
                confirm_window: self.config.persist_window,
                stale_after: self.config.persist_window,
            },
        }
    }

    /// Shared persistence routine for every candidate type
    fn track(&mut self, candidate: &Candidate, spectrum: &Spectrum) -> Option<Alert> {
        let observation = match candidate {
            Candidate::Shape { observation, .. } | Candidate::FloorRise { observation } => {
                *observation
            }
        };
        let (key, coverage) = self.key_and_coverage(candidate);
        let key = self.resolve_key(key, &observation);
        let policy = self.policy_for(&key);
        let frame = self.stats.frames;

        let signal = self.signals.entry(key).or_insert_with(|| {
            debug!(
                "New {:?} bucket {} at {:.3} MHz",
                key.kind,
                key.bucket,
                observation.freq_hz / 1e6
            );
            let mut signal = TrackedSignal::new(key, coverage, frame);
            // The frame that created it is its first observed frame
            signal.observed_frames = 1;
            signal
        });
        // A match is an observation even if the old span missed this frame
        signal.observe(frame);
        signal.coverage_hz = coverage;

        if !signal.record_match(&observation, &policy) {
            return None;
        }
        self.stats.confirmations += 1;

        let (kind, source) = match key.kind {
            SignalKind::Dji => (AlertKind::Dji, AlertSource::Region),
            SignalKind::Fpv => (AlertKind::Fpv, AlertSource::Region),
            SignalKind::FloorRise => (AlertKind::Fpv, AlertSource::FloorRise),
        };
        let alert = Alert {
            kind,
            source,
            freq_mhz: signal.last_freq_hz / 1e6,
            width_mhz: signal.last_width_hz / 1e6,
            mean_excess_db: signal.last_mean_excess_db,
            peak_excess_db: signal.last_peak_excess_db,
            timestamp: spectrum.captured_at,
        };
        info!(
            "Confirmed {:?} bucket {} after {} hits",
            key.kind, key.bucket, signal.hit_count
        );
        Some(alert)
    }

    /// Remove covered signals that went `stale_after` frames without a match
    fn evict_stale(&mut self, map: &FrequencyMap) {
        let before = self.signals.len();
        let policies: Vec<(BucketKey, Persistence)> = self
            .signals
            .keys()
            .map(|k| (*k, self.policy_for(k)))
            .collect();
        for (key, policy) in policies {
            let stale = self
                .signals
                .get(&key)
                .map(|s| s.is_covered_by(map) && s.is_stale(&policy))
                .unwrap_or(false);
            if stale {
                if let Some(signal) = self.signals.remove(&key) {
                    debug!(
                        "Evicted {:?} bucket {} ({:?}, {} hits)",
                        key.kind, key.bucket, signal.state, signal.hit_count
                    );
                }
            }
        }
        self.stats.evictions += (before - self.signals.len()) as u64;
    }

    pub fn get(&self, key: &BucketKey) -> Option<&TrackedSignal> {
        self.signals.get(key)
    }

    /// All tracked signals (cloned, for display)
    pub fn tracked(&self) -> Vec<TrackedSignal> {
        self.signals.values().cloned().collect()
    }

    /// Consecutive qualifying floor-rise frames so far
    pub fn floor_rise_hits(&self) -> u64 {
        self.signals
            .get(&BucketKey {
                kind: SignalKind::FloorRise,
                bucket: 0,
            })
            .map(|s| s.hit_count)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    pub fn snapshot(&self) -> ClassifierSnapshot {
        ClassifierSnapshot {
            tracked: self.signals.len(),
            confirmed: self
                .signals
                .values()
                .filter(|s| s.state == TrackState::Confirmed)
                .count(),
            floor_rise_hits: self.floor_rise_hits(),
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::regions::{group_regions, HotBin};
    use chrono::Utc;

    const NFFT: usize = 2000; // 10 kHz bins at 20 MS/s

    fn spectrum(center_hz: u64, level_db: f32) -> Spectrum {
        Spectrum {
            power_db: vec![level_db; NFFT],
            center_hz,
            sample_rate: 20e6,
            captured_at: Utc::now(),
        }
    }

    /// Region of `width_mhz` centred on the frame center
    fn region(center_hz: u64, width_mhz: f64, mean_db: f32, peak_db: f32) -> Region {
        let map = FrequencyMap::new(center_hz as f64, 20e6, NFFT);
        let bins = (width_mhz * 1e6 / map.bin_width()).round() as usize;
        let first = NFFT / 2 - bins / 2;
        let mut hot: Vec<HotBin> = (first..first + bins)
            .map(|bin| HotBin {
                bin,
                excess_db: mean_db,
            })
            .collect();
        // Keep the mean exact while raising one bin to the peak
        let delta = peak_db - mean_db;
        hot[0].excess_db += delta;
        hot[1].excess_db -= delta;
        group_regions(&hot, &map).remove(0)
    }

    fn no_floor() -> ClassifierConfig {
        ClassifierConfig {
            floor_rise: None,
            ..ClassifierConfig::default()
        }
    }

    #[test]
    fn test_dji_confirms_once() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        let frame = spectrum(2_440_000_000, -90.0);
        let dji = region(2_440_000_000, 15.0, 9.0, 12.0);
        assert_eq!(classifier.classify_region(&dji), Some(SignalKind::Dji));

        assert!(classifier.process_frame(&frame, &[dji.clone()]).is_empty());
        let alerts = classifier.process_frame(&frame, &[dji.clone()]);
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.kind, AlertKind::Dji);
        assert_eq!(alert.source, AlertSource::Region);
        assert!((alert.width_mhz - 15.0).abs() < 0.01);
        assert!((alert.mean_excess_db - 9.0).abs() < 1e-3);
        assert!((alert.freq_mhz - 2440.0).abs() < 0.01);

        // Third match while confirmed: no re-alert
        assert!(classifier.process_frame(&frame, &[dji]).is_empty());
        assert_eq!(classifier.snapshot().confirmed, 1);
    }

    #[test]
    fn test_state_transitions() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        let frame = spectrum(2_440_000_000, -90.0);
        let dji = region(2_440_000_000, 15.0, 9.0, 12.0);
        classifier.process_frame(&frame, &[dji.clone()]);

        let key = classifier.tracked()[0].key;
        let signal = classifier.get(&key).unwrap();
        assert_eq!(signal.state, TrackState::Accumulating);
        assert_eq!(signal.hit_count, 1);

        classifier.process_frame(&frame, &[dji]);
        let signal = classifier.get(&key).unwrap();
        assert_eq!(signal.state, TrackState::Confirmed);
        assert_eq!(signal.hit_count, 2);
        assert!((signal.average_width_hz() - 15e6).abs() < 1e4);
    }

    #[test]
    fn test_stale_bucket_is_evicted_and_realerts() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        let frame = spectrum(2_440_000_000, -90.0);
        let dji = region(2_440_000_000, 15.0, 9.0, 12.0);

        classifier.process_frame(&frame, &[dji.clone()]);
        assert_eq!(classifier.process_frame(&frame, &[dji.clone()]).len(), 1);

        // persist_window frames without a match
        for _ in 0..5 {
            classifier.process_frame(&frame, &[]);
        }
        assert_eq!(classifier.snapshot().tracked, 0);
        assert_eq!(classifier.stats().evictions, 1);

        assert!(classifier.process_frame(&frame, &[dji.clone()]).is_empty());
        assert_eq!(classifier.process_frame(&frame, &[dji]).len(), 1);
    }

    #[test]
    fn test_hits_outside_window_do_not_confirm() {
        let config = ClassifierConfig {
            persist_hits: 3,
            persist_window: 4,
            floor_rise: None,
            ..ClassifierConfig::default()
        };
        let mut classifier = PersistenceClassifier::new(config);
        let frame = spectrum(2_440_000_000, -90.0);
        let dji = region(2_440_000_000, 15.0, 9.0, 12.0);

        // Matches on observed frames 1, 4, 7: never 3 within 4 frames
        for i in 0..9 {
            let regions = if i % 3 == 0 { vec![dji.clone()] } else { vec![] };
            assert!(classifier.process_frame(&frame, &regions).is_empty());
        }
    }

    #[test]
    fn test_frames_elsewhere_do_not_age_bucket() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        let here = spectrum(2_440_000_000, -90.0);
        let elsewhere = spectrum(5_800_000_000, -90.0);
        let dji = region(2_440_000_000, 15.0, 9.0, 12.0);

        classifier.process_frame(&here, &[dji.clone()]);
        for _ in 0..20 {
            classifier.process_frame(&elsewhere, &[]);
        }
        assert_eq!(classifier.snapshot().tracked, 1);
        assert_eq!(classifier.process_frame(&here, &[dji]).len(), 1);
    }

    #[test]
    fn test_wide_bucket_tolerance_still_confirms() {
        let config = ClassifierConfig {
            bucket_tolerance_mhz: Some(30.0),
            ..no_floor()
        };
        let mut classifier = PersistenceClassifier::new(config);
        // Bucket 82 sits at 2460 MHz, below this 2463..2483 MHz footprint
        let frame = spectrum(2_473_000_000, -90.0);
        let dji = region(2_473_000_000, 15.0, 9.0, 12.0);

        let mut alerts = 0;
        for _ in 0..6 {
            alerts += classifier.process_frame(&frame, &[dji.clone()]).len();
        }
        assert_eq!(alerts, 1);
        let signal = &classifier.tracked()[0];
        assert_eq!(signal.state, TrackState::Confirmed);
        assert_eq!(signal.hit_count, 6);
        assert_eq!(signal.observed_frames, 6);

        // And it still ages out once the emitter goes away
        for _ in 0..5 {
            classifier.process_frame(&frame, &[]);
        }
        assert_eq!(classifier.snapshot().tracked, 0);
    }

    #[test]
    fn test_jitter_across_bucket_edge_tracks_one_signal() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        // 5 MHz buckets: 2442 MHz rounds to 488, 2443 MHz to 489
        let frames = [
            (spectrum(2_442_000_000, -90.0), region(2_442_000_000, 15.0, 9.0, 12.0)),
            (spectrum(2_443_000_000, -90.0), region(2_443_000_000, 15.0, 9.0, 12.0)),
        ];

        let mut alerts = 0;
        for _ in 0..3 {
            for (frame, dji) in &frames {
                alerts += classifier.process_frame(frame, &[dji.clone()]).len();
            }
        }
        assert_eq!(alerts, 1);
        assert_eq!(classifier.snapshot().tracked, 1);
        assert_eq!(classifier.tracked()[0].key.bucket, 488);
    }

    #[test]
    fn test_fpv_region_alert() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        let frame = spectrum(5_800_000_000, -90.0);
        // 6 MHz wide, peak 14 dB, mean below the 6 dB mean gate
        let fpv = region(5_800_000_000, 6.0, 5.0, 14.0);
        assert_eq!(classifier.classify_region(&fpv), Some(SignalKind::Fpv));

        assert!(classifier.process_frame(&frame, &[fpv.clone()]).is_empty());
        let alerts = classifier.process_frame(&frame, &[fpv.clone()]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Fpv);
        assert!((alerts[0].peak_excess_db - 14.0).abs() < 1e-3);
        assert!(alerts[0].to_string().contains("Peak +14.0 dB"));
        assert!(classifier.process_frame(&frame, &[fpv]).is_empty());
    }

    #[test]
    fn test_shape_rules_reject() {
        let classifier = PersistenceClassifier::new(no_floor());
        let classify = |center_hz, width_mhz, mean_db, peak_db| {
            classifier.classify_region(&region(center_hz, width_mhz, mean_db, peak_db))
        };
        // Too narrow for DJI, outside FPV band
        assert_eq!(classify(2_440_000_000, 6.0, 20.0, 20.0), None);
        // Wide enough but too weak
        assert_eq!(classify(2_440_000_000, 15.0, 7.0, 12.0), None);
        // Wider DJI channel still matches
        assert_eq!(classify(2_440_000_000, 19.0, 9.0, 12.0), Some(SignalKind::Dji));
        // FPV-width but weak on both gates
        assert_eq!(classify(5_700_000_000, 6.0, 5.0, 10.0), None);
        // FPV-width outside FPV band
        assert_eq!(classify(5_500_000_000, 6.0, 9.0, 14.0), None);
    }

    #[test]
    fn test_malformed_region_counted_not_fatal() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        let frame = spectrum(2_440_000_000, -90.0);
        let mut bad = region(2_440_000_000, 15.0, 9.0, 12.0);
        bad.end_hz = bad.start_hz - 1.0;

        assert!(classifier.process_frame(&frame, &[bad]).is_empty());
        assert_eq!(classifier.stats().regions_rejected, 1);
        assert_eq!(classifier.snapshot().tracked, 0);
    }

    #[test]
    fn test_floor_rise_alerts_once() {
        let mut classifier = PersistenceClassifier::new(ClassifierConfig::default());
        let center = 5_800_000_000;
        for _ in 0..5 {
            assert!(classifier.process_frame(&spectrum(center, -90.0), &[]).is_empty());
        }

        assert!(classifier.process_frame(&spectrum(center, -78.0), &[]).is_empty());
        assert_eq!(classifier.floor_rise_hits(), 1);
        let alerts = classifier.process_frame(&spectrum(center, -78.0), &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Fpv);
        assert_eq!(alerts[0].source, AlertSource::FloorRise);
        assert!((alerts[0].peak_excess_db - 12.0).abs() < 1e-3);

        // Holds while the rise continues
        assert!(classifier.process_frame(&spectrum(center, -78.0), &[]).is_empty());
        assert!(classifier.process_frame(&spectrum(center, -78.0), &[]).is_empty());
    }

    #[test]
    fn test_floor_rise_counter_resets_on_quiet_frame() {
        let mut classifier = PersistenceClassifier::new(ClassifierConfig::default());
        let center = 5_800_000_000;
        for _ in 0..5 {
            classifier.process_frame(&spectrum(center, -90.0), &[]);
        }

        for _ in 0..3 {
            assert!(classifier.process_frame(&spectrum(center, -78.0), &[]).is_empty());
            assert_eq!(classifier.floor_rise_hits(), 1);
            assert!(classifier.process_frame(&spectrum(center, -90.0), &[]).is_empty());
            assert_eq!(classifier.floor_rise_hits(), 0);
        }
    }

    #[test]
    fn test_floor_rise_realerts_after_reset() {
        let mut classifier = PersistenceClassifier::new(ClassifierConfig::default());
        let center = 5_800_000_000;
        for _ in 0..5 {
            classifier.process_frame(&spectrum(center, -90.0), &[]);
        }
        classifier.process_frame(&spectrum(center, -78.0), &[]);
        assert_eq!(classifier.process_frame(&spectrum(center, -78.0), &[]).len(), 1);

        classifier.process_frame(&spectrum(center, -90.0), &[]);
        classifier.process_frame(&spectrum(center, -78.0), &[]);
        assert_eq!(classifier.process_frame(&spectrum(center, -78.0), &[]).len(), 1);
    }

    #[test]
    fn test_floor_rise_disabled() {
        let mut classifier = PersistenceClassifier::new(no_floor());
        let center = 5_800_000_000;
        for _ in 0..5 {
            classifier.process_frame(&spectrum(center, -90.0), &[]);
        }
        for _ in 0..5 {
            assert!(classifier.process_frame(&spectrum(center, -70.0), &[]).is_empty());
        }
    }

    #[test]
    fn test_floor_rise_ignores_frames_outside_fpv_band() {
        let mut classifier = PersistenceClassifier::new(ClassifierConfig::default());
        let center = 2_440_000_000;
        for _ in 0..3 {
            classifier.process_frame(&spectrum(center, -90.0), &[]);
        }
        for _ in 0..3 {
            assert!(classifier.process_frame(&spectrum(center, -70.0), &[]).is_empty());
        }
    }

    #[test]
    fn test_shape_and_floor_rise_are_independent() {
        let mut classifier = PersistenceClassifier::new(ClassifierConfig::default());
        let center = 5_800_000_000;
        for _ in 0..5 {
            classifier.process_frame(&spectrum(center, -90.0), &[]);
        }
        let fpv = region(center, 6.0, 8.0, 14.0);
        classifier.process_frame(&spectrum(center, -78.0), &[fpv.clone()]);
        let alerts = classifier.process_frame(&spectrum(center, -78.0), &[fpv]);
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().any(|a| a.source == AlertSource::Region));
        assert!(alerts.iter().any(|a| a.source == AlertSource::FloorRise));
    }
}
