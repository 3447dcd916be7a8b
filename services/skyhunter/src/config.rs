//! Configuration from command-line flags, with `SKYHUNTER_*` environment
//! fallbacks

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::detect::{ClassifierConfig, FloorRiseConfig};
use crate::error::ConfigError;
use crate::pipeline::DetectorConfig;
use crate::sdr::{CaptureConfig, FrontEnd, HackRfConfig, SimEmitter, SyntheticConfig};
use crate::types::{Band, BandKind, SweepMode};

/// Application configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Real-time DJI / FPV drone RF detector for HackRF")]
pub struct Config {
    /// Band set to sweep
    #[arg(long = "auto", value_enum, env = "SKYHUNTER_AUTO", default_value_t = SweepMode::All)]
    pub mode: SweepMode,

    /// Custom band list in MHz, e.g. "2400:2483,5725:5850" (overrides --auto)
    #[arg(long, env = "SKYHUNTER_BANDS")]
    pub bands: Option<String>,

    /// Capture bandwidth per center, Hz
    #[arg(long, env = "SKYHUNTER_SAMPLE_RATE", default_value_t = 20e6)]
    pub sample_rate: f64,

    /// Seconds spent per center before retuning
    #[arg(long, env = "SKYHUNTER_DWELL", default_value_t = 0.4)]
    pub dwell: f64,

    /// Fractional overlap between adjacent sweep centers
    #[arg(long, env = "SKYHUNTER_CENTER_OVERLAP", default_value_t = 0.75)]
    pub center_overlap: f64,

    /// Milliseconds of samples per processed block
    #[arg(long, env = "SKYHUNTER_FRAME_MS", default_value_t = 100)]
    pub frame_ms: u64,

    #[arg(long, env = "SKYHUNTER_NFFT", default_value_t = 4096)]
    pub nfft: usize,

    /// Welch segment overlap fraction
    #[arg(long, env = "SKYHUNTER_OVERLAP", default_value_t = 0.5)]
    pub overlap: f64,

    /// Spectra averaged per frame at the same center
    #[arg(long, env = "SKYHUNTER_AVG_FRAMES", default_value_t = 2)]
    pub avg_frames: usize,

    /// Hot-bin threshold over the baseline, dB
    #[arg(long, env = "SKYHUNTER_DELTA_DB", default_value_t = 6.0)]
    pub delta_db: f32,

    /// Baseline rolling-window depth, frames
    #[arg(long, env = "SKYHUNTER_NBINS_BASELINE", default_value_t = 5)]
    pub nbins_baseline: usize,

    #[arg(long, env = "SKYHUNTER_BASELINE_PERCENTILE", default_value_t = 20.0)]
    pub baseline_percentile: f64,

    /// DJI mean-excess threshold, dB
    #[arg(long, env = "SKYHUNTER_MEAN_EXCESS_DB", default_value_t = 8.0)]
    pub mean_excess_db: f32,

    #[arg(long, env = "SKYHUNTER_MINWIDTH_MHZ", default_value_t = 10.0)]
    pub minwidth_mhz: f64,

    #[arg(long, env = "SKYHUNTER_MAXWIDTH_MHZ", default_value_t = 40.0)]
    pub maxwidth_mhz: f64,

    #[arg(long, env = "SKYHUNTER_FPV_MINWIDTH_MHZ", default_value_t = 4.0)]
    pub fpv_minwidth_mhz: f64,

    #[arg(long, env = "SKYHUNTER_FPV_MAXWIDTH_MHZ", default_value_t = 12.0)]
    pub fpv_maxwidth_mhz: f64,

    #[arg(long, env = "SKYHUNTER_FPV_PEAK_EXCESS_DB", default_value_t = 12.0)]
    pub fpv_peak_excess_db: f32,

    #[arg(long, env = "SKYHUNTER_FPV_MEAN_EXCESS_DB", default_value_t = 6.0)]
    pub fpv_mean_excess_db: f32,

    /// Matches needed to confirm a DJI/FPV signal
    #[arg(long, env = "SKYHUNTER_PERSIST_HITS", default_value_t = 2)]
    pub persist_hits: usize,

    /// Frames those matches must fall within
    #[arg(long, env = "SKYHUNTER_PERSIST_WINDOW", default_value_t = 5)]
    pub persist_window: usize,

    /// Frequency bucket size for matching; defaults to half the rule's minimum width
    #[arg(long, env = "SKYHUNTER_BUCKET_TOLERANCE_MHZ")]
    pub bucket_tolerance_mhz: Option<f64>,

    #[arg(long, env = "SKYHUNTER_FLOOR_ALERT_RISE_DB", default_value_t = 10.0)]
    pub floor_alert_rise_db: f32,

    #[arg(long, env = "SKYHUNTER_FLOOR_PERSIST_HITS", default_value_t = 2)]
    pub floor_persist_hits: usize,

    /// Quiet frames averaged into the floor-rise reference
    #[arg(long, env = "SKYHUNTER_FLOOR_REFERENCE_FRAMES", default_value_t = 32)]
    pub floor_reference_frames: usize,

    /// Disable the FPV floor-rise rule
    #[arg(long, env = "SKYHUNTER_NO_FLOOR_ALERT")]
    pub no_floor_alert: bool,

    /// Enable the RF amplifier
    #[arg(long, env = "SKYHUNTER_AMP")]
    pub amp: bool,

    /// LNA gain, dB (0..=40, step 8)
    #[arg(long, env = "SKYHUNTER_LNA", default_value_t = 32)]
    pub lna: u32,

    /// VGA gain, dB (0..=62, step 2)
    #[arg(long, env = "SKYHUNTER_VGA", default_value_t = 30)]
    pub vga: u32,

    #[arg(long, env = "SKYHUNTER_DEVICE_INDEX", default_value_t = 0)]
    pub device_index: u32,

    #[arg(long, env = "SKYHUNTER_HACKRF_INFO_PATH", default_value = "hackrf_info")]
    pub hackrf_info_path: String,

    #[arg(long, env = "SKYHUNTER_HACKRF_TRANSFER_PATH", default_value = "hackrf_transfer")]
    pub hackrf_transfer_path: String,

    #[arg(long, env = "SKYHUNTER_READ_TIMEOUT_MS", default_value_t = 1000)]
    pub read_timeout_ms: u64,

    /// Retries for a failed read before capture gives up
    #[arg(long, env = "SKYHUNTER_READ_RETRIES", default_value_t = 5)]
    pub read_retries: u32,

    /// Blocks buffered between capture and processing
    #[arg(long, env = "SKYHUNTER_QUEUE_DEPTH", default_value_t = 4)]
    pub queue_depth: usize,

    /// Use the synthetic source instead of a HackRF
    #[arg(long, env = "SKYHUNTER_SIMULATE")]
    pub simulate: bool,

    /// Simulated emitter <freq_mhz>:<width_mhz>:<snr_db> (repeatable)
    #[arg(long = "sim-emitter", value_name = "FREQ:WIDTH:SNR")]
    pub sim_emitters: Vec<String>,

    #[arg(long, env = "SKYHUNTER_SIM_SEED", default_value_t = 1)]
    pub sim_seed: u64,

    /// Reads at a center before simulated emitters switch on
    #[arg(long, env = "SKYHUNTER_SIM_ONSET_BLOCKS", default_value_t = 8)]
    pub sim_onset_blocks: u64,

    /// Append every alert as a JSON line to this file
    #[arg(long, env = "SKYHUNTER_ALERT_LOG", value_name = "PATH")]
    pub alert_log: Option<PathBuf>,
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

fn fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::FractionOutOfRange { name, value })
    }
}

fn ordered(
    min_name: &'static str,
    min: f64,
    max_name: &'static str,
    max: f64,
) -> Result<(), ConfigError> {
    if min > max {
        Err(ConfigError::InvertedRange {
            min_name,
            min,
            max_name,
            max,
        })
    } else {
        Ok(())
    }
}

/// Parse "lo:hi[,lo:hi...]" in MHz
pub fn parse_bands(list: &str) -> Result<Vec<Band>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|range| {
            let invalid = || ConfigError::InvalidBand(range.to_string());
            let (lo, hi) = range.split_once(':').ok_or_else(invalid)?;
            let lo: f64 = lo.trim().parse().map_err(|_| invalid())?;
            let hi: f64 = hi.trim().parse().map_err(|_| invalid())?;
            if !(lo > 0.0 && lo < hi) {
                return Err(invalid());
            }
            Ok(Band::from_mhz(range, BandKind::Custom, (lo, hi)))
        })
        .collect()
}

/// Parse "freq_mhz:width_mhz:snr_db"
pub fn parse_emitter(text: &str) -> Result<SimEmitter, ConfigError> {
    let invalid = || ConfigError::InvalidEmitter(text.to_string());
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    let [freq, width, snr] = parts.as_slice() else {
        return Err(invalid());
    };
    let freq: f64 = freq.parse().map_err(|_| invalid())?;
    let width: f64 = width.parse().map_err(|_| invalid())?;
    let snr: f32 = snr.parse().map_err(|_| invalid())?;
    if freq <= 0.0 || width <= 0.0 {
        return Err(invalid());
    }
    Ok(SimEmitter::from_mhz(freq, width, snr))
}

impl Config {
    /// Reject out-of-range or contradictory settings before any acquisition
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("sample-rate", self.sample_rate)?;
        positive("dwell", self.dwell)?;
        positive("frame-ms", self.frame_ms as f64)?;
        positive("read-timeout-ms", self.read_timeout_ms as f64)?;
        positive("queue-depth", self.queue_depth as f64)?;
        positive("avg-frames", self.avg_frames as f64)?;
        positive("nbins-baseline", self.nbins_baseline as f64)?;
        positive("persist-hits", self.persist_hits as f64)?;
        positive("floor-persist-hits", self.floor_persist_hits as f64)?;
        positive("floor-reference-frames", self.floor_reference_frames as f64)?;
        positive("delta-db", self.delta_db as f64)?;
        positive("floor-alert-rise-db", self.floor_alert_rise_db as f64)?;
        if let Some(tol) = self.bucket_tolerance_mhz {
            positive("bucket-tolerance-mhz", tol)?;
        }

        fraction("center-overlap", self.center_overlap)?;
        fraction("overlap", self.overlap)?;

        if self.nfft < 16 || self.nfft % 2 != 0 {
            return Err(ConfigError::InvalidNfft(self.nfft));
        }
        if self.persist_window < self.persist_hits {
            return Err(ConfigError::WindowShorterThanHits {
                hits: self.persist_hits,
                window: self.persist_window,
            });
        }
        if !(self.baseline_percentile > 0.0 && self.baseline_percentile < 100.0) {
            return Err(ConfigError::PercentileOutOfRange(self.baseline_percentile));
        }

        positive("minwidth-mhz", self.minwidth_mhz)?;
        ordered("minwidth-mhz", self.minwidth_mhz, "maxwidth-mhz", self.maxwidth_mhz)?;
        positive("fpv-minwidth-mhz", self.fpv_minwidth_mhz)?;
        ordered(
            "fpv-minwidth-mhz",
            self.fpv_minwidth_mhz,
            "fpv-maxwidth-mhz",
            self.fpv_maxwidth_mhz,
        )?;

        if self.lna > 40 || self.lna % 8 != 0 {
            return Err(ConfigError::InvalidLnaGain(self.lna));
        }
        if self.vga > 62 || self.vga % 2 != 0 {
            return Err(ConfigError::InvalidVgaGain(self.vga));
        }

        self.sweep_bands()?;
        self.emitters()?;
        Ok(())
    }

    /// Bands the scheduler visits: `--bands` if given, else the `--auto` set
    pub fn sweep_bands(&self) -> Result<Vec<Band>, ConfigError> {
        let bands = match &self.bands {
            Some(list) => parse_bands(list)?,
            None => self.mode.bands(),
        };
        if bands.is_empty() {
            return Err(ConfigError::NoBands);
        }
        Ok(bands)
    }

    pub fn emitters(&self) -> Result<Vec<SimEmitter>, ConfigError> {
        self.sim_emitters.iter().map(|s| parse_emitter(s)).collect()
    }

    /// Samples per block: `max(nfft, sample_rate * frame_ms / 1000)`
    pub fn block_samples(&self) -> usize {
        let frame = (self.sample_rate * self.frame_ms as f64 / 1000.0).round() as usize;
        frame.max(self.nfft)
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            dji_min_width_mhz: self.minwidth_mhz,
            dji_max_width_mhz: self.maxwidth_mhz,
            dji_mean_excess_db: self.mean_excess_db,
            fpv_min_width_mhz: self.fpv_minwidth_mhz,
            fpv_max_width_mhz: self.fpv_maxwidth_mhz,
            fpv_peak_excess_db: self.fpv_peak_excess_db,
            fpv_mean_excess_db: self.fpv_mean_excess_db,
            persist_hits: self.persist_hits,
            persist_window: self.persist_window as u64,
            bucket_tolerance_mhz: self.bucket_tolerance_mhz,
            floor_rise: (!self.no_floor_alert).then(|| FloorRiseConfig {
                rise_db: self.floor_alert_rise_db,
                persist_hits: self.floor_persist_hits,
                reference_frames: self.floor_reference_frames,
            }),
            ..ClassifierConfig::default()
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            nfft: self.nfft,
            overlap: self.overlap,
            avg_frames: self.avg_frames,
            delta_db: self.delta_db,
            baseline_depth: self.nbins_baseline,
            baseline_percentile: self.baseline_percentile,
            classifier: self.classifier_config(),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            block_samples: self.block_samples(),
            queue_depth: self.queue_depth,
            read_retries: self.read_retries,
            ..CaptureConfig::default()
        }
    }

    pub fn front_end(&self) -> FrontEnd {
        FrontEnd {
            device_index: self.device_index,
            amp_enable: self.amp,
            lna_gain: self.lna,
            vga_gain: self.vga,
        }
    }

    pub fn hackrf_config(&self) -> HackRfConfig {
        HackRfConfig {
            front_end: self.front_end(),
            info_path: self.hackrf_info_path.clone(),
            transfer_path: self.hackrf_transfer_path.clone(),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn synthetic_config(&self) -> Result<SyntheticConfig, ConfigError> {
        Ok(SyntheticConfig {
            seed: self.sim_seed,
            emitters: self.emitters()?,
            onset_blocks: self.sim_onset_blocks,
            ..SyntheticConfig::default()
        })
    }

    /// Log the effective configuration
    pub fn log_summary(&self) {
        let bands = match &self.bands {
            Some(list) => format!("custom [{}]", list),
            None => self.mode.label().to_string(),
        };
        info!("  Bands: {}", bands);
        info!(
            "  Sample rate: {:.1} MHz | dwell {:.2}s | center overlap {:.2}",
            self.sample_rate / 1e6,
            self.dwell,
            self.center_overlap
        );
        info!(
            "  NFFT: {} | overlap {:.2} | avg frames {} | block {} samples",
            self.nfft,
            self.overlap,
            self.avg_frames,
            self.block_samples()
        );
        info!(
            "  Baseline: depth {} @ p{:.0} | delta {:.1} dB",
            self.nbins_baseline, self.baseline_percentile, self.delta_db
        );
        info!(
            "  DJI: {:.0}-{:.0} MHz, mean >= {:.1} dB | FPV: {:.0}-{:.0} MHz, peak >= {:.1} or mean >= {:.1} dB",
            self.minwidth_mhz,
            self.maxwidth_mhz,
            self.mean_excess_db,
            self.fpv_minwidth_mhz,
            self.fpv_maxwidth_mhz,
            self.fpv_peak_excess_db,
            self.fpv_mean_excess_db
        );
        info!(
            "  Persistence: {} hits in {} frames",
            self.persist_hits, self.persist_window
        );
        if self.no_floor_alert {
            info!("  Floor-rise alert: disabled");
        } else {
            info!(
                "  Floor-rise alert: +{:.1} dB for {} frames",
                self.floor_alert_rise_db, self.floor_persist_hits
            );
        }
        if self.simulate {
            info!(
                "  Source: synthetic (seed {}, {} emitter(s))",
                self.sim_seed,
                self.sim_emitters.len()
            );
        } else {
            info!(
                "  Source: HackRF #{} | amp {} | LNA {} dB | VGA {} dB",
                self.device_index,
                if self.amp { "on" } else { "off" },
                self.lna,
                self.vga
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["skyhunter"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = parse(&[]);
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, SweepMode::All);
        assert_eq!(config.sample_rate, 20e6);
        assert_eq!(config.nfft, 4096);
        assert_eq!(config.block_samples(), 2_000_000);
        assert_eq!(config.sweep_bands().unwrap().len(), 3);

        let classifier = config.classifier_config();
        assert_eq!(classifier.persist_hits, 2);
        assert_eq!(classifier.persist_window, 5);
        assert!(classifier.floor_rise.is_some());
        assert_eq!(classifier.bucket_tolerance_mhz, None);
    }

    #[test]
    fn test_inverted_width_range_rejected() {
        let config = parse(&["--minwidth-mhz", "40", "--maxwidth-mhz", "10"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedRange {
                min_name: "minwidth-mhz",
                min: 40.0,
                max_name: "maxwidth-mhz",
                max: 10.0,
            })
        );
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(matches!(
            parse(&["--center-overlap", "1.0"]).validate(),
            Err(ConfigError::FractionOutOfRange { name: "center-overlap", .. })
        ));
        assert_eq!(
            parse(&["--nfft", "1023"]).validate(),
            Err(ConfigError::InvalidNfft(1023))
        );
        assert_eq!(
            parse(&["--persist-hits", "6"]).validate(),
            Err(ConfigError::WindowShorterThanHits { hits: 6, window: 5 })
        );
        assert_eq!(
            parse(&["--lna", "12"]).validate(),
            Err(ConfigError::InvalidLnaGain(12))
        );
        assert_eq!(
            parse(&["--vga", "63"]).validate(),
            Err(ConfigError::InvalidVgaGain(63))
        );
        assert!(matches!(
            parse(&["--dwell", "0"]).validate(),
            Err(ConfigError::NotPositive { name: "dwell", .. })
        ));
        assert_eq!(
            parse(&["--baseline-percentile", "100"]).validate(),
            Err(ConfigError::PercentileOutOfRange(100.0))
        );
    }

    #[test]
    fn test_mode_and_custom_bands() {
        let fpv = parse(&["--auto", "fpv"]);
        assert_eq!(fpv.sweep_bands().unwrap(), vec![Band::fpv()]);

        let custom = parse(&["--bands", "2400:2483, 5725:5850"]);
        let bands = custom.sweep_bands().unwrap();
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[1].low_hz, 5725e6);
        assert_eq!(bands[1].kind, BandKind::Custom);

        assert_eq!(
            parse_bands("2483:2400"),
            Err(ConfigError::InvalidBand("2483:2400".into()))
        );
        assert!(parse_bands("2400-2483").is_err());
        assert_eq!(parse(&["--bands", " , "]).validate(), Err(ConfigError::NoBands));
    }

    #[test]
    fn test_emitter_parsing() {
        assert_eq!(
            parse_emitter("2440:15:12").unwrap(),
            SimEmitter::from_mhz(2440.0, 15.0, 12.0)
        );
        assert!(parse_emitter("2440:15").is_err());
        assert!(parse_emitter("2440:-1:12").is_err());

        let config = parse(&[
            "--simulate",
            "--sim-emitter",
            "5800:6:20",
            "--sim-emitter",
            "2440:15:12",
        ]);
        assert!(config.validate().is_ok());
        assert_eq!(config.synthetic_config().unwrap().emitters.len(), 2);
    }

    #[test]
    fn test_no_floor_alert_disables_rule() {
        let config = parse(&["--no-floor-alert", "--bucket-tolerance-mhz", "3"]);
        let classifier = config.classifier_config();
        assert!(classifier.floor_rise.is_none());
        assert_eq!(classifier.bucket_tolerance_mhz, Some(3.0));
    }

    #[test]
    fn test_small_frames_use_nfft() {
        let config = parse(&["--frame-ms", "1", "--sample-rate", "2000000"]);
        assert_eq!(config.block_samples(), 4096);
        assert_eq!(config.capture_config().block_samples, 4096);
        assert_eq!(config.hackrf_config().read_timeout, Duration::from_millis(1000));
    }
}
