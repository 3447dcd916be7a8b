//! Shared data types: sample blocks, spectra, bands and bin/frequency mapping

use chrono::{DateTime, Utc};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// FPV analog video (5.8 GHz wide window), MHz
pub const FPV_58_MHZ: (f64, f64) = (5650.0, 5920.0);
/// DJI OcuSync / Lightbridge 2.4 GHz, MHz
pub const DJI_24_MHZ: (f64, f64) = (2400.0, 2483.0);
/// DJI OcuSync 5.8 GHz, MHz
pub const DJI_58_MHZ: (f64, f64) = (5725.0, 5850.0);

/// Which emission class a band belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandKind {
    Fpv,
    Dji,
    Custom,
}

/// A contiguous frequency range swept by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub kind: BandKind,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl Band {
    pub fn from_mhz(name: &str, kind: BandKind, range_mhz: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            kind,
            low_hz: range_mhz.0 * 1e6,
            high_hz: range_mhz.1 * 1e6,
        }
    }

    pub fn fpv() -> Self {
        Self::from_mhz("FPV 5.8", BandKind::Fpv, FPV_58_MHZ)
    }

    pub fn dji_24() -> Self {
        Self::from_mhz("DJI 2.4", BandKind::Dji, DJI_24_MHZ)
    }

    pub fn dji_58() -> Self {
        Self::from_mhz("DJI 5.8", BandKind::Dji, DJI_58_MHZ)
    }

    /// Inclusive containment test
    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }

    pub fn width_hz(&self) -> f64 {
        self.high_hz - self.low_hz
    }
}

/// Which band sets the sweep visits
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum SweepMode {
    Fpv,
    Dji,
    All,
}

impl SweepMode {
    pub fn bands(self) -> Vec<Band> {
        match self {
            Self::Fpv => vec![Band::fpv()],
            Self::Dji => vec![Band::dji_24(), Band::dji_58()],
            Self::All => vec![Band::fpv(), Band::dji_24(), Band::dji_58()],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Fpv => "FPV 5.8",
            Self::Dji => "DJI 2.4+5.8",
            Self::All => "All",
        }
    }
}

/// One block of complex baseband samples
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub samples: Vec<Complex32>,
    pub sample_rate: f64,
    pub center_hz: u64,
    pub captured_at: DateTime<Utc>,
}

/// Maps spectrum bin indices to absolute frequency for one capture
///
/// Bins are ordered from `center - sample_rate/2` upwards (DC in the middle).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyMap {
    pub center_hz: f64,
    pub sample_rate: f64,
    pub nfft: usize,
}

impl FrequencyMap {
    pub fn new(center_hz: f64, sample_rate: f64, nfft: usize) -> Self {
        Self {
            center_hz,
            sample_rate,
            nfft,
        }
    }

    pub fn bin_width(&self) -> f64 {
        self.sample_rate / self.nfft as f64
    }

    /// Lowest frequency of the capture footprint
    pub fn low_hz(&self) -> f64 {
        self.center_hz - self.sample_rate / 2.0
    }

    /// Highest frequency of the capture footprint
    pub fn high_hz(&self) -> f64 {
        self.low_hz() + self.nfft as f64 * self.bin_width()
    }

    /// `center - sample_rate/2 + bin * (sample_rate / nfft)`
    pub fn bin_to_hz(&self, bin: usize) -> f64 {
        self.low_hz() + bin as f64 * self.bin_width()
    }

    /// Nearest bin for an absolute frequency, `None` outside the footprint
    pub fn hz_to_bin(&self, freq_hz: f64) -> Option<usize> {
        let idx = ((freq_hz - self.low_hz()) / self.bin_width()).round();
        if idx < 0.0 || idx >= self.nfft as f64 {
            None
        } else {
            Some(idx as usize)
        }
    }

    /// Bins whose frequency lies inside `band`
    pub fn bins_in(&self, band: &Band) -> std::ops::Range<usize> {
        let first = ((band.low_hz - self.low_hz()) / self.bin_width()).ceil();
        let last = ((band.high_hz - self.low_hz()) / self.bin_width()).floor();
        let first = first.clamp(0.0, self.nfft as f64) as usize;
        let end = (last + 1.0).clamp(0.0, self.nfft as f64) as usize;
        first..end.max(first)
    }
}

/// Power spectrum of one processed block (or averaged group), in dB
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub power_db: Vec<f32>,
    pub center_hz: u64,
    pub sample_rate: f64,
    pub captured_at: DateTime<Utc>,
}

impl Spectrum {
    pub fn nfft(&self) -> usize {
        self.power_db.len()
    }

    pub fn map(&self) -> FrequencyMap {
        FrequencyMap::new(self.center_hz as f64, self.sample_rate, self.power_db.len())
    }

    /// Reject spectra that would poison the baseline
    pub fn validate(&self) -> Result<(), DataError> {
        if self.power_db.is_empty() {
            return Err(DataError::EmptySpectrum);
        }
        if self.power_db.iter().any(|p| !p.is_finite()) {
            return Err(DataError::NonFiniteSpectrum);
        }
        Ok(())
    }

    /// Median bin power, the live "floor" shown to operators
    pub fn median_db(&self) -> f32 {
        if self.power_db.is_empty() {
            return f32::NAN;
        }
        let mut sorted = self.power_db.clone();
        sorted.sort_by(f32::total_cmp);
        sorted[sorted.len() / 2]
    }

    pub fn peak_db(&self) -> f32 {
        self.power_db
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Mean power over the bins that fall inside `band`, if any do
    pub fn band_average_db(&self, band: &Band) -> Option<f32> {
        let bins = self.map().bins_in(band);
        if bins.is_empty() {
            return None;
        }
        let slice = &self.power_db[bins];
        Some(slice.iter().sum::<f32>() / slice.len() as f32)
    }
}
