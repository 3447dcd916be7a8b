//! Operator-visible alert records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Emission class reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertKind {
    Dji,
    Fpv,
}

/// Which rule produced the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertSource {
    /// Region shape + location rule
    Region,
    /// Band-wide floor rise rule
    FloorRise,
}

/// Emitted once per confirmation; never mutated afterwards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub source: AlertSource,
    pub freq_mhz: f64,
    pub width_mhz: f64,
    pub mean_excess_db: f32,
    pub peak_excess_db: f32,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AlertKind::Dji => write!(
                f,
                "DJI Detected @ {:.3} MHz ~{:.1} MHz (mean +{:.1} dB, peak +{:.1} dB)",
                self.freq_mhz, self.width_mhz, self.mean_excess_db, self.peak_excess_db
            ),
            AlertKind::Fpv => write!(
                f,
                "FPV Detected @ {:.3} MHz Peak +{:.1} dB ~{:.1} MHz",
                self.freq_mhz, self.peak_excess_db, self.width_mhz
            ),
        }
    }
}
