//! Alert sink: log line per alert plus an optional JSON-lines file

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::detect::Alert;

/// Append-only JSON-lines alert log
pub struct AlertLog {
    writer: BufWriter<File>,
}

impl AlertLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, alert: &Alert) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, alert)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Consumer side of the alert channel
#[derive(Default)]
pub struct AlertSink {
    log: Option<AlertLog>,
    received: u64,
}

impl AlertSink {
    pub fn new(log: Option<AlertLog>) -> Self {
        Self { log, received: 0 }
    }

    pub fn handle(&mut self, alert: &Alert) {
        self.received += 1;
        info!("[ALERT] {}", alert);
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.append(alert) {
                warn!("Failed to write alert log: {}", e);
            }
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{AlertKind, AlertSource};
    use chrono::Utc;

    fn alert(freq_mhz: f64) -> Alert {
        Alert {
            kind: AlertKind::Fpv,
            source: AlertSource::FloorRise,
            freq_mhz,
            width_mhz: 0.0,
            mean_excess_db: 12.0,
            peak_excess_db: 12.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_alert_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");

        let mut sink = AlertSink::new(Some(AlertLog::open(&path).unwrap()));
        sink.handle(&alert(5800.0));
        sink.handle(&alert(5740.5));
        assert_eq!(sink.received(), 2);

        // Reopening appends rather than truncating
        let mut log = AlertLog::open(&path).unwrap();
        log.append(&alert(5660.0)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["freq_mhz"], 5740.5);
        assert_eq!(lines[2]["source"], "FloorRise");
    }

    #[test]
    fn test_sink_without_log() {
        let mut sink = AlertSink::default();
        sink.handle(&alert(5800.0));
        assert_eq!(sink.received(), 1);
    }
}
