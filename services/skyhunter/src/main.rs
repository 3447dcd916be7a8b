//! SkyHunter - drone RF detector
//!
//! Sweeps DJI / FPV bands with a HackRF (or the synthetic source), runs the
//! detection pipeline on a worker thread and logs confirmed alerts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, RecvTimeoutError};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use skyhunter::config::Config;
use skyhunter::detect::Alert;
use skyhunter::pipeline::{spawn_worker, Detector, DetectorSnapshot, PipelineStats};
use skyhunter::sdr::{HackRfSource, SampleSource, SweepCapture, SyntheticSource};
use skyhunter::sink::{AlertLog, AlertSink};
use skyhunter::stats::StatsSummary;
use skyhunter::sweep::SweepScheduler;

/// Alerts buffered between the worker and the sink
const ALERT_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   SkyHunter - DJI / FPV RF detector");
    info!("===========================================");

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    info!("Configuration:");
    config.log_summary();

    let scheduler = SweepScheduler::new(
        config.sweep_bands()?,
        config.sample_rate,
        config.center_overlap,
        config.dwell,
    );
    for band in scheduler.bands() {
        info!(
            "  Sweeping {} ({:.0}-{:.0} MHz)",
            band.name,
            band.low_hz / 1e6,
            band.high_hz / 1e6
        );
    }

    let source: Box<dyn SampleSource> = if config.simulate {
        Box::new(SyntheticSource::open(config.synthetic_config()?))
    } else {
        match HackRfSource::open(config.hackrf_config()) {
            Ok(source) => Box::new(source),
            Err(e) => {
                error!("Failed to open HackRF: {}", e);
                error!("Make sure the HackRF is connected and hackrf_transfer is in PATH.");
                return Err(e).context("Failed to open HackRF");
            }
        }
    };

    let alert_log = match &config.alert_log {
        Some(path) => {
            info!("  Alert log: {:?}", path);
            Some(
                AlertLog::open(path)
                    .with_context(|| format!("Failed to open alert log {:?}", path))?,
            )
        }
        None => None,
    };
    let mut sink = AlertSink::new(alert_log);

    // Ctrl+C clears the run flag; capture exits within one read timeout
    let running = Arc::new(AtomicBool::new(false));
    let capture = SweepCapture::new(config.capture_config(), running.clone());
    let (block_rx, capture_handle) = capture.start(source, scheduler)?;

    let (alert_tx, alert_rx) = bounded::<Alert>(ALERT_QUEUE);
    let (snapshot_tx, snapshot_rx) = watch::channel(DetectorSnapshot::default());
    let pipeline_stats = PipelineStats::new();
    let worker_handle = spawn_worker(
        Detector::new(config.detector_config()),
        block_rx,
        alert_tx,
        snapshot_tx,
        pipeline_stats.clone(),
    )?;

    let signal_running = running.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
            signal_running.store(false, Ordering::SeqCst);
        }
    });

    info!("===========================================");
    info!("  Sweeping...");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    let mut last_stats_report = Instant::now();

    // Alert sink loop; ends once the worker drains and drops its sender
    loop {
        match alert_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(alert) => sink.handle(&alert),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // Periodic statistics (every 10 seconds)
        if last_stats_report.elapsed() >= Duration::from_secs(10) {
            let snapshot = snapshot_rx.borrow().clone();
            let summary = StatsSummary::collect(capture.stats(), &pipeline_stats, &snapshot);
            info!("[Stats] {}", summary);
            last_stats_report = Instant::now();
        }
    }

    // Also covers a worker that died while capture was still running
    capture.stop();
    let capture_result = match capture_handle.join() {
        Ok(result) => result.context("Sweep capture failed"),
        Err(_) => Err(anyhow::anyhow!("Capture thread panicked")),
    };
    if worker_handle.join().is_err() {
        warn!("DSP worker panicked");
    }

    let snapshot = snapshot_rx.borrow().clone();
    info!(
        "[Stats] {}",
        StatsSummary::collect(capture.stats(), &pipeline_stats, &snapshot)
    );
    info!("Shutdown complete. Alerts raised: {}", sink.received());

    capture_result
}
