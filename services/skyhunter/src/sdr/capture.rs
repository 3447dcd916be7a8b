//! Sweep capture thread
//!
//! Owns the sample source and the sweep scheduler. For every sweep step it
//! retunes, reads blocks until the dwell deadline, and pushes them into a
//! bounded queue. When the processing worker falls behind, the oldest queued
//! block is discarded so the newest one always gets in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::error::HardwareError;
use crate::sweep::{SweepScheduler, SweepStep};
use crate::types::SampleBlock;

use super::source::SampleSource;

/// Capture loop configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per delivered block
    pub block_samples: usize,
    pub queue_depth: usize,
    /// Attempts after the first failed read before giving up
    pub read_retries: u32,
    /// First backoff delay, doubled on every retry
    pub retry_backoff: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_samples: 2_000_000,
            queue_depth: 4,
            read_retries: 5,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Statistics for the capture thread (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub blocks_captured: AtomicU64,
    pub blocks_dropped: AtomicU64,
    pub samples_captured: AtomicU64,
    pub retunes: AtomicU64,
    pub read_retries: AtomicU64,
    pub sweeps_completed: AtomicU64,
    pub current_center_hz: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_block(&self, samples: usize) {
        self.blocks_captured.fetch_add(1, Ordering::Relaxed);
        self.samples_captured.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.blocks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retune(&self, center_hz: u64) {
        self.retunes.fetch_add(1, Ordering::Relaxed);
        self.current_center_hz.store(center_hz, Ordering::Relaxed);
    }

    pub fn get_captured(&self) -> u64 {
        self.blocks_captured.load(Ordering::Relaxed)
    }

    pub fn get_dropped(&self) -> u64 {
        self.blocks_dropped.load(Ordering::Relaxed)
    }

    pub fn get_retries(&self) -> u64 {
        self.read_retries.load(Ordering::Relaxed)
    }
}

/// Sweep capture controller
pub struct SweepCapture {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl SweepCapture {
    pub fn new(config: CaptureConfig, running: Arc<AtomicBool>) -> Self {
        Self {
            config,
            running,
            stats: CaptureStats::new(),
        }
    }

    /// Spawn the capture thread; the returned receiver yields sample blocks
    /// and the handle yields the thread's fatal error, if any
    pub fn start<S>(
        &self,
        source: S,
        scheduler: SweepScheduler,
    ) -> Result<(Receiver<SampleBlock>, JoinHandle<Result<(), HardwareError>>)>
    where
        S: SampleSource + 'static,
    {
        info!(
            "Starting sweep capture on {} ({} centers, dwell {:?}, cycle {:.1}s)",
            source.describe(),
            scheduler.steps().len(),
            scheduler.dwell(),
            scheduler.cycle_time().as_secs_f64()
        );

        let (block_tx, block_rx) = bounded::<SampleBlock>(self.config.queue_depth.max(1));
        let overflow_rx = block_rx.clone();

        let config = self.config.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("sdr-capture".to_string())
            .spawn(move || {
                let mut source = source;
                let result = run_capture(
                    &mut source,
                    scheduler,
                    &config,
                    &running,
                    &stats,
                    &block_tx,
                    &overflow_rx,
                );
                source.close();
                if let Err(e) = &result {
                    error!("SDR capture error: {}", e);
                    running.store(false, Ordering::SeqCst);
                }
                result
            })
            .context("Failed to spawn capture thread")?;

        Ok((block_rx, handle))
    }

    /// Stop capturing
    pub fn stop(&self) {
        info!("Stopping sweep capture...");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}

/// Main capture loop (runs in dedicated thread)
fn run_capture<S: SampleSource + ?Sized>(
    source: &mut S,
    mut scheduler: SweepScheduler,
    config: &CaptureConfig,
    running: &AtomicBool,
    stats: &CaptureStats,
    block_tx: &Sender<SampleBlock>,
    overflow_rx: &Receiver<SampleBlock>,
) -> Result<(), HardwareError> {
    source.set_sample_rate(scheduler.sample_rate())?;
    let steps_per_sweep = scheduler.steps().len() as u64;
    let dwell = scheduler.dwell();

    while running.load(Ordering::SeqCst) {
        let Some(step) = scheduler.next_step() else {
            warn!("Sweep has no centers, capture idle");
            return Ok(());
        };
        source.set_center_frequency(step.center_hz)?;
        stats.record_retune(step.center_hz);
        if stats.retunes.load(Ordering::Relaxed) % steps_per_sweep == 0 {
            stats.sweeps_completed.fetch_add(1, Ordering::Relaxed);
        }

        let deadline = Instant::now() + dwell;
        loop {
            let block = match read_with_retry(source, &step, config, running, stats)? {
                Some(block) => block,
                None => return Ok(()),
            };
            stats.record_block(block.samples.len());
            if !push_latest(block_tx, overflow_rx, block, stats) {
                info!("Block queue closed, capture exiting");
                return Ok(());
            }
            if Instant::now() >= deadline || !running.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    info!(
        "Sweep capture stopped: {} blocks, {} dropped, {} retries",
        stats.get_captured(),
        stats.get_dropped(),
        stats.get_retries()
    );
    Ok(())
}

/// Read one block, retrying transient failures with exponential backoff
///
/// Every retry re-arms the stream by retuning to the current step. Returns
/// `Ok(None)` when cancellation arrives mid-retry.
pub fn read_with_retry<S: SampleSource + ?Sized>(
    source: &mut S,
    step: &SweepStep,
    config: &CaptureConfig,
    running: &AtomicBool,
    stats: &CaptureStats,
) -> Result<Option<SampleBlock>, HardwareError> {
    let mut attempt = 0u32;
    loop {
        match source.read_samples(config.block_samples) {
            Ok(block) => return Ok(Some(block)),
            Err(e) if e.is_transient() && attempt < config.read_retries => {
                if !running.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                let delay = config.retry_backoff * 2u32.saturating_pow(attempt);
                attempt += 1;
                stats.read_retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Read at {:.3} MHz failed ({}), retry {}/{} in {:?}",
                    step.center_hz as f64 / 1e6,
                    e,
                    attempt,
                    config.read_retries,
                    delay
                );
                thread::sleep(delay);
                source.set_center_frequency(step.center_hz)?;
            }
            Err(e) => {
                // A timeout after cancellation is not a failure
                if e.is_transient() && !running.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                return Err(e);
            }
        }
    }
}

/// Queue `block`, discarding the oldest queued block when full
///
/// Returns false once the consumer is gone.
pub fn push_latest(
    tx: &Sender<SampleBlock>,
    overflow_rx: &Receiver<SampleBlock>,
    block: SampleBlock,
    stats: &CaptureStats,
) -> bool {
    let mut block = block;
    loop {
        match tx.try_send(block) {
            Ok(()) => return true,
            Err(TrySendError::Full(rejected)) => {
                if overflow_rx.try_recv().is_ok() {
                    stats.record_drop();
                    debug!("Block queue full, dropped oldest block");
                }
                block = rejected;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

impl Drop for SweepCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
