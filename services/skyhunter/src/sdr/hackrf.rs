//! HackRF capture via the hackrf_transfer process
//!
//! `hackrf_info` resolves the board serial for the requested index, then every
//! tuning change restarts `hackrf_transfer -r -` so stale samples from the
//! previous center never leak into the next block. A reader thread pumps raw
//! 8-bit signed IQ from stdout into a bounded channel; `read_samples` pulls
//! from it with a timeout so a stalled transport never blocks shutdown.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use num_complex::Complex32;
use tracing::{debug, info, warn};

use crate::error::HardwareError;
use crate::types::SampleBlock;

use super::source::{FrontEnd, SampleSource};

/// Bytes per stdout read (128K complex samples)
const CHUNK_BYTES: usize = 256 * 1024;
/// Chunks buffered between the reader thread and `read_samples`
const CHUNK_QUEUE: usize = 32;

/// HackRF process configuration
#[derive(Debug, Clone)]
pub struct HackRfConfig {
    pub front_end: FrontEnd,
    pub info_path: String,
    pub transfer_path: String,
    pub read_timeout: Duration,
}

impl Default for HackRfConfig {
    fn default() -> Self {
        Self {
            front_end: FrontEnd::default(),
            info_path: "hackrf_info".to_string(),
            transfer_path: "hackrf_transfer".to_string(),
            read_timeout: Duration::from_millis(1000),
        }
    }
}

/// One board listed by `hackrf_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HackRfBoard {
    pub index: u32,
    pub serial: String,
    pub board: Option<String>,
}

/// Parsed `hackrf_info` output
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HackRfInfo {
    pub boards: Vec<HackRfBoard>,
    pub busy: bool,
}

/// Parse combined stdout/stderr of `hackrf_info`
///
/// ```text
/// Found HackRF
/// Index: 0
/// Serial number: 0000000000000000457863c8243b8d4f
/// Board ID Number: 2 (HackRF One)
/// ```
pub fn parse_hackrf_info(output: &str) -> HackRfInfo {
    let mut info = HackRfInfo::default();
    let mut index: Option<u32> = None;

    for line in output.lines().map(str::trim) {
        if line.contains("Resource busy") || line.contains("HACKRF_ERROR_BUSY") {
            info.busy = true;
        }
        if let Some(rest) = line.strip_prefix("Index:") {
            index = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("Serial number:") {
            let serial = rest.trim();
            let serial = serial.strip_prefix("0x").unwrap_or(serial).to_string();
            if let Some(index) = index.take() {
                info.boards.push(HackRfBoard {
                    index,
                    serial,
                    board: None,
                });
            }
        } else if let Some(rest) = line.strip_prefix("Board ID Number:") {
            if let Some(board) = info.boards.last_mut() {
                let name = rest
                    .split_once('(')
                    .map(|(_, n)| n.trim_end_matches(')').trim().to_string())
                    .unwrap_or_else(|| rest.trim().to_string());
                board.board = Some(name);
            }
        }
    }
    info
}

/// Convert interleaved signed 8-bit IQ to complex samples scaled to +-1.0
pub fn iq_from_bytes(bytes: &[u8], out: &mut Vec<Complex32>) {
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|iq| Complex32::new(iq[0] as i8 as f32 / 128.0, iq[1] as i8 as f32 / 128.0)),
    );
}

/// Running hackrf_transfer child and its reader
struct Stream {
    child: Child,
    chunks: Receiver<Vec<u8>>,
}

impl Stream {
    fn stop(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// HackRF One driven through the host tools
pub struct HackRfSource {
    config: HackRfConfig,
    serial: String,
    sample_rate: f64,
    center_hz: u64,
    stream: Option<Stream>,
    /// Odd trailing byte carried between chunks
    carry: Option<u8>,
    /// Samples read past the last block
    leftover: Vec<Complex32>,
    first_data: bool,
    closed: bool,
}

impl HackRfSource {
    /// Claim the board at `config.front_end.device_index`
    pub fn open(config: HackRfConfig) -> Result<Self, HardwareError> {
        config.front_end.validate()?;
        let index = config.front_end.device_index;

        let output = Command::new(&config.info_path)
            .output()
            .map_err(|source| HardwareError::Spawn {
                program: config.info_path.clone(),
                source,
            })?;
        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let info = parse_hackrf_info(&text);
        if info.busy {
            return Err(HardwareError::DeviceBusy(index));
        }
        let board = info
            .boards
            .into_iter()
            .find(|b| b.index == index)
            .ok_or(HardwareError::DeviceNotFound(index))?;

        info!(
            "Opened HackRF {} ({}) serial {}",
            index,
            board.board.as_deref().unwrap_or("unknown board"),
            board.serial
        );

        Ok(Self {
            config,
            serial: board.serial,
            sample_rate: 20e6,
            center_hz: 0,
            stream: None,
            carry: None,
            leftover: Vec::new(),
            first_data: true,
            closed: false,
        })
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.carry = None;
        self.leftover.clear();
    }

    fn start_stream(&mut self) -> Result<(), HardwareError> {
        let fe = &self.config.front_end;
        let mut cmd = Command::new(&self.config.transfer_path);
        cmd.arg("-r").arg("-")
            .arg("-f").arg(self.center_hz.to_string())
            .arg("-s").arg((self.sample_rate as u64).to_string())
            .arg("-a").arg(if fe.amp_enable { "1" } else { "0" })
            .arg("-l").arg(fe.lna_gain.to_string())
            .arg("-g").arg(fe.vga_gain.to_string())
            .arg("-d").arg(&self.serial)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Executing: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|source| HardwareError::Spawn {
            program: self.config.transfer_path.clone(),
            source,
        })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HardwareError::TransportLost("no stdout from hackrf_transfer".into()))?;

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.contains("busy") || line.contains("failed") {
                        warn!("[hackrf_transfer] {}", line);
                    } else if !line.is_empty() {
                        debug!("[hackrf_transfer] {}", line);
                    }
                }
            });
        }

        let (tx, rx) = bounded::<Vec<u8>>(CHUNK_QUEUE);
        thread::Builder::new()
            .name("hackrf-reader".to_string())
            .spawn(move || {
                let mut buffer = vec![0u8; CHUNK_BYTES];
                loop {
                    match stdout.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buffer[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("hackrf_transfer stdout read failed: {}", e);
                            break;
                        }
                    }
                }
            })
            .map_err(|source| HardwareError::Spawn {
                program: "hackrf-reader thread".to_string(),
                source,
            })?;

        self.stream = Some(Stream { child, chunks: rx });
        Ok(())
    }
}

impl SampleSource for HackRfSource {
    fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), HardwareError> {
        if self.closed {
            return Err(HardwareError::Closed);
        }
        if !(2e6..=20e6).contains(&rate_hz) {
            return Err(HardwareError::InvalidSetting(format!(
                "sample rate {} Hz (2..=20 MHz)",
                rate_hz
            )));
        }
        if rate_hz != self.sample_rate {
            self.sample_rate = rate_hz;
            self.stop_stream();
        }
        Ok(())
    }

    fn set_center_frequency(&mut self, freq_hz: u64) -> Result<(), HardwareError> {
        if self.closed {
            return Err(HardwareError::Closed);
        }
        if !(1_000_000..=6_000_000_000).contains(&freq_hz) {
            return Err(HardwareError::InvalidSetting(format!(
                "center frequency {} Hz (1 MHz..=6 GHz)",
                freq_hz
            )));
        }
        if freq_hz != self.center_hz || self.stream.is_none() {
            self.center_hz = freq_hz;
            self.stop_stream();
            self.start_stream()?;
        }
        Ok(())
    }

    fn read_samples(&mut self, count: usize) -> Result<SampleBlock, HardwareError> {
        if self.closed {
            return Err(HardwareError::Closed);
        }
        if self.stream.is_none() {
            self.start_stream()?;
        }

        let mut samples = std::mem::take(&mut self.leftover);
        while samples.len() < count {
            let chunks = match &self.stream {
                Some(stream) => &stream.chunks,
                None => return Err(HardwareError::TransportLost("stream not running".into())),
            };
            match chunks.recv_timeout(self.config.read_timeout) {
                Ok(chunk) => {
                    if self.first_data {
                        info!("First IQ data received ({} bytes)", chunk.len());
                        self.first_data = false;
                    }
                    let mut bytes = chunk.as_slice();
                    if let Some(i) = self.carry.take() {
                        if let Some((&q, rest)) = bytes.split_first() {
                            iq_from_bytes(&[i, q], &mut samples);
                            bytes = rest;
                        }
                    }
                    iq_from_bytes(bytes, &mut samples);
                    if bytes.len() % 2 == 1 {
                        self.carry = bytes.last().copied();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.leftover = samples;
                    return Err(HardwareError::Timeout(
                        self.config.read_timeout.as_millis() as u64,
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.stop_stream();
                    return Err(HardwareError::TransportLost(
                        "hackrf_transfer stream closed".into(),
                    ));
                }
            }
        }

        self.leftover = samples.split_off(count);
        Ok(SampleBlock {
            samples,
            sample_rate: self.sample_rate,
            center_hz: self.center_hz,
            captured_at: Utc::now(),
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop_stream();
        self.closed = true;
        info!("HackRF {} released", self.config.front_end.device_index);
    }

    fn describe(&self) -> String {
        format!(
            "HackRF #{} (serial {})",
            self.config.front_end.device_index, self.serial
        )
    }
}

impl Drop for HackRfSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BOARDS: &str = "\
hackrf_info version: 2023.01.1
libhackrf version: 2023.01.1 (0.8)
Found HackRF
Index: 0
Serial number: 0000000000000000457863c8243b8d4f
Board ID Number: 2 (HackRF One)
Firmware Version: 2023.01.1 (API:1.07)

Found HackRF
Index: 1
Serial number: 0x000000000000000066a062dc2227359f
Board ID Number: 2 (HackRF One)
";

    #[test]
    fn test_parse_boards() {
        let info = parse_hackrf_info(TWO_BOARDS);
        assert!(!info.busy);
        assert_eq!(info.boards.len(), 2);
        assert_eq!(info.boards[0].serial, "0000000000000000457863c8243b8d4f");
        assert_eq!(info.boards[0].board.as_deref(), Some("HackRF One"));
        assert_eq!(info.boards[1].index, 1);
        assert_eq!(info.boards[1].serial, "000000000000000066a062dc2227359f");
    }

    #[test]
    fn test_parse_no_boards_and_busy() {
        let none = parse_hackrf_info("hackrf_info version: 2023.01.1\nNo HackRF boards found.\n");
        assert!(none.boards.is_empty());

        let busy = parse_hackrf_info(
            "Found HackRF\nIndex: 0\nhackrf_open() failed: Resource busy (-1000)\n",
        );
        assert!(busy.busy);
        assert!(busy.boards.is_empty());
    }

    #[test]
    fn test_iq_conversion_is_signed() {
        let mut out = Vec::new();
        iq_from_bytes(&[0x7f, 0x80, 0x00, 0xff, 0x01], &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Complex32::new(127.0 / 128.0, -1.0));
        assert_eq!(out[1], Complex32::new(0.0, -1.0 / 128.0));
    }

    #[test]
    fn test_missing_tool_is_spawn_error() {
        let config = HackRfConfig {
            info_path: "/nonexistent/hackrf_info".to_string(),
            ..HackRfConfig::default()
        };
        assert!(matches!(
            HackRfSource::open(config),
            Err(HardwareError::Spawn { .. })
        ));
    }

    /// Host tool stand-ins: `hackrf_info` listing board 0 and a
    /// `hackrf_transfer` running `transfer_body`
    #[cfg(unix)]
    fn stub_config(
        dir: &std::path::Path,
        transfer_body: &str,
        read_timeout: Duration,
    ) -> HackRfConfig {
        use std::os::unix::fs::PermissionsExt;

        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        };
        HackRfConfig {
            info_path: write(
                "hackrf_info",
                r"printf 'Found HackRF\nIndex: 0\nSerial number: 0x0000abcd\nBoard ID Number: 2 (HackRF One)\n'",
            ),
            transfer_path: write("hackrf_transfer", transfer_body),
            read_timeout,
            ..HackRfConfig::default()
        }
    }

    #[cfg(unix)]
    fn iq(i: i8, q: i8) -> Complex32 {
        Complex32::new(i as f32 / 128.0, q as f32 / 128.0)
    }

    #[cfg(unix)]
    #[test]
    fn test_odd_chunks_and_leftover_across_blocks() {
        let dir = tempfile::tempdir().unwrap();
        // Two 3-byte writes: the pair (3, 4) straddles the chunk boundary
        let config = stub_config(
            dir.path(),
            r"printf '\001\002\003'; sleep 0.2; printf '\004\005\006'",
            Duration::from_secs(2),
        );
        let mut source = HackRfSource::open(config).unwrap();
        assert_eq!(source.describe(), "HackRF #0 (serial 0000abcd)");
        source.set_center_frequency(2_440_000_000).unwrap();

        let block = source.read_samples(2).unwrap();
        assert_eq!(block.samples, vec![iq(1, 2), iq(3, 4)]);
        assert_eq!(block.center_hz, 2_440_000_000);

        // Served from the previous read without touching the stream
        let block = source.read_samples(1).unwrap();
        assert_eq!(block.samples, vec![iq(5, 6)]);

        // The tool exited: stream gone
        assert!(matches!(
            source.read_samples(1),
            Err(HardwareError::TransportLost(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_stalled_stream_times_out_keeping_partial_block() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(
            dir.path(),
            r"printf '\001\002'; exec sleep 10",
            Duration::from_millis(1000),
        );
        let mut source = HackRfSource::open(config).unwrap();
        source.set_center_frequency(5_800_000_000).unwrap();

        assert!(matches!(
            source.read_samples(4),
            Err(HardwareError::Timeout(1000))
        ));
        assert_eq!(source.leftover, vec![iq(1, 2)]);

        source.close();
        source.close();
        assert!(matches!(source.read_samples(1), Err(HardwareError::Closed)));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_read_returns_within_timeout() {
        use crate::sdr::capture::{read_with_retry, CaptureConfig, CaptureStats};
        use crate::sweep::SweepStep;
        use std::sync::atomic::AtomicBool;
        use std::time::Instant;

        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(dir.path(), "exec sleep 10", Duration::from_millis(200));
        let mut source = HackRfSource::open(config).unwrap();
        let step = SweepStep {
            band_index: 0,
            center_hz: 2_440_000_000,
        };
        source.set_center_frequency(step.center_hz).unwrap();

        let capture = CaptureConfig {
            block_samples: 16,
            ..CaptureConfig::default()
        };
        let stats = CaptureStats::default();
        let running = AtomicBool::new(false);
        let started = Instant::now();
        let result = read_with_retry(&mut source, &step, &capture, &running, &stats).unwrap();
        assert!(result.is_none());
        assert_eq!(stats.get_retries(), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_reports_busy_and_missing_boards() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = stub_config(dir.path(), "exit 0", Duration::from_millis(200));
        config.front_end.device_index = 1;
        assert!(matches!(
            HackRfSource::open(config.clone()),
            Err(HardwareError::DeviceNotFound(1))
        ));

        let busy = dir.path().join("hackrf_info_busy");
        std::fs::write(
            &busy,
            "#!/bin/sh\necho 'hackrf_open() failed: Resource busy (-1000)' >&2\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&busy, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        config.info_path = busy.to_string_lossy().into_owned();
        config.front_end.device_index = 0;
        assert!(matches!(
            HackRfSource::open(config),
            Err(HardwareError::DeviceBusy(0))
        ));
    }

    #[test]
    fn test_invalid_gain_rejected_before_spawn() {
        let config = HackRfConfig {
            front_end: FrontEnd {
                lna_gain: 41,
                ..FrontEnd::default()
            },
            info_path: "/nonexistent/hackrf_info".to_string(),
            ..HackRfConfig::default()
        };
        assert!(matches!(
            HackRfSource::open(config),
            Err(HardwareError::InvalidSetting(_))
        ));
    }
}
