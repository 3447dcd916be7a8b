//! Acquisition contract consumed by the capture thread

use crate::error::HardwareError;
use crate::types::SampleBlock;

/// Front-end settings applied when a source is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontEnd {
    pub device_index: u32,
    pub amp_enable: bool,
    /// LNA (IF) gain in dB
    pub lna_gain: u32,
    /// VGA (baseband) gain in dB
    pub vga_gain: u32,
}

impl Default for FrontEnd {
    fn default() -> Self {
        Self {
            device_index: 0,
            amp_enable: false,
            lna_gain: 32,
            vga_gain: 30,
        }
    }
}

impl FrontEnd {
    /// Check gains against the HackRF front-end steps
    pub fn validate(&self) -> Result<(), HardwareError> {
        if self.lna_gain > 40 || self.lna_gain % 8 != 0 {
            return Err(HardwareError::InvalidSetting(format!(
                "LNA gain {} dB (0..=40, step 8)",
                self.lna_gain
            )));
        }
        if self.vga_gain > 62 || self.vga_gain % 2 != 0 {
            return Err(HardwareError::InvalidSetting(format!(
                "VGA gain {} dB (0..=62, step 2)",
                self.vga_gain
            )));
        }
        Ok(())
    }
}

/// A radio (or simulation) that yields blocks of complex baseband samples
///
/// Opening is done by each implementation's constructor.
pub trait SampleSource: Send {
    fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), HardwareError>;

    fn set_center_frequency(&mut self, freq_hz: u64) -> Result<(), HardwareError>;

    /// Block until exactly `count` samples are available
    fn read_samples(&mut self, count: usize) -> Result<SampleBlock, HardwareError>;

    /// Release the device; calling it again is a no-op
    fn close(&mut self);

    /// Short label for logs
    fn describe(&self) -> String;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), HardwareError> {
        (**self).set_sample_rate(rate_hz)
    }

    fn set_center_frequency(&mut self, freq_hz: u64) -> Result<(), HardwareError> {
        (**self).set_center_frequency(freq_hz)
    }

    fn read_samples(&mut self, count: usize) -> Result<SampleBlock, HardwareError> {
        (**self).read_samples(count)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_steps() {
        assert!(FrontEnd::default().validate().is_ok());
        let bad_lna = FrontEnd {
            lna_gain: 30,
            ..FrontEnd::default()
        };
        assert!(matches!(bad_lna.validate(), Err(HardwareError::InvalidSetting(_))));
        let bad_vga = FrontEnd {
            vga_gain: 64,
            ..FrontEnd::default()
        };
        assert!(bad_vga.validate().is_err());
        let max = FrontEnd {
            amp_enable: true,
            lna_gain: 40,
            vga_gain: 62,
            device_index: 1,
        };
        assert!(max.validate().is_ok());
    }
}
