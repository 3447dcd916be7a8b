//! Sample acquisition and the sweep capture thread
//!
//! 1. `SampleSource`: the radio contract (HackRF or synthetic)
//! 2. `SweepCapture`: retune, dwell, and push blocks into a drop-oldest queue

pub mod capture;
pub mod hackrf;
pub mod source;
pub mod synthetic;

pub use capture::{CaptureConfig, CaptureStats, SweepCapture};
pub use hackrf::{HackRfConfig, HackRfSource};
pub use source::{FrontEnd, SampleSource};
pub use synthetic::{SimEmitter, SyntheticConfig, SyntheticSource};
