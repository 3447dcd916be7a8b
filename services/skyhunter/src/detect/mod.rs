//! Detection stages downstream of the PSD

pub mod alert;
pub mod baseline;
pub mod classifier;
pub mod regions;

pub use alert::{Alert, AlertKind, AlertSource};
pub use baseline::BaselineTracker;
pub use classifier::{ClassifierConfig, FloorRiseConfig, PersistenceClassifier};
pub use regions::{group_regions, hot_bins, Region};
