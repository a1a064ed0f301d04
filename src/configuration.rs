pub mod config;
pub mod types;

pub use config::Config;
pub use types::{AnalysisSettings, CaptureConfig, DeadlineSpec, RunPeriod, TimeOfDay};
