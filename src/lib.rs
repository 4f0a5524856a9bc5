//! Mains Energy Monitor Library
//!
//! Samples a current/voltage waveform through a Modbus analog input module, shows the
//! RMS readings on a character display, uploads them to a Firebase Realtime Database
//! and keeps a rolling 24-hour energy total.

pub mod accumulator;
pub mod analog_input;
pub mod config;
pub mod connectivity;
pub mod display;
pub mod firebase;
pub mod monitor;
pub mod pipeline;
pub mod sampler;
pub mod uploader;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for easier access
pub use accumulator::{EmitFailurePolicy, EnergyWindow, RollingAccumulator};
pub use config::MonitorConfig;
pub use firebase::RealtimeDatabase;
pub use pipeline::{Reading, ReadingPipeline, SendGate};
pub use sampler::{Calibration, EnergyMonitor, RmsReading, Sampler};
pub use uploader::{MeterKey, UploadError, Uploader};
