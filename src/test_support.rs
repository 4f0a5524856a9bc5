//! Fakes shared by the unit tests.

use std::collections::HashSet;

use crate::sampler::{RmsReading, Sampler};
use crate::uploader::{MeterKey, UploadError, Uploader};

/// Records every publish attempt; keys in `failing` are rejected.
#[derive(Default)]
pub struct RecordingUploader {
    pub attempts: Vec<(MeterKey, f64)>,
    pub written: Vec<(MeterKey, f64)>,
    pub failing: HashSet<MeterKey>,
}

impl RecordingUploader {
    pub fn failing_on(keys: &[MeterKey]) -> Self {
        Self {
            failing: keys.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn written_for(&self, key: MeterKey) -> Vec<f64> {
        self.written
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl Uploader for RecordingUploader {
    async fn publish(&mut self, key: MeterKey, value: f64) -> Result<(), UploadError> {
        self.attempts.push((key, value));
        if self.failing.contains(&key) {
            return Err(UploadError::NotSignedIn);
        }
        self.written.push((key, value));
        Ok(())
    }
}

/// Returns the same reading every time and counts calls.
pub struct FixedSampler {
    pub reading: RmsReading,
    pub calls: usize,
    pub fail: bool,
}

impl FixedSampler {
    pub fn new(vrms: f64, irms: f64) -> Self {
        Self {
            reading: RmsReading {
                vrms,
                irms,
                real_power: vrms * irms,
                apparent_power: vrms * irms,
                power_factor: 1.0,
            },
            calls: 0,
            fail: false,
        }
    }
}

impl Sampler for FixedSampler {
    async fn measure(&mut self) -> anyhow::Result<RmsReading> {
        self.calls += 1;
        if self.fail {
            anyhow::bail!("analog module unreachable");
        }
        Ok(self.reading)
    }
}
