use std::time::Duration;
use tokio::time::Instant;

use crate::analog_input::AnalogInput;

/// 12-bit converter on the analog module.
pub const ADC_BITS: u32 = 12;
pub const ADC_COUNTS: f64 = (1u32 << ADC_BITS) as f64;
/// Reference voltage of the converter in millivolts.
pub const SUPPLY_MILLIVOLTS: f64 = 3300.0;

/// Fixed scale factors and observation window for the sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub voltage: f64,
    pub current: f64,
    pub phase: f64,
    /// Number of voltage zero crossings (half cycles) to observe.
    pub crossings: u32,
    /// Upper bound on both the settle and measurement phases.
    pub timeout: Duration,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            voltage: 41.5,
            current: 0.15,
            phase: 1.7,
            crossings: 20,
            timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RmsReading {
    pub vrms: f64,
    pub irms: f64,
    pub real_power: f64,
    pub apparent_power: f64,
    pub power_factor: f64,
}

/// Produces one RMS reading per call.
#[allow(async_fn_in_trait)]
pub trait Sampler {
    async fn measure(&mut self) -> anyhow::Result<RmsReading>;
}

/// Running sums over one observation window.
#[derive(Debug, Default)]
struct WindowSums {
    samples: u32,
    sum_v: f64,
    sum_i: f64,
    sum_p: f64,
}

impl WindowSums {
    fn finish(&self, calibration: &Calibration) -> RmsReading {
        if self.samples == 0 {
            return RmsReading::default();
        }
        let n = self.samples as f64;
        let v_ratio = calibration.voltage * ((SUPPLY_MILLIVOLTS / 1000.0) / ADC_COUNTS);
        let i_ratio = calibration.current * ((SUPPLY_MILLIVOLTS / 1000.0) / ADC_COUNTS);

        let vrms = v_ratio * (self.sum_v / n).sqrt();
        let irms = i_ratio * (self.sum_i / n).sqrt();
        let real_power = v_ratio * i_ratio * self.sum_p / n;
        let apparent_power = vrms * irms;
        let power_factor = if apparent_power == 0.0 {
            0.0
        } else {
            real_power / apparent_power
        };

        RmsReading {
            vrms,
            irms,
            real_power,
            apparent_power,
            power_factor,
        }
    }
}

/// Waveform sampler computing RMS voltage and current from raw converter counts.
pub struct EnergyMonitor<A> {
    input: A,
    voltage_channel: u16,
    current_channel: u16,
    calibration: Calibration,
    // DC offset filters persist between measurements
    offset_v: f64,
    offset_i: f64,
}

impl<A: AnalogInput> EnergyMonitor<A> {
    pub fn new(input: A, voltage_channel: u16, current_channel: u16, calibration: Calibration) -> Self {
        Self {
            input,
            voltage_channel,
            current_channel,
            calibration,
            offset_v: ADC_COUNTS / 2.0,
            offset_i: ADC_COUNTS / 2.0,
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Waits for the voltage waveform to sit near mid-scale so the window starts close
    /// to a zero crossing. Returns the last voltage sample seen.
    async fn settle(&mut self) -> anyhow::Result<f64> {
        let low = ADC_COUNTS * 0.45;
        let high = ADC_COUNTS * 0.55;
        let start = Instant::now();
        loop {
            let sample = self.input.read(self.voltage_channel).await? as f64;
            if (sample > low && sample < high) || start.elapsed() > self.calibration.timeout {
                return Ok(sample);
            }
        }
    }

    /// Samples both channels for `crossings` half cycles or until the timeout.
    pub async fn calc_vi(&mut self) -> anyhow::Result<RmsReading> {
        let start_v = self.settle().await?;

        let mut sums = WindowSums::default();
        let mut filtered_v = 0.0;
        let mut cross_count = 0;
        let mut check_v_cross = false;
        let start = Instant::now();

        while cross_count < self.calibration.crossings && start.elapsed() < self.calibration.timeout {
            sums.samples += 1;
            let last_filtered_v = filtered_v;

            let sample_v = self.input.read(self.voltage_channel).await? as f64;
            let sample_i = self.input.read(self.current_channel).await? as f64;

            self.offset_v += (sample_v - self.offset_v) / ADC_COUNTS;
            filtered_v = sample_v - self.offset_v;
            self.offset_i += (sample_i - self.offset_i) / ADC_COUNTS;
            let filtered_i = sample_i - self.offset_i;

            sums.sum_v += filtered_v * filtered_v;
            sums.sum_i += filtered_i * filtered_i;

            let phase_shifted_v =
                last_filtered_v + self.calibration.phase * (filtered_v - last_filtered_v);
            sums.sum_p += phase_shifted_v * filtered_i;

            let mut last_v_cross = check_v_cross;
            check_v_cross = sample_v > start_v;
            if sums.samples == 1 {
                last_v_cross = check_v_cross;
            }
            if last_v_cross != check_v_cross {
                cross_count += 1;
            }
        }

        tracing::debug!(
            "Sampled {} points over {} crossings in {:?}",
            sums.samples,
            cross_count,
            start.elapsed()
        );
        Ok(sums.finish(&self.calibration))
    }
}

impl<A: AnalogInput> Sampler for EnergyMonitor<A> {
    async fn measure(&mut self) -> anyhow::Result<RmsReading> {
        self.calc_vi().await
    }
}
