use crate::accumulator::{RollingAccumulator, WindowFlush};
use crate::display::{render, Display};
use crate::sampler::Sampler;
use crate::uploader::{publish_logged, MeterKey, Uploader};

/// One tick's worth of derived values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl Reading {
    pub fn new(voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            power: current * voltage,
        }
    }
}

/// Minimum-spacing gate. The first call always passes, later calls pass once more
/// than `interval` ms have gone by since the last pass.
#[derive(Debug, Clone)]
pub struct SendGate {
    interval: u64,
    last_run: Option<u64>,
}

impl SendGate {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now.saturating_sub(last) > self.interval,
        }
    }

    /// Claims the slot at `now` if it is due.
    pub fn try_claim(&mut self, now: u64) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last_run = Some(now);
        true
    }

    pub fn last_run(&self) -> Option<u64> {
        self.last_run
    }
}

/// Sample, show, upload, accumulate.
pub struct ReadingPipeline<S, D, U> {
    sampler: S,
    display: D,
    uploader: U,
    gate: SendGate,
    accumulator: RollingAccumulator,
}

impl<S, D, U> ReadingPipeline<S, D, U>
where
    S: Sampler,
    D: Display,
    U: Uploader,
{
    pub fn new(sampler: S, display: D, uploader: U, gate: SendGate, accumulator: RollingAccumulator) -> Self {
        Self {
            sampler,
            display,
            uploader,
            gate,
            accumulator,
        }
    }

    /// Runs the pipeline if the send interval has elapsed. Returns `None` when gated
    /// out or when the sampler failed.
    pub async fn tick(&mut self, now: u64) -> Option<Reading> {
        if !self.gate.try_claim(now) {
            return None;
        }

        let rms = match self.sampler.measure().await {
            Ok(rms) => rms,
            Err(e) => {
                tracing::warn!("Measurement failed: {:#}", e);
                return None;
            }
        };
        let reading = Reading::new(rms.vrms, rms.irms);
        tracing::info!(
            "Reading {:.2}V {:.2}A {:.2}W (real {:.2}W, pf {:.2})",
            reading.voltage,
            reading.current,
            reading.power,
            rms.real_power,
            rms.power_factor
        );

        render(&mut self.display, &reading);
        self.publish(&reading).await;
        self.accumulate(reading.power, now).await;

        Some(reading)
    }

    /// Each key is attempted regardless of how its siblings fared.
    async fn publish(&mut self, reading: &Reading) {
        publish_logged(&mut self.uploader, MeterKey::Current, reading.current).await;
        publish_logged(&mut self.uploader, MeterKey::Power, reading.power).await;
        publish_logged(&mut self.uploader, MeterKey::Voltage, reading.voltage).await;
    }

    async fn accumulate(&mut self, power: f64, now: u64) -> Option<WindowFlush> {
        self.accumulator
            .accumulate(power, now, &mut self.uploader)
            .await
    }

    pub fn accumulator(&self) -> &RollingAccumulator {
        &self.accumulator
    }

    pub fn gate(&self) -> &SendGate {
        &self.gate
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    pub fn uploader_mut(&mut self) -> &mut U {
        &mut self.uploader
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::EmitFailurePolicy;
    use crate::display::CharacterGrid;
    use crate::test_support::{FixedSampler, RecordingUploader};

    const SEND_INTERVAL: u64 = 15_000;
    const DAY_MS: u64 = 86_400_000;

    fn pipeline(
        sampler: FixedSampler,
        uploader: RecordingUploader,
    ) -> ReadingPipeline<FixedSampler, CharacterGrid, RecordingUploader> {
        ReadingPipeline::new(
            sampler,
            CharacterGrid::new(),
            uploader,
            SendGate::new(SEND_INTERVAL),
            RollingAccumulator::new(0, DAY_MS, EmitFailurePolicy::Reset),
        )
    }

    #[test]
    fn test_power_is_exact_product() {
        let reading = Reading::new(230.0, 2.0);
        assert_eq!(reading.power, 460.0);
    }

    #[test]
    fn test_gate_first_run_is_unconditional() {
        let mut gate = SendGate::new(SEND_INTERVAL);
        assert!(gate.try_claim(0));
        assert_eq!(gate.last_run(), Some(0));
    }

    #[test]
    fn test_gate_requires_strictly_more_than_interval() {
        let mut gate = SendGate::new(SEND_INTERVAL);
        assert!(gate.try_claim(1_000));
        assert!(!gate.try_claim(1_000 + SEND_INTERVAL - 1));
        assert!(!gate.try_claim(1_000 + SEND_INTERVAL));
        assert!(gate.try_claim(1_000 + SEND_INTERVAL + 1));
        assert_eq!(gate.last_run(), Some(1_000 + SEND_INTERVAL + 1));
    }

    #[tokio::test]
    async fn test_tick_publishes_displays_and_accumulates() {
        let mut pipeline = pipeline(FixedSampler::new(230.0, 2.0), RecordingUploader::default());

        let reading = pipeline.tick(0).await;

        assert_eq!(
            reading,
            Some(Reading {
                voltage: 230.0,
                current: 2.0,
                power: 460.0
            })
        );
        assert_eq!(
            pipeline.uploader().attempts,
            vec![
                (MeterKey::Current, 2.0),
                (MeterKey::Power, 460.0),
                (MeterKey::Voltage, 230.0)
            ]
        );
        assert_eq!(pipeline.display().row_text(0), "V:230.00  C:2.00");
        assert_eq!(pipeline.display().row_text(1).trim_end(), "P:460.00");
        assert_eq!(pipeline.accumulator().window().accumulated_energy(), 460.0);
    }

    #[tokio::test]
    async fn test_second_tick_within_interval_is_noop() {
        let mut pipeline = pipeline(FixedSampler::new(230.0, 2.0), RecordingUploader::default());

        assert!(pipeline.tick(0).await.is_some());
        assert!(pipeline.tick(SEND_INTERVAL - 1).await.is_none());

        assert_eq!(pipeline.sampler().calls, 1);
        assert_eq!(pipeline.uploader().attempts.len(), 3);
        assert_eq!(pipeline.accumulator().window().accumulated_energy(), 460.0);

        assert!(pipeline.tick(SEND_INTERVAL + 1).await.is_some());
        assert_eq!(pipeline.sampler().calls, 2);
        assert_eq!(pipeline.accumulator().window().accumulated_energy(), 920.0);
    }

    #[tokio::test]
    async fn test_partial_publish_failure_does_not_short_circuit() {
        let mut pipeline = pipeline(
            FixedSampler::new(230.0, 2.0),
            RecordingUploader::failing_on(&[MeterKey::Current]),
        );

        pipeline.tick(0).await;

        let uploader = pipeline.uploader();
        assert_eq!(uploader.attempts.len(), 3);
        assert_eq!(uploader.written_for(MeterKey::Current), Vec::<f64>::new());
        assert_eq!(uploader.written_for(MeterKey::Power), vec![460.0]);
        assert_eq!(uploader.written_for(MeterKey::Voltage), vec![230.0]);
        // Local state is unaffected by the failure
        assert_eq!(pipeline.accumulator().window().accumulated_energy(), 460.0);
        assert_eq!(pipeline.display().row_text(0), "V:230.00  C:2.00");
    }

    #[tokio::test]
    async fn test_sampler_failure_skips_tick() {
        let mut sampler = FixedSampler::new(230.0, 2.0);
        sampler.fail = true;
        let mut pipeline = pipeline(sampler, RecordingUploader::default());

        assert_eq!(pipeline.tick(0).await, None);
        assert!(pipeline.uploader().attempts.is_empty());
        assert_eq!(pipeline.gate().last_run(), Some(0));
        assert_eq!(pipeline.accumulator().window().accumulated_energy(), 0.0);
    }

    #[tokio::test]
    async fn test_daily_total_uploaded_after_window() {
        let mut pipeline = pipeline(FixedSampler::new(100.0, 1.0), RecordingUploader::default());

        pipeline.tick(0).await;
        pipeline.tick(DAY_MS / 2).await;
        pipeline.tick(DAY_MS).await;

        let uploader = pipeline.uploader();
        assert_eq!(uploader.written_for(MeterKey::DailyEnergy), vec![300.0]);
        assert_eq!(uploader.attempts.last(), Some(&(MeterKey::DailyEnergy, 300.0)));
        assert_eq!(pipeline.accumulator().window().accumulated_energy(), 0.0);
        assert_eq!(pipeline.accumulator().window().window_start(), DAY_MS);
    }
}
