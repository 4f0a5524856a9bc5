use crate::uploader::{publish_logged, MeterKey, Uploader};

/// What to do with the window total when the daily upload fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitFailurePolicy {
    /// Reset anyway. The failed total is lost.
    #[default]
    Reset,
    /// Keep accumulating and retry the upload on the next tick.
    Retain,
}

/// Energy summed since `window_start`. Timestamps are monotonic milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyWindow {
    accumulated_energy: f64,
    window_start: u64,
    duration: u64,
}

impl EnergyWindow {
    pub fn new(window_start: u64, duration: u64) -> Self {
        Self {
            accumulated_energy: 0.0,
            window_start,
            duration,
        }
    }

    /// Adds a power sample as-is. Negative noise is summed, never clamped.
    pub fn add(&mut self, power: f64) {
        self.accumulated_energy += power;
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start) >= self.duration
    }

    /// Starts a new window at `now` in place.
    pub fn reset(&mut self, now: u64) {
        self.accumulated_energy = 0.0;
        self.window_start = now;
    }

    pub fn accumulated_energy(&self) -> f64 {
        self.accumulated_energy
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }
}

/// Result of an expiry detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowFlush {
    pub total: f64,
    pub uploaded: bool,
}

/// Tracks the rolling daily total and uploads it once per window.
#[derive(Debug, Clone)]
pub struct RollingAccumulator {
    window: EnergyWindow,
    policy: EmitFailurePolicy,
}

impl RollingAccumulator {
    pub fn new(window_start: u64, duration: u64, policy: EmitFailurePolicy) -> Self {
        Self {
            window: EnergyWindow::new(window_start, duration),
            policy,
        }
    }

    pub fn window(&self) -> &EnergyWindow {
        &self.window
    }

    /// Adds `power` and, if the window has run its course, emits the total.
    ///
    /// Expiry is only checked here, so the effective window length is quantized to
    /// the tick spacing.
    pub async fn accumulate<U: Uploader>(
        &mut self,
        power: f64,
        now: u64,
        uploader: &mut U,
    ) -> Option<WindowFlush> {
        self.window.add(power);

        if !self.window.is_expired(now) {
            return None;
        }

        let total = self.window.accumulated_energy();
        let uploaded = publish_logged(uploader, MeterKey::DailyEnergy, total).await;

        match (uploaded, self.policy) {
            (true, _) => {
                tracing::info!("Stored 24-hour power: {}", total);
                self.window.reset(now);
            }
            (false, EmitFailurePolicy::Reset) => {
                tracing::error!("24-hour power total {} was not stored and is discarded", total);
                self.window.reset(now);
            }
            (false, EmitFailurePolicy::Retain) => {
                tracing::warn!(
                    "24-hour power total {} was not stored, keeping it for the next tick",
                    total
                );
            }
        }

        Some(WindowFlush { total, uploaded })
    }
}
