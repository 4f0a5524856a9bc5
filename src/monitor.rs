use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::accumulator::RollingAccumulator;
use crate::analog_input::ModbusAnalogInput;
use crate::config::MonitorConfig;
use crate::connectivity::{bring_up, endpoint_of, tcp_reachable, Connectivity};
use crate::display::{CharacterGrid, Display};
use crate::firebase::RealtimeDatabase;
use crate::pipeline::{ReadingPipeline, SendGate};
use crate::sampler::EnergyMonitor;

/// How often the loop checks whether a tick is due.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Monotonic milliseconds since the monitor started.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Brings the network and database up, then runs the reading pipeline forever.
pub async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    let clock = MonotonicClock::start();
    let mut display = CharacterGrid::console();

    let network = bring_up_network(&config, &mut display).await;
    if !network.is_connected() {
        tracing::warn!("Continuing without network, uploads will fail until it returns");
    }

    let mut database = RealtimeDatabase::new(config.database.clone())?;
    connect_to_database(&mut database, &mut display).await;

    let sampler = EnergyMonitor::new(
        ModbusAnalogInput::new(config.analog_module),
        config.voltage_channel,
        config.current_channel,
        config.calibration,
    );

    let mut pipeline = ReadingPipeline::new(
        sampler,
        display,
        database,
        SendGate::new(config.send_interval_ms),
        RollingAccumulator::new(
            clock.now_ms(),
            config.window_duration_ms,
            config.emit_failure_policy,
        ),
    );

    tracing::info!("Starting measurement loop");
    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        poll.tick().await;
        pipeline.tick(clock.now_ms()).await;
    }
}

async fn bring_up_network<D: Display>(config: &MonitorConfig, display: &mut D) -> Connectivity {
    let Some((host, port)) = endpoint_of(&config.database.database_url) else {
        tracing::warn!("No database URL configured, skipping network check");
        return Connectivity::Failed;
    };
    tracing::info!("Checking network reachability of {}:{}", host, port);
    let policy = config.connect_policy;
    let attempt_limit = policy.delay.max(Duration::from_millis(500));
    bring_up(policy, display, || tcp_reachable(&host, port, attempt_limit)).await
}

async fn connect_to_database<D: Display>(database: &mut RealtimeDatabase, display: &mut D) {
    display.clear();
    match database.sign_up().await {
        Ok(()) => {
            tracing::info!("Connected to database");
            display.print("DB Connected");
        }
        Err(e) => {
            tracing::error!("DB connection failed: {}", e.reason());
            display.print("DB FAILED");
        }
    }
    display.flush();
}
