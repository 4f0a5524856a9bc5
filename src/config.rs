use anyhow::Context;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::accumulator::EmitFailurePolicy;
use crate::connectivity::RetryPolicy;
use crate::sampler::Calibration;

pub const DEFAULT_SEND_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_WINDOW_DURATION_MS: u64 = 86_400_000;
pub const DEFAULT_PATH_PREFIX: &str = "path";
pub const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com";
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com";

/// Everything the monitor needs, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub database: DatabaseConfig,
    pub analog_module: SocketAddr,
    pub voltage_channel: u16,
    pub current_channel: u16,
    pub calibration: Calibration,
    pub send_interval_ms: u64,
    pub window_duration_ms: u64,
    pub emit_failure_policy: EmitFailurePolicy,
    pub connect_policy: RetryPolicy,
}

/// Connection settings for the Firebase Realtime Database.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub api_key: String,
    pub auth_url: String,
    pub token_url: String,
    pub path_prefix: String,
    pub timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            api_key: String::new(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env::var("FIREBASE_DATABASE_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            api_key: env::var("FIREBASE_API_KEY").unwrap_or_default(),
            auth_url: env::var("FIREBASE_AUTH_URL").unwrap_or(defaults.auth_url),
            token_url: env::var("FIREBASE_TOKEN_URL").unwrap_or(defaults.token_url),
            path_prefix: env::var("DB_PATH_PREFIX").unwrap_or(defaults.path_prefix),
            timeout: Duration::from_millis(env_or("UPLOAD_TIMEOUT_MS", 10_000)?),
        })
    }
}

impl MonitorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let analog_module = env::var("METER_MODBUS")
            .context("METER_MODBUS must name the analog input module (host:port)")?
            .parse()
            .context("Invalid METER_MODBUS address format")?;

        let defaults = Calibration::default();
        let calibration = Calibration {
            voltage: env_or("VOLTAGE_CALIBRATION", defaults.voltage)?,
            current: env_or("CURRENT_CALIBRATION", defaults.current)?,
            phase: env_or("PHASE_CALIBRATION", defaults.phase)?,
            crossings: env_or("SAMPLE_CROSSINGS", defaults.crossings)?,
            timeout: Duration::from_millis(env_or(
                "SAMPLE_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )?),
        };
        if calibration.voltage <= 0.0 || calibration.current <= 0.0 {
            anyhow::bail!("Calibration scale factors must be positive");
        }

        let emit_failure_policy = if parse_bool_safe(env::var("RETAIN_ON_EMIT_FAILURE").ok()) {
            EmitFailurePolicy::Retain
        } else {
            EmitFailurePolicy::Reset
        };

        let connect_defaults = RetryPolicy::default();
        let connect_policy = RetryPolicy {
            max_attempts: env_or("CONNECT_ATTEMPTS", connect_defaults.max_attempts)?,
            delay: Duration::from_millis(env_or(
                "CONNECT_DELAY_MS",
                connect_defaults.delay.as_millis() as u64,
            )?),
        };

        let config = Self {
            database: DatabaseConfig::from_env()?,
            analog_module,
            voltage_channel: env_or("VOLTAGE_CHANNEL", 33)?,
            current_channel: env_or("CURRENT_CHANNEL", 34)?,
            calibration,
            send_interval_ms: env_or("SEND_INTERVAL_MS", DEFAULT_SEND_INTERVAL_MS)?,
            window_duration_ms: env_or("WINDOW_DURATION_MS", DEFAULT_WINDOW_DURATION_MS)?,
            emit_failure_policy,
            connect_policy,
        };
        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        tracing::info!("Energy monitor config:");
        tracing::info!("  Analog module: {}", self.analog_module);
        tracing::info!(
            "  Channels: voltage {}, current {}",
            self.voltage_channel,
            self.current_channel
        );
        tracing::info!(
            "  Calibration: V {} I {} phase {}",
            self.calibration.voltage,
            self.calibration.current,
            self.calibration.phase
        );
        tracing::info!(
            "  Database: {}",
            if self.database.database_url.is_empty() {
                "none"
            } else {
                &self.database.database_url
            }
        );
        tracing::info!(
            "  Send interval {}ms, window {}ms, on emit failure: {:?}",
            self.send_interval_ms,
            self.window_duration_ms,
            self.emit_failure_policy
        );
    }
}

/// Reads `name` from the environment, falling back to `default` when it is unset or empty.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_or(name, env::var(name).ok(), default)
}

fn parse_or<T>(name: &str, val: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match val {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value '{raw}' for {name}")),
        _ => Ok(default),
    }
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
