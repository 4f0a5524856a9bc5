use anyhow::Context as _;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;
use tokio_modbus::prelude::*;

/// A source of raw converter counts, one channel at a time.
#[allow(async_fn_in_trait)]
pub trait AnalogInput {
    async fn read(&mut self, channel: u16) -> anyhow::Result<u16>;
}

/// Analog input module reachable over Modbus TCP.
///
/// Each channel is exposed as one input register holding the latest 12-bit
/// conversion, addressed by the channel number.
pub struct ModbusAnalogInput {
    target_address: SocketAddr,
    connection: Option<client::Context>,
}

impl ModbusAnalogInput {
    pub fn new(target_address: SocketAddr) -> Self {
        Self {
            target_address,
            connection: None,
        }
    }

    /// Connects to the analog module with retry logic
    async fn connect_with_retry(&mut self) -> Option<client::Context> {
        const MAX_RETRIES: u32 = 3;

        for attempt in 1..=MAX_RETRIES {
            tracing::info!(
                "Connecting to analog module at {} (attempt {}/{})",
                self.target_address,
                attempt,
                MAX_RETRIES
            );

            match tcp::connect(self.target_address).await {
                Ok(connection) => {
                    tracing::info!("Connected to analog module");
                    return Some(connection);
                }
                Err(e) => {
                    tracing::warn!("Connection attempt {} failed: {}", attempt, e);
                    if attempt < MAX_RETRIES {
                        sleep(Duration::from_secs(1 << (attempt - 1))).await; // Exponential backoff
                    }
                }
            }
        }

        None
    }
}

impl AnalogInput for ModbusAnalogInput {
    async fn read(&mut self, channel: u16) -> anyhow::Result<u16> {
        if self.connection.is_none() {
            self.connection = self.connect_with_retry().await;
        }
        let connection = self
            .connection
            .as_mut()
            .context("No connection to analog module")?;

        // tokio-modbus returns Result<Result<Vec<u16>, ExceptionCode>, Error>
        let result = match connection.read_input_registers(channel, 1).await {
            Ok(Ok(registers)) => registers
                .first()
                .copied()
                .with_context(|| format!("Empty register response for channel {channel}")),
            Ok(Err(exception)) => Err(anyhow::anyhow!(
                "Modbus exception reading channel {channel}: {exception:?}"
            )),
            Err(io_error) => {
                // Force a reconnect on the next read
                self.connection = None;
                Err(anyhow::anyhow!(
                    "IO error reading channel {channel}: {io_error:?}"
                ))
            }
        };
        result.map(clamp_to_adc)
    }
}

/// Limits a register value to the 12-bit converter range.
fn clamp_to_adc(raw: u16) -> u16 {
    raw.min((1u16 << crate::sampler::ADC_BITS) - 1)
}
