use std::fmt;

/// The fixed keys written to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeterKey {
    Current,
    Power,
    Voltage,
    DailyEnergy,
}

impl MeterKey {
    pub fn suffix(self) -> &'static str {
        match self {
            MeterKey::Current => "current",
            MeterKey::Power => "power",
            MeterKey::Voltage => "voltage",
            MeterKey::DailyEnergy => "24_hour_power",
        }
    }

    /// Full database path for this key, e.g. `path/current`.
    pub fn path(self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            self.suffix().to_string()
        } else {
            format!("{}/{}", prefix, self.suffix())
        }
    }
}

impl fmt::Display for MeterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No database connection configured")]
    NotConfigured,
    #[error("Not signed in to the database")]
    NotSignedIn,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Write rejected ({status}): {reason}")]
    Rejected {
        status: reqwest::StatusCode,
        reason: String,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl UploadError {
    /// Human readable reason suitable for a log line.
    pub fn reason(&self) -> String {
        match self {
            UploadError::Rejected { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Something that durably stores a numeric value under a key path.
#[allow(async_fn_in_trait)]
pub trait Uploader {
    async fn publish(&mut self, key: MeterKey, value: f64) -> Result<(), UploadError>;
}

/// Publishes one value, logging the outcome. Failures stop at the call site.
pub async fn publish_logged<U: Uploader>(uploader: &mut U, key: MeterKey, value: f64) -> bool {
    match uploader.publish(key, value).await {
        Ok(()) => {
            tracing::info!("{} data written ({})", key, value);
            true
        }
        Err(e) => {
            tracing::warn!("Failed to write {} data: {}", key, e.reason());
            false
        }
    }
}
