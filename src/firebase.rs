use serde_derive::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::DatabaseConfig;
use crate::uploader::{MeterKey, UploadError, Uploader};

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Client for the Firebase Realtime Database REST API, signed in anonymously.
pub struct RealtimeDatabase {
    config: DatabaseConfig,
    client: reqwest::Client,
    session: Option<Session>,
}

#[derive(Debug, Clone)]
struct Session {
    id_token: String,
    refresh_token: String,
    expires_at: Instant,
}

impl RealtimeDatabase {
    pub fn new(config: DatabaseConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            session: None,
        })
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    fn ensure_configured(&self) -> Result<(), UploadError> {
        if self.config.database_url.is_empty() || self.config.api_key.is_empty() {
            return Err(UploadError::NotConfigured);
        }
        Ok(())
    }

    /// Creates an anonymous user and keeps its tokens for subsequent writes.
    pub async fn sign_up(&mut self) -> Result<(), UploadError> {
        self.ensure_configured()?;
        let response = self
            .client
            .post(format!("{}/v1/accounts:signUp", self.config.auth_url))
            .query(&[("key", &self.config.api_key)])
            .json(&SignUpRequest {
                return_secure_token: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let reason = error_reason(response).await;
            return Err(UploadError::Auth(reason));
        }

        let body: SignUpResponse = response.json().await?;
        self.session = Some(Session {
            id_token: body.id_token,
            refresh_token: body.refresh_token,
            expires_at: Instant::now() + parse_expiry(&body.expires_in),
        });
        tracing::info!("Signed in to database as {}", body.local_id);
        Ok(())
    }

    async fn refresh(&mut self, refresh_token: &str) -> Result<(), UploadError> {
        let response = self
            .client
            .post(format!("{}/v1/token", self.config.token_url))
            .query(&[("key", &self.config.api_key)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let reason = error_reason(response).await;
            return Err(UploadError::Auth(reason));
        }

        let body: RefreshResponse = response.json().await?;
        self.session = Some(Session {
            id_token: body.id_token,
            refresh_token: body.refresh_token,
            expires_at: Instant::now() + parse_expiry(&body.expires_in),
        });
        tracing::debug!("Refreshed database token");
        Ok(())
    }

    /// Returns a usable id token, refreshing it when it is about to expire.
    async fn id_token(&mut self) -> Result<String, UploadError> {
        let session = self.session.clone().ok_or(UploadError::NotSignedIn)?;
        if Instant::now() + REFRESH_MARGIN >= session.expires_at {
            self.refresh(&session.refresh_token).await?;
        }
        self.session
            .as_ref()
            .map(|s| s.id_token.clone())
            .ok_or(UploadError::NotSignedIn)
    }

    /// Writes a number at `path` (e.g. `path/voltage`).
    pub async fn set_double(&mut self, path: &str, value: f64) -> Result<(), UploadError> {
        self.ensure_configured()?;
        let token = self.id_token().await?;
        let response = self
            .client
            .put(format!("{}/{}.json", self.config.database_url, path))
            .query(&[("auth", token)])
            .json(&value)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = error_reason(response).await;
            return Err(UploadError::Rejected { status, reason });
        }
        Ok(())
    }
}

impl Uploader for RealtimeDatabase {
    async fn publish(&mut self, key: MeterKey, value: f64) -> Result<(), UploadError> {
        let path = key.path(&self.config.path_prefix);
        self.set_double(&path, value).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignUpRequest {
    return_secure_token: bool,
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: String,
    #[serde(default)]
    local_id: String,
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: String,
}

/// Error payloads come as `{"error": "..."}` from the database and as
/// `{"error": {"message": "..."}}` from the auth endpoints.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Message(String),
    Structured { message: String },
}

async fn error_reason(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    parse_error_reason(&text).unwrap_or_else(|| {
        if text.trim().is_empty() {
            status.to_string()
        } else {
            text
        }
    })
}

fn parse_error_reason(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    Some(match parsed.error {
        ErrorDetail::Message(message) => message,
        ErrorDetail::Structured { message } => message,
    })
}

/// `expiresIn` is a string of seconds. Unknown values fall back to one hour.
fn parse_expiry(expires_in: &str) -> Duration {
    Duration::from_secs(expires_in.trim().parse().unwrap_or(3600))
}
