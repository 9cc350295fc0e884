//! Configuration loading for the sync engine
//!
//! OAuth client credentials come from the first source that has them:
//! credentials embedded at build time, the Google Cloud Console JSON file in
//! the config directory, then `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET`.
//!
//! Engine tuning lives in `courier.json`; every field has a default so the
//! file is optional and may be partial.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials filename in the Courier config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Engine settings filename in the Courier config directory
pub const ENGINE_CONFIG_FILE: &str = "courier.json";

/// Where a set of client credentials was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Embedded,
    File,
    Environment,
}

/// OAuth client credentials used to refresh Google access tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Token endpoint named by the credential file; wins over `EngineConfig::token_url`
    pub token_uri: Option<String>,
    pub source: CredentialSource,
}

/// Google Cloud Console download; desktop and web clients share one shape
#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
    token_uri: Option<String>,
}

impl GoogleCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_uri: None,
            source: CredentialSource::Environment,
        }
    }

    /// Resolve credentials from the embedded build, the config file or the environment
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::embedded() {
            return Ok(creds);
        }
        match Self::default_credentials_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Self::from_env(),
        }
    }

    /// Build with `GOOGLE_CLIENT_ID=.. GOOGLE_CLIENT_SECRET=.. cargo build --release`
    pub fn embedded() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID").filter(|v| !v.is_empty())?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET").filter(|v| !v.is_empty())?;
        Some(Self {
            source: CredentialSource::Embedded,
            ..Self::new(client_id, client_secret)
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file: ClientSecretFile = config::load_json_file(path)?;
        Self::from_client_secret(file)
            .with_context(|| format!("Invalid credentials file {}", path.display()))
    }

    /// Parse a Google Cloud Console client secret JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_client_secret(file)
    }

    fn from_client_secret(file: ClientSecretFile) -> Result<Self> {
        let Some(section) = file.installed.or(file.web) else {
            bail!("Credentials file has neither an 'installed' nor a 'web' client");
        };
        if section.client_id.trim().is_empty() || section.client_secret.trim().is_empty() {
            bail!("Credentials file has an empty client_id or client_secret");
        }
        let token_uri = section
            .token_uri
            .map(|uri| uri.trim().to_string())
            .filter(|uri| !uri.is_empty());
        if let Some(uri) = &token_uri
            && !uri.starts_with("https://")
        {
            bail!("token_uri must use https, got {uri}");
        }

        Ok(Self {
            token_uri,
            source: CredentialSource::File,
            ..Self::new(section.client_id, section.client_secret)
        })
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .context("GOOGLE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .context("GOOGLE_CLIENT_SECRET environment variable not set")?;
        Ok(Self::new(client_id, client_secret))
    }

    /// Token endpoint to refresh against, given the configured default
    pub fn token_endpoint<'a>(&'a self, configured: &'a str) -> &'a str {
        self.token_uri.as_deref().unwrap_or(configured)
    }

    /// ~/.config/courier/google-credentials.json
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Bounded exponential backoff for transient provider failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// No retries and no sleeping; used by tests
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Tunables for sync passes, HTTP and scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Thread references requested per page during full sync
    pub page_size: usize,
    /// Upper bound on thread references consumed by one full sync
    pub max_full_sync_threads: usize,
    /// Label that restricts full sync listing
    pub inbox_label: String,
    /// Seconds a `Syncing` status is honored before it is considered abandoned
    pub sync_lease_secs: u64,
    /// Minimum seconds between polled syncs
    pub poll_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Days ahead refreshed by calendar sync
    pub calendar_horizon_days: u32,
    /// Default days ahead searched for free slots
    pub slot_horizon_days: u32,
    pub max_slots_per_day: usize,
    pub max_slots_total: usize,
    /// Concurrent per-message label calls
    pub label_fanout: usize,
    pub gmail_base_url: String,
    pub calendar_base_url: String,
    pub token_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_full_sync_threads: 100,
            inbox_label: "INBOX".to_string(),
            sync_lease_secs: 15 * 60,
            poll_interval_secs: 5 * 60,
            http_timeout_secs: 30,
            retry: RetryPolicy::default(),
            calendar_horizon_days: 30,
            slot_horizon_days: 5,
            max_slots_per_day: 2,
            max_slots_total: 6,
            label_fanout: 4,
            gmail_base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
            calendar_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load `courier.json` from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        config::load_json_or_default(ENGINE_CONFIG_FILE)
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sync_lease_secs as i64)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
