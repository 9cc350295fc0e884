//! Access credentials for the Google APIs
//!
//! The engine never runs an interactive sign-in. It asks a
//! [`CredentialSupplier`] for a bearer token before each request; a missing
//! or unrefreshable credential surfaces as [`SyncError::Auth`].

use anyhow::Context;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GoogleCredentials;
use crate::error::SyncError;
use crate::http;

/// Token filename in the Courier config directory
const TOKEN_FILE: &str = "google-tokens.json";

/// Refresh this many seconds before the token actually expires
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Source of bearer tokens for one user
pub trait CredentialSupplier: Send + Sync {
    /// A currently valid access token
    fn access_token(&self) -> Result<String, SyncError>;
}

/// A fixed bearer token, e.g. from the environment
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialSupplier for StaticToken {
    fn access_token(&self) -> Result<String, SyncError> {
        if self.0.is_empty() {
            return Err(SyncError::Auth("empty access token".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Persisted token data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    /// Unix seconds
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_BUFFER_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Reads an OAuth token file, refreshing and rewriting it when it expires
pub struct StoredTokenSupplier {
    credentials: GoogleCredentials,
    token_path: PathBuf,
    token_url: String,
    agent: ureq::Agent,
    /// Serializes refreshes so concurrent callers do not rotate twice
    refresh_lock: Mutex<()>,
}

impl StoredTokenSupplier {
    /// Supplier using `~/.config/courier/google-tokens.json`
    pub fn new(credentials: GoogleCredentials, token_url: impl Into<String>) -> anyhow::Result<Self> {
        let token_path =
            config::config_path(TOKEN_FILE).context("Could not determine config directory")?;
        Ok(Self::with_token_path(credentials, token_path, token_url))
    }

    /// `token_url` is used unless the credentials name their own endpoint
    pub fn with_token_path(
        credentials: GoogleCredentials,
        token_path: impl Into<PathBuf>,
        token_url: impl Into<String>,
    ) -> Self {
        let token_url = token_url.into();
        let token_url = credentials.token_endpoint(&token_url).to_string();
        Self {
            credentials,
            token_path: token_path.into(),
            token_url,
            agent: http::build_agent(Duration::from_secs(30)),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    fn load_token(&self) -> Result<StoredToken, SyncError> {
        let content = fs::read_to_string(&self.token_path).map_err(|e| {
            SyncError::Auth(format!(
                "no stored token at {}: {}",
                self.token_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| SyncError::Auth(format!("unreadable token file: {}", e)))
    }

    fn save_token(&self, token: &StoredToken) -> anyhow::Result<()> {
        config::save_json_file(&self.token_path, token)
    }

    /// Refresh an access token using a refresh token
    fn refresh(&self, refresh_token: &str) -> Result<StoredToken, SyncError> {
        let response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| http::map_transport_error(e, "refresh access token"))?;

        let token: TokenResponse = http::read_json_response(response, "refresh access token")
            .map_err(|e| match e {
                // invalid_grant comes back as 400: the grant was revoked
                SyncError::Api { message, .. } => SyncError::Auth(message),
                other => other,
            })?;

        Ok(StoredToken {
            access_token: token.access_token,
            // Preserve the refresh token if not returned
            refresh_token: token
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        })
    }
}

impl CredentialSupplier for StoredTokenSupplier {
    fn access_token(&self) -> Result<String, SyncError> {
        let _guard = self
            .refresh_lock
            .lock()
            .map_err(|_| SyncError::Auth("token lock poisoned".to_string()))?;

        let token = self.load_token()?;
        let now = chrono::Utc::now().timestamp();
        if token.is_fresh(now) {
            return Ok(token.access_token);
        }

        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| SyncError::Auth("access token expired and no refresh token stored".to_string()))?;

        debug!("[AUTH] Access token expired, refreshing");
        let refreshed = self.refresh(refresh_token)?;
        self.save_token(&refreshed)?;
        info!("[AUTH] Refreshed access token");
        Ok(refreshed.access_token)
    }
}
