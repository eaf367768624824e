use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Token set for OAuth2 authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token for API requests
    pub access_token: String,

    /// Optional refresh token for token renewal
    pub refresh_token: Option<String>,

    /// Token expiration timestamp (Unix timestamp)
    pub expires_at: i64,

    /// Scopes granted to this token
    pub scopes: Vec<String>,
}

impl TokenSet {
    /// Check if the token needs refresh (within 5 minutes of expiry)
    pub fn needs_refresh(&self) -> bool {
        let now = Utc::now().timestamp();
        now >= self.expires_at - 300 // 5 minute buffer
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp();
        now >= self.expires_at
    }
}

/// Google's "authorized user" JSON, as written by the Python and Node client libraries.
#[derive(Debug, Deserialize)]
struct AuthorizedUserFile {
    token: String,
    refresh_token: Option<String>,
    expiry: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

impl From<AuthorizedUserFile> for TokenSet {
    fn from(file: AuthorizedUserFile) -> Self {
        // Unknown expiry is treated as already expired so the first call refreshes
        let expires_at = file
            .expiry
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);

        Self {
            access_token: file.token,
            refresh_token: file.refresh_token,
            expires_at,
            scopes: file.scopes,
        }
    }
}

/// File-based storage for OAuth tokens.
/// Tokens are stored as `<dir>/<service>.json`; the binary roots this at
/// [`Config::tokens_dir`](novacal_core::Config::tokens_dir).
pub struct SecureStorage {
    tokens_dir: PathBuf,
}

impl SecureStorage {
    /// Storage rooted at an explicit directory
    pub fn new(tokens_dir: impl Into<PathBuf>) -> Self {
        Self {
            tokens_dir: tokens_dir.into(),
        }
    }

    /// Get the token file path for a service
    fn token_path(&self, service: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.tokens_dir)
            .context("Failed to create tokens directory")?;

        Ok(self.tokens_dir.join(format!("{}.json", service)))
    }

    /// Store a token set
    ///
    /// # Arguments
    /// * `service` - Service identifier (e.g., "google")
    /// * `token_set` - The token set to store
    pub fn store_token(&self, service: &str, token_set: &TokenSet) -> Result<()> {
        let path = self.token_path(service)?;

        let json = serde_json::to_string_pretty(token_set)
            .context("Failed to serialize token set")?;

        fs::write(&path, &json)
            .context("Failed to write token file")?;

        tracing::info!("Stored token for service: {} at {:?}", service, path);
        Ok(())
    }

    /// Retrieve a token set
    pub fn retrieve_token(&self, service: &str) -> Result<TokenSet> {
        let path = self.token_path(service)?;

        let json = fs::read_to_string(&path)
            .context("Failed to read token file")?;

        let token_set: TokenSet = serde_json::from_str(&json)
            .context("Failed to deserialize token set")?;

        tracing::debug!("Retrieved token for service: {}", service);
        Ok(token_set)
    }

    /// Delete a token set
    pub fn delete_token(&self, service: &str) -> Result<()> {
        let path = self.token_path(service)?;

        if path.exists() {
            fs::remove_file(&path)
                .context("Failed to delete token file")?;
            tracing::info!("Deleted token for service: {}", service);
        }

        Ok(())
    }

    /// Check if a token exists for a service
    pub fn has_token(&self, service: &str) -> bool {
        self.retrieve_token(service).is_ok()
    }

    /// Seed a service token from raw JSON when none is stored yet.
    ///
    /// Accepts either a serialized [`TokenSet`] or Google's authorized-user
    /// format (`token`, `refresh_token`, `expiry`, `scopes`). Returns `true`
    /// when a token was written.
    pub fn import_if_missing(&self, service: &str, raw_json: &str) -> Result<bool> {
        if self.has_token(service) {
            return Ok(false);
        }

        let token_set = match serde_json::from_str::<TokenSet>(raw_json) {
            Ok(token_set) => token_set,
            Err(_) => serde_json::from_str::<AuthorizedUserFile>(raw_json)
                .context("Token JSON is neither a token set nor an authorized-user file")?
                .into(),
        };

        self.store_token(service, &token_set)?;
        Ok(true)
    }
}
