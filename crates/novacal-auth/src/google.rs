//! Google OAuth2 token refresh for Calendar access.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scope required for reading and writing events
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
}

pub struct GoogleOAuth2Provider {
    pub client_id: String,
    pub client_secret: String,
    client: reqwest::Client,
    token_url: String,
}

impl GoogleOAuth2Provider {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_token_url(client_id, client_secret, GOOGLE_TOKEN_URL)
    }

    /// Provider that talks to a different token endpoint (used by tests).
    pub fn with_token_url(client_id: String, client_secret: String, token_url: &str) -> Self {
        Self {
            client_id,
            client_secret,
            client: reqwest::Client::new(),
            token_url: token_url.to_string(),
        }
    }

    /// Refresh an expired access token.
    #[tracing::instrument(skip(self, refresh_token), level = "info")]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<GoogleTokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("Failed to send refresh request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Token refresh failed: {}", error_text);
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .context("Failed to parse refresh response")
    }
}
