pub mod google;
pub mod storage;

pub use google::{GoogleOAuth2Provider, GoogleTokenResponse, CALENDAR_SCOPE};
pub use storage::{SecureStorage, TokenSet};

use novacal_core::AuthError;

/// Storage key for the Google token set
pub const GOOGLE_SERVICE: &str = "google";

/// Get a usable Google access token, refreshing it if it is about to expire.
///
/// A token inside the refresh window is still returned when no refresh is
/// possible; a token past its expiry is not.
pub async fn google_access_token(
    storage: &SecureStorage,
    provider: Option<&GoogleOAuth2Provider>,
) -> Result<String, AuthError> {
    let token_set = storage
        .retrieve_token(GOOGLE_SERVICE)
        .map_err(|_| AuthError::TokenNotFound(GOOGLE_SERVICE.to_string()))?;

    if !token_set.needs_refresh() {
        return Ok(token_set.access_token);
    }

    let refreshable = token_set.refresh_token.as_deref().zip(provider);
    let Some((refresh_token, provider)) = refreshable else {
        if token_set.is_expired() {
            return Err(AuthError::TokenExpired);
        }
        tracing::warn!("Google token expires soon and cannot be refreshed");
        return Ok(token_set.access_token);
    };

    let new_tokens = provider
        .refresh_token(refresh_token)
        .await
        .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

    let expires_at = chrono::Utc::now().timestamp() + new_tokens.expires_in as i64;
    let scopes = if new_tokens.scope.is_empty() {
        token_set.scopes.clone()
    } else {
        new_tokens.scope.split(' ').map(|s| s.to_string()).collect()
    };
    let new_token_set = TokenSet {
        access_token: new_tokens.access_token.clone(),
        refresh_token: new_tokens.refresh_token.or(token_set.refresh_token.clone()),
        expires_at,
        scopes,
    };

    // A fresh token is still usable even if we fail to persist it
    if let Err(e) = storage.store_token(GOOGLE_SERVICE, &new_token_set) {
        tracing::warn!("Failed to persist refreshed Google token: {:#}", e);
    }

    tracing::info!("Refreshed Google access token");
    Ok(new_tokens.access_token)
}
