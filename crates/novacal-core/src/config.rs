use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application data directory; OAuth tokens live in its `tokens/` subdirectory
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Google OAuth client used to refresh calendar tokens
    #[serde(default)]
    pub google: GoogleConfig,

    /// Calendar API and agenda settings
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Retry policy for transient network failures
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Google OAuth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client ID from the Google Cloud console
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
}

impl GoogleConfig {
    /// Check if credentials are configured (not placeholders)
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.client_id.starts_with("YOUR_")
            && !self.client_secret.starts_with("YOUR_")
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: "YOUR_GOOGLE_CLIENT_ID".to_string(),
            client_secret: "YOUR_GOOGLE_CLIENT_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Base URL of the Calendar v3 API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Calendar that events are searched in and written to
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    /// Calendars merged into the agenda view.
    /// A holiday calendar (e.g. `id.indonesian#holiday@group.v.calendar.google.com`)
    /// can be listed next to `primary`.
    #[serde(default = "default_agenda_calendars")]
    pub agenda_calendars: Vec<String>,

    /// IANA timezone used for day boundaries and displayed times
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum matches returned by an event search
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,

    /// Maximum events fetched per calendar for the agenda
    #[serde(default = "default_agenda_limit")]
    pub agenda_limit: u32,
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_agenda_calendars() -> Vec<String> {
    vec![default_calendar_id()]
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_search_limit() -> u32 {
    10
}

fn default_agenda_limit() -> u32 {
    50
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            calendar_id: default_calendar_id(),
            agenda_calendars: default_agenda_calendars(),
            timezone: default_timezone(),
            search_limit: default_search_limit(),
            agenda_limit: default_agenda_limit(),
        }
    }
}

impl CalendarConfig {
    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::Invalid(format!("Unknown timezone: {}", self.timezone)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each following one
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("novacal")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            google: GoogleConfig::default(),
            calendar: CalendarConfig::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            tracing::info!("Wrote default config to {:?}", config_path);
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(
            &self.calendar.api_base_url,
            "calendar.api_base_url",
            &mut result,
        );

        if self.calendar.calendar_id.trim().is_empty() {
            result.add_error("calendar.calendar_id", "Calendar ID must not be empty");
        }

        if self.calendar.agenda_calendars.is_empty() {
            result.add_warning(
                "calendar.agenda_calendars",
                "No agenda calendars configured - agenda will always be empty",
            );
        }

        if let Err(e) = self.calendar.tz() {
            result.add_error("calendar.timezone", e.to_string());
        }

        if self.calendar.search_limit == 0 {
            result.add_error("calendar.search_limit", "Search limit must be greater than 0");
        } else if self.calendar.search_limit > 2500 {
            result.add_error(
                "calendar.search_limit",
                "Search limit exceeds the API maximum of 2500",
            );
        }

        if self.calendar.agenda_limit == 0 {
            result.add_error("calendar.agenda_limit", "Agenda limit must be greater than 0");
        } else if self.calendar.agenda_limit > 2500 {
            result.add_error(
                "calendar.agenda_limit",
                "Agenda limit exceeds the API maximum of 2500",
            );
        }

        if self.retry.max_retries > 10 {
            result.add_warning(
                "retry.max_retries",
                "More than 10 retries can stall a request for a long time",
            );
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            result.add_warning(
                "retry.initial_delay_ms",
                "Initial delay is larger than max delay; every retry will use max delay",
            );
        }

        // Missing OAuth client only disables token refresh
        if !self.google.is_configured() {
            result.add_warning(
                "google",
                "Google OAuth not configured - expired tokens cannot be refreshed",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Directory holding stored OAuth tokens
    pub fn tokens_dir(&self) -> PathBuf {
        self.config_dir.join("tokens")
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("user config directory".into()))?
            .join("novacal");

        Ok(config_dir.join("config.toml"))
    }
}
