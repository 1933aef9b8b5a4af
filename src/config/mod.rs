//! Configuration handling for email generation.
//!
//! Everything the pipeline needs from its host (site address, the store-wide
//! tracking switch, the plain-text unsubscribe flag, the secret used to
//! seal action URLs and the unknown-kind cleaning opt-in) is read here. `Config::from_env` loads it from
//! environment variables with development defaults.

use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};

use url::Url;

/// Environment variable names. Public so tests and the render binary can
/// refer to them.
pub const ENV_SITE_URL: &str = "SITE_URL";
pub const ENV_TRACK_CAMPAIGN_STATS: &str = "TRACK_CAMPAIGN_STATS";
pub const ENV_PLAIN_TEXT_UNSUBSCRIBE: &str = "PLAIN_TEXT_UNSUBSCRIBE";
pub const ENV_ACTION_SECRET: &str = "ACTION_SECRET";
pub const ENV_CLEAN_UNKNOWN_KINDS: &str = "CLEAN_UNKNOWN_KINDS";

/// Default development values used when environment variables are absent.
const DEFAULT_SITE_URL: &str = "http://localhost";
const DEFAULT_TRACK_CAMPAIGN_STATS: bool = true;
const DEFAULT_PLAIN_TEXT_UNSUBSCRIBE: bool = true;
const DEFAULT_ACTION_SECRET: &str = "dev-secret-change-me";
const DEFAULT_CLEAN_UNKNOWN_KINDS: bool = false;

/// Generation configuration shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    site_url: Url,
    track_campaign_stats: bool,
    plain_text_unsubscribe: bool,
    action_secret: String,
    clean_unknown_kinds: bool,
}

impl Config {
    /// Create a new config explicitly.
    pub fn new(
        site_url: Url,
        track_campaign_stats: bool,
        plain_text_unsubscribe: bool,
        action_secret: impl Into<String>,
    ) -> Self {
        Self {
            site_url,
            track_campaign_stats,
            plain_text_unsubscribe,
            action_secret: action_secret.into(),
            clean_unknown_kinds: DEFAULT_CLEAN_UNKNOWN_KINDS,
        }
    }

    /// Load from environment variables, falling back to development defaults.
    ///
    /// Fails when a variable is present but cannot be parsed (a site URL that
    /// is not absolute, a flag that is not a boolean).
    pub fn from_env() -> Result<Self, ConfigError> {
        let site_url = match env::var(ENV_SITE_URL) {
            Ok(raw) => parse_site_url(&raw)?,
            Err(_) => default_site_url(),
        };
        let track_campaign_stats =
            read_flag(ENV_TRACK_CAMPAIGN_STATS, DEFAULT_TRACK_CAMPAIGN_STATS)?;
        let plain_text_unsubscribe =
            read_flag(ENV_PLAIN_TEXT_UNSUBSCRIBE, DEFAULT_PLAIN_TEXT_UNSUBSCRIBE)?;
        let clean_unknown_kinds =
            read_flag(ENV_CLEAN_UNKNOWN_KINDS, DEFAULT_CLEAN_UNKNOWN_KINDS)?;
        let action_secret =
            env::var(ENV_ACTION_SECRET).unwrap_or_else(|_| DEFAULT_ACTION_SECRET.to_string());

        if action_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: ENV_ACTION_SECRET,
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            site_url,
            track_campaign_stats,
            plain_text_unsubscribe,
            action_secret,
            clean_unknown_kinds,
        })
    }

    /// Base URL of the site sending the emails.
    pub fn site_url(&self) -> &Url {
        &self.site_url
    }
    /// Store-wide switch for open and click tracking.
    pub fn track_campaign_stats(&self) -> bool {
        self.track_campaign_stats
    }
    /// Whether plain-text emails get an unsubscribe line appended.
    pub fn plain_text_unsubscribe(&self) -> bool {
        self.plain_text_unsubscribe
    }
    /// Secret used to seal tracking and unsubscribe payloads.
    pub fn action_secret(&self) -> &str {
        &self.action_secret
    }
    /// Whether content of an unrecognised email kind is sanitized before it
    /// goes out. Off by default: such content is returned as given.
    pub fn clean_unknown_kinds(&self) -> bool {
        self.clean_unknown_kinds
    }

    pub fn with_site_url(mut self, site_url: Url) -> Self {
        self.site_url = site_url;
        self
    }

    pub fn with_tracking(mut self, enabled: bool) -> Self {
        self.track_campaign_stats = enabled;
        self
    }

    pub fn with_plain_text_unsubscribe(mut self, enabled: bool) -> Self {
        self.plain_text_unsubscribe = enabled;
        self
    }

    pub fn with_clean_unknown_kinds(mut self, enabled: bool) -> Self {
        self.clean_unknown_kinds = enabled;
        self
    }

    /// Development defaults (mirrors `from_env` with no env overrides).
    pub fn default() -> Self {
        Self::new(
            default_site_url(),
            DEFAULT_TRACK_CAMPAIGN_STATS,
            DEFAULT_PLAIN_TEXT_UNSUBSCRIBE,
            DEFAULT_ACTION_SECRET,
        )
    }
}

fn default_site_url() -> Url {
    Url::parse(DEFAULT_SITE_URL).expect("default site url is valid")
}

fn parse_site_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        field: ENV_SITE_URL,
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidValue {
            field: ENV_SITE_URL,
            reason: format!("'{}' cannot be used as a base url", raw),
        });
    }

    Ok(url)
}

fn read_flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: key,
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}

/// Errors that can occur while building a configuration.
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl Error for ConfigError {}
