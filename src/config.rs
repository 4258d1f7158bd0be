//! Run settings and the declaration document loader.
//!
//! Settings are layered, lowest precedence first: built-in defaults, the
//! user's `config.toml`, the document's `[settings]` table, then CLI flags.

mod document;
mod expr;
mod loader;

pub use document::VarType;
pub use loader::{Configuration, OutputDeclaration};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const USER_CONFIG_FILE: &str = "config.toml";

/// Backoff policy for transient provider errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// Upper bound on concurrent provider calls within a wave.
    pub parallelism: usize,
    #[serde(with = "humantime_serde")]
    pub resource_timeout: Duration,
    pub retry: RetryConfig,
    /// Age past which a held lock is reported as stale.
    #[serde(with = "humantime_serde")]
    pub lock_stale_after: Duration,
    /// Read every tracked resource from the provider before planning.
    pub refresh: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 10,
            resource_timeout: Duration::from_secs(20 * 60),
            retry: RetryConfig::default(),
            lock_stale_after: Duration::from_secs(60 * 60),
            refresh: true,
        }
    }
}

impl Settings {
    pub fn with_overlay(mut self, overlay: &SettingsOverlay) -> Self {
        if let Some(parallelism) = overlay.parallelism {
            self.parallelism = parallelism;
        }
        if let Some(timeout) = overlay.resource_timeout {
            self.resource_timeout = timeout;
        }
        if let Some(stale) = overlay.lock_stale_after {
            self.lock_stale_after = stale;
        }
        if let Some(refresh) = overlay.refresh {
            self.refresh = refresh;
        }
        if let Some(retry) = &overlay.retry {
            if let Some(attempts) = retry.max_attempts {
                self.retry.max_attempts = attempts;
            }
            if let Some(delay) = retry.initial_delay {
                self.retry.initial_delay = delay;
            }
            if let Some(delay) = retry.max_delay {
                self.retry.max_delay = delay;
            }
            if let Some(multiplier) = retry.multiplier {
                self.retry.multiplier = multiplier;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &str, reason: &str| {
            Err(ConfigError::InvalidSetting {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        };
        if self.parallelism == 0 {
            return invalid("parallelism", "must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier", "must be at least 1.0");
        }
        if self.resource_timeout.is_zero() {
            return invalid("resource_timeout", "must be greater than zero");
        }
        Ok(())
    }
}

/// A partial `[settings]` table; unset fields leave the lower layer intact.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverlay {
    pub parallelism: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    pub resource_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub lock_stale_after: Option<Duration>,
    pub refresh: Option<bool>,
    pub retry: Option<RetryOverlay>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverlay {
    pub max_attempts: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub initial_delay: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub max_delay: Option<Duration>,
    pub multiplier: Option<f64>,
}

/// Which provider converges the declared resources.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum ProviderConfig {
    /// Simulated cloud persisted next to the state.
    #[default]
    Local,
    Http { endpoint: String },
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Local => "local",
            ProviderConfig::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct UserConfig {
    #[serde(default)]
    settings: SettingsOverlay,
}

/// `~/.config/tierform/config.toml` on Linux, the platform equivalent elsewhere.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tierform").join(USER_CONFIG_FILE))
}

/// Reads the user layer. A missing file is an empty overlay.
pub fn load_user_settings(path: &Path) -> Result<SettingsOverlay, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SettingsOverlay::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let config: UserConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        origin: path.display().to_string(),
        message: e.to_string(),
    })?;
    tracing::debug!(path = %path.display(), "loaded user settings");
    Ok(config.settings)
}
