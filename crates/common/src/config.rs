use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Process-level configuration loaded from environment variables at startup.
/// Every variable is optional; bad values fall back to the default.
///
/// Runtime bot parameters (symbol, windows, credentials) live in the
/// settings file instead, see [`crate::SettingsStore`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path of the two-column settings file.
    pub settings_path: PathBuf,

    /// Number of candles requested per fetch.
    pub candle_limit: usize,

    /// Upper bound for every exchange and notifier HTTP call.
    pub http_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("config.csv"),
            candle_limit: 100,
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment.
    /// Loads `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        let defaults = Self::default();

        AppConfig {
            settings_path: optional_env("SIGNALBOT_SETTINGS")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            candle_limit: parsed_env("SIGNALBOT_CANDLE_LIMIT")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.candle_limit),
            http_timeout: parsed_env("SIGNALBOT_HTTP_TIMEOUT_SECS")
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = optional_env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}
