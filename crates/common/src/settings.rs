//! Runtime bot settings and their durable two-column store.
//!
//! The store is a headerless CSV file with one `KEY,value` row per setting:
//!
//! ```text
//! TELEGRAM_TOKEN,
//! TELEGRAM_CHAT_ID,
//! SYMBOL,BTC/USDT
//! TIMEFRAME,1h
//! INTERVAL,3600
//! ...
//! ```
//!
//! Loading never fails: a missing or unreadable file is replaced by the
//! defaults, unknown rows are ignored and a value that does not parse falls
//! back to its default with a warning. Saving validates the merged set first
//! and writes it through a temporary file, so the file on disk is always a
//! complete set.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{Error, ExchangeId, Result, Theme, Timeframe};

pub const TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
pub const TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const SYMBOL: &str = "SYMBOL";
pub const TIMEFRAME: &str = "TIMEFRAME";
pub const INTERVAL: &str = "INTERVAL";
pub const RSI_WINDOW: &str = "RSI_WINDOW";
pub const SMA_SHORT: &str = "SMA_SHORT";
pub const SMA_LONG: &str = "SMA_LONG";
pub const BB_WINDOW: &str = "BB_WINDOW";
pub const VOLUME_SPIKE_RATIO: &str = "VOLUME_SPIKE_RATIO";
pub const EXCHANGE: &str = "EXCHANGE";
pub const THEME: &str = "THEME";
pub const NOTIFY_HOLD: &str = "NOTIFY_HOLD";

/// Longest accepted poll interval: one week.
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 3600;

/// Every recognized key with its default, in file order.
pub const DEFAULTS: [(&str, &str); 13] = [
    (TELEGRAM_TOKEN, ""),
    (TELEGRAM_CHAT_ID, ""),
    (SYMBOL, "BTC/USDT"),
    (TIMEFRAME, "1h"),
    (INTERVAL, "3600"),
    (RSI_WINDOW, "14"),
    (SMA_SHORT, "7"),
    (SMA_LONG, "25"),
    (BB_WINDOW, "20"),
    (VOLUME_SPIKE_RATIO, "1.5"),
    (EXCHANGE, "binance"),
    (THEME, "light"),
    (NOTIFY_HOLD, "false"),
];

pub fn is_known_key(key: &str) -> bool {
    DEFAULTS.iter().any(|(k, _)| *k == key)
}

fn default_for(key: &str) -> &'static str {
    DEFAULTS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or("")
}

/// The default key/value set.
pub fn default_values() -> BTreeMap<String, String> {
    DEFAULTS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Typed view of the settings, parsed once when the values are loaded or saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub telegram_token: String,
    pub telegram_chat_id: String,
    /// Traded pair, "BASE/QUOTE".
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Seconds between polls.
    pub interval_secs: u64,
    pub rsi_window: usize,
    pub sma_short: usize,
    pub sma_long: usize,
    pub bb_window: usize,
    pub volume_spike_ratio: f64,
    pub exchange: ExchangeId,
    pub theme: Theme,
    /// Whether HOLD reports are pushed to the chat channel too.
    pub notify_hold: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            telegram_token: String::new(),
            telegram_chat_id: String::new(),
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::H1,
            interval_secs: 3600,
            rsi_window: 14,
            sma_short: 7,
            sma_long: 25,
            bb_window: 20,
            volume_spike_ratio: 1.5,
            exchange: ExchangeId::Binance,
            theme: Theme::Light,
            notify_hold: false,
        }
    }
}

impl Settings {
    /// Strict parse of a key/value set. Missing keys take their default;
    /// the first invalid value is reported as `Error::Config`.
    pub fn from_values(values: &BTreeMap<String, String>) -> Result<Self> {
        let raw = |key: &str| raw_value(values, key);

        Ok(Settings {
            telegram_token: raw(TELEGRAM_TOKEN).to_string(),
            telegram_chat_id: raw(TELEGRAM_CHAT_ID).to_string(),
            symbol: parse_symbol(raw(SYMBOL))?,
            timeframe: raw(TIMEFRAME).parse()?,
            interval_secs: parse_interval(raw(INTERVAL))?,
            rsi_window: parse_integer(RSI_WINDOW, raw(RSI_WINDOW), 1)?,
            sma_short: parse_integer(SMA_SHORT, raw(SMA_SHORT), 1)?,
            sma_long: parse_integer(SMA_LONG, raw(SMA_LONG), 1)?,
            bb_window: parse_integer(BB_WINDOW, raw(BB_WINDOW), 1)?,
            volume_spike_ratio: parse_ratio(raw(VOLUME_SPIKE_RATIO))?,
            exchange: raw(EXCHANGE).parse()?,
            theme: raw(THEME).parse()?,
            notify_hold: parse_bool(NOTIFY_HOLD, raw(NOTIFY_HOLD))?,
        })
    }

    /// Canonical string form, one entry per recognized key.
    pub fn to_values(&self) -> BTreeMap<String, String> {
        [
            (TELEGRAM_TOKEN, self.telegram_token.clone()),
            (TELEGRAM_CHAT_ID, self.telegram_chat_id.clone()),
            (SYMBOL, self.symbol.clone()),
            (TIMEFRAME, self.timeframe.to_string()),
            (INTERVAL, self.interval_secs.to_string()),
            (RSI_WINDOW, self.rsi_window.to_string()),
            (SMA_SHORT, self.sma_short.to_string()),
            (SMA_LONG, self.sma_long.to_string()),
            (BB_WINDOW, self.bb_window.to_string()),
            (VOLUME_SPIKE_RATIO, self.volume_spike_ratio.to_string()),
            (EXCHANGE, self.exchange.to_string()),
            (THEME, self.theme.to_string()),
            (NOTIFY_HOLD, self.notify_hold.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn has_telegram_credentials(&self) -> bool {
        !self.telegram_token.trim().is_empty() && !self.telegram_chat_id.trim().is_empty()
    }
}

fn raw_value<'a>(values: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    values
        .get(key)
        .map(String::as_str)
        .unwrap_or_else(|| default_for(key))
}

fn parse_symbol(raw: &str) -> Result<String> {
    match raw.split_once('/') {
        Some((base, quote))
            if !base.trim().is_empty() && !quote.trim().is_empty() && !quote.contains('/') =>
        {
            Ok(raw.trim().to_string())
        }
        _ => Err(Error::Config(format!(
            "SYMBOL must look like 'BASE/QUOTE', got: '{raw}'"
        ))),
    }
}

fn parse_interval(raw: &str) -> Result<u64> {
    let secs = parse_integer(INTERVAL, raw, 1)?;
    if secs > MAX_INTERVAL_SECS {
        return Err(Error::Config(format!(
            "{INTERVAL} must be <= {MAX_INTERVAL_SECS}, got: {secs}"
        )));
    }
    Ok(secs)
}

fn parse_integer<T>(key: &str, raw: &str, min: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be an integer, got: '{raw}'")))?;
    if value < min {
        return Err(Error::Config(format!("{key} must be >= {min}, got: {value}")));
    }
    Ok(value)
}

fn parse_ratio(raw: &str) -> Result<f64> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        Error::Config(format!("{VOLUME_SPIKE_RATIO} must be a number, got: '{raw}'"))
    })?;
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::Config(format!(
            "{VOLUME_SPIKE_RATIO} must be a positive number, got: {value}"
        )));
    }
    Ok(value)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be true or false, got: '{raw}'"))),
    }
}

/// A validated, merged set of values that has not been written yet.
#[derive(Debug, Clone)]
pub struct SettingsUpdate {
    values: BTreeMap<String, String>,
    settings: Settings,
}

impl SettingsUpdate {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

/// Durable key/value settings backed by a two-column CSV file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
    settings: Settings,
}

impl SettingsStore {
    /// Open the store at `path`, creating or regenerating it as needed.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let values = if !path.exists() {
            info!(path = %path.display(), "Settings file not found, writing defaults");
            regenerate(&path)
        } else {
            match read_rows(&path) {
                Ok(rows) => sanitize(rows),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Settings file unreadable, regenerating defaults");
                    regenerate(&path)
                }
            }
        };

        let settings = Settings::from_values(&values).unwrap_or_default();
        Self {
            path,
            values,
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Merge a partial update into the current set and validate the result.
    /// Unknown keys are ignored. Nothing is written.
    pub fn merge<I, K, V>(&self, updates: I) -> Result<SettingsUpdate>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = self.values.clone();
        for (key, value) in updates {
            let key = key.into();
            if !is_known_key(&key) {
                debug!(key = %key, "Ignoring unknown settings key");
                continue;
            }
            values.insert(key, value.into());
        }
        let settings = Settings::from_values(&values)?;
        Ok(SettingsUpdate { values, settings })
    }

    /// Persist a merged update. The file is replaced atomically; on failure
    /// both the file and the in-memory state are left unchanged.
    pub fn commit(&mut self, update: SettingsUpdate) -> Result<()> {
        write_atomic(&self.path, &update.values)?;
        self.values = update.values;
        self.settings = update.settings;
        info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }

    /// Merge, validate and persist in one step.
    pub fn save<I, K, V>(&mut self, updates: I) -> Result<&Settings>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let update = self.merge(updates)?;
        self.commit(update)?;
        Ok(&self.settings)
    }
}

fn regenerate(path: &Path) -> BTreeMap<String, String> {
    let values = default_values();
    if let Err(e) = write_atomic(path, &values) {
        warn!(path = %path.display(), error = %e, "Failed to write default settings");
    }
    values
}

/// Read every two-field row with a recognized key.
fn read_rows(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != 2 {
            continue;
        }
        if !is_known_key(&record[0]) {
            debug!(key = &record[0], "Ignoring unknown settings row");
            continue;
        }
        rows.insert(record[0].to_string(), record[1].to_string());
    }
    Ok(rows)
}

/// Complete `rows` with defaults, replacing values that fail validation.
fn sanitize(rows: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut clean = default_values();
    for (key, value) in rows {
        let mut candidate = clean.clone();
        candidate.insert(key.clone(), value.clone());
        match Settings::from_values(&candidate) {
            Ok(_) => clean = candidate,
            Err(e) => {
                warn!(key = %key, value = %value, error = %e, "Invalid setting, using default");
            }
        }
    }
    clean
}

fn write_atomic(path: &Path, values: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("invalid settings path '{}'", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let written = (|| -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        for (key, _) in DEFAULTS {
            if let Some(value) = values.get(key) {
                writer.write_record([key, value.as_str()])?;
            }
        }
        writer.flush()?;
        Ok(())
    })();

    match written.and_then(|()| fs::rename(&tmp, path).map_err(Error::from)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}
