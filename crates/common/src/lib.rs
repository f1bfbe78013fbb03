pub mod config;
pub mod error;
pub mod exchange;
pub mod notify;
pub mod settings;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use exchange::MarketDataGateway;
pub use notify::{MessageFormat, Notifier, NullNotifier};
pub use settings::{Settings, SettingsStore, SettingsUpdate};
pub use types::*;
