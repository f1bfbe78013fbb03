pub mod bollinger;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod volume;

pub use bollinger::{Bands, BollingerBands};
pub use macd::{ema_series, MacdIndicator, MacdValue};
pub use rsi::RsiIndicator;
pub use sma::SmaIndicator;
pub use volume::{VolumeSpike, VolumeStats};
