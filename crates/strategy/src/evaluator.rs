use tracing::debug;

use common::{Candle, IndicatorSnapshot, Settings, Signal};

use crate::indicators::{BollingerBands, MacdIndicator, RsiIndicator, SmaIndicator, VolumeSpike};

/// Indicator windows and classification thresholds.
///
/// Only the windows and the volume ratio come from the settings file; the
/// MACD periods, band width, volume window and RSI thresholds are fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub rsi_window: usize,
    pub sma_short: usize,
    pub sma_long: usize,
    pub bb_window: usize,
    pub bb_std_dev: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volume_window: usize,
    pub volume_spike_ratio: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl EvaluatorConfig {
    pub const BB_STD_DEV: f64 = 2.0;
    pub const MACD_FAST: usize = 12;
    pub const MACD_SLOW: usize = 26;
    pub const MACD_SIGNAL: usize = 9;
    pub const VOLUME_WINDOW: usize = 10;
    pub const RSI_OVERSOLD: f64 = 30.0;
    pub const RSI_OVERBOUGHT: f64 = 70.0;

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rsi_window: settings.rsi_window,
            sma_short: settings.sma_short,
            sma_long: settings.sma_long,
            bb_window: settings.bb_window,
            bb_std_dev: Self::BB_STD_DEV,
            macd_fast: Self::MACD_FAST,
            macd_slow: Self::MACD_SLOW,
            macd_signal: Self::MACD_SIGNAL,
            volume_window: Self::VOLUME_WINDOW,
            volume_spike_ratio: settings.volume_spike_ratio,
            rsi_oversold: Self::RSI_OVERSOLD,
            rsi_overbought: Self::RSI_OVERBOUGHT,
        }
    }

    /// Candle count from which every indicator on the latest bar is defined.
    pub fn min_history(&self) -> usize {
        [
            self.rsi_window + 1,
            self.sma_short,
            self.sma_long,
            self.bb_window,
            self.macd_slow + self.macd_signal.max(1) - 1,
            self.volume_window,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Computes indicators over a candle sequence and classifies the latest bar.
///
/// Stateless: the result depends only on the candles and the configuration.
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    config: EvaluatorConfig,
    rsi: RsiIndicator,
    ma_short: SmaIndicator,
    ma_long: SmaIndicator,
    macd: MacdIndicator,
    bands: BollingerBands,
    volume: VolumeSpike,
}

impl SignalEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self {
            rsi: RsiIndicator::new(config.rsi_window),
            ma_short: SmaIndicator::new(config.sma_short),
            ma_long: SmaIndicator::new(config.sma_long),
            macd: MacdIndicator::new(config.macd_fast, config.macd_slow, config.macd_signal),
            bands: BollingerBands::new(config.bb_window, config.bb_std_dev),
            volume: VolumeSpike::new(config.volume_window, config.volume_spike_ratio),
            config,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(EvaluatorConfig::from_settings(settings))
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate a chronological candle sequence; the last candle is "current".
    ///
    /// Empty input degrades to HOLD with an error marker in the snapshot.
    pub fn evaluate(&self, candles: &[Candle]) -> (Signal, IndicatorSnapshot) {
        let snapshot = self.indicators(candles);
        let signal = self.classify(&snapshot);
        (signal, snapshot)
    }

    /// Indicator values on the latest candle. Undefined values are NaN.
    pub fn indicators(&self, candles: &[Candle]) -> IndicatorSnapshot {
        let Some(latest) = candles.last() else {
            return IndicatorSnapshot::degraded("N/A", "Empty data");
        };

        if candles.len() < self.config.min_history() {
            debug!(
                candles = candles.len(),
                required = self.config.min_history(),
                "Insufficient history, some indicators undefined"
            );
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let macd = self.macd.compute(&closes);
        let bands = self.bands.compute(&closes);
        let volume = self.volume.compute(&volumes);

        IndicatorSnapshot {
            symbol: latest.symbol.clone(),
            timestamp: Some(latest.timestamp),
            close: latest.close,
            volume: latest.volume,
            rsi: self.rsi.compute(&closes).unwrap_or(f64::NAN),
            ma_short: self.ma_short.compute(&closes).unwrap_or(f64::NAN),
            ma_long: self.ma_long.compute(&closes).unwrap_or(f64::NAN),
            macd: macd.map_or(f64::NAN, |m| m.macd),
            macd_signal: macd.map_or(f64::NAN, |m| m.signal),
            bb_upper: bands.map_or(f64::NAN, |b| b.upper),
            bb_lower: bands.map_or(f64::NAN, |b| b.lower),
            avg_volume: volume.map_or(f64::NAN, |v| v.average),
            volume_spike: volume.is_some_and(|v| v.spike),
            error: None,
        }
    }

    /// Classify a single row of indicator values.
    ///
    /// All comparisons are strict; a NaN operand makes its comparison false,
    /// so undefined indicators fall through to HOLD. The volume spike gates
    /// both BUY and SELL.
    pub fn classify(&self, s: &IndicatorSnapshot) -> Signal {
        if s.is_degraded() || !s.volume_spike {
            return Signal::Hold;
        }

        let buy = s.rsi < self.config.rsi_oversold
            && s.close > s.ma_short
            && s.ma_short > s.ma_long
            && s.macd > s.macd_signal;

        let sell = s.rsi > self.config.rsi_overbought
            && s.close < s.ma_short
            && s.ma_short < s.ma_long
            && s.macd < s.macd_signal;

        if buy {
            Signal::Buy
        } else if sell {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

impl Default for SignalEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorConfig::default())
    }
}
