/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// Computes: MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal_period).
#[derive(Debug, Clone, PartialEq)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// MACD line and signal line on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self { fast, slow, signal }
    }

    /// Number of closes needed before the signal line is defined.
    pub fn min_len(&self) -> usize {
        self.slow + self.signal.max(1) - 1
    }

    /// Compute MACD and signal line from a slice of close prices (oldest first).
    /// Returns `None` if there isn't enough data or `fast` is not below `slow`.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdValue> {
        if self.fast == 0 || self.fast >= self.slow || self.signal == 0 || closes.len() < self.min_len() {
            return None;
        }

        let fast = ema_series(closes, self.fast);
        let slow = ema_series(closes, self.slow);

        // Both series end on the latest bar; align them on the slow one.
        let fast_tail = &fast[fast.len() - slow.len()..];
        let macd_line: Vec<f64> = fast_tail.iter().zip(&slow).map(|(f, s)| f - s).collect();

        let signal_line = ema_series(&macd_line, self.signal);

        Some(MacdValue {
            macd: *macd_line.last()?,
            signal: *signal_line.last()?,
        })
    }
}

/// Exponential moving average over `data`, seeded with the SMA of the first
/// `period` values. The result has one value per bar from index `period - 1`
/// onwards, so it is empty when `data` is shorter than `period`.
pub fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);

    let seed = data[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(data.len() - period + 1);
    out.push(seed);

    let mut ema_val = seed;
    for &price in &data[period..] {
        ema_val = price * k + ema_val * (1.0 - k);
        out.push(ema_val);
    }
    out
}
