/// Relative Strength Index with Wilder smoothing.
///
/// The first average gain and loss are plain means over the first `period`
/// price changes; every later change is folded in as
/// `avg = (avg * (period - 1) + x) / period`.
#[derive(Debug, Clone, PartialEq)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    /// RSI on the last close. `None` below `period + 1` closes.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        let n = self.period;
        if n == 0 || closes.len() <= n {
            return None;
        }
        let weight = n as f64;

        let mut gain = 0.0;
        let mut loss = 0.0;
        for (i, pair) in closes.windows(2).enumerate() {
            let delta = pair[1] - pair[0];
            let (up, down) = (delta.max(0.0), (-delta).max(0.0));
            if i < n {
                gain += up / weight;
                loss += down / weight;
            } else {
                gain = (gain * (weight - 1.0) + up) / weight;
                loss = (loss * (weight - 1.0) + down) / weight;
            }
        }

        Some(match (gain, loss) {
            (g, l) if l == 0.0 && g == 0.0 => 50.0,
            (_, l) if l == 0.0 => 100.0,
            (g, l) => 100.0 - 100.0 / (1.0 + g / l),
        })
    }
}
