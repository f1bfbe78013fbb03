/// Simple moving average of the last `period` values.
#[derive(Debug, Clone, PartialEq)]
pub struct SmaIndicator {
    pub period: usize,
}

impl SmaIndicator {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    /// Returns `None` if there are fewer than `period` values.
    pub fn compute(&self, values: &[f64]) -> Option<f64> {
        if self.period == 0 || values.len() < self.period {
            return None;
        }
        let window = &values[values.len() - self.period..];
        Some(window.iter().sum::<f64>() / self.period as f64)
    }
}
