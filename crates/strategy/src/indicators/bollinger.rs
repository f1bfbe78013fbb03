/// Bollinger bands: SMA(period) ± `std_dev` population standard deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub period: usize,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub lower: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev: f64) -> Self {
        Self { period, std_dev }
    }

    /// Bands on the latest bar. Returns `None` if there are fewer than `period` values.
    pub fn compute(&self, closes: &[f64]) -> Option<Bands> {
        if self.period == 0 || closes.len() < self.period {
            return None;
        }
        let window = &closes[closes.len() - self.period..];
        let n = self.period as f64;
        let middle = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / n;
        let width = self.std_dev * variance.sqrt();

        Some(Bands {
            upper: middle + width,
            lower: middle - width,
        })
    }
}
