/// Trailing volume average and spike detection.
///
/// The average covers the last `window` volumes including the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpike {
    pub window: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStats {
    pub average: f64,
    /// Current volume is strictly above `average * ratio`.
    pub spike: bool,
}

impl VolumeSpike {
    pub fn new(window: usize, ratio: f64) -> Self {
        Self { window, ratio }
    }

    pub fn compute(&self, volumes: &[f64]) -> Option<VolumeStats> {
        if self.window == 0 || volumes.len() < self.window {
            return None;
        }
        let current = *volumes.last()?;
        let window = &volumes[volumes.len() - self.window..];
        let average = window.iter().sum::<f64>() / self.window as f64;

        Some(VolumeStats {
            average,
            spike: current > average * self.ratio,
        })
    }
}
