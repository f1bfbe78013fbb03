use common::{IndicatorSnapshot, Signal};

/// Receives poll loop output for display.
///
/// Called from the poll task, so implementations must be cheap and must not
/// block. Every method defaults to a no-op.
pub trait Presenter: Send + Sync {
    fn on_signal(&self, _signal: Signal) {}

    fn on_stats(&self, _snapshot: &IndicatorSnapshot) {}

    fn on_log(&self, _line: &str) {}
}
