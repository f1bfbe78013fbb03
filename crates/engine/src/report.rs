//! Human-readable rendering of one evaluation, shared by the chat
//! notification and the presenter log.

use common::{IndicatorSnapshot, Settings, Signal};

const SEPARATOR: &str = "---------------------";

/// Multi-line report for one evaluated candle window.
pub fn format_report(settings: &Settings, snapshot: &IndicatorSnapshot, signal: Signal) -> String {
    let timestamp = snapshot
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut lines = vec![format!(
        "[{timestamp}] {} ({})",
        settings.symbol,
        settings.exchange.as_str().to_uppercase()
    )];
    if let Some(err) = &snapshot.error {
        lines.push(format!("Error: {err}"));
    }
    lines.extend([
        format!(
            "Timeframe: {} | Interval: {}s",
            settings.timeframe, settings.interval_secs
        ),
        format!(
            "RSI({}): {:.2} | MA{}: {:.4} | MA{}: {:.4}",
            settings.rsi_window,
            shown(snapshot.rsi),
            settings.sma_short,
            shown(snapshot.ma_short),
            settings.sma_long,
            shown(snapshot.ma_long),
        ),
        format!(
            "MACD: {:.4} | Signal line: {:.4}",
            shown(snapshot.macd),
            shown(snapshot.macd_signal)
        ),
        format!(
            "Volume: {:.2} | Spike ratio: {}",
            shown(snapshot.volume),
            settings.volume_spike_ratio
        ),
        SEPARATOR.to_string(),
        format!("Price: {:.4}", shown(snapshot.close)),
        format!("Signal: {signal}"),
        SEPARATOR.to_string(),
        format!("Theme: {}", settings.theme),
    ]);
    lines.join("\n")
}

/// One-line indicator summary for the stats panel.
pub fn format_stats(snapshot: &IndicatorSnapshot) -> String {
    if let Some(err) = &snapshot.error {
        return format!("{}: {err}", snapshot.symbol);
    }
    format!(
        "{} close {:.4} | RSI {:.2} | MACD {:.4}/{:.4} | BB {:.4}..{:.4} | vol {:.2} (avg {:.2}{})",
        snapshot.symbol,
        shown(snapshot.close),
        shown(snapshot.rsi),
        shown(snapshot.macd),
        shown(snapshot.macd_signal),
        shown(snapshot.bb_lower),
        shown(snapshot.bb_upper),
        shown(snapshot.volume),
        shown(snapshot.avg_volume),
        if snapshot.volume_spike { ", spike" } else { "" },
    )
}

/// Undefined indicators are displayed as 0.
fn shown(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}
