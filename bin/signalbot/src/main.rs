use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    AppConfig, ExchangeId, IndicatorSnapshot, MarketDataGateway, Notifier, NullNotifier, Settings,
    SettingsStore, Signal,
};
use engine::{report, ComponentFactory, PollController, PollOptions, Presenter};
use telegram_notify::TelegramNotifier;

/// Builds real exchange gateways and Telegram notifiers.
struct LiveFactory {
    http_timeout: Duration,
}

#[async_trait]
impl ComponentFactory for LiveFactory {
    async fn gateway(&self, exchange: ExchangeId) -> common::Result<Arc<dyn MarketDataGateway>> {
        engine::connect(exchange, self.http_timeout)
    }

    fn notifier(&self, settings: &Settings) -> Arc<dyn Notifier> {
        if !settings.has_telegram_credentials() {
            warn!("Telegram credentials not set, notifications disabled");
            return Arc::new(NullNotifier);
        }
        Arc::new(TelegramNotifier::new(
            &settings.telegram_token,
            &settings.telegram_chat_id,
            self.http_timeout,
        ))
    }
}

/// Writes poll loop output to the log.
struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn on_signal(&self, signal: Signal) {
        info!(%signal, "Signal");
    }

    fn on_stats(&self, snapshot: &IndicatorSnapshot) {
        info!("{}", report::format_stats(snapshot));
    }

    fn on_log(&self, line: &str) {
        for l in line.lines() {
            info!("{l}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = AppConfig::from_env();
    let store = SettingsStore::open(&cfg.settings_path);
    let settings = store.settings().clone();
    info!(
        path = %cfg.settings_path.display(),
        symbol = %settings.symbol,
        exchange = %settings.exchange,
        timeframe = %settings.timeframe,
        "SignalBot starting"
    );

    // ── Controller ────────────────────────────────────────────────────────────
    let factory = Arc::new(LiveFactory {
        http_timeout: cfg.http_timeout,
    });
    let options = PollOptions {
        candle_limit: cfg.candle_limit,
        ..PollOptions::default()
    };
    let controller =
        PollController::new(store, factory, Some(Arc::new(ConsolePresenter)), options).await?;

    let required = controller.evaluator().config().min_history();
    if cfg.candle_limit < required {
        warn!(
            candle_limit = cfg.candle_limit,
            required, "Candle limit below indicator history, some indicators will stay undefined"
        );
    }

    controller.start();

    info!("Poll loop running. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting.");
    controller.stop();
    // let the loop log its exit
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
