use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use common::{
    Candle, EngineState, Error, ExchangeId, IndicatorSnapshot, MarketDataGateway, MessageFormat,
    Notifier, Result, Settings, SettingsStore, Signal, Timeframe,
};
use engine::{ComponentFactory, PollController, PollOptions, Presenter};

// ─── Test doubles ─────────────────────────────────────────────────────────────

struct MockGateway {
    exchange: ExchangeId,
    listed: BTreeSet<String>,
    pairs: Mutex<BTreeSet<String>>,
    candles: Vec<Candle>,
    failing_refreshes: AtomicUsize,
    fail_fetch: AtomicBool,
    panic_next_fetch: AtomicBool,
    refreshes: AtomicUsize,
    fetches: AtomicUsize,
}

impl MockGateway {
    fn new(exchange: ExchangeId, listed: &[&str]) -> Self {
        Self {
            exchange,
            listed: listed.iter().map(|s| s.to_string()).collect(),
            pairs: Mutex::new(BTreeSet::new()),
            candles: flat_candles("BTC/USDT", 60),
            failing_refreshes: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            panic_next_fetch: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MarketDataGateway for MockGateway {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    fn supported_pairs(&self) -> BTreeSet<String> {
        self.pairs.lock().unwrap().clone()
    }

    async fn refresh_pairs(&self) -> Result<usize> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let pending = self.failing_refreshes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_refreshes.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Http("connection refused".into()));
        }
        *self.pairs.lock().unwrap() = self.listed.clone();
        Ok(self.listed.len())
    }

    async fn fetch_candles(&self, symbol: &str, _tf: Timeframe, _limit: usize) -> Result<Vec<Candle>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.panic_next_fetch.swap(false, Ordering::SeqCst) {
            panic!("malformed exchange payload");
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Http("connection reset".into()));
        }
        if !self.is_supported(symbol) {
            return Err(Error::UnsupportedPair(symbol.into()));
        }
        Ok(self.candles.clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    reject: AtomicBool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str, _format: Option<MessageFormat>) -> bool {
        self.messages.lock().unwrap().push(message.to_string());
        !self.reject.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingPresenter {
    logs: Mutex<Vec<String>>,
    signals: Mutex<Vec<Signal>>,
    stats: Mutex<Vec<IndicatorSnapshot>>,
}

impl RecordingPresenter {
    fn count_logs(&self, needle: &str) -> usize {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }

    fn signal_count(&self) -> usize {
        self.signals.lock().unwrap().len()
    }
}

impl Presenter for RecordingPresenter {
    fn on_signal(&self, signal: Signal) {
        self.signals.lock().unwrap().push(signal);
    }

    fn on_stats(&self, snapshot: &IndicatorSnapshot) {
        self.stats.lock().unwrap().push(snapshot.clone());
    }

    fn on_log(&self, line: &str) {
        self.logs.lock().unwrap().push(line.to_string());
    }
}

struct MockFactory {
    gateways: HashMap<ExchangeId, Arc<MockGateway>>,
    notifier: Arc<RecordingNotifier>,
    gateways_built: AtomicUsize,
    notifiers_built: AtomicUsize,
}

impl MockFactory {
    fn new(gateways: Vec<Arc<MockGateway>>) -> Self {
        Self {
            gateways: gateways.into_iter().map(|g| (g.exchange, g)).collect(),
            notifier: Arc::new(RecordingNotifier::default()),
            gateways_built: AtomicUsize::new(0),
            notifiers_built: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ComponentFactory for MockFactory {
    async fn gateway(&self, exchange: ExchangeId) -> Result<Arc<dyn MarketDataGateway>> {
        let gateway = self
            .gateways
            .get(&exchange)
            .cloned()
            .ok_or_else(|| Error::Exchange(format!("{exchange} unreachable")))?;
        self.gateways_built.fetch_add(1, Ordering::SeqCst);
        Ok(gateway)
    }

    fn notifier(&self, _settings: &Settings) -> Arc<dyn Notifier> {
        self.notifiers_built.fetch_add(1, Ordering::SeqCst);
        self.notifier.clone()
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn flat_candles(symbol: &str, n: usize) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| Candle {
            timestamp: start + chrono::Duration::hours(i as i64),
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 10.0,
            symbol: symbol.to_string(),
        })
        .collect()
}

fn fast_options() -> PollOptions {
    PollOptions {
        candle_limit: 60,
        stop_check_interval: Duration::from_millis(10),
        unsupported_pair_backoff: Duration::from_millis(50),
        max_error_backoff: Duration::from_millis(50),
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    path: PathBuf,
    factory: Arc<MockFactory>,
    presenter: Arc<RecordingPresenter>,
    controller: PollController,
}

async fn harness(gateways: Vec<Arc<MockGateway>>, settings: &[(&str, &str)]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.csv");
    let mut store = SettingsStore::open(&path);
    // one second polls unless the test asks otherwise
    store
        .save([("INTERVAL", "1")].into_iter().chain(settings.iter().copied()))
        .unwrap();

    let factory = Arc::new(MockFactory::new(gateways));
    let presenter = Arc::new(RecordingPresenter::default());
    let controller = PollController::new(
        store,
        factory.clone(),
        Some(presenter.clone() as Arc<dyn Presenter>),
        fast_options(),
    )
    .await
    .unwrap();

    Harness {
        _dir: dir,
        path,
        factory,
        presenter,
        controller,
    }
}

fn binance() -> Arc<MockGateway> {
    Arc::new(MockGateway::new(ExchangeId::Binance, &["BTC/USDT", "ETH/USDT"]))
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn new_controller_loads_pairs_and_stays_stopped() {
    let gateway = binance();
    let h = harness(vec![gateway.clone()], &[]).await;

    assert_eq!(h.controller.state(), EngineState::Stopped);
    assert_eq!(gateway.refreshes.load(Ordering::SeqCst), 1);
    assert!(h.controller.supported_pairs().contains("BTC/USDT"));
    assert_eq!(gateway.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_start_does_not_spawn_another_loop() {
    let gateway = binance();
    let h = harness(vec![gateway.clone()], &[]).await;

    h.controller.start();
    h.controller.start();
    assert!(h.controller.is_running());

    wait_until("first fetch", || gateway.fetches.load(Ordering::SeqCst) >= 1).await;
    // Interval is one second: a second loop would have fetched by now.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.presenter.count_logs("Bot started"), 1);

    h.controller.stop();
    wait_until("stop log", || h.presenter.count_logs("Bot stopped") == 1).await;
}

#[tokio::test]
async fn stop_returns_immediately_and_loop_exits_promptly() {
    let gateway = binance();
    let h = harness(vec![gateway.clone()], &[("INTERVAL", "3600")]).await;

    h.controller.start();
    wait_until("first signal", || h.presenter.signal_count() == 1).await;

    let started = std::time::Instant::now();
    h.controller.stop();
    assert_eq!(h.controller.state(), EngineState::Stopped);
    wait_until("stop log", || h.presenter.count_logs("Bot stopped") == 1).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restart_after_stop_runs_again() {
    let gateway = binance();
    let h = harness(vec![gateway.clone()], &[]).await;

    h.controller.start();
    wait_until("first signal", || h.presenter.signal_count() == 1).await;
    h.controller.stop();
    h.controller.start();

    assert!(h.controller.is_running());
    wait_until("second signal", || h.presenter.signal_count() == 2).await;
    h.controller.stop();
}

// ─── Failure handling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_pair_is_reported_and_loop_keeps_running() {
    let gateway = Arc::new(MockGateway::new(ExchangeId::Binance, &["ETH/USDT"]));
    let h = harness(vec![gateway.clone()], &[]).await;

    h.controller.start();
    wait_until("repeated pair errors", || {
        h.presenter.count_logs("Pair BTC/USDT is not available on binance") >= 2
    })
    .await;

    assert!(h.controller.is_running());
    assert_eq!(gateway.fetches.load(Ordering::SeqCst), 0);
    h.controller.stop();
}

#[tokio::test]
async fn fetch_errors_are_reported_and_loop_recovers() {
    let gateway = binance();
    gateway.fail_fetch.store(true, Ordering::SeqCst);
    let h = harness(vec![gateway.clone()], &[]).await;

    h.controller.start();
    wait_until("repeated runtime errors", || {
        h.presenter.count_logs("Runtime error: HTTP error: connection reset") >= 2
    })
    .await;
    assert!(h.controller.is_running());
    assert_eq!(h.presenter.signal_count(), 0);

    gateway.fail_fetch.store(false, Ordering::SeqCst);
    wait_until("signal after recovery", || h.presenter.signal_count() >= 1).await;
    h.controller.stop();
}

#[tokio::test]
async fn panicking_iteration_is_reported_and_loop_recovers() {
    let gateway = binance();
    gateway.panic_next_fetch.store(true, Ordering::SeqCst);
    let h = harness(vec![gateway.clone()], &[]).await;

    h.controller.start();
    wait_until("panic report", || {
        h.presenter.count_logs("Runtime error: poll iteration panicked") == 1
    })
    .await;
    assert!(h.controller.is_running());

    wait_until("signal after panic", || h.presenter.signal_count() >= 1).await;
    assert!(h.controller.is_running());
    assert_eq!(h.presenter.count_logs("Bot stopped"), 0);
    h.controller.stop();
}

#[tokio::test]
async fn longest_interval_keeps_loop_alive_and_stoppable() {
    let gateway = binance();
    let h = harness(vec![gateway.clone()], &[("INTERVAL", "604800")]).await;

    h.controller.start();
    wait_until("first signal", || h.presenter.signal_count() == 1).await;
    // the loop is now in its week-long sleep
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.controller.is_running());

    h.controller.stop();
    wait_until("stop log", || h.presenter.count_logs("Bot stopped") == 1).await;
    assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interval_beyond_one_week_is_rejected_while_running() {
    let h = harness(vec![binance()], &[]).await;
    h.controller.start();
    wait_until("first signal", || h.presenter.signal_count() == 1).await;

    let err = h
        .controller
        .update_config([("INTERVAL", "18446744073709551615")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(h.controller.settings().interval_secs, 1);
    wait_until("next signal", || h.presenter.signal_count() == 2).await;
    assert!(h.controller.is_running());
    h.controller.stop();
}

#[tokio::test]
async fn failed_pair_load_is_retried_by_the_loop() {
    let gateway = binance();
    gateway.failing_refreshes.store(1, Ordering::SeqCst);
    let h = harness(vec![gateway.clone()], &[]).await;
    assert!(h.controller.supported_pairs().is_empty());

    h.controller.start();
    wait_until("signal", || h.presenter.signal_count() == 1).await;
    assert_eq!(gateway.refreshes.load(Ordering::SeqCst), 2);
    h.controller.stop();
}

// ─── Notifications ────────────────────────────────────────────────────────────

#[tokio::test]
async fn hold_is_not_notified_by_default() {
    let h = harness(vec![binance()], &[]).await;

    h.controller.start();
    wait_until("signal", || h.presenter.signal_count() == 1).await;
    h.controller.stop();

    assert_eq!(h.presenter.signals.lock().unwrap()[0], Signal::Hold);
    assert!(h.factory.notifier.messages.lock().unwrap().is_empty());

    let stats = h.presenter.stats.lock().unwrap();
    assert_eq!(stats[0].symbol, "BTC/USDT");
    assert_eq!(stats[0].close, 100.0);
}

#[tokio::test]
async fn hold_is_notified_when_enabled() {
    let h = harness(vec![binance()], &[("NOTIFY_HOLD", "true")]).await;

    h.controller.start();
    wait_until("notification", || !h.factory.notifier.messages.lock().unwrap().is_empty()).await;
    h.controller.stop();

    let messages = h.factory.notifier.messages.lock().unwrap();
    assert!(messages[0].starts_with("[2024-01-03 11:00:00] BTC/USDT (BINANCE)"));
    assert!(messages[0].contains("Signal: HOLD"));
    // the same report goes to the presenter log
    assert!(h.presenter.count_logs("Signal: HOLD") >= 1);
}

#[tokio::test]
async fn empty_candle_window_is_reported_in_text() {
    let mut gateway = MockGateway::new(ExchangeId::Binance, &["BTC/USDT"]);
    gateway.candles.clear();
    let h = harness(vec![Arc::new(gateway)], &[("NOTIFY_HOLD", "true")]).await;

    h.controller.start();
    wait_until("notification", || !h.factory.notifier.messages.lock().unwrap().is_empty()).await;
    h.controller.stop();

    let messages = h.factory.notifier.messages.lock().unwrap();
    assert!(messages[0].contains("Error: Empty data"));
    assert!(h.presenter.count_logs("Error: Empty data") >= 1);
    assert_eq!(h.presenter.signals.lock().unwrap()[0], Signal::Hold);
}

#[tokio::test]
async fn rejected_notification_does_not_stop_the_loop() {
    let h = harness(vec![binance()], &[("NOTIFY_HOLD", "true")]).await;
    h.factory.notifier.reject.store(true, Ordering::SeqCst);

    h.controller.start();
    wait_until("two iterations", || h.presenter.signal_count() >= 2).await;
    assert!(h.controller.is_running());
    assert!(h.factory.notifier.messages.lock().unwrap().len() >= 2);
    h.controller.stop();
}

// ─── Config updates ───────────────────────────────────────────────────────────

#[tokio::test]
async fn exchange_change_rebuilds_gateway_and_loads_its_pairs() {
    let bybit = Arc::new(MockGateway::new(ExchangeId::Bybit, &["BTC/USDT", "SOL/USDT"]));
    let h = harness(vec![binance(), bybit.clone()], &[]).await;

    h.controller.update_config([("EXCHANGE", "bybit")]).await.unwrap();

    assert_eq!(h.factory.gateways_built.load(Ordering::SeqCst), 2);
    assert_eq!(bybit.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.gateway().exchange(), ExchangeId::Bybit);
    assert!(h.controller.supported_pairs().contains("SOL/USDT"));
    assert_eq!(h.controller.settings().exchange, ExchangeId::Bybit);

    let reopened = SettingsStore::open(&h.path);
    assert_eq!(reopened.settings().exchange, ExchangeId::Bybit);
}

#[tokio::test]
async fn theme_change_keeps_gateway_and_evaluator() {
    let h = harness(vec![binance()], &[]).await;
    let gateway = h.controller.gateway();
    let evaluator = h.controller.evaluator();

    h.controller.update_config([("THEME", "dark")]).await.unwrap();

    assert!(Arc::ptr_eq(&gateway, &h.controller.gateway()));
    assert!(Arc::ptr_eq(&evaluator, &h.controller.evaluator()));
    assert_eq!(h.factory.gateways_built.load(Ordering::SeqCst), 1);
    assert_eq!(h.factory.notifiers_built.load(Ordering::SeqCst), 1);
    assert_eq!(h.presenter.count_logs("Settings updated"), 1);
}

#[tokio::test]
async fn window_and_credential_changes_rebuild_their_components() {
    let h = harness(vec![binance()], &[]).await;
    let evaluator = h.controller.evaluator();

    h.controller
        .update_config([("RSI_WINDOW", "21"), ("TELEGRAM_TOKEN", "123:abc")])
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&evaluator, &h.controller.evaluator()));
    assert_eq!(h.controller.evaluator().config().rsi_window, 21);
    assert_eq!(h.factory.notifiers_built.load(Ordering::SeqCst), 2);
    assert_eq!(h.factory.gateways_built.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_update_changes_nothing() {
    let h = harness(vec![binance()], &[]).await;
    let before = std::fs::read_to_string(&h.path).unwrap();

    let err = h
        .controller
        .update_config([("RSI_WINDOW", "abc"), ("THEME", "dark")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(std::fs::read_to_string(&h.path).unwrap(), before);
    assert_eq!(h.controller.settings().rsi_window, 14);
    assert_eq!(h.presenter.count_logs("Error updating config"), 1);
}

#[tokio::test]
async fn unreachable_exchange_leaves_settings_untouched() {
    let h = harness(vec![binance()], &[]).await;

    let err = h
        .controller
        .update_config([("EXCHANGE", "bybit")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Exchange(_)));
    assert_eq!(h.controller.settings().exchange, ExchangeId::Binance);
    assert_eq!(
        SettingsStore::open(&h.path).settings().exchange,
        ExchangeId::Binance
    );
}

#[tokio::test]
async fn running_loop_picks_up_new_symbol() {
    let gateway = binance();
    let h = harness(vec![gateway.clone()], &[]).await;

    h.controller.start();
    wait_until("first signal", || h.presenter.signal_count() == 1).await;
    h.controller.update_config([("SYMBOL", "ETH/USDT")]).await.unwrap();

    wait_until("second signal", || h.presenter.signal_count() == 2).await;
    h.controller.stop();

    let stats = h.presenter.stats.lock().unwrap();
    assert_eq!(stats[0].symbol, "BTC/USDT");
    assert_eq!(stats[1].symbol, "ETH/USDT");
}
