use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use common::{
    EngineState, Error, ExchangeId, MarketDataGateway, Notifier, Result, Settings, SettingsStore,
};
use strategy::{EvaluatorConfig, SignalEvaluator};

use crate::presenter::Presenter;
use crate::report;

/// Builds the collaborators that depend on settings.
///
/// The controller asks for a new gateway only when EXCHANGE changes and for
/// a new notifier only when the Telegram credentials change.
#[async_trait]
pub trait ComponentFactory: Send + Sync {
    async fn gateway(&self, exchange: ExchangeId) -> Result<Arc<dyn MarketDataGateway>>;

    fn notifier(&self, settings: &Settings) -> Arc<dyn Notifier>;
}

/// Timing knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Candles requested per fetch.
    pub candle_limit: usize,
    /// Granularity of every sleep; bounds stop latency.
    pub stop_check_interval: Duration,
    /// Wait after finding the configured pair unsupported.
    pub unsupported_pair_backoff: Duration,
    /// Upper bound of the wait after a failed iteration.
    pub max_error_backoff: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            candle_limit: 100,
            stop_check_interval: Duration::from_millis(100),
            unsupported_pair_backoff: Duration::from_secs(60),
            max_error_backoff: Duration::from_secs(60),
        }
    }
}

/// Everything one iteration needs, valid for one version of the settings.
/// Replaced as a whole on every config update.
pub struct Components {
    pub settings: Arc<Settings>,
    pub gateway: Arc<dyn MarketDataGateway>,
    pub evaluator: Arc<SignalEvaluator>,
    pub notifier: Arc<dyn Notifier>,
}

/// Stop flag of one poll task. Each start gets a fresh token.
#[derive(Debug, Clone, Default)]
struct StopToken(Arc<AtomicBool>);

impl StopToken {
    fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct RunningTask {
    stop: StopToken,
    handle: JoinHandle<()>,
}

/// State shared between the controller and its poll task.
struct Shared {
    components: RwLock<Arc<Components>>,
    presenter: Option<Arc<dyn Presenter>>,
    options: PollOptions,
}

impl Shared {
    fn snapshot(&self) -> Arc<Components> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, components: Components) {
        *self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(components);
    }

    fn log(&self, line: &str) {
        if let Some(presenter) = &self.presenter {
            presenter.on_log(line);
        }
    }
}

enum Iteration {
    Completed,
    PairUnavailable,
    Stopped,
}

/// Owns the background poll task: gateway → evaluator → notifier on a
/// fixed interval, with results pushed to the presenter.
///
/// `start` and `stop` are synchronous and safe to call from any thread.
/// At most one poll task is active at a time.
pub struct PollController {
    shared: Arc<Shared>,
    store: tokio::sync::Mutex<SettingsStore>,
    factory: Arc<dyn ComponentFactory>,
    runtime: Handle,
    task: Mutex<Option<RunningTask>>,
}

impl PollController {
    /// Build the initial components from the stored settings.
    /// Must be awaited inside a Tokio runtime; that runtime hosts the poll task.
    pub async fn new(
        store: SettingsStore,
        factory: Arc<dyn ComponentFactory>,
        presenter: Option<Arc<dyn Presenter>>,
        options: PollOptions,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Other(e.to_string()))?;
        let settings = store.settings().clone();
        let gateway = connect_gateway(factory.as_ref(), settings.exchange).await?;

        let components = Components {
            evaluator: Arc::new(SignalEvaluator::from_settings(&settings)),
            notifier: factory.notifier(&settings),
            gateway,
            settings: Arc::new(settings),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                components: RwLock::new(Arc::new(components)),
                presenter,
                options,
            }),
            store: tokio::sync::Mutex::new(store),
            factory,
            runtime,
            task: Mutex::new(None),
        })
    }

    /// Spawn the poll task. No-op while one is already running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Poll loop already running");
            return;
        }

        let stop = StopToken::default();
        let handle = self
            .runtime
            .spawn(run_loop(self.shared.clone(), stop.clone()));
        *task = Some(RunningTask { stop, handle });

        let settings = self.settings();
        info!(symbol = %settings.symbol, exchange = %settings.exchange, "Poll loop started");
        self.shared.log("Bot started");
    }

    /// Signal the poll task to exit. Returns immediately; the task notices
    /// within one stop-check interval, or once its in-flight request ends.
    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = task.take() {
            info!("Stopping poll loop");
            running.stop.stop();
        }
    }

    pub fn state(&self) -> EngineState {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        match task.as_ref() {
            Some(t) if !t.handle.is_finished() => EngineState::Running,
            _ => EngineState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Validate, persist and apply a partial settings update.
    ///
    /// Nothing is written or swapped if validation or the exchange switch
    /// fails. A running poll task picks the new components up on its next
    /// iteration.
    pub async fn update_config<I, K, V>(&self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let updates: Vec<(String, String)> = updates
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        match self.apply_update(updates).await {
            Ok(()) => {
                self.shared.log("Settings updated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Rejected settings update");
                self.shared.log(&format!("Error updating config: {e}"));
                Err(e)
            }
        }
    }

    async fn apply_update(&self, updates: Vec<(String, String)>) -> Result<()> {
        let mut store = self.store.lock().await;
        let update = store.merge(updates)?;
        let current = self.shared.snapshot();
        let next = update.settings().clone();

        let gateway = if next.exchange != current.settings.exchange {
            info!(from = %current.settings.exchange, to = %next.exchange, "Switching exchange");
            connect_gateway(self.factory.as_ref(), next.exchange).await?
        } else {
            current.gateway.clone()
        };

        store.commit(update)?;

        let evaluator_config = EvaluatorConfig::from_settings(&next);
        let evaluator = if &evaluator_config == current.evaluator.config() {
            current.evaluator.clone()
        } else {
            Arc::new(SignalEvaluator::new(evaluator_config))
        };

        let notifier = if next.telegram_token == current.settings.telegram_token
            && next.telegram_chat_id == current.settings.telegram_chat_id
        {
            current.notifier.clone()
        } else {
            self.factory.notifier(&next)
        };

        self.shared.swap(Components {
            settings: Arc::new(next),
            gateway,
            evaluator,
            notifier,
        });
        Ok(())
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.shared.snapshot().settings.clone()
    }

    pub fn gateway(&self) -> Arc<dyn MarketDataGateway> {
        self.shared.snapshot().gateway.clone()
    }

    pub fn evaluator(&self) -> Arc<SignalEvaluator> {
        self.shared.snapshot().evaluator.clone()
    }

    pub fn supported_pairs(&self) -> BTreeSet<String> {
        self.gateway().supported_pairs()
    }

    /// Reload the pair list of the current exchange.
    pub async fn refresh_pairs(&self) -> Result<BTreeSet<String>> {
        let gateway = self.gateway();
        let count = gateway.refresh_pairs().await?;
        self.shared
            .log(&format!("Loaded {count} pairs from {}", gateway.exchange()));
        Ok(gateway.supported_pairs())
    }
}

impl Drop for PollController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build a gateway and load its pairs. A failed pair load is not fatal: the
/// poll loop retries it while the set is empty.
async fn connect_gateway(
    factory: &dyn ComponentFactory,
    exchange: ExchangeId,
) -> Result<Arc<dyn MarketDataGateway>> {
    let gateway = factory.gateway(exchange).await?;
    match gateway.refresh_pairs().await {
        Ok(count) => info!(%exchange, count, "Loaded supported pairs"),
        Err(e) => warn!(%exchange, error = %e, "Failed to load supported pairs"),
    }
    Ok(gateway)
}

async fn run_loop(shared: Arc<Shared>, stop: StopToken) {
    while !stop.is_stopped() {
        let components = shared.snapshot();
        let started = Instant::now();
        let interval = components.settings.interval();
        let error_backoff = interval.min(shared.options.max_error_backoff);

        let outcome = AssertUnwindSafe(run_iteration(&shared, &components, &stop))
            .catch_unwind()
            .await;

        let pause = match outcome {
            Ok(Ok(Iteration::Completed)) => interval.saturating_sub(started.elapsed()),
            Ok(Ok(Iteration::PairUnavailable)) => shared.options.unsupported_pair_backoff,
            Ok(Ok(Iteration::Stopped)) => break,
            Ok(Err(e)) => {
                error!(error = %e, "Poll iteration failed");
                shared.log(&format!("Runtime error: {e}"));
                error_backoff
            }
            Err(_) => {
                error!("Poll iteration panicked");
                shared.log("Runtime error: poll iteration panicked");
                error_backoff
            }
        };

        sleep_unless_stopped(pause, shared.options.stop_check_interval, &stop).await;
    }

    info!("Bot stopped");
    shared.log("Bot stopped");
}

async fn run_iteration(
    shared: &Shared,
    components: &Components,
    stop: &StopToken,
) -> Result<Iteration> {
    let settings = &components.settings;
    let gateway = &components.gateway;

    if !gateway.is_supported(&settings.symbol) {
        if gateway.supported_pairs().is_empty() {
            match gateway.refresh_pairs().await {
                Ok(count) => info!(exchange = %settings.exchange, count, "Loaded supported pairs"),
                Err(e) => warn!(exchange = %settings.exchange, error = %e, "Pair list still unavailable"),
            }
        }
        if !gateway.is_supported(&settings.symbol) {
            let message = format!(
                "Pair {} is not available on {}",
                settings.symbol, settings.exchange
            );
            warn!("{message}");
            shared.log(&message);
            return Ok(Iteration::PairUnavailable);
        }
    }

    let candles = gateway
        .fetch_candles(
            &settings.symbol,
            settings.timeframe,
            shared.options.candle_limit,
        )
        .await?;
    if stop.is_stopped() {
        return Ok(Iteration::Stopped);
    }

    let (signal, mut snapshot) = components.evaluator.evaluate(&candles);
    snapshot.symbol = settings.symbol.clone();
    if let Some(marker) = &snapshot.error {
        warn!(symbol = %settings.symbol, marker = %marker, "Evaluation degraded");
    }

    let report = report::format_report(settings, &snapshot, signal);
    info!(symbol = %settings.symbol, %signal, price = snapshot.close, "Signal evaluated");

    if let Some(presenter) = &shared.presenter {
        presenter.on_log(&report);
        presenter.on_stats(&snapshot);
        presenter.on_signal(signal);
    }

    let wanted = signal.is_actionable() || settings.notify_hold;
    if wanted && !components.notifier.send(&report, None).await {
        warn!(%signal, "Notification not delivered");
    }

    Ok(Iteration::Completed)
}

/// Sleep for `duration` in steps of `step`, returning early once stopped.
/// A duration past the clock's range sleeps until stopped.
async fn sleep_unless_stopped(duration: Duration, step: Duration, stop: &StopToken) {
    let step = step.max(Duration::from_millis(1));
    let deadline = Instant::now().checked_add(duration);
    while !stop.is_stopped() {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => step,
        };
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(step)).await;
    }
}
