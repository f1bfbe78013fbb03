//! REST market-data gateways, one per supported exchange.

pub mod binance;
pub mod bybit;

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use common::{Error, ExchangeId, MarketDataGateway, Result};

pub use binance::BinanceGateway;
pub use bybit::BybitGateway;

/// Only pairs quoted in this asset are offered.
pub const QUOTE_ASSET: &str = "USDT";

/// Largest candle window either exchange returns in one request.
pub const MAX_CANDLE_LIMIT: usize = 1000;

/// Build the gateway for `exchange`. Pairs are not loaded yet; call
/// `refresh_pairs` before the first fetch.
pub fn connect(exchange: ExchangeId, timeout: Duration) -> Result<Arc<dyn MarketDataGateway>> {
    Ok(match exchange {
        ExchangeId::Binance => Arc::new(BinanceGateway::new(timeout)?),
        ExchangeId::Bybit => Arc::new(BybitGateway::new(timeout)?),
    })
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(e.to_string()))
}

/// GET `url` with query parameters, returning the body of a 2xx response.
pub(crate) async fn get_text(http: &Client, url: &str, query: &[(&str, String)]) -> Result<String> {
    let resp = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

    if !status.is_success() {
        return Err(Error::Exchange(format!("HTTP {status}: {body}")));
    }
    Ok(body)
}

/// "BTC/USDT" → "BTCUSDT".
pub(crate) fn market_id(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

/// Exchanges encode numbers both as JSON strings and as JSON numbers.
pub(crate) fn value_f64(v: &Value) -> Result<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::Exchange(format!("expected a number, got {v}")))
}

pub(crate) fn value_i64(v: &Value) -> Result<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::Exchange(format!("expected an integer, got {v}")))
}

/// Supported pair set shared between the poll loop and refreshes.
#[derive(Debug, Default)]
pub(crate) struct PairCache {
    pairs: RwLock<BTreeSet<String>>,
}

impl PairCache {
    pub fn get(&self) -> BTreeSet<String> {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(symbol)
    }

    pub fn replace(&self, pairs: BTreeSet<String>) -> usize {
        let count = pairs.len();
        *self.pairs.write().unwrap_or_else(PoisonError::into_inner) = pairs;
        count
    }
}
