use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use common::{Candle, Error, ExchangeId, MarketDataGateway, Result, Timeframe};

use super::{get_text, http_client, market_id, value_f64, value_i64, PairCache, MAX_CANDLE_LIMIT, QUOTE_ASSET};

const BASE_URL: &str = "https://api.binance.com";

/// Public spot market-data client for Binance. No credentials needed.
pub struct BinanceGateway {
    base_url: String,
    http: Client,
    pairs: PairCache,
}

impl BinanceGateway {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            http: http_client(timeout)?,
            pairs: PairCache::default(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        get_text(&self.http, &format!("{}{path}", self.base_url), query).await
    }
}

#[async_trait]
impl MarketDataGateway for BinanceGateway {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    fn supported_pairs(&self) -> BTreeSet<String> {
        self.pairs.get()
    }

    fn is_supported(&self, symbol: &str) -> bool {
        self.pairs.contains(symbol)
    }

    async fn refresh_pairs(&self) -> Result<usize> {
        let body = self.get("/api/v3/exchangeInfo", &[]).await?;
        let pairs = parse_exchange_info(&body)?;
        let count = self.pairs.replace(pairs);
        debug!(count, "Loaded Binance spot pairs");
        Ok(count)
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        if !self.is_supported(symbol) {
            return Err(Error::UnsupportedPair(symbol.to_string()));
        }

        let query = [
            ("symbol", market_id(symbol)),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.clamp(1, MAX_CANDLE_LIMIT).to_string()),
        ];
        let body = self.get("/api/v3/klines", &query).await?;
        parse_klines(symbol, &body)
    }
}

/// Pairs with status TRADING quoted in USDT, as "BASE/QUOTE".
pub(crate) fn parse_exchange_info(body: &str) -> Result<BTreeSet<String>> {
    let info: ExchangeInfo = serde_json::from_str(body)?;

    Ok(info
        .symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.quote_asset == QUOTE_ASSET)
        .map(|s| format!("{}/{}", s.base_asset, s.quote_asset))
        .collect())
}

/// Kline rows are `[openTime, open, high, low, close, volume, closeTime, ...]`,
/// oldest first.
pub(crate) fn parse_klines(symbol: &str, body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;

    rows.iter()
        .map(|row| {
            if row.len() < 6 {
                return Err(Error::Exchange(format!("short kline row: {} fields", row.len())));
            }
            let open_ms = value_i64(&row[0])?;
            let timestamp = Utc
                .timestamp_millis_opt(open_ms)
                .single()
                .ok_or_else(|| Error::Exchange(format!("bad kline open time {open_ms}")))?;

            Ok(Candle {
                timestamp,
                open: value_f64(&row[1])?,
                high: value_f64(&row[2])?,
                low: value_f64(&row[3])?,
                close: value_f64(&row[4])?,
                volume: value_f64(&row[5])?,
                symbol: symbol.to_string(),
            })
        })
        .collect()
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    status: String,
    base_asset: String,
    quote_asset: String,
}
