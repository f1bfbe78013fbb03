use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use common::{Candle, Error, ExchangeId, MarketDataGateway, Result, Timeframe};

use super::{get_text, http_client, market_id, value_f64, value_i64, PairCache, MAX_CANDLE_LIMIT, QUOTE_ASSET};

const BASE_URL: &str = "https://api.bybit.com";

/// Public spot market-data client for Bybit (v5 API).
pub struct BybitGateway {
    base_url: String,
    http: Client,
    pairs: PairCache,
}

impl BybitGateway {
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

/// Bybit names candle periods in minutes, plus D and W.
pub(crate) fn interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1",
        Timeframe::M5 => "5",
        Timeframe::M15 => "15",
        Timeframe::M30 => "30",
        Timeframe::H1 => "60",
        Timeframe::H4 => "240",
        Timeframe::D1 => "D",
        Timeframe::W1 => "W",
    }
}

#[async_trait]
impl MarketDataGateway for BybitGateway {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    fn supported_pairs(&self) -> BTreeSet<String> {
        self.pairs.get()
    }

    fn is_supported(&self, symbol: &str) -> bool {
        self.pairs.contains(symbol)
    }

    async fn refresh_pairs(&self) -> Result<usize> {
        let query = [("category", "spot".to_string())];
        let body = self.get("/v5/market/instruments-info", &query).await?;
        let pairs = parse_instruments(&body)?;
        let count = self.pairs.replace(pairs);
        debug!(count, "Loaded Bybit spot pairs");
        Ok(count)
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        if !self.is_supported(symbol) {
            return Err(Error::UnsupportedPair(symbol.to_string()));
        }

        let query = [
            ("category", "spot".to_string()),
            ("symbol", market_id(symbol)),
            ("interval", interval(timeframe).to_string()),
            ("limit", limit.clamp(1, MAX_CANDLE_LIMIT).to_string()),
        ];
        let body = self.get("/v5/market/kline", &query).await?;
        parse_klines(symbol, &body)
    }
}

/// Unwrap the v5 envelope; a non-zero `retCode` is an exchange error even on HTTP 200.
fn envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let resp: Envelope<T> = serde_json::from_str(body)?;
    if resp.ret_code != 0 {
        return Err(Error::Exchange(format!("retCode {}: {}", resp.ret_code, resp.ret_msg)));
    }
    resp.result
        .ok_or_else(|| Error::Exchange("response carries no result".into()))
}

pub(crate) fn parse_instruments(body: &str) -> Result<BTreeSet<String>> {
    let result: ListResult<Instrument> = envelope(body)?;

    Ok(result
        .list
        .into_iter()
        .filter(|i| i.status == "Trading" && i.quote_coin == QUOTE_ASSET)
        .map(|i| format!("{}/{}", i.base_coin, i.quote_coin))
        .collect())
}

/// Rows are `[startTime, open, high, low, close, volume, turnover]`, newest
/// first; the result is returned oldest first.
pub(crate) fn parse_klines(symbol: &str, body: &str) -> Result<Vec<Candle>> {
    let result: ListResult<Vec<Value>> = envelope(body)?;

    let mut candles = result
        .list
        .iter()
        .map(|row| {
            if row.len() < 6 {
                return Err(Error::Exchange(format!("short kline row: {} fields", row.len())));
            }
            let start_ms = value_i64(&row[0])?;
            let timestamp = Utc
                .timestamp_millis_opt(start_ms)
                .single()
                .ok_or_else(|| Error::Exchange(format!("bad kline start time {start_ms}")))?;

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
        .collect::<Result<Vec<_>>>()?;

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    base_coin: String,
    quote_coin: String,
    status: String,
}
