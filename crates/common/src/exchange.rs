use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::{Candle, ExchangeId, Result, Timeframe};

/// Abstraction over exchange market data.
///
/// Implementations keep a cached set of supported pairs, loaded by
/// `refresh_pairs`, and refuse to fetch candles for anything outside it.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Which backend this gateway talks to.
    fn exchange(&self) -> ExchangeId;

    /// Currently known tradable pairs in "BASE/QUOTE" form, sorted.
    fn supported_pairs(&self) -> BTreeSet<String>;

    fn is_supported(&self, symbol: &str) -> bool {
        self.supported_pairs().contains(symbol)
    }

    /// Reload the supported pair set from the exchange.
    /// On failure the previously known set is kept.
    async fn refresh_pairs(&self) -> Result<usize>;

    /// Fetch the latest `limit` candles, oldest first.
    /// Fails with `Error::UnsupportedPair` for pairs outside the known set.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}
