// =============================================================================
// Historical Loader (C11)
// =============================================================================
//
// Paginated REST fetch against the exchange's public kline endpoint, used for
// per-symbol warm-up, gap-fill after a reconnect, and backtest replay input.
// Grounded on `binance/client.rs`'s REST call conventions (the `.context(...)`
// error-chain idiom, `#[instrument]` spans); the page-walking loop itself is
// new (the teacher fetches a single page per call).

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::binance::client::BinanceClient;
use crate::market_data::Candle;
use crate::types::Timeframe;

/// Binance's own ceiling on a single klines page.
pub const MAX_PAGE_SIZE: u32 = 1000;

pub struct HistoricalLoader {
    client: BinanceClient,
}

impl HistoricalLoader {
    pub fn new(client: BinanceClient) -> Self {
        Self { client }
    }

    /// Fetch `[start_time_ms, end_time_ms)` inclusive-exclusive, walking
    /// forward page by page until the range is exhausted or the upstream
    /// returns fewer rows than a full page (end of available history).
    /// Malformed rows are dropped by `BinanceClient::get_klines` already;
    /// this loader only handles pagination and ordering.
    #[instrument(skip(self), name = "historical::fetch_range")]
    pub async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> Result<Vec<Candle>> {
        let mut all = Vec::new();
        let mut cursor = start_time_ms;
        let interval = timeframe.as_str();

        loop {
            if cursor >= end_time_ms {
                break;
            }

            let page = self
                .client
                .get_klines(symbol, interval, MAX_PAGE_SIZE, Some(cursor))
                .await?;

            if page.is_empty() {
                debug!(symbol, interval, cursor, "historical loader: empty page, stopping");
                break;
            }

            let page_len = page.len();
            let last_open_time = page.last().map(|c| c.open_time).unwrap_or(cursor);

            for candle in page {
                if candle.open_time < end_time_ms {
                    all.push(candle);
                }
            }

            if page_len < MAX_PAGE_SIZE as usize || last_open_time >= end_time_ms {
                break;
            }

            let step = timeframe.step_millis();
            let next_cursor = last_open_time + step;
            if next_cursor <= cursor {
                warn!(symbol, interval, "historical loader: cursor did not advance, stopping");
                break;
            }
            cursor = next_cursor;
        }

        all.sort_by_key(|c| c.open_time);
        all.dedup_by_key(|c| c.open_time);
        Ok(all)
    }

    /// Fetch the most recent `count` closed candles, for per-symbol warm-up.
    #[instrument(skip(self), name = "historical::fetch_recent")]
    pub async fn fetch_recent(&self, symbol: &str, timeframe: Timeframe, count: u32) -> Result<Vec<Candle>> {
        let limit = count.min(MAX_PAGE_SIZE);
        self.client.get_klines(symbol, timeframe.as_str(), limit, None).await
    }
}

#[cfg(test)]
mod tests {
    // `fetch_range`'s pagination walk is exercised indirectly via unit tests
    // on the step-advancement arithmetic only, since a real run requires
    // network access to `BinanceClient`. The cursor-advancement invariant
    // (`next_cursor = last_open_time + step_millis`) is what Testable
    // Property #15 (pagination correctness) asserts; that arithmetic is
    // plain and covered by `Timeframe::step_millis` tests in `types.rs`.
    use crate::types::Timeframe;

    #[test]
    fn step_millis_matches_declared_timeframes() {
        assert_eq!(Timeframe::M1.step_millis(), 60_000);
        assert_eq!(Timeframe::M15.step_millis(), 900_000);
        assert_eq!(Timeframe::H1.step_millis(), 3_600_000);
    }
}
