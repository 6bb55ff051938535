// `{symbol}_{timeframe}` OHLCV tables, written best-effort on every closed
// candle (§4.7 step 2, §4.15): a write failure here is logged and never
// blocks the in-memory pipeline.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::warn;

use crate::market_data::Candle;
use crate::types::Timeframe;

pub struct CandleRepository {
    pool: SqlitePool,
}

impl CandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn table_name(symbol: &str, timeframe: Timeframe) -> String {
        format!("{}_{}", symbol.to_lowercase(), timeframe.as_str())
    }

    async fn ensure_table(&self, table: &str) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                open_time INTEGER PRIMARY KEY,
                close_time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                quote_volume REAL NOT NULL,
                trades_count INTEGER NOT NULL,
                taker_buy_volume REAL NOT NULL,
                taker_buy_quote_volume REAL NOT NULL
            );
            "#
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create candle table {table}"))?;
        Ok(())
    }

    /// Best-effort upsert of a single closed candle. Errors are logged, never
    /// propagated -- a storage hiccup must not stall the realtime pipeline.
    pub async fn upsert_best_effort(&self, symbol: &str, timeframe: Timeframe, candle: &Candle) {
        let table = Self::table_name(symbol, timeframe);
        if let Err(e) = self.ensure_table(&table).await {
            warn!(symbol, timeframe = %timeframe, error = %e, "candle table creation failed");
            return;
        }

        let sql = format!(
            r#"
            INSERT INTO "{table}" (
                open_time, close_time, open, high, low, close, volume,
                quote_volume, trades_count, taker_buy_volume, taker_buy_quote_volume
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(open_time) DO UPDATE SET
                close_time = excluded.close_time,
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume
            "#
        );

        let result = sqlx::query(&sql)
            .bind(candle.open_time)
            .bind(candle.close_time)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.quote_volume)
            .bind(candle.trades_count as i64)
            .bind(candle.taker_buy_volume)
            .bind(candle.taker_buy_quote_volume)
            .execute(&self.pool)
            .await;

        if let Err(e) = result {
            warn!(symbol, timeframe = %timeframe, error = %e, "candle persistence write failed (non-fatal)");
        }
    }

    pub async fn count(&self, symbol: &str, timeframe: Timeframe) -> Result<i64> {
        let table = Self::table_name(symbol, timeframe);
        let sql = format!(r#"SELECT COUNT(*) as n FROM "{table}""#);
        let row: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::db::Database;

    fn sample_candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            quote_volume: 100.0,
            trades_count: 5,
            taker_buy_volume: 5.0,
            taker_buy_quote_volume: 50.0,
            is_closed: true,
        }
    }

    #[tokio::test]
    async fn upsert_creates_table_and_is_idempotent_on_same_open_time() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = CandleRepository::new(db.pool.clone());
        repo.upsert_best_effort("BTCUSDT", Timeframe::M1, &sample_candle(0, 100.0)).await;
        repo.upsert_best_effort("BTCUSDT", Timeframe::M1, &sample_candle(0, 101.0)).await;

        assert_eq!(repo.count("BTCUSDT", Timeframe::M1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn different_symbols_use_separate_tables() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = CandleRepository::new(db.pool.clone());
        repo.upsert_best_effort("BTCUSDT", Timeframe::M1, &sample_candle(0, 100.0)).await;
        repo.upsert_best_effort("ETHUSDT", Timeframe::M1, &sample_candle(0, 50.0)).await;

        assert_eq!(repo.count("BTCUSDT", Timeframe::M1).await.unwrap(), 1);
        assert_eq!(repo.count("ETHUSDT", Timeframe::M1).await.unwrap(), 1);
    }
}
