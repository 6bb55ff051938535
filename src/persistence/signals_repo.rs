// One row per `TradingSignal`; `indicators`/`reasons`/`outcome` as JSON
// blobs, `tp1`/`tp2`/`tp3` as individual columns (§4.15).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::signals::TradingSignal;
use crate::types::{SignalDirection, SignalStatus};

pub struct SignalRepository {
    pool: SqlitePool,
}

impl SignalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, signal: &TradingSignal) -> Result<()> {
        let indicators_json = serde_json::to_string(&signal.indicators).context("failed to serialise indicators")?;
        let reasons_json = serde_json::to_string(&signal.reasons).context("failed to serialise reasons")?;
        let outcome_json = signal.outcome.clone();

        sqlx::query(
            r#"
            INSERT INTO signals (
                id, symbol, direction, confidence, entry_price, stop_loss, tp1, tp2, tp3,
                indicators_json, reasons_json, outcome_json, status, generated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                outcome_json = excluded.outcome_json
            "#,
        )
        .bind(signal.id.to_string())
        .bind(signal.symbol.clone())
        .bind(signal.direction.to_string())
        .bind(signal.confidence)
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(signal.tp_levels.tp1)
        .bind(signal.tp_levels.tp2)
        .bind(signal.tp_levels.tp3)
        .bind(indicators_json)
        .bind(reasons_json)
        .bind(outcome_json)
        .bind(signal.status.to_string())
        .bind(signal.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to persist signal")?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<(Uuid, String, SignalDirection, SignalStatus, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT id, symbol, direction, status, generated_at FROM signals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to load signal")?;

        let Some(row) = row else { return Ok(None) };
        let id_str: String = row.try_get("id")?;
        let symbol: String = row.try_get("symbol")?;
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        let generated_at: String = row.try_get("generated_at")?;

        Ok(Some((
            Uuid::parse_str(&id_str)?,
            symbol,
            parse_direction(&direction)?,
            parse_status(&status)?,
            DateTime::parse_from_rfc3339(&generated_at)?.with_timezone(&Utc),
        )))
    }
}

fn parse_direction(s: &str) -> Result<SignalDirection> {
    match s {
        "BUY" => Ok(SignalDirection::Buy),
        "SELL" => Ok(SignalDirection::Sell),
        "NEUTRAL" => Ok(SignalDirection::Neutral),
        other => anyhow::bail!("unknown signal direction in database: {other}"),
    }
}

fn parse_status(s: &str) -> Result<SignalStatus> {
    match s {
        "GENERATED" => Ok(SignalStatus::Generated),
        "PENDING" => Ok(SignalStatus::Pending),
        "EXECUTED" => Ok(SignalStatus::Executed),
        "EXPIRED" => Ok(SignalStatus::Expired),
        other => anyhow::bail!("unknown signal status in database: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::db::Database;
    use crate::signals::TpLevels;
    use std::collections::HashMap;

    fn sample_signal() -> TradingSignal {
        TradingSignal {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            direction: SignalDirection::Buy,
            confidence: 0.8,
            price: 100.0,
            entry_price: 99.9,
            stop_loss: 98.0,
            tp_levels: TpLevels { tp1: 101.0, tp2: 102.0, tp3: 103.0 },
            position_size: 1.0,
            risk_reward_ratio: 2.0,
            indicators: HashMap::new(),
            reasons: vec!["vwap_trend".into()],
            generated_at: Utc::now(),
            status: SignalStatus::Generated,
            pending_at: None,
            executed_at: None,
            expired_at: None,
            order_id: None,
            outcome: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_find_by_id_roundtrips() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = SignalRepository::new(db.pool.clone());
        let signal = sample_signal();
        repo.upsert(&signal).await.unwrap();

        let (id, symbol, direction, status, _) = repo.find_by_id(signal.id).await.unwrap().unwrap();
        assert_eq!(id, signal.id);
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(direction, SignalDirection::Buy);
        assert_eq!(status, SignalStatus::Generated);
    }

    #[tokio::test]
    async fn find_by_id_returns_none_for_unknown_id() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = SignalRepository::new(db.pool.clone());
        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
