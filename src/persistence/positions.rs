// Synchronous, critical writes (§7): a failure here must abort the caller's
// state transition rather than leave the in-memory position ahead of disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::position::Position;
use crate::types::{ExitReason, PositionSide, PositionStatus};

pub struct PositionRepository {
    pool: SqlitePool,
}

impl PositionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO paper_positions (
                id, symbol, side, status, entry_price, quantity, leverage, margin,
                liquidation_price, stop_loss, take_profit, open_time, close_time,
                close_price, realized_pnl, exit_reason, highest_price, lowest_price, signal_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                close_time = excluded.close_time,
                close_price = excluded.close_price,
                realized_pnl = excluded.realized_pnl,
                exit_reason = excluded.exit_reason,
                highest_price = excluded.highest_price,
                lowest_price = excluded.lowest_price
            "#,
        )
        .bind(position.id.to_string())
        .bind(position.symbol.clone())
        .bind(position.side.to_string())
        .bind(position.status.to_string())
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.leverage)
        .bind(position.margin)
        .bind(position.liquidation_price)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(position.open_time.to_rfc3339())
        .bind(position.close_time.map(|t| t.to_rfc3339()))
        .bind(position.close_price)
        .bind(position.realized_pnl)
        .bind(position.exit_reason.map(|r| r.to_string()))
        .bind(position.highest_price)
        .bind(position.lowest_price)
        .bind(position.signal_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .context("failed to persist paper position")?;
        Ok(())
    }

    /// Load every non-terminal position, for `StateRecoveryService` on
    /// restart (§4.16): a restart must not race a live signal against
    /// stale recovered state.
    pub async fn load_open(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM paper_positions WHERE status IN ('PENDING', 'OPEN')")
            .fetch_all(&self.pool)
            .await
            .context("failed to load open paper positions")?;

        rows.iter().map(row_to_position).collect()
    }
}

fn parse_side(s: &str) -> Result<PositionSide> {
    match s {
        "LONG" => Ok(PositionSide::Long),
        "SHORT" => Ok(PositionSide::Short),
        other => anyhow::bail!("unknown position side in database: {other}"),
    }
}

fn parse_status(s: &str) -> Result<PositionStatus> {
    match s {
        "PENDING" => Ok(PositionStatus::Pending),
        "OPEN" => Ok(PositionStatus::Open),
        "CLOSED" => Ok(PositionStatus::Closed),
        "CANCELLED" => Ok(PositionStatus::Cancelled),
        other => anyhow::bail!("unknown position status in database: {other}"),
    }
}

fn parse_exit_reason(s: &str) -> Result<ExitReason> {
    match s {
        "STOP_LOSS" => Ok(ExitReason::StopLoss),
        "TAKE_PROFIT" => Ok(ExitReason::TakeProfit),
        "LIQUIDATION" => Ok(ExitReason::Liquidation),
        "SIGNAL_REVERSAL" => Ok(ExitReason::SignalReversal),
        "NEW_SIGNAL_OVERRIDE" => Ok(ExitReason::NewSignalOverride),
        "TTL_EXPIRED" => Ok(ExitReason::TtlExpired),
        "MERGED" => Ok(ExitReason::Merged),
        "MANUAL_CLOSE" => Ok(ExitReason::ManualClose),
        other => anyhow::bail!("unknown exit reason in database: {other}"),
    }
}

fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
    let id: String = row.try_get("id")?;
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let open_time: String = row.try_get("open_time")?;
    let close_time: Option<String> = row.try_get("close_time")?;
    let signal_id: Option<String> = row.try_get("signal_id")?;

    Ok(Position {
        id: Uuid::parse_str(&id).context("invalid position id in database")?,
        symbol: row.try_get("symbol")?,
        side: parse_side(&side)?,
        status: parse_status(&status)?,
        entry_price: row.try_get("entry_price")?,
        quantity: row.try_get("quantity")?,
        leverage: row.try_get("leverage")?,
        margin: row.try_get("margin")?,
        liquidation_price: row.try_get("liquidation_price")?,
        stop_loss: row.try_get("stop_loss")?,
        take_profit: row.try_get("take_profit")?,
        open_time: DateTime::parse_from_rfc3339(&open_time)?.with_timezone(&Utc),
        close_time: close_time
            .map(|t| DateTime::parse_from_rfc3339(&t).map(|d| d.with_timezone(&Utc)))
            .transpose()?,
        close_price: row.try_get("close_price")?,
        realized_pnl: row.try_get("realized_pnl")?,
        exit_reason: exit_reason.map(|s| parse_exit_reason(&s)).transpose()?,
        highest_price: row.try_get("highest_price")?,
        lowest_price: row.try_get("lowest_price")?,
        signal_id: signal_id.map(|s| Uuid::parse_str(&s)).transpose().context("invalid signal_id in database")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::db::Database;

    fn sample_position() -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            status: PositionStatus::Open,
            entry_price: 100.0,
            quantity: 1.0,
            leverage: 10.0,
            margin: 10.0,
            liquidation_price: 90.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            open_time: Utc::now(),
            close_time: None,
            close_price: None,
            realized_pnl: 0.0,
            exit_reason: None,
            highest_price: 100.0,
            lowest_price: 100.0,
            signal_id: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_load_open_roundtrips() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = PositionRepository::new(db.pool.clone());
        let pos = sample_position();
        repo.upsert(&pos).await.unwrap();

        let open = repo.load_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, pos.id);
        assert_eq!(open[0].side, PositionSide::Long);
    }

    #[tokio::test]
    async fn closed_positions_are_excluded_from_load_open() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = PositionRepository::new(db.pool.clone());
        let mut pos = sample_position();
        pos.status = PositionStatus::Closed;
        pos.close_time = Some(Utc::now());
        pos.exit_reason = Some(ExitReason::TakeProfit);
        repo.upsert(&pos).await.unwrap();

        let open = repo.load_open().await.unwrap();
        assert!(open.is_empty());
    }
}
