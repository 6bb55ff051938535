// =============================================================================
// State Recovery Service (C16, SS4.16/SS7)
// =============================================================================
//
// Runs once on startup, before any `UpstreamClient::run` task is spawned, so a
// restart never races a live candle/signal against stale recovered state.
// Grounded on the teacher's `main.rs` boot sequence (load `RuntimeConfig`
// before touching the network) generalized to also rehydrate per-position
// state out of C15 rather than starting every symbol cold.

use anyhow::Result;
use tracing::{info, warn};

use crate::persistence::{AccountRepository, PositionRepository};
use crate::position::PaperFuturesSimulator;

pub struct StateRecoveryService<'a> {
    positions: &'a PositionRepository,
    account: &'a AccountRepository,
}

impl<'a> StateRecoveryService<'a> {
    pub fn new(positions: &'a PositionRepository, account: &'a AccountRepository) -> Self {
        Self { positions, account }
    }

    /// Reload every non-terminal (PENDING/OPEN) position and the account
    /// balance into `simulator`. This crate trades paper futures only, so
    /// there is no live exchange position to reconcile against (SS7's
    /// "verify with the exchange interface" step has no counterpart here) --
    /// every persisted open position is trusted and restored as-is. A
    /// `RuntimeConfig.trading_mode` of `Killed` is never overridden by this
    /// step; the caller must check that separately before resuming.
    pub async fn restore(&self, simulator: &PaperFuturesSimulator) -> Result<usize> {
        let open = self.positions.load_open().await?;
        let restored = open.len();
        for position in open {
            info!(
                symbol = %position.symbol,
                id = %position.id,
                status = ?position.status,
                "restoring persisted position"
            );
            simulator.restore_position(position);
        }

        match self.account.load().await? {
            Some(balance) => {
                info!(balance, "restoring persisted account balance");
                simulator.restore_balance(balance);
            }
            None => warn!("no persisted account balance found; keeping simulator's starting balance"),
        }

        info!(restored, "state recovery complete");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::db::Database;
    use crate::position::{Position, SimulatorParams};
    use crate::types::{PositionSide, PositionStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_open_position(symbol: &str) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
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
    async fn restore_rehydrates_open_positions_and_balance() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let positions = PositionRepository::new(db.pool.clone());
        let account = AccountRepository::new(db.pool.clone());

        positions.upsert(&sample_open_position("BTCUSDT")).await.unwrap();
        account.save(9_500.0).await.unwrap();

        let svc = StateRecoveryService::new(&positions, &account);
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let restored = svc.restore(&sim).await.unwrap();

        assert_eq!(restored, 1);
        assert_eq!(sim.open_positions("BTCUSDT").len(), 1);
        assert_eq!(sim.balance(), 9_500.0);
    }

    #[tokio::test]
    async fn restore_with_nothing_persisted_leaves_simulator_untouched() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let positions = PositionRepository::new(db.pool.clone());
        let account = AccountRepository::new(db.pool.clone());

        let svc = StateRecoveryService::new(&positions, &account);
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let restored = svc.restore(&sim).await.unwrap();

        assert_eq!(restored, 0);
        assert_eq!(sim.balance(), 10_000.0);
    }
}
