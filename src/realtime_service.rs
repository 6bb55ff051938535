// =============================================================================
// Realtime Service (C7)
// =============================================================================
//
// Per-symbol glue binding C1 (CandleStore) through C6 (PaperFuturesSimulator)
// to C9 (EventBus) and C10 (WsManager). Grounded on `main.rs`'s per-symbol
// task-spawn loop and the teacher's `process_candle`-shaped dispatch in
// `strategy.rs`: one closed 1m candle drives one pass through
// indicators -> generator -> confirmation -> lifecycle -> simulator.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};

use crate::event_bus::{BroadcastEvent, EventBus};
use crate::historical::HistoricalLoader;
use crate::indicators::{self, IndicatorSnapshot};
use crate::market_data::{Candle, CandleKey, CandleStore};
use crate::persistence::{AccountRepository, CandleRepository, PositionRepository};
use crate::position::{PaperFuturesSimulator, Position};
use crate::risk::RiskEngine;
use crate::runtime_config::RuntimeConfig;
use crate::signals::{ConfirmationGate, SignalGenerator, SignalLifecycleStore};
use crate::types::{BroadcastEventType, Timeframe, TradingMode};

/// Minimum closed 1m candles required before the indicator/signal pipeline
/// is allowed to run for a symbol (mirrors `IndicatorSnapshot::is_warmed_up`'s
/// longest lookback, `EMA_SLOW_PERIOD`).
const WARMUP_CANDLES_1M: usize = 200;
const WARMUP_CANDLES_OTHER: usize = 100;

/// Everything the realtime pipeline needs per running instance. One
/// `RealtimeService` is shared (via `Arc`) across every symbol's tasks; all
/// per-symbol state lives inside the component stores, keyed by `CandleKey`
/// or `symbol`.
pub struct RealtimeService {
    pub candles: CandleStore,
    pub generator: SignalGenerator,
    pub confirmation: ConfirmationGate,
    pub lifecycle: SignalLifecycleStore,
    pub simulator: PaperFuturesSimulator,
    pub event_bus: Arc<EventBus>,
    /// Shared with `AppState` so `POST /control/*` and this pipeline's
    /// admission gate always see the same operational envelope.
    runtime_config: Arc<RwLock<RuntimeConfig>>,
    risk_engine: Arc<RiskEngine>,
    historical: Arc<HistoricalLoader>,
    candle_repo: Option<Arc<CandleRepository>>,
    position_repo: Option<Arc<PositionRepository>>,
    account_repo: Option<Arc<AccountRepository>>,
}

impl RealtimeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        candles: CandleStore,
        generator: SignalGenerator,
        confirmation: ConfirmationGate,
        lifecycle: SignalLifecycleStore,
        simulator: PaperFuturesSimulator,
        event_bus: Arc<EventBus>,
        runtime_config: Arc<RwLock<RuntimeConfig>>,
        risk_engine: Arc<RiskEngine>,
        historical: Arc<HistoricalLoader>,
        candle_repo: Option<Arc<CandleRepository>>,
        position_repo: Option<Arc<PositionRepository>>,
        account_repo: Option<Arc<AccountRepository>>,
    ) -> Self {
        Self {
            candles,
            generator,
            confirmation,
            lifecycle,
            simulator,
            event_bus,
            runtime_config,
            risk_engine,
            historical,
            candle_repo,
            position_repo,
            account_repo,
        }
    }

    /// Synchronous, critical position write (§7): called from inside the
    /// upstream client's non-async `on_candle` callback, so there is no
    /// executor to hand the future to. `block_in_place` parks this worker
    /// thread's other tasks elsewhere for the duration of the write, then
    /// `block_on` drives the query to completion on the current thread --
    /// a real failure is surfaced here, at the point of the transition,
    /// rather than discovered later by a background task.
    fn persist_position_critical(&self, position: &Position) {
        let Some(repo) = &self.position_repo else { return };
        let result = tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(repo.upsert(position)));
        if let Err(e) = result {
            error!(
                position_id = %position.id,
                symbol = %position.symbol,
                error = %e,
                "CRITICAL: paper position write failed; in-memory state has already transitioned and is now ahead of disk"
            );
        }
    }

    fn persist_account_critical(&self) {
        let Some(repo) = &self.account_repo else { return };
        let balance = self.simulator.balance();
        let result = tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(repo.save(balance)));
        if let Err(e) = result {
            error!(balance, error = %e, "CRITICAL: paper account balance write failed");
        }
    }

    fn find_position(&self, symbol: &str, id: uuid::Uuid) -> Option<Position> {
        self.simulator
            .pending_positions(symbol)
            .into_iter()
            .chain(self.simulator.open_positions(symbol))
            .chain(self.simulator.history_for(symbol))
            .find(|p| p.id == id)
    }

    /// Warm up a single `(symbol, timeframe)` series via REST before the
    /// upstream WebSocket client starts delivering live updates, so the
    /// indicator pipeline isn't starved during the first minutes of runtime.
    #[instrument(skip(self), name = "realtime::warm_up")]
    pub async fn warm_up(&self, symbol: &str, timeframe: Timeframe) -> Result<usize> {
        let count = if timeframe == Timeframe::M1 {
            WARMUP_CANDLES_1M
        } else {
            WARMUP_CANDLES_OTHER
        };
        let candles = self.historical.fetch_recent(symbol, timeframe, count as u32).await?;
        let loaded = candles.len();
        let key = CandleKey::new(symbol, timeframe);
        for candle in candles {
            self.candles.append_or_update(key.clone(), candle);
        }
        info!(symbol, timeframe = %timeframe, loaded, "warm-up complete");
        Ok(loaded)
    }

    /// REST fallback for `GET /market/history` when the locally persisted
    /// series doesn't cover enough of the requested window (§6).
    #[instrument(skip(self), name = "realtime::fetch_recent")]
    pub async fn fetch_recent(&self, symbol: &str, timeframe: Timeframe, count: u32) -> Result<Vec<Candle>> {
        self.historical.fetch_recent(symbol, timeframe, count).await
    }

    fn candle_event_type(timeframe: Timeframe) -> BroadcastEventType {
        match timeframe {
            Timeframe::M1 => BroadcastEventType::Candle1m,
            Timeframe::M15 => BroadcastEventType::Candle15m,
            Timeframe::H1 => BroadcastEventType::Candle1h,
        }
    }

    /// The §4.7 dispatch: called once per candle update (provisional or
    /// closed) from the upstream client. Must not block on network I/O --
    /// persistence here is a placeholder hook for C15, logged best-effort.
    pub fn on_candle_update(&self, symbol: &str, timeframe: Timeframe, candle: Candle) {
        let key = CandleKey::new(symbol, timeframe);
        let is_closed = candle.is_closed;

        if !candle.is_valid() {
            warn!(symbol, timeframe = %timeframe, "dropping invalid candle (OHLCV invariant violated)");
            return;
        }

        // Step 1: append/overwrite.
        self.candles.append_or_update(key.clone(), candle.clone());

        // Step 2: best-effort persistence, fire-and-forget so a slow or
        // failing write never stalls the synchronous dispatch.
        if is_closed {
            if let Some(repo) = &self.candle_repo {
                let repo = Arc::clone(repo);
                let sym = symbol.to_string();
                let candle_for_write = candle.clone();
                tokio::spawn(async move {
                    repo.upsert_best_effort(&sym, timeframe, &candle_for_write).await;
                });
            }
        }

        // Step 3: publish CANDLE_{1M,15M,1H}.
        self.event_bus.publish(BroadcastEvent::new(
            Self::candle_event_type(timeframe),
            symbol,
            serde_json::json!({
                "timeframe": timeframe.as_str(),
                "open": candle.open,
                "high": candle.high,
                "low": candle.low,
                "close": candle.close,
                "volume": candle.volume,
                "is_closed": candle.is_closed,
                "open_time": candle.open_time,
                "close_time": candle.close_time,
            }),
        ));

        // Step 4: the signal pipeline only runs on a closed 1m bar.
        if timeframe == Timeframe::M1 && is_closed {
            self.run_signal_pipeline(symbol);
        }

        // Step 5: drive the simulator's per-tick SL/TP/fill/liq checks on
        // every update, closed or provisional, using the freshest high/low/close.
        let events = self.simulator.on_tick(symbol, &candle);
        for event in events {
            let position_id = match &event {
                crate::position::simulator::PositionEvent::Filled { id } => Some(*id),
                crate::position::simulator::PositionEvent::Closed { id, .. } => Some(*id),
                crate::position::simulator::PositionEvent::Cancelled { id, .. } => Some(*id),
            };
            if let Some(id) = position_id {
                if let Some(position) = self.find_position(symbol, id) {
                    self.persist_position_critical(&position);
                }
            }
            if let crate::position::simulator::PositionEvent::Closed { realized_pnl, .. } = &event {
                self.risk_engine.record_trade_result(*realized_pnl);
                self.persist_account_critical();
            }

            self.event_bus.publish(BroadcastEvent::new(
                BroadcastEventType::StateChange,
                symbol,
                serde_json::to_value(&DebugEvent::from(event)).unwrap_or(serde_json::Value::Null),
            ));
        }
    }

    fn run_signal_pipeline(&self, symbol: &str) {
        let key = CandleKey::new(symbol, Timeframe::M1);
        if !self.candles.is_warmed_up(&key, WARMUP_CANDLES_1M) {
            return;
        }

        let closed = self.candles.latest(&key, WARMUP_CANDLES_1M);
        let snapshot: IndicatorSnapshot = indicators::compute_snapshot(&closed);
        let balance = self.simulator.balance();

        let raw_signal = self.generator.generate(symbol, &snapshot, balance);
        if !raw_signal.direction.is_actionable() {
            return;
        }

        let released = match self.confirmation.process(raw_signal) {
            Some(signal) => signal,
            None => return,
        };

        let registered = self.lifecycle.register(released);

        // §4.14 admission gate: a signal is generated and kept in the
        // lifecycle for visibility, but never reaches C6 while the engine
        // isn't Live or a circuit breaker is tripped.
        let trading_mode = self.runtime_config.read().trading_mode;
        if trading_mode != TradingMode::Live {
            info!(symbol, signal_id = %registered.id, %trading_mode, "signal admission blocked: engine not in Live mode");
            return;
        }
        let (allowed, reason) = self.risk_engine.can_trade();
        if !allowed {
            warn!(symbol, signal_id = %registered.id, reason = ?reason, "signal admission blocked by risk engine");
            return;
        }

        self.lifecycle.mark_pending(registered.id);

        let price_oracle = |sym: &str| -> Option<f64> {
            let k = CandleKey::new(sym, Timeframe::M1);
            self.candles.last_close(&k)
        };

        let outcome = self.simulator.on_signal(&registered, &price_oracle);
        info!(symbol, signal_id = %registered.id, direction = ?registered.direction, ?outcome, "signal processed");

        if let crate::position::simulator::SignalOutcome::Pending { position_id } = outcome {
            if let Some(position) = self.find_position(symbol, position_id) {
                self.persist_position_critical(&position);
            }
        }

        self.event_bus.publish(BroadcastEvent::new(
            BroadcastEventType::Signal,
            symbol,
            serde_json::json!({
                "signal_id": registered.id,
                "direction": registered.direction,
                "confidence": registered.confidence,
                "entry_price": registered.entry_price,
                "stop_loss": registered.stop_loss,
                "reasons": registered.reasons,
            }),
        ));
    }
}

/// Flattened, JSON-friendly view of a `PositionEvent`, used only for the
/// `StateChange` broadcast payload.
#[derive(Debug, serde::Serialize)]
struct DebugEvent {
    kind: &'static str,
    position_id: uuid::Uuid,
    reason: Option<crate::types::ExitReason>,
    realized_pnl: Option<f64>,
}

impl From<crate::position::simulator::PositionEvent> for DebugEvent {
    fn from(event: crate::position::simulator::PositionEvent) -> Self {
        use crate::position::simulator::PositionEvent as E;
        match event {
            E::Filled { id } => DebugEvent {
                kind: "filled",
                position_id: id,
                reason: None,
                realized_pnl: None,
            },
            E::Closed { id, reason, realized_pnl } => DebugEvent {
                kind: "closed",
                position_id: id,
                reason: Some(reason),
                realized_pnl: Some(realized_pnl),
            },
            E::Cancelled { id, reason: _ } => DebugEvent {
                kind: "cancelled",
                position_id: id,
                reason: None,
                realized_pnl: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::client::BinanceClient;
    use crate::position::SimulatorParams;

    fn service() -> RealtimeService {
        let client = BinanceClient::new("", "");
        let mut config = RuntimeConfig::default();
        config.trading_mode = TradingMode::Live;
        RealtimeService::new(
            CandleStore::new(500),
            SignalGenerator::new(Default::default()),
            ConfirmationGate::new(2, 180),
            SignalLifecycleStore::new(),
            PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false),
            Arc::new(EventBus::new()),
            Arc::new(RwLock::new(config)),
            Arc::new(RiskEngine::new(10_000.0, 0.03, 5, 0.05, 50)),
            Arc::new(HistoricalLoader::new(client)),
            None,
            None,
            None,
        )
    }

    fn candle(open_time: i64, close: f64, is_closed: bool) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            quote_volume: 200.0,
            trades_count: 50,
            taker_buy_volume: 60.0,
            taker_buy_quote_volume: 120.0,
            is_closed,
        }
    }

    #[test]
    fn invalid_candle_is_dropped_without_panicking() {
        let svc = service();
        let mut bad = candle(0, 100.0, true);
        bad.high = 10.0; // low > high after our mutation below makes it invalid
        bad.low = 200.0;
        svc.on_candle_update("BTCUSDT", Timeframe::M1, bad);
        let key = CandleKey::new("BTCUSDT", Timeframe::M1);
        assert_eq!(svc.candles.count(&key), 0);
    }

    #[test]
    fn closed_1m_candle_below_warmup_does_not_panic_or_fire() {
        let svc = service();
        svc.on_candle_update("BTCUSDT", Timeframe::M1, candle(0, 100.0, true));
        // Far below WARMUP_CANDLES_1M -- run_signal_pipeline should bail early.
        let key = CandleKey::new("BTCUSDT", Timeframe::M1);
        assert_eq!(svc.candles.count(&key), 1);
    }

    #[test]
    fn provisional_candle_updates_store_without_running_pipeline() {
        let svc = service();
        svc.on_candle_update("ETHUSDT", Timeframe::M1, candle(0, 50.0, false));
        let key = CandleKey::new("ETHUSDT", Timeframe::M1);
        assert_eq!(svc.candles.count(&key), 1);
        assert_eq!(svc.event_bus.stats().events_published, 1); // just the CANDLE_1M publish
    }

    #[test]
    fn candle_publish_increments_event_bus_counter_per_update() {
        let svc = service();
        svc.on_candle_update("BTCUSDT", Timeframe::M1, candle(0, 100.0, true));
        svc.on_candle_update("BTCUSDT", Timeframe::M15, candle(0, 100.0, true));
        assert_eq!(svc.event_bus.stats().events_published, 2);
    }
}
