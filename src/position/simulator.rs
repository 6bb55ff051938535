// =============================================================================
// Paper Futures Simulator (C6) -- the core of the core
// =============================================================================
//
// A strict per-symbol state machine (PENDING -> OPEN -> CLOSED|CANCELLED)
// layered over a single global `Account`. Grounded on `position_engine.rs`'s
// `PositionManager` (open/closed split, `RwLock`-guarded vecs, exit-priority
// scan) generalized to the PENDING state, cooldowns, merge-on-fill,
// liquidation pricing and the trailing/breakeven ladder.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::market_data::Candle;
use crate::signals::TradingSignal;
use crate::types::{ExitReason, PositionSide, PositionStatus, SignalDirection};

use super::{Account, Position};

pub const DEFAULT_COOLDOWN_SECONDS: i64 = 300;
pub const REVERSAL_COOLDOWN_SECONDS: i64 = 600;
pub const PENDING_TTL_SECONDS: i64 = 45 * 60;
pub const BREAKEVEN_ROE_PCT: f64 = 0.8;
pub const TRAILING_ROE_PCT: f64 = 1.2;
pub const TRAILING_PCT: f64 = 1.5;
pub const MIN_SL_FRAC: f64 = 0.005;
pub const MIN_NOTIONAL: f64 = 10.0;
pub const MARGIN_CAP_FRACTION: f64 = 0.95;

pub const DEFAULT_MAX_POSITIONS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct SimulatorParams {
    pub leverage: f64,
    pub risk_percent: f64,
    pub allow_flip: bool,
    pub default_cooldown_seconds: i64,
    pub reversal_cooldown_seconds: i64,
    pub pending_ttl_seconds: i64,
    pub breakeven_roe_pct: f64,
    pub trailing_roe_pct: f64,
    pub trailing_pct: f64,
    pub min_sl_frac: f64,
    pub min_notional: f64,
    pub margin_cap_fraction: f64,
    /// Maximum number of non-terminal (PENDING + OPEN) positions the account
    /// carries at once, across every symbol.
    pub max_positions: u32,
}

impl Default for SimulatorParams {
    fn default() -> Self {
        Self {
            leverage: 10.0,
            risk_percent: 1.0,
            allow_flip: true,
            default_cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            reversal_cooldown_seconds: REVERSAL_COOLDOWN_SECONDS,
            pending_ttl_seconds: PENDING_TTL_SECONDS,
            breakeven_roe_pct: BREAKEVEN_ROE_PCT,
            trailing_roe_pct: TRAILING_ROE_PCT,
            trailing_pct: TRAILING_PCT,
            min_sl_frac: MIN_SL_FRAC,
            min_notional: MIN_NOTIONAL,
            margin_cap_fraction: MARGIN_CAP_FRACTION,
            max_positions: DEFAULT_MAX_POSITIONS,
        }
    }
}

/// Result of feeding a new signal into the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// A new PENDING position was inserted.
    Pending { position_id: Uuid },
    /// No position was opened, but nothing was wrong (e.g. same-direction
    /// position already open).
    NoAction { reason: String },
    /// The signal was rejected outright (cooldown, sizing floor, ...).
    Rejected { reason: String },
}

/// Emitted by `on_tick` for the lifecycle state machine / event bus to react
/// to.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Filled { id: Uuid },
    Closed { id: Uuid, reason: ExitReason, realized_pnl: f64 },
    Cancelled { id: Uuid, reason: ExitReason },
}

pub struct PaperFuturesSimulator {
    /// Behind a lock (not held by value) so a settings update reaches the
    /// very next signal instead of only a simulator built fresh at startup.
    params: RwLock<SimulatorParams>,
    /// Whether to walk each candle's intrabar path (backtest) or treat the
    /// candle's {high, low, close} as a single tick event (live).
    intrabar_walk: bool,
    active: RwLock<HashMap<String, Vec<Position>>>,
    history: RwLock<HashMap<String, Vec<Position>>>,
    cooldowns: RwLock<HashMap<String, (DateTime<Utc>, i64)>>,
    account: RwLock<Account>,
}

impl PaperFuturesSimulator {
    pub fn new(starting_balance: f64, params: SimulatorParams, intrabar_walk: bool) -> Self {
        Self {
            params: RwLock::new(params),
            intrabar_walk,
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            cooldowns: RwLock::new(HashMap::new()),
            account: RwLock::new(Account::new(starting_balance)),
        }
    }

    /// Apply a live settings update to the running simulator -- the next
    /// `on_signal`/`on_tick` call reads the new values, never a snapshot
    /// taken at construction.
    pub fn update_params(&self, mutator: impl FnOnce(&mut SimulatorParams)) {
        let mut params = self.params.write();
        mutator(&mut params);
    }

    pub fn balance(&self) -> f64 {
        self.account.read().balance
    }

    pub fn equity(&self, price_oracle: &dyn Fn(&str) -> Option<f64>) -> f64 {
        let balance = self.account.read().balance;
        let active = self.active.read();
        let unrealized: f64 = active
            .values()
            .flatten()
            .filter(|p| p.status == PositionStatus::Open)
            .map(|p| {
                let mark = price_oracle(&p.symbol).unwrap_or(p.entry_price);
                p.unrealized_pnl(mark)
            })
            .sum();
        balance + unrealized
    }

    pub fn open_positions(&self, symbol: &str) -> Vec<Position> {
        self.active
            .read()
            .get(symbol)
            .map(|v| v.iter().filter(|p| p.status == PositionStatus::Open).cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_positions(&self, symbol: &str) -> Vec<Position> {
        self.active
            .read()
            .get(symbol)
            .map(|v| v.iter().filter(|p| p.status == PositionStatus::Pending).cloned().collect())
            .unwrap_or_default()
    }

    pub fn history_for(&self, symbol: &str) -> Vec<Position> {
        self.history.read().get(symbol).cloned().unwrap_or_default()
    }

    /// Reinsert a persisted PENDING/OPEN position on startup, bypassing the
    /// sizing/cooldown checks in `on_signal` -- used only by
    /// `StateRecoveryService` before market-data subscription begins.
    pub fn restore_position(&self, position: Position) {
        let mut active = self.active.write();
        active.entry(position.symbol.clone()).or_default().push(position);
    }

    /// Overwrite the account balance from persisted state on startup -- used
    /// only by `StateRecoveryService`.
    pub fn restore_balance(&self, balance: f64) {
        self.account.write().balance = balance;
    }

    /// Operator-initiated close of a PENDING/OPEN position at `price`
    /// (`POST /trades/close/{id}`, SS6). Returns the realized pnl, or `None`
    /// if the position is unknown or already terminal.
    pub fn close_manual(&self, symbol: &str, id: Uuid, price: f64) -> Option<f64> {
        let mut active = self.active.write();
        let entries = active.entry(symbol.to_string()).or_default();
        let idx = entries.iter().position(|p| p.id == id && !p.is_terminal())?;
        let mut position = entries.remove(idx);

        let pnl = if position.status == PositionStatus::Open {
            position.unrealized_pnl(price)
        } else {
            0.0
        };
        position.status = PositionStatus::Closed;
        position.close_time = Some(Utc::now());
        position.close_price = Some(price);
        position.realized_pnl = pnl;
        position.exit_reason = Some(ExitReason::ManualClose);

        self.account.write().apply_realized_pnl(pnl);
        self.history.write().entry(symbol.to_string()).or_default().push(position);
        info!(symbol, %id, pnl, "position closed manually");
        Some(pnl)
    }

    /// Wipe every active/historical position and restart the account at
    /// `starting_balance` (`POST /trades/reset`, SS6). In-memory only; the
    /// caller is responsible for clearing persisted tables if a durable
    /// reset is required.
    pub fn reset(&self, starting_balance: f64) {
        self.active.write().clear();
        self.history.write().clear();
        self.cooldowns.write().clear();
        *self.account.write() = Account::new(starting_balance);
    }

    // -------------------------------------------------------------------
    // 4.6.1 -- on a new signal
    // -------------------------------------------------------------------

    pub fn on_signal(
        &self,
        signal: &TradingSignal,
        price_oracle: &dyn Fn(&str) -> Option<f64>,
    ) -> SignalOutcome {
        if !signal.direction.is_actionable() {
            return SignalOutcome::NoAction { reason: "neutral_signal".into() };
        }
        let symbol = &signal.symbol;
        let side = match signal.direction {
            SignalDirection::Buy => PositionSide::Long,
            SignalDirection::Sell => PositionSide::Short,
            SignalDirection::Neutral => unreachable!("checked above"),
        };
        // Read once: every field below observes the live settings value, not
        // whatever was in force when the simulator was constructed.
        let params = *self.params.read();

        // 1. Cooldown check.
        let now = Utc::now();
        if let Some((last_close, cooldown)) = self.cooldowns.read().get(symbol).copied() {
            if (now - last_close).num_seconds() < cooldown {
                return SignalOutcome::Rejected { reason: "cooldown_active".into() };
            }
        }

        let mut active = self.active.write();

        // Margin/unrealized PnL carried by every OTHER symbol, captured
        // before this symbol's entry becomes a long-lived mutable borrow
        // below (a plain `active.values()` read can't coexist with it).
        let (other_used_margin, other_unrealized): (f64, f64) = active
            .iter()
            .filter(|(s, _)| s.as_str() != symbol.as_str())
            .flat_map(|(_, v)| v.iter())
            .fold((0.0, 0.0), |(margin, unrealized), p| {
                let extra_unrealized = if p.status == PositionStatus::Open {
                    p.unrealized_pnl(price_oracle(&p.symbol).unwrap_or(p.entry_price))
                } else {
                    0.0
                };
                (margin + p.margin, unrealized + extra_unrealized)
            });

        let entries = active.entry(symbol.clone()).or_default();

        // 2. Zombie killer: cancel any existing PENDING order for this symbol.
        let mut history_additions = Vec::new();
        entries.retain_mut(|p| {
            if p.status == PositionStatus::Pending {
                p.status = PositionStatus::Cancelled;
                p.close_time = Some(now);
                p.exit_reason = Some(ExitReason::NewSignalOverride);
                warn!(symbol = %symbol, id = %p.id, "zombie pending order cancelled by new signal");
                history_additions.push(p.clone());
                false
            } else {
                true
            }
        });
        if !history_additions.is_empty() {
            self.history
                .write()
                .entry(symbol.clone())
                .or_default()
                .extend(history_additions);
        }

        // 3. Existing OPEN position handling.
        if let Some(open_idx) = entries.iter().position(|p| p.status == PositionStatus::Open) {
            if entries[open_idx].side == side {
                return SignalOutcome::NoAction { reason: "existing_open_same_direction".into() };
            }
            // Opposite direction: close with SIGNAL_REVERSAL.
            let mut closed = entries.remove(open_idx);
            let mark = price_oracle(symbol).unwrap_or(closed.entry_price);
            let pnl = closed.unrealized_pnl(mark);
            closed.status = PositionStatus::Closed;
            closed.close_time = Some(now);
            closed.close_price = Some(mark);
            closed.realized_pnl = pnl;
            closed.exit_reason = Some(ExitReason::SignalReversal);
            self.account.write().apply_realized_pnl(pnl);
            self.cooldowns
                .write()
                .insert(symbol.clone(), (now, params.reversal_cooldown_seconds));
            info!(symbol = %symbol, id = %closed.id, pnl, "position closed on signal reversal");
            self.history.write().entry(symbol.clone()).or_default().push(closed);

            if !params.allow_flip {
                return SignalOutcome::NoAction { reason: "flip_disabled".into() };
            }
        }

        // 3.5 Max positions -- count this symbol's non-terminal entries plus
        // every other symbol's, after the zombie-kill/reversal cleanup above.
        let this_symbol_active = entries.iter().filter(|p| !p.is_terminal()).count();
        let other_symbols_active: usize = active
            .iter()
            .filter(|(s, _)| s.as_str() != symbol.as_str())
            .flat_map(|(_, v)| v.iter())
            .filter(|p| !p.is_terminal())
            .count();
        if this_symbol_active + other_symbols_active >= params.max_positions as usize {
            return SignalOutcome::Rejected { reason: "max_positions_reached".into() };
        }
        let entries = active.entry(symbol.clone()).or_default();

        // 4. Sizing.
        let wallet_balance = self.account.read().balance;
        let entry_price = signal.entry_price;
        let stop_loss = signal.stop_loss;

        let sl_frac = (entry_price - stop_loss).abs() / entry_price;
        if sl_frac < params.min_sl_frac {
            return SignalOutcome::Rejected { reason: "stop_loss_too_tight".into() };
        }

        let risk_amount = wallet_balance * (params.risk_percent / 100.0);
        let notional_uncapped = risk_amount / sl_frac;

        let used_margin: f64 = other_used_margin + entries.iter().map(|p| p.margin).sum::<f64>();
        let unrealized: f64 = other_unrealized
            + entries
                .iter()
                .filter(|p| p.status == PositionStatus::Open)
                .map(|p| {
                    let mark = price_oracle(&p.symbol).unwrap_or(p.entry_price);
                    p.unrealized_pnl(mark)
                })
                .sum::<f64>();
        let available_balance = wallet_balance + unrealized - used_margin;
        let cap = available_balance * params.leverage * params.margin_cap_fraction;
        let notional = notional_uncapped.min(cap.max(0.0));

        if notional < params.min_notional {
            return SignalOutcome::Rejected { reason: "notional_below_minimum".into() };
        }

        let quantity = notional / entry_price;
        let margin = notional / params.leverage;

        // 5. Liquidation price (isolated, simple model).
        let liquidation_price = match side {
            PositionSide::Long => entry_price - margin / quantity,
            PositionSide::Short => entry_price + margin / quantity,
        };

        // 6. Insert PENDING.
        let position = Position {
            id: Uuid::new_v4(),
            symbol: symbol.clone(),
            side,
            status: PositionStatus::Pending,
            entry_price,
            quantity,
            leverage: params.leverage,
            margin,
            liquidation_price,
            stop_loss,
            take_profit: signal.tp_levels.tp1,
            open_time: now,
            close_time: None,
            close_price: None,
            realized_pnl: 0.0,
            exit_reason: None,
            highest_price: entry_price,
            lowest_price: entry_price,
            signal_id: Some(signal.id),
        };
        let id = position.id;
        entries.push(position);
        info!(symbol = %symbol, id = %id, quantity, margin, "position opened PENDING");
        SignalOutcome::Pending { position_id: id }
    }

    // -------------------------------------------------------------------
    // 4.6.2 -- on each market tick
    // -------------------------------------------------------------------

    /// Process a closed candle for `symbol`, returning fill/close/cancel
    /// events in chronological order.
    pub fn on_tick(&self, symbol: &str, candle: &Candle) -> Vec<PositionEvent> {
        if self.intrabar_walk {
            let bullish = candle.close >= candle.open;
            let legs: [(f64, f64); 3] = if bullish {
                [
                    (candle.open, candle.low),
                    (candle.low, candle.high),
                    (candle.high, candle.close),
                ]
            } else {
                [
                    (candle.open, candle.high),
                    (candle.high, candle.low),
                    (candle.low, candle.close),
                ]
            };
            let mut events = Vec::new();
            for (a, b) in legs {
                let leg_high = a.max(b);
                let leg_low = a.min(b);
                events.extend(self.process_tick_single(symbol, leg_high, leg_low, b));
            }
            events
        } else {
            self.process_tick_single(symbol, candle.high, candle.low, candle.close)
        }
    }

    fn process_tick_single(&self, symbol: &str, high: f64, low: f64, close: f64) -> Vec<PositionEvent> {
        let now = Utc::now();
        let params = *self.params.read();
        let mut events = Vec::new();
        let mut active = self.active.write();
        let entries = active.entry(symbol.to_string()).or_default();

        // --- A. PENDING orders -------------------------------------------------
        let mut still_pending_and_open = Vec::with_capacity(entries.len());
        let mut filled: Vec<Position> = Vec::new();
        let mut history_additions = Vec::new();

        for mut p in entries.drain(..) {
            if p.status != PositionStatus::Pending {
                still_pending_and_open.push(p);
                continue;
            }

            if (now - p.open_time).num_seconds() > params.pending_ttl_seconds {
                p.status = PositionStatus::Cancelled;
                p.close_time = Some(now);
                p.exit_reason = Some(ExitReason::TtlExpired);
                events.push(PositionEvent::Cancelled { id: p.id, reason: ExitReason::TtlExpired });
                history_additions.push(p);
                continue;
            }

            let fills = match p.side {
                PositionSide::Long => low <= p.entry_price,
                PositionSide::Short => high >= p.entry_price,
            };
            if fills {
                filled.push(p);
            } else {
                still_pending_and_open.push(p);
            }
        }

        for mut order in filled {
            let merge_target = still_pending_and_open
                .iter_mut()
                .find(|p| p.status == PositionStatus::Open && p.side == order.side);

            if let Some(target) = merge_target {
                let new_qty = target.quantity + order.quantity;
                let new_margin = target.margin + order.margin;
                let new_entry =
                    (target.entry_price * target.quantity + order.entry_price * order.quantity) / new_qty;
                target.quantity = new_qty;
                target.margin = new_margin;
                target.entry_price = new_entry;
                target.liquidation_price = match target.side {
                    PositionSide::Long => new_entry - new_margin / new_qty,
                    PositionSide::Short => new_entry + new_margin / new_qty,
                };

                order.status = PositionStatus::Closed;
                order.close_time = Some(now);
                order.exit_reason = Some(ExitReason::Merged);
                info!(symbol = %symbol, merged_into = %target.id, order_id = %order.id, "order merged on fill");
                history_additions.push(order);
            } else {
                order.status = PositionStatus::Open;
                order.open_time = now;
                order.highest_price = order.entry_price;
                order.lowest_price = order.entry_price;
                events.push(PositionEvent::Filled { id: order.id });
                still_pending_and_open.push(order);
            }
        }

        // --- B. OPEN positions ---------------------------------------------------
        let mut remaining = Vec::with_capacity(still_pending_and_open.len());
        for mut p in still_pending_and_open.drain(..) {
            if p.status != PositionStatus::Open {
                remaining.push(p);
                continue;
            }

            p.highest_price = p.highest_price.max(high);
            p.lowest_price = p.lowest_price.min(low);

            let roe = p.roe_pct(close);
            if roe > params.breakeven_roe_pct {
                let candidate = p.entry_price;
                let improves = match p.side {
                    PositionSide::Long => candidate > p.stop_loss,
                    PositionSide::Short => candidate < p.stop_loss || p.stop_loss == 0.0,
                };
                if improves {
                    p.stop_loss = candidate;
                }
            }
            if roe > params.trailing_roe_pct {
                let trail_frac = params.trailing_pct / 100.0;
                let candidate = match p.side {
                    PositionSide::Long => p.highest_price * (1.0 - trail_frac),
                    PositionSide::Short => p.lowest_price * (1.0 + trail_frac),
                };
                let improves = match p.side {
                    PositionSide::Long => candidate > p.stop_loss,
                    PositionSide::Short => candidate < p.stop_loss || p.stop_loss == 0.0,
                };
                if improves {
                    p.stop_loss = candidate;
                }
            }

            let exit = self.check_exit_priority(&p, high, low);
            if let Some((exit_price, reason)) = exit {
                let pnl = match p.side {
                    PositionSide::Long => (exit_price - p.entry_price) * p.quantity,
                    PositionSide::Short => (p.entry_price - exit_price) * p.quantity,
                };
                p.status = PositionStatus::Closed;
                p.close_time = Some(now);
                p.close_price = Some(exit_price);
                p.realized_pnl = pnl;
                p.exit_reason = Some(reason);
                self.account.write().apply_realized_pnl(pnl);
                let cooldown = if reason == ExitReason::SignalReversal {
                    params.reversal_cooldown_seconds
                } else {
                    params.default_cooldown_seconds
                };
                self.cooldowns.write().insert(symbol.to_string(), (now, cooldown));
                info!(symbol = %symbol, id = %p.id, ?reason, pnl, "position closed");
                events.push(PositionEvent::Closed { id: p.id, reason, realized_pnl: pnl });
                history_additions.push(p);
            } else {
                remaining.push(p);
            }
        }

        *entries = remaining;
        drop(active);

        if !history_additions.is_empty() {
            self.history
                .write()
                .entry(symbol.to_string())
                .or_default()
                .extend(history_additions);
        }

        events
    }

    /// Exit priority: liquidation, then stop-loss, then take-profit. First
    /// match wins.
    fn check_exit_priority(&self, p: &Position, high: f64, low: f64) -> Option<(f64, ExitReason)> {
        let liq_hit = match p.side {
            PositionSide::Long => low <= p.liquidation_price,
            PositionSide::Short => high >= p.liquidation_price,
        };
        if liq_hit {
            return Some((p.liquidation_price, ExitReason::Liquidation));
        }

        if p.stop_loss > 0.0 {
            let sl_hit = match p.side {
                PositionSide::Long => low <= p.stop_loss,
                PositionSide::Short => high >= p.stop_loss,
            };
            if sl_hit {
                return Some((p.stop_loss, ExitReason::StopLoss));
            }
        }

        if p.take_profit > 0.0 {
            let tp_hit = match p.side {
                PositionSide::Long => high >= p.take_profit,
                PositionSide::Short => low <= p.take_profit,
            };
            if tp_hit {
                return Some((p.take_profit, ExitReason::TakeProfit));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::TpLevels;
    use crate::types::SignalStatus;
    use std::collections::HashMap as StdHashMap;

    fn no_price(_: &str) -> Option<f64> {
        None
    }

    fn buy_signal(symbol: &str, entry: f64, sl: f64, tp1: f64) -> TradingSignal {
        TradingSignal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction: SignalDirection::Buy,
            confidence: 0.8,
            price: entry,
            entry_price: entry,
            stop_loss: sl,
            tp_levels: TpLevels { tp1, tp2: tp1 + 1.0, tp3: tp1 + 2.0 },
            position_size: 0.0,
            risk_reward_ratio: 2.0,
            indicators: StdHashMap::new(),
            reasons: vec![],
            generated_at: Utc::now(),
            status: SignalStatus::Generated,
            pending_at: None,
            executed_at: None,
            expired_at: None,
            order_id: None,
            outcome: None,
        }
    }

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 59_999,
            open,
            high,
            low,
            close,
            volume: 100.0,
            quote_volume: 100.0 * close,
            trades_count: 10,
            taker_buy_volume: 50.0,
            taker_buy_quote_volume: 50.0 * close,
            is_closed: true,
        }
    }

    #[test]
    fn s1_buy_fills_and_hits_take_profit() {
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let signal = buy_signal("BTCUSDT", 99.10, 98.10, 101.10);
        let outcome = sim.on_signal(&signal, &no_price);
        assert!(matches!(outcome, SignalOutcome::Pending { .. }));

        let fill_events = sim.on_tick("BTCUSDT", &candle(99.10, 99.20, 99.00, 99.15));
        assert!(fill_events.iter().any(|e| matches!(e, PositionEvent::Filled { .. })));
        assert_eq!(sim.open_positions("BTCUSDT").len(), 1);

        let tp_events = sim.on_tick("BTCUSDT", &candle(99.15, 101.50, 99.00, 101.20));
        assert!(tp_events
            .iter()
            .any(|e| matches!(e, PositionEvent::Closed { reason: ExitReason::TakeProfit, .. })));
        assert_eq!(sim.open_positions("BTCUSDT").len(), 0);
        assert!(sim.balance() > 10_000.0);
    }

    #[test]
    fn cooldown_rejects_signal_immediately_after_close() {
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let signal = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        sim.on_signal(&signal, &no_price);
        sim.on_tick("BTCUSDT", &candle(100.0, 100.5, 99.9, 100.0)); // fills
        sim.on_tick("BTCUSDT", &candle(100.0, 100.1, 98.0, 98.5)); // hits SL, closes

        let next = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        let outcome = sim.on_signal(&next, &no_price);
        assert!(matches!(outcome, SignalOutcome::Rejected { .. }));
    }

    #[test]
    fn zombie_killer_cancels_existing_pending_on_new_signal() {
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let first = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        let SignalOutcome::Pending { position_id } = sim.on_signal(&first, &no_price) else {
            panic!("expected pending")
        };

        let second = buy_signal("BTCUSDT", 95.0, 94.0, 98.0);
        sim.on_signal(&second, &no_price);

        let history = sim.history_for("BTCUSDT");
        let cancelled = history.iter().find(|p| p.id == position_id).unwrap();
        assert_eq!(cancelled.status, PositionStatus::Cancelled);
        assert_eq!(cancelled.exit_reason, Some(ExitReason::NewSignalOverride));
    }

    #[test]
    fn opposite_direction_closes_then_flips() {
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let buy = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        sim.on_signal(&buy, &no_price);
        sim.on_tick("BTCUSDT", &candle(100.0, 100.5, 99.9, 100.0));
        assert_eq!(sim.open_positions("BTCUSDT").len(), 1);

        let mut sell = buy_signal("BTCUSDT", 100.0, 101.0, 97.0);
        sell.direction = SignalDirection::Sell;
        let outcome = sim.on_signal(&sell, &no_price);
        assert!(matches!(outcome, SignalOutcome::Pending { .. }));

        let history = sim.history_for("BTCUSDT");
        assert!(history
            .iter()
            .any(|p| p.exit_reason == Some(ExitReason::SignalReversal)));
    }

    #[test]
    fn pending_order_expires_after_ttl() {
        let mut params = SimulatorParams::default();
        params.pending_ttl_seconds = 0;
        let sim = PaperFuturesSimulator::new(10_000.0, params, false);
        let signal = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        sim.on_signal(&signal, &no_price);

        let events = sim.on_tick("BTCUSDT", &candle(200.0, 201.0, 199.0, 200.0)); // never fills, price far away
        assert!(events
            .iter()
            .any(|e| matches!(e, PositionEvent::Cancelled { reason: ExitReason::TtlExpired, .. })));
    }

    #[test]
    fn liquidation_takes_priority_over_stop_loss() {
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let signal = buy_signal("BTCUSDT", 100.0, 99.0, 110.0);
        sim.on_signal(&signal, &no_price);
        sim.on_tick("BTCUSDT", &candle(100.0, 100.5, 99.9, 100.0));

        // Manually drive liquidation_price above stop_loss isn't directly
        // settable; instead assert the exit_priority helper orders liq first
        // for a position whose liq sits above its SL for a long (degenerate
        // but exercised via check_exit_priority directly).
        let mut pos = sim.open_positions("BTCUSDT").remove(0);
        pos.liquidation_price = 99.5; // above stop_loss of 99.0
        let exit = sim.check_exit_priority(&pos, 99.6, 99.3);
        assert_eq!(exit, Some((99.5, ExitReason::Liquidation)));
    }

    #[test]
    fn per_symbol_isolation_btc_tick_does_not_affect_eth_position() {
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let eth_signal = buy_signal("ETHUSDT", 2000.0, 1900.0, 2200.0);
        sim.on_signal(&eth_signal, &no_price);
        sim.on_tick("ETHUSDT", &candle(2000.0, 2010.0, 1990.0, 2000.0));
        assert_eq!(sim.open_positions("ETHUSDT").len(), 1);

        sim.on_tick("BTCUSDT", &candle(100.0, 1.0, 0.5, 0.8)); // wild BTC tick
        assert_eq!(sim.open_positions("ETHUSDT").len(), 1);
        assert_eq!(sim.open_positions("BTCUSDT").len(), 0);
    }

    #[test]
    fn max_positions_reached_rejects_further_signals() {
        let mut params = SimulatorParams::default();
        params.max_positions = 1;
        let sim = PaperFuturesSimulator::new(10_000.0, params, false);

        let first = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        assert!(matches!(sim.on_signal(&first, &no_price), SignalOutcome::Pending { .. }));

        let second = buy_signal("ETHUSDT", 2000.0, 1900.0, 2200.0);
        let outcome = sim.on_signal(&second, &no_price);
        assert_eq!(outcome, SignalOutcome::Rejected { reason: "max_positions_reached".into() });
    }

    #[test]
    fn max_positions_frees_up_once_a_position_closes() {
        let mut params = SimulatorParams::default();
        params.max_positions = 1;
        let sim = PaperFuturesSimulator::new(10_000.0, params, false);

        let first = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        sim.on_signal(&first, &no_price);
        sim.on_tick("BTCUSDT", &candle(100.0, 100.5, 99.9, 100.0)); // fills
        sim.on_tick("BTCUSDT", &candle(100.0, 100.1, 98.0, 98.5)); // hits SL, closes

        let second = buy_signal("ETHUSDT", 2000.0, 1900.0, 2200.0);
        assert!(matches!(sim.on_signal(&second, &no_price), SignalOutcome::Pending { .. }));
    }

    #[test]
    fn account_conservation_balance_moves_only_on_close() {
        let sim = PaperFuturesSimulator::new(10_000.0, SimulatorParams::default(), false);
        let signal = buy_signal("BTCUSDT", 100.0, 99.0, 103.0);
        sim.on_signal(&signal, &no_price);
        sim.on_tick("BTCUSDT", &candle(100.0, 100.5, 99.9, 100.0));
        assert_eq!(sim.balance(), 10_000.0); // no change while only OPEN, no close yet

        sim.on_tick("BTCUSDT", &candle(100.0, 103.5, 99.9, 103.2));
        assert!(sim.balance() > 10_000.0);
    }
}
