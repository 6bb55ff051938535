// =============================================================================
// Central Application State
// =============================================================================
//
// The single source of truth shared across every async task via `Arc<AppState>`.
// Thread safety follows the teacher's original layout: atomic counters for
// lock-free version tracking, `parking_lot::RwLock` for mutable collections,
// `Arc` wrappers for subsystems that already manage their own interior
// mutability (`RealtimeService`, `RiskEngine`, `EventBus`, `WsManager`).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::event_bus::{EventBus, EventBusStats};
use crate::persistence::{AccountRepository, CandleRepository, Database, PositionRepository, SignalRepository};
use crate::position::Position;
use crate::realtime_service::RealtimeService;
use crate::risk::{CircuitBreakerInfo, RiskEngine};
use crate::runtime_config::RuntimeConfig;
use crate::settings::{Settings, SettingsData};
use crate::types::Timeframe;
use crate::ws_manager::WsManager;

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Starting paper balance for a fresh simulator, shared by `main.rs`'s
/// construction and `POST /trades/reset`'s default when no balance is given.
pub const DEFAULT_STARTING_BALANCE: f64 = 10_000.0;

/// Central application state. One instance per process, wrapped in `Arc`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation so long-poll / diffing clients can detect staleness.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub settings: Arc<Settings>,
    pub risk_engine: Arc<RiskEngine>,

    /// The shared C1-C6 pipeline; internally keyed per symbol.
    pub realtime: Arc<RealtimeService>,
    pub event_bus: Arc<EventBus>,
    pub ws_manager: Arc<WsManager>,

    pub db: Database,
    pub candle_repo: Arc<CandleRepository>,
    pub position_repo: Arc<PositionRepository>,
    pub account_repo: Arc<AccountRepository>,
    pub signal_repo: Arc<SignalRepository>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub no_go_reason: RwLock<Option<String>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime_config: Arc<RwLock<RuntimeConfig>>,
        settings: Arc<Settings>,
        risk_engine: Arc<RiskEngine>,
        realtime: Arc<RealtimeService>,
        event_bus: Arc<EventBus>,
        ws_manager: Arc<WsManager>,
        db: Database,
        candle_repo: Arc<CandleRepository>,
        position_repo: Arc<PositionRepository>,
        account_repo: Arc<AccountRepository>,
        signal_repo: Arc<SignalRepository>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            runtime_config,
            settings,
            risk_engine,
            realtime,
            event_bus,
            ws_manager,
            db,
            candle_repo,
            position_repo,
            account_repo,
            signal_repo,
            recent_errors: RwLock::new(Vec::new()),
            no_go_reason: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord { message: msg, code, at: Utc::now().to_rfc3339() };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        self.increment_version();
    }

    /// Build a complete, serialisable snapshot of the entire engine state.
    /// This is the payload sent via `GET /system/status`-adjacent endpoints
    /// and the WebSocket feed's initial `snapshot` frame.
    pub fn build_snapshot(&self, symbols: &[String]) -> StateSnapshot {
        let now = Utc::now();
        let config = self.runtime_config.read();
        let settings = self.settings.get();
        let version = self.current_state_version();
        let risk_state = self.risk_engine.get_state();

        let truth = TruthHeader {
            no_go_reason: self.no_go_reason.read().clone(),
            state_version: version,
            trading_mode: config.trading_mode.to_string(),
            risk_mode: risk_state.risk_mode.clone(),
            server_time: now.timestamp_millis(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        };

        let positions: Vec<Position> =
            symbols.iter().flat_map(|s| self.realtime.simulator.open_positions(s)).collect();

        let risk = RiskSnapshot {
            risk_mode: risk_state.risk_mode.clone(),
            daily_pnl: risk_state.daily_pnl,
            daily_pnl_pct: risk_state.daily_pnl_pct,
            remaining_daily_loss_pct: risk_state.remaining_daily_loss_pct,
            circuit_breakers: risk_state.circuit_breakers.clone(),
        };

        let runtime_config_summary = RuntimeConfigSummary {
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            symbols: config.symbols.clone(),
            max_concurrent_positions: config.max_concurrent_positions,
            max_daily_loss_pct: config.max_daily_loss_pct,
            max_consecutive_losses: config.max_consecutive_losses,
            max_trades_per_day: config.max_trades_per_day,
            max_drawdown_pct: config.max_drawdown_pct,
        };

        let recent_errors = self.recent_errors.read().clone();
        let market_data = self.build_market_data_snapshot(symbols);
        let journal_stats = self.build_journal_stats(symbols);
        let event_bus_stats = self.event_bus.stats();

        StateSnapshot {
            state_version: version,
            server_time: now.timestamp_millis(),
            truth,
            positions,
            risk,
            runtime_config: runtime_config_summary,
            settings,
            recent_errors,
            market_data,
            journal_stats,
            balance: self.realtime.simulator.balance(),
            event_bus: event_bus_stats,
        }
    }

    fn build_market_data_snapshot(&self, symbols: &[String]) -> MarketDataSnapshot {
        let mut symbol_data = std::collections::HashMap::new();
        for symbol in symbols {
            let key = crate::market_data::CandleKey::new(symbol, Timeframe::M1);
            let last_price = self.realtime.candles.last_close(&key).unwrap_or(0.0);
            let candle_count = self.realtime.candles.count(&key);
            symbol_data.insert(symbol.clone(), SymbolMarketData { last_price, candle_count });
        }
        MarketDataSnapshot { symbols: symbol_data }
    }

    fn build_journal_stats(&self, symbols: &[String]) -> Option<JournalStats> {
        let closed: Vec<Position> = symbols.iter().flat_map(|s| self.realtime.simulator.history_for(s)).collect();
        if closed.is_empty() {
            return None;
        }

        let total_trades = closed.len();
        let wins = closed.iter().filter(|p| p.realized_pnl > 0.0).count();
        let win_rate = wins as f64 / total_trades as f64;
        let total_net_pnl: f64 = closed.iter().map(|p| p.realized_pnl).sum();
        let gross_profit: f64 = closed.iter().map(|p| p.realized_pnl).filter(|&pnl| pnl > 0.0).sum();
        let gross_loss: f64 =
            closed.iter().map(|p| p.realized_pnl).filter(|&pnl| pnl < 0.0).map(f64::abs).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Some(JournalStats { total_trades, win_rate, total_net_pnl, profit_factor })
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub truth: TruthHeader,
    pub positions: Vec<Position>,
    pub risk: RiskSnapshot,
    pub runtime_config: RuntimeConfigSummary,
    pub settings: SettingsData,
    pub recent_errors: Vec<ErrorRecord>,
    pub market_data: MarketDataSnapshot,
    pub journal_stats: Option<JournalStats>,
    pub balance: f64,
    pub event_bus: EventBusStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub no_go_reason: Option<String>,
    pub state_version: u64,
    pub trading_mode: String,
    pub risk_mode: String,
    pub server_time: i64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub risk_mode: String,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub remaining_daily_loss_pct: f64,
    pub circuit_breakers: Vec<CircuitBreakerInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub trading_mode: String,
    pub account_mode: String,
    pub symbols: Vec<String>,
    pub max_concurrent_positions: u32,
    pub max_daily_loss_pct: f64,
    pub max_consecutive_losses: u32,
    pub max_trades_per_day: u32,
    pub max_drawdown_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketDataSnapshot {
    pub symbols: std::collections::HashMap<String, SymbolMarketData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolMarketData {
    pub last_price: f64,
    pub candle_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: f64,
    pub profit_factor: f64,
}
