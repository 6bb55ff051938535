// =============================================================================
// kline-sentinel — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Users must explicitly
// switch to Live mode via the dashboard or API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod backtest;
mod binance;
mod event_bus;
mod historical;
mod indicators;
mod market_data;
mod persistence;
mod position;
mod realtime_service;
mod risk;
mod runtime_config;
mod settings;
mod signals;
mod state_recovery;
mod types;
mod upstream;
mod ws_manager;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, DEFAULT_STARTING_BALANCE};
use crate::event_bus::EventBus;
use crate::historical::HistoricalLoader;
use crate::market_data::CandleStore;
use crate::persistence::{AccountRepository, CandleRepository, Database, PositionRepository, SignalRepository};
use crate::position::{PaperFuturesSimulator, SimulatorParams};
use crate::realtime_service::RealtimeService;
use crate::risk::RiskEngine;
use crate::runtime_config::RuntimeConfig;
use crate::settings::Settings;
use crate::signals::{ConfirmationGate, GeneratorParams, SignalGenerator, SignalLifecycleStore};
use crate::signals::confirmation::{DEFAULT_MAX_WAIT_SECONDS, DEFAULT_MIN_CONFIRMATIONS};
use crate::state_recovery::StateRecoveryService;
use crate::types::{AccountMode, Timeframe, TradingMode};
use crate::upstream::UpstreamClient;
use crate::ws_manager::WsManager;

const CANDLE_STORE_CAPACITY: usize = 1000;
const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";
const SETTINGS_PATH: &str = "settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        kline-sentinel — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(RUNTIME_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: force Demo + Paused on every startup regardless of the
    // persisted config — a restart never resumes live trading silently.
    config.trading_mode = TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    if let Ok(syms) = std::env::var("SENTINEL_SYMBOLS") {
        let parsed: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.symbols = parsed;
        }
    }

    info!(symbols = ?config.symbols, "configured trading pairs");
    info!(
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        "engine starting in SAFE mode (Demo + Paused)"
    );

    let symbols = config.symbols.clone();

    // ── 2. Settings & risk engine ────────────────────────────────────────
    // Shared with `RealtimeService`'s admission gate so a `/control/*` change
    // takes effect on the very next signal, not just on the dashboard.
    let runtime_config = Arc::new(RwLock::new(config.clone()));
    let settings = Arc::new(Settings::load_or_default(SETTINGS_PATH));
    let settings_data = settings.get();

    let risk_engine = Arc::new(RiskEngine::new(
        DEFAULT_STARTING_BALANCE,
        config.max_daily_loss_pct / 100.0,
        config.max_consecutive_losses,
        config.max_drawdown_pct / 100.0,
        config.max_trades_per_day,
    ));

    // ── 3. Persistence ───────────────────────────────────────────────────
    let db_url = std::env::var("SENTINEL_DATABASE_URL").unwrap_or_else(|_| "sqlite://data/sentinel.db".to_string());
    let db = Database::new(&db_url).await?;
    let candle_repo = Arc::new(CandleRepository::new(db.pool.clone()));
    let position_repo = Arc::new(PositionRepository::new(db.pool.clone()));
    let account_repo = Arc::new(AccountRepository::new(db.pool.clone()));
    let signal_repo = Arc::new(SignalRepository::new(db.pool.clone()));

    // ── 4. Binance client + historical loader ────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let binance_client = binance::client::BinanceClient::new(api_key, api_secret);
    let historical = Arc::new(HistoricalLoader::new(binance_client));

    // ── 5. Build the shared realtime service (singleton, keyed by symbol) ─
    let generator_params = GeneratorParams {
        rr_ratio: settings_data.rr_ratio,
        risk_percent: settings_data.risk_percent,
        ..GeneratorParams::default()
    };
    let simulator_params = SimulatorParams {
        leverage: settings_data.leverage,
        risk_percent: settings_data.risk_percent,
        max_positions: settings_data.max_positions,
        ..SimulatorParams::default()
    };

    let realtime = Arc::new(RealtimeService::new(
        CandleStore::new(CANDLE_STORE_CAPACITY),
        SignalGenerator::new(generator_params),
        ConfirmationGate::new(DEFAULT_MIN_CONFIRMATIONS, DEFAULT_MAX_WAIT_SECONDS),
        SignalLifecycleStore::new(),
        PaperFuturesSimulator::new(DEFAULT_STARTING_BALANCE, simulator_params, false),
        Arc::new(EventBus::new()),
        runtime_config.clone(),
        risk_engine.clone(),
        historical.clone(),
        Some(candle_repo.clone()),
        Some(position_repo.clone()),
        Some(account_repo.clone()),
    ));

    // ── 6. State recovery — before any market data task is spawned ───────
    let recovery = StateRecoveryService::new(&position_repo, &account_repo);
    match recovery.restore(&realtime.simulator).await {
        Ok(restored) => info!(restored, "state recovery complete"),
        Err(e) => error!(error = %e, "state recovery failed; starting from a cold simulator"),
    }

    // ── 7. Warm up every (symbol, timeframe) series via REST ─────────────
    const TIMEFRAMES: [Timeframe; 3] = [Timeframe::M1, Timeframe::M15, Timeframe::H1];
    for symbol in &symbols {
        for timeframe in TIMEFRAMES {
            if let Err(e) = realtime.warm_up(symbol, timeframe).await {
                warn!(symbol, timeframe = %timeframe, error = %e, "warm-up failed; series will backfill from live candles");
            }
        }
    }

    // ── 8. WebSocket manager + event-bus bridge ──────────────────────────
    let ws_manager = Arc::new(WsManager::new());
    let bridge_bus = realtime.event_bus.clone();
    let bridge_ws = ws_manager.clone();
    tokio::spawn(async move {
        bridge_bus
            .run_worker(|event| {
                if let Ok(payload) = serde_json::to_string(&event) {
                    bridge_ws.broadcast(&event.symbol, &payload);
                }
            })
            .await;
    });

    // ── 9. Upstream kline client — one shared client for all symbols ─────
    let upstream_realtime = realtime.clone();
    let upstream_client = Arc::new(UpstreamClient::new(symbols.clone(), TIMEFRAMES.to_vec(), historical.clone()));
    tokio::spawn(async move {
        upstream_client
            .run(move |key, candle| {
                upstream_realtime.on_candle_update(&key.symbol, key.timeframe, candle);
            })
            .await;
    });

    info!(count = symbols.len(), "realtime pipeline running");

    // ── 10. Central application state ────────────────────────────────────
    let event_bus = realtime.event_bus.clone();
    let state = Arc::new(AppState::new(
        runtime_config.clone(),
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
    ));

    // ── 11. API server ────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("SENTINEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 12. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(RUNTIME_CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("kline-sentinel shut down complete.");
    Ok(())
}
