// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Routes are mounted at the path stems SPEC_FULL §6 enumerates directly
// (`/market/...`, `/trades/...`, `/signals/...`) rather than nested under the
// teacher's `/api/v1` prefix — see DESIGN.md. `GET /health` and
// `GET /system/status` are public liveness probes; everything else requires
// a valid Bearer token via the `AuthBearer` extractor, following the
// teacher's original split.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::auth::AuthBearer;
use crate::app_state::{AppState, DEFAULT_STARTING_BALANCE};
use crate::indicators;
use crate::market_data::CandleKey;
use crate::position::Position;
use crate::settings::SettingsData;
use crate::signals::lifecycle::HistoryFilter;
use crate::signals::signal::TradingSignal;
use crate::types::{AccountMode, PositionSide, SignalDirection, SignalStatus, Timeframe, TradingMode};

const HISTORY_LOCAL_COVERAGE_THRESHOLD: f64 = 0.8;
const MAX_HISTORY_LIMIT: usize = 1000;
const DEFAULT_HISTORY_LIMIT: usize = 200;
const DEFAULT_SIGNAL_TTL_SECONDS: i64 = 300;
const EXPORT_MAX_ROWS: usize = 100_000;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/health", get(health))
        .route("/system/status", get(system_status))
        // ── State ───────────────────────────────────────────────────
        .route("/state", get(full_state))
        // ── Market data ─────────────────────────────────────────────
        .route("/market/history", get(market_history))
        .route("/market/symbols", get(market_symbols))
        // ── Settings ────────────────────────────────────────────────
        .route("/settings", get(get_settings).post(post_settings))
        // ── Trades ──────────────────────────────────────────────────
        .route("/trades/history", get(trades_history))
        .route("/trades/performance", get(trades_performance))
        .route("/trades/portfolio", get(trades_portfolio))
        .route("/trades/close/:id", post(trades_close))
        .route("/trades/reset", post(trades_reset))
        // ── Signals ─────────────────────────────────────────────────
        .route("/signals/history", get(signals_history))
        .route("/signals/pending", get(signals_pending))
        .route("/signals/export", get(signals_export))
        .route("/signals/expire-stale", post(signals_expire_stale))
        .route("/signals/order/:order_id", get(signals_by_order_id))
        .route("/signals/:id", get(signals_by_id))
        .route("/signals/:id/execute", post(signals_execute))
        .route("/signals/:id/mark-pending", post(signals_mark_pending))
        .route("/signals/:id/expire", post(signals_expire))
        // ── Operator control ───────────────────────────────────────
        .route("/control/pause", post(control_pause))
        .route("/control/resume", post(control_resume))
        .route("/control/kill", post(control_kill))
        .route("/control/account-mode", post(control_account_mode))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/ws/stream/:symbol", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error response
// =============================================================================

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self { status: StatusCode::CONFLICT, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

fn resolve_symbols(state: &AppState, symbol: Option<&str>) -> Vec<String> {
    match symbol {
        Some(s) => vec![s.to_uppercase()],
        None => state.runtime_config.read().symbols.clone(),
    }
}

fn parse_direction(s: &str) -> Option<SignalDirection> {
    match s.to_lowercase().as_str() {
        "buy" => Some(SignalDirection::Buy),
        "sell" => Some(SignalDirection::Sell),
        "neutral" => Some(SignalDirection::Neutral),
        _ => None,
    }
}

fn parse_signal_status(s: &str) -> Option<SignalStatus> {
    match s.to_lowercase().as_str() {
        "generated" => Some(SignalStatus::Generated),
        "pending" => Some(SignalStatus::Pending),
        "executed" => Some(SignalStatus::Executed),
        "expired" => Some(SignalStatus::Expired),
        _ => None,
    }
}

// =============================================================================
// Health / system status (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Serialize)]
struct SystemStatusResponse {
    status: &'static str,
    trading_mode: String,
    account_mode: String,
    symbols: Vec<String>,
    uptime_seconds: u64,
    server_time: i64,
}

async fn system_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.runtime_config.read();
    Json(SystemStatusResponse {
        status: "ok",
        trading_mode: config.trading_mode.to_string(),
        account_mode: config.account_mode.to_string(),
        symbols: config.symbols.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = state.runtime_config.read().symbols.clone();
    Json(state.build_snapshot(&symbols))
}

// =============================================================================
// Market data (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct MarketHistoryQuery {
    symbol: String,
    #[serde(default = "default_history_timeframe")]
    timeframe: String,
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_timeframe() -> String {
    "1m".to_string()
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

async fn market_history(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<MarketHistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let timeframe = Timeframe::from_str(&q.timeframe)
        .ok_or_else(|| ApiError::bad_request(format!("invalid timeframe '{}'", q.timeframe)))?;
    let symbol = q.symbol.to_uppercase();
    let limit = q.limit.clamp(1, MAX_HISTORY_LIMIT);
    let key = CandleKey::new(&symbol, timeframe);

    let local_count = state.realtime.candles.count(&key);
    let (candles, source) = if local_count as f64 >= limit as f64 * HISTORY_LOCAL_COVERAGE_THRESHOLD {
        (state.realtime.candles.latest(&key, limit), "local")
    } else {
        match state.realtime.fetch_recent(&symbol, timeframe, limit as u32).await {
            Ok(fetched) => (fetched, "rest_fallback"),
            Err(e) => {
                warn!(symbol, timeframe = %q.timeframe, error = %e, "market history REST fallback failed, serving partial local coverage");
                (state.realtime.candles.latest(&key, limit), "local")
            }
        }
    };

    let snapshot = indicators::compute_snapshot(&candles);
    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "timeframe": timeframe.as_str(),
        "source": source,
        "candles": candles,
        "indicators": snapshot,
    })))
}

async fn market_symbols(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.settings.get();
    let mut symbols = settings.enabled_tokens.clone();
    for token in settings.custom_tokens {
        if !symbols.contains(&token) {
            symbols.push(token);
        }
    }
    let default_symbol = symbols.first().cloned();

    Json(serde_json::json!({
        "symbols": symbols,
        "default": default_symbol,
    }))
}

// =============================================================================
// Settings (authenticated)
// =============================================================================

async fn get_settings(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings.get())
}

#[derive(Deserialize, Default)]
struct SettingsUpdate {
    risk_percent: Option<f64>,
    rr_ratio: Option<f64>,
    max_positions: Option<u32>,
    leverage: Option<f64>,
    auto_execute: Option<bool>,
    enabled_tokens: Option<Vec<String>>,
    custom_tokens: Option<Vec<String>>,
}

async fn post_settings(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    let result = state.settings.update(|s| {
        if let Some(v) = update.risk_percent {
            s.risk_percent = v;
        }
        if let Some(v) = update.rr_ratio {
            s.rr_ratio = v;
        }
        if let Some(v) = update.max_positions {
            s.max_positions = v;
        }
        if let Some(v) = update.leverage {
            s.leverage = v;
        }
        if let Some(v) = update.auto_execute {
            s.auto_execute = v;
        }
        if let Some(v) = update.enabled_tokens {
            s.enabled_tokens = v;
        }
        if let Some(v) = update.custom_tokens {
            s.custom_tokens = v;
        }
    });

    if let Err(e) = result {
        warn!(error = %e, "failed to persist settings update");
    }

    // Push the fresh values into the running pipeline -- the simulator and
    // generator read them on the very next signal, never a snapshot taken
    // at startup.
    let fresh = state.settings.get();
    state.realtime.generator.update_params(|p| {
        p.rr_ratio = fresh.rr_ratio;
        p.risk_percent = fresh.risk_percent;
    });
    state.realtime.simulator.update_params(|p| {
        p.leverage = fresh.leverage;
        p.risk_percent = fresh.risk_percent;
        p.max_positions = fresh.max_positions;
    });

    state.increment_version();
    info!("settings updated via API");

    Json(fresh)
}

// =============================================================================
// Trades (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct TradesHistoryQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_trade_limit")]
    limit: usize,
    symbol: Option<String>,
    side: Option<String>,
    pnl_filter: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_trade_limit() -> usize {
    50
}

async fn trades_history(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<TradesHistoryQuery>,
) -> impl IntoResponse {
    let symbols = resolve_symbols(&state, q.symbol.as_deref());
    let mut closed: Vec<Position> =
        symbols.iter().flat_map(|s| state.realtime.simulator.history_for(s)).collect();

    if let Some(side) = q.side.as_deref() {
        let wanted = match side.to_lowercase().as_str() {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        };
        if let Some(wanted) = wanted {
            closed.retain(|p| p.side == wanted);
        }
    }
    if let Some(filter) = q.pnl_filter.as_deref() {
        match filter.to_lowercase().as_str() {
            "win" => closed.retain(|p| p.realized_pnl > 0.0),
            "loss" => closed.retain(|p| p.realized_pnl < 0.0),
            _ => {}
        }
    }

    closed.sort_by(|a, b| b.close_time.cmp(&a.close_time));

    let total = closed.len();
    let limit = q.limit.max(1);
    let page = q.page.max(1);
    let start = (page - 1) * limit;
    let items: Vec<Position> = if start >= total {
        Vec::new()
    } else {
        closed.into_iter().skip(start).take(limit).collect()
    };
    let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };

    Json(serde_json::json!({
        "items": items,
        "page": page,
        "limit": limit,
        "total": total,
        "total_pages": total_pages,
    }))
}

#[derive(Deserialize)]
struct PerformanceQuery {
    #[serde(default = "default_performance_days")]
    days: i64,
}

fn default_performance_days() -> i64 {
    30
}

async fn trades_performance(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<PerformanceQuery>,
) -> impl IntoResponse {
    let days = q.days.clamp(1, 365);
    let since = chrono::Utc::now() - chrono::Duration::days(days);
    let symbols = state.runtime_config.read().symbols.clone();

    let closed: Vec<Position> = symbols
        .iter()
        .flat_map(|s| state.realtime.simulator.history_for(s))
        .filter(|p| p.close_time.is_some_and(|t| t >= since))
        .collect();

    let total_trades = closed.len();
    if total_trades == 0 {
        return Json(serde_json::json!({
            "days": days,
            "total_trades": 0,
            "win_rate": 0.0,
            "total_net_pnl": 0.0,
            "profit_factor": 0.0,
            "avg_win": 0.0,
            "avg_loss": 0.0,
        }));
    }

    let wins: Vec<f64> = closed.iter().map(|p| p.realized_pnl).filter(|&pnl| pnl > 0.0).collect();
    let losses: Vec<f64> = closed.iter().map(|p| p.realized_pnl).filter(|&pnl| pnl < 0.0).collect();
    let win_rate = wins.len() as f64 / total_trades as f64;
    let total_net_pnl: f64 = closed.iter().map(|p| p.realized_pnl).sum();
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|pnl| pnl.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    let avg_win = if wins.is_empty() { 0.0 } else { gross_profit / wins.len() as f64 };
    let avg_loss = if losses.is_empty() { 0.0 } else { gross_loss / losses.len() as f64 };

    Json(serde_json::json!({
        "days": days,
        "total_trades": total_trades,
        "win_rate": win_rate,
        "total_net_pnl": total_net_pnl,
        "profit_factor": profit_factor,
        "avg_win": avg_win,
        "avg_loss": avg_loss,
    }))
}

async fn trades_portfolio(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = state.runtime_config.read().symbols.clone();
    let open: Vec<Position> = symbols.iter().flat_map(|s| state.realtime.simulator.open_positions(s)).collect();
    let pending: Vec<Position> =
        symbols.iter().flat_map(|s| state.realtime.simulator.pending_positions(s)).collect();
    let balance = state.realtime.simulator.balance();

    let price_oracle = |sym: &str| -> Option<f64> {
        let key = CandleKey::new(sym, Timeframe::M1);
        state.realtime.candles.last_close(&key)
    };
    let equity = state.realtime.simulator.equity(&price_oracle);

    Json(serde_json::json!({
        "balance": balance,
        "equity": equity,
        "unrealized_pnl": equity - balance,
        "open_positions": open,
        "pending_positions": pending,
    }))
}

#[derive(Deserialize, Default)]
struct CloseQuery {
    symbol: Option<String>,
}

async fn trades_close(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<CloseQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let candidates = resolve_symbols(&state, q.symbol.as_deref());

    let symbol = candidates
        .into_iter()
        .find(|s| {
            state.realtime.simulator.pending_positions(s).iter().any(|p| p.id == id)
                || state.realtime.simulator.open_positions(s).iter().any(|p| p.id == id)
        })
        .ok_or_else(|| ApiError::not_found(format!("position {id} not found or already closed")))?;

    let key = CandleKey::new(&symbol, Timeframe::M1);
    let price = state
        .realtime
        .candles
        .last_close(&key)
        .ok_or_else(|| ApiError::bad_request(format!("no mark price available for {symbol}")))?;

    let pnl = state
        .realtime
        .simulator
        .close_manual(&symbol, id, price)
        .ok_or_else(|| ApiError::conflict(format!("position {id} is already terminal")))?;

    state.risk_engine.record_trade_result(pnl);
    state.increment_version();
    info!(%id, symbol, pnl, price, "position closed manually via API");

    if let Some(closed) = state.realtime.simulator.history_for(&symbol).into_iter().find(|p| p.id == id) {
        if let Err(e) = state.position_repo.upsert(&closed).await {
            warn!(%id, error = %e, "CRITICAL: manual close write failed");
        }
    }
    if let Err(e) = state.account_repo.save(state.realtime.simulator.balance()).await {
        warn!(error = %e, "CRITICAL: account balance write failed after manual close");
    }

    Ok(Json(serde_json::json!({
        "id": id,
        "symbol": symbol,
        "realized_pnl": pnl,
        "close_price": price,
    })))
}

#[derive(Deserialize, Default)]
struct ResetRequest {
    #[serde(default)]
    starting_balance: Option<f64>,
}

async fn trades_reset(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResetRequest>,
) -> impl IntoResponse {
    let starting_balance = body.starting_balance.unwrap_or(DEFAULT_STARTING_BALANCE);
    state.realtime.simulator.reset(starting_balance);
    state.increment_version();
    warn!(starting_balance, "paper trading state reset via API");

    if let Err(e) = state.account_repo.save(starting_balance).await {
        warn!(error = %e, "failed to persist reset account balance");
    }

    Json(serde_json::json!({ "status": "reset", "starting_balance": starting_balance }))
}

// =============================================================================
// Signals (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SignalsHistoryQuery {
    #[serde(default = "default_signal_history_days")]
    days: i64,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_trade_limit")]
    limit: usize,
    symbol: Option<String>,
    signal_type: Option<String>,
    status: Option<String>,
    min_confidence: Option<f64>,
}

fn default_signal_history_days() -> i64 {
    90
}

async fn signals_history(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<SignalsHistoryQuery>,
) -> impl IntoResponse {
    let days = q.days.clamp(1, 90);
    let filter = HistoryFilter {
        symbol: q.symbol.map(|s| s.to_uppercase()),
        direction: q.signal_type.as_deref().and_then(parse_direction),
        status: q.status.as_deref().and_then(parse_signal_status),
        min_confidence: q.min_confidence,
        since: Some(chrono::Utc::now() - chrono::Duration::days(days)),
        until: None,
    };

    let page = state.realtime.lifecycle.history(&filter, q.page.max(1), q.limit.max(1));
    Json(page)
}

async fn signals_pending(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.realtime.lifecycle.by_status(SignalStatus::Pending))
}

async fn signals_by_id(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .realtime
        .lifecycle
        .by_id(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("signal {id} not found")))
}

async fn signals_by_order_id(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .realtime
        .lifecycle
        .by_order_id(&order_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no signal with order_id '{order_id}'")))
}

#[derive(Deserialize, Default)]
struct ExecuteQuery {
    order_id: Option<String>,
}

async fn signals_execute(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<ExecuteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = q.order_id.unwrap_or_else(|| id.to_string());
    if !state.realtime.lifecycle.mark_executed(id, order_id) {
        return Err(ApiError::conflict(format!(
            "signal {id} is not actionable (already executed/expired) or does not exist"
        )));
    }
    state.increment_version();
    info!(%id, "signal marked executed via API");

    if let Some(signal) = state.realtime.lifecycle.by_id(id) {
        if let Err(e) = state.signal_repo.upsert(&signal).await {
            warn!(%id, error = %e, "signal persistence write failed (non-critical)");
        }
    }

    Ok(state.realtime.lifecycle.by_id(id).map(Json))
}

async fn signals_mark_pending(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.realtime.lifecycle.mark_pending(id) {
        return Err(ApiError::conflict(format!("signal {id} is not actionable or does not exist")));
    }
    state.increment_version();
    info!(%id, "signal marked pending via API");

    if let Some(signal) = state.realtime.lifecycle.by_id(id) {
        if let Err(e) = state.signal_repo.upsert(&signal).await {
            warn!(%id, error = %e, "signal persistence write failed (non-critical)");
        }
    }

    Ok(state.realtime.lifecycle.by_id(id).map(Json))
}

async fn signals_expire(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.realtime.lifecycle.mark_expired(id) {
        return Err(ApiError::conflict(format!("signal {id} is not actionable or does not exist")));
    }
    state.increment_version();
    info!(%id, "signal marked expired via API");

    if let Some(signal) = state.realtime.lifecycle.by_id(id) {
        if let Err(e) = state.signal_repo.upsert(&signal).await {
            warn!(%id, error = %e, "signal persistence write failed (non-critical)");
        }
    }

    Ok(state.realtime.lifecycle.by_id(id).map(Json))
}

#[derive(Deserialize)]
struct ExpireStaleQuery {
    #[serde(default = "default_signal_ttl_seconds")]
    ttl_seconds: i64,
}

fn default_signal_ttl_seconds() -> i64 {
    DEFAULT_SIGNAL_TTL_SECONDS
}

async fn signals_expire_stale(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ExpireStaleQuery>,
) -> impl IntoResponse {
    let expired = state.realtime.lifecycle.expire_stale(q.ttl_seconds);
    if expired > 0 {
        state.increment_version();
        info!(expired, ttl_seconds = q.ttl_seconds, "bulk-expired stale signals via API");
    }
    Json(serde_json::json!({ "expired": expired, "ttl_seconds": q.ttl_seconds }))
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default = "default_export_format")]
    format: String,
    symbol: Option<String>,
    #[serde(default = "default_signal_history_days")]
    days: i64,
}

fn default_export_format() -> String {
    "json".to_string()
}

async fn signals_export(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let days = q.days.clamp(1, 90);
    let filter = HistoryFilter {
        symbol: q.symbol.map(|s| s.to_uppercase()),
        direction: None,
        status: None,
        min_confidence: None,
        since: Some(chrono::Utc::now() - chrono::Duration::days(days)),
        until: None,
    };
    let page = state.realtime.lifecycle.history(&filter, 1, EXPORT_MAX_ROWS);

    match q.format.to_lowercase().as_str() {
        "csv" => {
            let csv = signals_to_csv(&page.items);
            Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
        }
        "json" => Ok(Json(page.items).into_response()),
        other => Err(ApiError::bad_request(format!("unsupported export format '{other}', use 'csv' or 'json'"))),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Columns, in order: ID, Symbol, Type, Status, Confidence, Price, Entry,
/// StopLoss, TP1, TP2, TP3, R:R Ratio, Generated At (ISO-8601), Executed At,
/// Order ID, Indicators (stringified), Reasons (`; `-joined).
fn signals_to_csv(signals: &[TradingSignal]) -> String {
    let mut out = String::from(
        "ID,Symbol,Type,Status,Confidence,Price,Entry,StopLoss,TP1,TP2,TP3,R:R Ratio,Generated At,Executed At,Order ID,Indicators,Reasons\n",
    );
    for s in signals {
        let indicators = s
            .indicators
            .iter()
            .map(|(k, v)| format!("{k}={v:.4}"))
            .collect::<Vec<_>>()
            .join("; ");
        let row = [
            s.id.to_string(),
            s.symbol.clone(),
            s.direction.to_string(),
            s.status.to_string(),
            format!("{:.4}", s.confidence),
            format!("{:.8}", s.price),
            format!("{:.8}", s.entry_price),
            format!("{:.8}", s.stop_loss),
            format!("{:.8}", s.tp_levels.tp1),
            format!("{:.8}", s.tp_levels.tp2),
            format!("{:.8}", s.tp_levels.tp3),
            format!("{:.4}", s.risk_reward_ratio),
            s.generated_at.to_rfc3339(),
            s.executed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            s.order_id.clone().unwrap_or_default(),
            indicators,
            s.reasons.join("; "),
        ];
        out.push_str(&row.iter().map(|f| csv_escape(f)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }
    out
}

// =============================================================================
// Operator control (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime_config.write().trading_mode = TradingMode::Paused;
    state.increment_version();
    info!("trading paused via API");

    Json(ControlResponse { trading_mode: "Paused".to_string(), message: "Trading paused".to_string() })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime_config.write().trading_mode = TradingMode::Live;
    state.risk_engine.clear_kill();
    state.increment_version();
    info!("trading resumed via API");

    Json(ControlResponse { trading_mode: "Live".to_string(), message: "Trading resumed".to_string() })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime_config.write().trading_mode = TradingMode::Killed;
    state.risk_engine.kill();
    state.increment_version();
    warn!("trading killed via API");

    Json(ControlResponse {
        trading_mode: "Killed".to_string(),
        message: "Trading killed — manual restart required".to_string(),
    })
}

#[derive(Deserialize)]
struct AccountModeRequest {
    account_mode: String,
    #[serde(default)]
    confirm_live: bool,
}

#[derive(Serialize)]
struct AccountModeResponse {
    account_mode: String,
}

async fn control_account_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccountModeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = match req.account_mode.to_lowercase().as_str() {
        "demo" => AccountMode::Demo,
        "live" => {
            if !req.confirm_live {
                return Err(ApiError::bad_request("switching to Live mode requires confirm_live: true"));
            }
            warn!("switching to LIVE account mode via API");
            AccountMode::Live
        }
        other => {
            return Err(ApiError::bad_request(format!("invalid account mode '{other}', use 'demo' or 'live'")));
        }
    };

    state.runtime_config.write().account_mode = mode;
    state.increment_version();
    info!(account_mode = %mode, "account mode changed via API");

    Ok(Json(AccountModeResponse { account_mode: mode.to_string() }))
}
