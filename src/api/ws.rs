// =============================================================================
// WebSocket Handler — per-symbol push feed (C10 glue)
// =============================================================================
//
// `GET /ws/stream/{symbol}`: on accept, sends a single `snapshot` frame, then
// forwards every `WsManager`-registered broadcast for that symbol as an
// incremental frame. Client `{type:"ping"}`/`{type:"subscribe", symbol}`
// frames are answered in-band. Grounded on the teacher's original
// `handle_ws_connection` (split sender/receiver, `tokio::select!` loop,
// Ping/Pong/Close handling) generalized from "poll `state_version` every
// 500ms" to "subscribe to this symbol's slice of the event bus via
// `WsManager`".

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::indicators::{self, IndicatorSnapshot};
use crate::market_data::CandleKey;
use crate::types::Timeframe;

const SNAPSHOT_LOOKBACK: usize = 200;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    ws.on_upgrade(move |socket| handle_connection(socket, state, symbol))
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Ping,
    Subscribe { symbol: String },
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, mut symbol: String) {
    let client_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.ws_manager.connect(&symbol, &client_id, tx);
    info!(%client_id, %symbol, "WebSocket client connected");

    if let Err(e) = send_json(&mut sender, &initial_snapshot(&state, &symbol)).await {
        warn!(%client_id, error = %e, "failed to send initial snapshot");
        state.ws_manager.disconnect(&client_id);
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Ping) => {
                                let _ = sender.send(Message::Text(r#"{"type":"pong"}"#.to_string().into())).await;
                            }
                            Ok(ClientFrame::Subscribe { symbol: new_symbol }) => {
                                let new_symbol = new_symbol.to_uppercase();
                                state.ws_manager.disconnect(&client_id);
                                symbol = new_symbol;
                                let (new_tx, new_rx) = mpsc::unbounded_channel::<String>();
                                state.ws_manager.connect(&symbol, &client_id, new_tx);
                                rx = new_rx;
                                let _ = send_json(&mut sender, &initial_snapshot(&state, &symbol)).await;
                            }
                            Err(e) => debug!(%client_id, error = %e, "ignoring unrecognised client frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%client_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.ws_manager.disconnect(&client_id);
    info!(%client_id, "WebSocket client disconnected");
}

fn initial_snapshot(state: &Arc<AppState>, symbol: &str) -> serde_json::Value {
    let key = CandleKey::new(symbol, Timeframe::M1);
    let closed = state.realtime.candles.latest(&key, SNAPSHOT_LOOKBACK);
    let data: IndicatorSnapshot = indicators::compute_snapshot(&closed);
    let candle = closed.last().cloned();

    serde_json::json!({
        "type": "snapshot",
        "symbol": symbol,
        "data": data,
        "candle": candle,
    })
}

async fn send_json<S>(sender: &mut S, value: &serde_json::Value) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    sender.send(Message::Text(text.into())).await
}
