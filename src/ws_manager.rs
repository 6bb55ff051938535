// =============================================================================
// WebSocket Manager (C10)
// =============================================================================
//
// Registry of `symbol -> {client_id -> connection}` plus a flat index by
// `client_id`, generalizing the teacher's single-connection `api/ws.rs`
// handler (the `futures_util::Sink` split, send-failure-means-disconnect
// idiom) into a multi-client, per-symbol broadcast registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::ClientState;

/// Outbound channel to a single connection's I/O task. The task that owns the
/// actual `axum::extract::ws::WebSocket` forwards whatever arrives here.
pub type OutboundSender = mpsc::UnboundedSender<String>;

struct ClientEntry {
    symbol: String,
    state: ClientState,
    sender: OutboundSender,
    message_count: u64,
    connected_at: DateTime<Utc>,
    last_message_at: DateTime<Utc>,
}

/// Observability view of a single connection.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub client_id: String,
    pub symbol: String,
    pub state: ClientState,
    pub message_count: u64,
    pub connected_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize)]
pub struct BroadcastResult {
    pub sent: usize,
    pub cleaned_up: usize,
}

pub struct WsManager {
    by_symbol: RwLock<HashMap<String, HashMap<String, ClientEntry>>>,
    by_client: RwLock<HashMap<String, String>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            by_symbol: RwLock::new(HashMap::new()),
            by_client: RwLock::new(HashMap::new()),
        }
    }

    /// Register a newly accepted connection.
    pub fn connect(&self, symbol: &str, client_id: &str, sender: OutboundSender) {
        let now = Utc::now();
        let entry = ClientEntry {
            symbol: symbol.to_string(),
            state: ClientState::Connected,
            sender,
            message_count: 0,
            connected_at: now,
            last_message_at: now,
        };
        self.by_symbol
            .write()
            .entry(symbol.to_string())
            .or_default()
            .insert(client_id.to_string(), entry);
        self.by_client.write().insert(client_id.to_string(), symbol.to_string());
        info!(symbol, client_id, "websocket client connected");
    }

    /// Idempotent: removing an already-absent client is a no-op.
    pub fn disconnect(&self, client_id: &str) {
        let symbol = self.by_client.write().remove(client_id);
        if let Some(symbol) = symbol {
            let mut by_symbol = self.by_symbol.write();
            if let Some(clients) = by_symbol.get_mut(&symbol) {
                clients.remove(client_id);
                if clients.is_empty() {
                    by_symbol.remove(&symbol);
                }
            }
            info!(symbol, client_id, "websocket client disconnected");
        }
    }

    /// Serialize once, send to every client subscribed to `symbol`. A send
    /// failure never propagates; the connection is queued for cleanup and
    /// removed after the broadcast pass completes.
    pub fn broadcast(&self, symbol: &str, message: &str) -> BroadcastResult {
        let mut failed = Vec::new();
        let mut sent = 0usize;

        {
            let mut by_symbol = self.by_symbol.write();
            if let Some(clients) = by_symbol.get_mut(symbol) {
                for (client_id, entry) in clients.iter_mut() {
                    match entry.sender.send(message.to_string()) {
                        Ok(()) => {
                            sent += 1;
                            entry.message_count += 1;
                            entry.last_message_at = Utc::now();
                        }
                        Err(_) => failed.push(client_id.clone()),
                    }
                }
            }
        }

        for client_id in &failed {
            warn!(symbol, client_id, "broadcast send failed — disconnecting");
            self.disconnect(client_id);
        }

        BroadcastResult { sent, cleaned_up: failed.len() }
    }

    /// Fire-and-forget single send; self-cleans on failure.
    pub fn send_to_client(&self, client_id: &str, message: &str) -> bool {
        let sent = {
            let by_symbol = self.by_symbol.read();
            let symbol = self.by_client.read().get(client_id).cloned();
            match symbol.and_then(|s| by_symbol.get(&s).and_then(|c| c.get(client_id))) {
                Some(entry) => entry.sender.send(message.to_string()).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.disconnect(client_id);
        }
        sent
    }

    pub fn client_count(&self, symbol: &str) -> usize {
        self.by_symbol.read().get(symbol).map(HashMap::len).unwrap_or(0)
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.by_symbol
            .read()
            .iter()
            .flat_map(|(symbol, clients)| {
                clients.iter().map(move |(client_id, entry)| ClientInfo {
                    client_id: client_id.clone(),
                    symbol: symbol.clone(),
                    state: entry.state,
                    message_count: entry.message_count,
                    connected_at: entry.connected_at,
                    last_message_at: entry.last_message_at,
                })
            })
            .collect()
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_to_empty_topic_is_a_successful_noop() {
        let mgr = WsManager::new();
        let result = mgr.broadcast("BTCUSDT", "hello");
        assert_eq!(result.sent, 0);
        assert_eq!(result.cleaned_up, 0);
    }

    #[test]
    fn broadcast_reaches_all_subscribed_clients() {
        let mgr = WsManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        mgr.connect("BTCUSDT", "client-1", tx1);
        mgr.connect("BTCUSDT", "client-2", tx2);

        let result = mgr.broadcast("BTCUSDT", "tick");
        assert_eq!(result.sent, 2);
        assert_eq!(rx1.try_recv().unwrap(), "tick");
        assert_eq!(rx2.try_recv().unwrap(), "tick");
    }

    #[test]
    fn failed_send_triggers_cleanup_and_disconnect() {
        let mgr = WsManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        mgr.connect("BTCUSDT", "client-1", tx);
        drop(rx); // receiver gone, next send fails

        let result = mgr.broadcast("BTCUSDT", "tick");
        assert_eq!(result.sent, 0);
        assert_eq!(result.cleaned_up, 1);
        assert_eq!(mgr.client_count("BTCUSDT"), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mgr = WsManager::new();
        mgr.disconnect("never-connected");
        let (tx, _rx) = mpsc::unbounded_channel();
        mgr.connect("ETHUSDT", "client-9", tx);
        mgr.disconnect("client-9");
        mgr.disconnect("client-9");
        assert_eq!(mgr.client_count("ETHUSDT"), 0);
    }

    #[test]
    fn per_symbol_broadcast_does_not_reach_other_symbols() {
        let mgr = WsManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.connect("ETHUSDT", "client-1", tx);
        mgr.broadcast("BTCUSDT", "tick");
        assert!(rx.try_recv().is_err());
    }
}
