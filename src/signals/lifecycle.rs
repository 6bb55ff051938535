// =============================================================================
// Signal Lifecycle Store (C5)
// =============================================================================
//
// In-memory source of truth for every generated signal's lifecycle status,
// with an optional persistence observer (see persistence::signal_repository)
// for best-effort durability. New file -- status-DAG/TTL shape grounded in
// runtime_config.rs's load/save pattern; persistence idiom grounded in
// Zuytan-rustrade's strategy_repository.rs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::types::{SignalDirection, SignalStatus};

use super::signal::TradingSignal;

/// Filters accepted by the paginated history query.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub symbol: Option<String>,
    pub direction: Option<SignalDirection>,
    pub status: Option<SignalStatus>,
    pub min_confidence: Option<f64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

pub struct SignalLifecycleStore {
    signals: RwLock<HashMap<Uuid, TradingSignal>>,
}

impl SignalLifecycleStore {
    pub fn new() -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new signal, assigning status GENERATED. Re-registering an
    /// existing id is idempotent (returns the existing entry unchanged).
    pub fn register(&self, signal: TradingSignal) -> TradingSignal {
        let mut signals = self.signals.write();
        signals.entry(signal.id).or_insert(signal).clone()
    }

    pub fn by_id(&self, id: Uuid) -> Option<TradingSignal> {
        self.signals.read().get(&id).cloned()
    }

    pub fn by_order_id(&self, order_id: &str) -> Option<TradingSignal> {
        self.signals
            .read()
            .values()
            .find(|s| s.order_id.as_deref() == Some(order_id))
            .cloned()
    }

    /// Transition to PENDING. No-op (returns false) unless currently
    /// actionable (GENERATED or PENDING).
    pub fn mark_pending(&self, id: Uuid) -> bool {
        let mut signals = self.signals.write();
        match signals.get_mut(&id) {
            Some(s) if s.status.is_actionable() => {
                s.status = SignalStatus::Pending;
                s.pending_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Transition to EXECUTED. No-op unless currently actionable.
    pub fn mark_executed(&self, id: Uuid, order_id: impl Into<String>) -> bool {
        let mut signals = self.signals.write();
        match signals.get_mut(&id) {
            Some(s) if s.status.is_actionable() => {
                s.status = SignalStatus::Executed;
                s.executed_at = Some(Utc::now());
                s.order_id = Some(order_id.into());
                true
            }
            _ => false,
        }
    }

    /// Transition to EXPIRED. No-op unless currently actionable.
    pub fn mark_expired(&self, id: Uuid) -> bool {
        let mut signals = self.signals.write();
        match signals.get_mut(&id) {
            Some(s) if s.status.is_actionable() => {
                s.status = SignalStatus::Expired;
                s.expired_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Bulk-transition stale actionable signals (older than `ttl_seconds`)
    /// to EXPIRED. Returns the number transitioned.
    pub fn expire_stale(&self, ttl_seconds: i64) -> usize {
        let now = Utc::now();
        let mut signals = self.signals.write();
        let mut count = 0;
        for s in signals.values_mut() {
            if s.status.is_actionable() && s.age_seconds(now) > ttl_seconds {
                s.status = SignalStatus::Expired;
                s.expired_at = Some(now);
                count += 1;
            }
        }
        count
    }

    pub fn by_status(&self, status: SignalStatus) -> Vec<TradingSignal> {
        self.signals
            .read()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }

    /// Paginated, filtered history sorted newest-first by `generated_at`.
    pub fn history(&self, filter: &HistoryFilter, page: usize, limit: usize) -> Page<TradingSignal> {
        let signals = self.signals.read();
        let mut matching: Vec<TradingSignal> = signals
            .values()
            .filter(|s| filter.symbol.as_deref().map_or(true, |sym| s.symbol == sym))
            .filter(|s| filter.direction.map_or(true, |d| s.direction == d))
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .filter(|s| filter.min_confidence.map_or(true, |mc| s.confidence >= mc))
            .filter(|s| filter.since.map_or(true, |since| s.generated_at >= since))
            .filter(|s| filter.until.map_or(true, |until| s.generated_at <= until))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));

        let total = matching.len();
        let page = page.max(1);
        let start = (page - 1) * limit;
        let items = if start >= total {
            Vec::new()
        } else {
            let end = (start + limit).min(total);
            matching[start..end].to_vec()
        };
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };

        Page {
            items,
            page,
            limit,
            total,
            total_pages,
        }
    }
}

impl Default for SignalLifecycleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::signal::TpLevels;
    use std::collections::HashMap as StdHashMap;

    fn signal(symbol: &str, generated_at: DateTime<Utc>) -> TradingSignal {
        TradingSignal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction: SignalDirection::Buy,
            confidence: 0.8,
            price: 100.0,
            entry_price: 100.0,
            stop_loss: 99.0,
            tp_levels: TpLevels {
                tp1: 101.0,
                tp2: 102.0,
                tp3: 103.0,
            },
            position_size: 1.0,
            risk_reward_ratio: 2.0,
            indicators: StdHashMap::new(),
            reasons: Vec::new(),
            generated_at,
            status: SignalStatus::Generated,
            pending_at: None,
            executed_at: None,
            expired_at: None,
            order_id: None,
            outcome: None,
        }
    }

    #[test]
    fn lifecycle_dag_executed_never_reopens() {
        let store = SignalLifecycleStore::new();
        let s = signal("BTCUSDT", Utc::now());
        let id = s.id;
        store.register(s);
        assert!(store.mark_executed(id, "order-1"));
        // Attempting to re-pend or re-expire an EXECUTED signal is a no-op.
        assert!(!store.mark_pending(id));
        assert!(!store.mark_expired(id));
        assert_eq!(store.by_id(id).unwrap().status, SignalStatus::Executed);
    }

    #[test]
    fn expire_stale_only_transitions_actionable_past_ttl() {
        let store = SignalLifecycleStore::new();
        let old = signal("BTCUSDT", Utc::now() - chrono::Duration::seconds(400));
        let fresh = signal("ETHUSDT", Utc::now());
        let old_id = old.id;
        let fresh_id = fresh.id;
        store.register(old);
        store.register(fresh);

        let expired = store.expire_stale(300);
        assert_eq!(expired, 1);
        assert_eq!(store.by_id(old_id).unwrap().status, SignalStatus::Expired);
        assert_eq!(store.by_id(fresh_id).unwrap().status, SignalStatus::Generated);
    }

    #[test]
    fn s6_pagination_47_trades_page_5_of_10_has_7() {
        let store = SignalLifecycleStore::new();
        let base = Utc::now();
        for i in 0..47 {
            store.register(signal("BTCUSDT", base - chrono::Duration::seconds(i)));
        }
        let page1 = store.history(&HistoryFilter::default(), 1, 10);
        assert_eq!(page1.items.len(), 10);
        assert_eq!(page1.total_pages, 5);

        let page5 = store.history(&HistoryFilter::default(), 5, 10);
        assert_eq!(page5.items.len(), 7);

        let ids1: std::collections::HashSet<_> = page1.items.iter().map(|s| s.id).collect();
        let ids5: std::collections::HashSet<_> = page5.items.iter().map(|s| s.id).collect();
        assert!(ids1.is_disjoint(&ids5));
    }

    #[test]
    fn register_is_idempotent_on_same_id() {
        let store = SignalLifecycleStore::new();
        let s = signal("BTCUSDT", Utc::now());
        let id = s.id;
        store.register(s.clone());
        store.mark_pending(id);
        store.register(s);
        assert_eq!(store.by_id(id).unwrap().status, SignalStatus::Pending);
    }
}
