// =============================================================================
// Signals Module
// =============================================================================
//
// Signal processing pipeline for the trading engine:
// - Deterministic five-condition scoring against the indicator snapshot
// - Per-symbol confirmation gate (whipsaw suppression)
// - Lifecycle tracking of generated signals through to execution or expiry

pub mod confirmation;
pub mod generator;
pub mod lifecycle;
pub mod signal;

pub use confirmation::{ConfirmationGate, PendingStatus};
pub use generator::{ConditionScore, GeneratorParams, SignalGenerator};
pub use lifecycle::{HistoryFilter, Page, SignalLifecycleStore};
pub use signal::{TpLevels, TradingSignal};
