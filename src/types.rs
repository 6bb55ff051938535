// =============================================================================
// Shared domain types used across the trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against real funds or simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Candle aggregation timeframe. Only the three the core tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
}

impl Timeframe {
    /// Binance kline interval string for this timeframe.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M15 => "15m",
            Self::H1 => "1h",
        }
    }

    /// Duration of one bar in milliseconds.
    pub fn step_millis(&self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M15 => 15 * 60_000,
            Self::H1 => 60 * 60_000,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::M1),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a trading signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    Neutral,
}

impl SignalDirection {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Neutral)
    }

    /// The direction opposite this one. `Neutral` has no opposite and maps to itself.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Neutral => Self::Neutral,
        }
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Lifecycle status of a `TradingSignal`. Forms a DAG — never transitions
/// back to `Generated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStatus {
    Generated,
    Pending,
    Executed,
    Expired,
}

impl SignalStatus {
    /// Whether a signal in this status can still transition (is not terminal).
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Generated | Self::Pending)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generated => write!(f, "GENERATED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Side of a `Position` (long or short the underlying).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl From<SignalDirection> for Option<PositionSide> {
    fn from(dir: SignalDirection) -> Self {
        match dir {
            SignalDirection::Buy => Some(PositionSide::Long),
            SignalDirection::Sell => Some(PositionSide::Short),
            SignalDirection::Neutral => None,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Lifecycle status of a `Position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
    Cancelled,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Reason a `Position` left the OPEN or PENDING state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Liquidation,
    SignalReversal,
    NewSignalOverride,
    TtlExpired,
    Merged,
    ManualClose,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopLoss => "STOP_LOSS",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::Liquidation => "LIQUIDATION",
            Self::SignalReversal => "SIGNAL_REVERSAL",
            Self::NewSignalOverride => "NEW_SIGNAL_OVERRIDE",
            Self::TtlExpired => "TTL_EXPIRED",
            Self::Merged => "MERGED",
            Self::ManualClose => "MANUAL_CLOSE",
        };
        write!(f, "{s}")
    }
}

/// Connection lifecycle state for a `ClientConnection` in the WS manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Tag on a `BroadcastEvent` — matches the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastEventType {
    Candle1m,
    Candle15m,
    Candle1h,
    Signal,
    StateChange,
    Status,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_direction_opposite() {
        assert_eq!(SignalDirection::Buy.opposite(), SignalDirection::Sell);
        assert_eq!(SignalDirection::Sell.opposite(), SignalDirection::Buy);
        assert_eq!(SignalDirection::Neutral.opposite(), SignalDirection::Neutral);
    }

    #[test]
    fn signal_status_actionable() {
        assert!(SignalStatus::Generated.is_actionable());
        assert!(SignalStatus::Pending.is_actionable());
        assert!(!SignalStatus::Executed.is_actionable());
        assert!(!SignalStatus::Expired.is_actionable());
    }

    #[test]
    fn timeframe_roundtrip() {
        for tf in [Timeframe::M1, Timeframe::M15, Timeframe::H1] {
            assert_eq!(Timeframe::from_str(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::from_str("4h"), None);
    }

    #[test]
    fn trading_mode_default_is_paused() {
        assert_eq!(TradingMode::default(), TradingMode::Paused);
    }
}
