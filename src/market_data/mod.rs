pub mod candle;
pub mod candle_store;

pub use candle::{Candle, CandleKey};
pub use candle_store::{AppendOutcome, CandleStore};
