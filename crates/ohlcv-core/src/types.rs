//! Core domain types for candle storage and replay.

pub mod candle;
pub mod timeframe;

pub use candle::*;
pub use timeframe::*;
