//! Shared data model, error taxonomy, and clock/retry primitives for the
//! hedge arbitrage engine. Every value that crosses from a venue adapter
//! into strategy, executor, or position-manager logic is represented here
//! as `rust_decimal::Decimal` — no binary floating point reaches core logic.

pub mod clock;
pub mod error;
pub mod model;
pub mod retry;

pub use clock::{Clock, SystemClock};
pub use error::{AdapterError, EngineError};
pub use model::*;
pub use retry::{retry_with_backoff, RetryConfig};
