//! Runtime crate for the cross-venue hedge arbitrage engine: the price
//! monitor (C2), position manager (C3), order executor (C4), strategy
//! state machine (C5), trade logger (C6), config loader (C8), and the CLI
//! entrypoint (C9) all live here. The data model, error taxonomy, and
//! clock/retry primitives (C7) live in `arb_core`; the venue-adapter
//! contract (C1) lives in `adapters`.

pub mod config;
pub mod executor;
pub mod logger;
pub mod monitor;
pub mod notifier;
pub mod position_manager;
pub mod registry;
pub mod strategy;
pub mod trade_log;

use std::sync::Once;

static INIT: Once = Once::new();

/// Loads `.env` exactly once, the first time this crate is touched.
fn init() {
    INIT.call_once(|| {
        dotenv::dotenv().ok();
    });
}

#[ctor::ctor]
fn setup() {
    init();
}
