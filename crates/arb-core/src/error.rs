use thiserror::Error;

/// Errors raised by a venue adapter. These are caught at the adapter
/// boundary and either retried internally or folded into an `OrderResult`;
/// they reach the engine directly only for lifecycle calls (`connect`,
/// `disconnect`, `get_order_info`, `get_position`).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("order status not observed within timeout")]
    OrderTimeout,

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Top-level error type for the engine crate. `FatalUnwindFailure` is the
/// one variant that is allowed to propagate all the way to `main` and
/// terminate the process — every other variant is handled at the layer
/// that produced it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("hedge imbalance detected: {0}")]
    HedgeImbalance(String),

    #[error("fatal unwind failure: {0}")]
    FatalUnwindFailure(String),

    #[error("position sync divergence: local={local} venue={venue} tolerance={tolerance}")]
    SyncDivergence {
        local: String,
        venue: String,
        tolerance: String,
    },
}
