//! Venue adapter registry: resolves a config's `exchange_a`/`exchange_b`
//! identifiers into concrete `Arc<dyn VenueAdapter>` instances. This is the
//! explicit-ownership replacement the redesign calls for in place of a
//! process-wide exchange singleton — every strategy instance is handed its
//! own pair of adapters at construction time, nothing is looked up through
//! global state. Grounded on `original_source/arbitrage/main.py`, which
//! maps a handful of hardcoded venue-name strings to adapter classes
//! (`ExtendedAdapter`, `LighterAdapter`, `VariationalAdapter`) before
//! constructing the strategy; here the mapping is a registry rather than
//! an if/elif chain so a venue can be added without touching call sites.
//!
//! Wire-protocol clients (REST signing, WS framing, RFQ transport) are out
//! of scope for this crate: [`polling::PollingBboAdapter`],
//! [`websocket::WsSnapshotDeltaAdapter`] and [`rfq::RfqAdapter`] are left
//! generic over a venue-specific client trait with no shipped
//! implementation. The registry can therefore only resolve the `sim`
//! venue kind out of the box; a deployment wiring in a real venue
//! registers its own [`AdapterFactory`] for that venue id before startup.

use std::collections::HashMap;
use std::sync::Arc;

use adapters::sim::SimAdapter;
use adapters::VenueAdapter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no adapter factory registered for venue '{0}'")]
    UnknownVenue(String),
}

/// Builds one `Arc<dyn VenueAdapter>` for a venue id, given the symbol
/// being traded and that venue's opaque config bag
/// (`PairConfig::variational_config`).
pub type AdapterFactory =
    Arc<dyn Fn(&str, &HashMap<String, serde_yaml::Value>) -> Arc<dyn VenueAdapter> + Send + Sync>;

/// Maps venue id strings to the factory that constructs their adapter.
/// Construct with [`AdapterRegistry::with_sim_support`] for tests and
/// monitor-only demo runs, or [`AdapterRegistry::new`] plus
/// [`AdapterRegistry::register`] to wire in real venues.
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        AdapterRegistry { factories: HashMap::new() }
    }

    /// Registers every `sim:<tick-size>` venue id as a [`SimAdapter`] — a
    /// fixed-point tick size of 0.01 is used when none is given, e.g.
    /// `sim` and `sim:0.01` resolve identically.
    pub fn with_sim_support(mut self) -> Self {
        self.register("sim", Arc::new(|symbol, _config| {
            Arc::new(SimAdapter::new(symbol.to_string(), dec!(0.01))) as Arc<dyn VenueAdapter>
        }));
        self
    }

    pub fn register(&mut self, venue_id: impl Into<String>, factory: AdapterFactory) -> &mut Self {
        self.factories.insert(venue_id.into(), factory);
        self
    }

    pub fn build(
        &self,
        venue_id: &str,
        symbol: &str,
        variational_config: &HashMap<String, serde_yaml::Value>,
    ) -> Result<Arc<dyn VenueAdapter>, RegistryError> {
        let kind = venue_id.split(':').next().unwrap_or(venue_id);
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownVenue(venue_id.to_string()))?;
        Ok(factory(symbol, variational_config))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        AdapterRegistry::new().with_sim_support()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_sim_venue() {
        let registry = AdapterRegistry::default();
        let adapter = registry.build("sim", "SYM", &HashMap::new()).unwrap();
        assert_eq!(adapter.venue_name(), "SYM");
    }

    #[test]
    fn unknown_venue_is_an_error() {
        let registry = AdapterRegistry::default();
        let err = registry.build("bitget", "SYM", &HashMap::new()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownVenue(_)));
    }

    #[test]
    fn custom_factory_overrides_default() {
        let mut registry = AdapterRegistry::new();
        registry.register("sim", Arc::new(|symbol, _| {
            Arc::new(SimAdapter::new(format!("custom-{symbol}"), dec!(0.001))) as Arc<dyn VenueAdapter>
        }));
        let adapter = registry.build("sim", "SYM", &HashMap::new()).unwrap();
        assert_eq!(adapter.venue_name(), "custom-SYM");
    }
}
