use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use log::warn;

use crate::flow::{Direction, FlowKey};
use crate::tls::TlsAnalyzer;

mod tap;
pub use tap::TapAnalyzer;

/// Consumer of one flow's reassembled bytes, in both directions.
///
/// A single instance is shared by the flow's two reassemblers, so the
/// callbacks take `&self`; implementations keep their state behind a mutex.
/// Calls for one flow are serialized by the flow lock: `on_data` for a given
/// direction arrives in stream order, the two directions may interleave.
pub trait Analyzer: Send + Sync {
    fn on_data(&self, dir: Direction, data: &[u8]);

    /// The flow was torn down by a RST. Fired exactly once.
    fn on_reset(&self) {}

    /// One direction's stream ended with a FIN.
    fn on_closed(&self) {}
}

pub type AnalyzerFactory = fn(&FlowKey) -> Arc<dyn Analyzer>;

static REGISTRY: LazyLock<Mutex<HashMap<&'static str, AnalyzerFactory>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register a named analyzer factory. Registration happens before capture
/// starts; per-flow creation happens on every accepted opening segment.
pub fn register(name: &'static str, factory: AnalyzerFactory) {
    REGISTRY.lock().unwrap().insert(name, factory);
}

/// Register the built-in analyzers: `reassm` (tap dump) and `tls`.
pub fn register_builtin() {
    register("reassm", |key| Arc::new(TapAnalyzer::new(*key)));
    register("tls", |key| Arc::new(TlsAnalyzer::new(*key)));
}

pub fn create(name: &str, key: &FlowKey) -> Option<Arc<dyn Analyzer>> {
    REGISTRY
        .lock()
        .unwrap()
        .get(name)
        .map(|factory| factory(key))
}

/// Instantiate the named analyzers for a new flow. Unknown names are
/// reported and skipped; they never fail flow creation.
pub fn create_set(names: &[String], key: &FlowKey) -> Vec<Arc<dyn Analyzer>> {
    let mut analyzers = Vec::with_capacity(names.len());
    for name in names {
        match create(name, key) {
            Some(analyzer) => analyzers.push(analyzer),
            None => warn!("unknown analyzer {name:?} requested for {key}"),
        }
    }
    analyzers
}

pub fn registered_names() -> Vec<&'static str> {
    let mut names: Vec<_> = REGISTRY.lock().unwrap().keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Endpoint;
    use std::net::Ipv4Addr;

    fn key() -> FlowKey {
        FlowKey::new(
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 1),
                port: 1,
            },
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 2),
                port: 2,
            },
        )
    }

    #[test]
    fn builtins_are_creatable() {
        register_builtin();
        assert!(create("reassm", &key()).is_some());
        assert!(create("tls", &key()).is_some());
        assert!(registered_names().contains(&"tls"));
    }

    #[test]
    fn unknown_names_are_skipped_not_fatal() {
        register_builtin();
        let set = create_set(
            &["tls".to_string(), "quic".to_string(), "reassm".to_string()],
            &key(),
        );
        assert_eq!(set.len(), 2);
    }
}
