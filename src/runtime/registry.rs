//! Filter factory registry
//!
//! Maps protocol names to constructors. The built-in filters are registered when
//! the registry is first touched; applications may add their own at any time.

use super::node::FilterNode;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

type FilterFactory = Box<dyn Fn() -> Box<dyn FilterNode> + Send + Sync>;

pub(crate) struct FilterRegistry {
    factories: BTreeMap<String, FilterFactory>,
    instance_counts: HashMap<String, usize>,
}

impl FilterRegistry {
    fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            instance_counts: HashMap::new(),
        }
    }

    /// Register (or replace) the constructor for a protocol
    pub(crate) fn register<F>(&mut self, protocol: &str, factory: F)
    where
        F: Fn() -> Box<dyn FilterNode> + Send + Sync + 'static,
    {
        debug!("Registered filter protocol '{}'", protocol);
        self.factories.insert(protocol.to_string(), Box::new(factory));
    }

    fn create(&mut self, protocol: &str) -> Option<Box<dyn FilterNode>> {
        let factory = self.factories.get(protocol)?;
        let mut node = factory();

        let count = self.instance_counts.entry(protocol.to_string()).or_insert(0);
        node.base_mut().set_instance(*count);
        *count += 1;

        let name = node.base().default_name(protocol, &[]);
        node.base_mut().set_default_name(name);
        Some(node)
    }

    fn protocols(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

// Global filter registry
lazy_static::lazy_static! {
    static ref FILTER_REGISTRY: Mutex<FilterRegistry> = {
        let mut registry = FilterRegistry::new();
        crate::nodes::register_builtin_filters(&mut registry);
        Mutex::new(registry)
    };
}

fn registry() -> std::sync::MutexGuard<'static, FilterRegistry> {
    FILTER_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register a custom filter type under `protocol`
pub fn register_filter<F>(protocol: &str, factory: F)
where
    F: Fn() -> Box<dyn FilterNode> + Send + Sync + 'static,
{
    registry().register(protocol, factory);
}

/// Construct a filter by protocol name, assigning its per-protocol instance number
pub fn create_filter(protocol: &str) -> Option<Box<dyn FilterNode>> {
    registry().create(protocol)
}

/// Every registered protocol name, sorted
pub fn enum_protocols() -> Vec<String> {
    registry().protocols()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::CaptureSource;

    #[test]
    fn test_builtins_registered() {
        let protocols = enum_protocols();
        for p in ["Clock Recovery (PLL)", "FIR Filter", "Frequency", "Threshold"] {
            assert!(protocols.iter().any(|x| x == p), "missing {p}");
        }
        assert!(create_filter("No Such Filter").is_none());
    }

    #[test]
    fn test_instance_numbers_increase() {
        register_filter("Registry Test Source", || Box::new(CaptureSource::new()));
        let a = create_filter("Registry Test Source").unwrap();
        let b = create_filter("Registry Test Source").unwrap();
        assert_eq!(b.base().instance(), a.base().instance() + 1);
        assert_eq!(a.name(), "RegistryTestSource_1()");
    }
}
