//! Subscription Registry
//!
//! Maps source keys (feed symbols, or raw column values in file mode) to the
//! endpoint dataset that receives their quotes, and output field names to
//! input column indices for file mode.
//!
//! # Lifecycle
//!
//! The registry is filled once during startup and then frozen behind an
//! `Arc`. After that it is only read, concurrently, by the handshake
//! controller and the publish worker, so it carries no lock.

use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Types
// =============================================================================

/// A source key (feed symbol or raw column value).
pub type SourceKey = String;

/// Opaque endpoint dataset identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(String);

impl DatasetId {
    /// Wrap a dataset identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DatasetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One source key routed to one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Symbol or raw column value.
    pub source_key: SourceKey,
    /// Destination dataset.
    pub dataset_id: DatasetId,
}

/// Output field name bound to an input column (file mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Name emitted in the quote document.
    pub field_name: String,
    /// Zero-based input column.
    pub column_index: usize,
}

// =============================================================================
// Registry
// =============================================================================

/// Source-key and field routing tables.
///
/// # Example
///
/// ```rust
/// use quote_bridge::domain::subscription::{DatasetId, SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// registry.register("EURUSD", "DS1");
/// registry.register("EURUSD.m", "DS1");
///
/// assert_eq!(registry.resolve("EURUSD"), Some(&DatasetId::new("DS1")));
/// assert_eq!(registry.resolve("GBPUSD"), None);
/// assert_eq!(registry.datasets().len(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    routes: HashMap<SourceKey, DatasetId>,
    key_order: Vec<SourceKey>,
    fields: Vec<FieldMapping>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured subscriptions and field mappings.
    #[must_use]
    pub fn from_parts(
        subscriptions: impl IntoIterator<Item = Subscription>,
        fields: impl IntoIterator<Item = FieldMapping>,
    ) -> Self {
        let mut registry = Self::new();
        for sub in subscriptions {
            registry.register(sub.source_key, sub.dataset_id);
        }
        for field in fields {
            registry.map_field(field.field_name, field.column_index);
        }
        registry
    }

    /// Route a source key to a dataset. Re-registering a key replaces its dataset.
    pub fn register(&mut self, source_key: impl Into<SourceKey>, dataset_id: impl Into<DatasetId>) {
        let source_key = source_key.into();
        if self
            .routes
            .insert(source_key.clone(), dataset_id.into())
            .is_none()
        {
            self.key_order.push(source_key);
        }
    }

    /// Bind an output field to an input column. Re-mapping a name moves its column.
    pub fn map_field(&mut self, field_name: impl Into<String>, column_index: usize) {
        let field_name = field_name.into();
        if let Some(existing) = self.fields.iter_mut().find(|f| f.field_name == field_name) {
            existing.column_index = column_index;
        } else {
            self.fields.push(FieldMapping {
                field_name,
                column_index,
            });
        }
    }

    /// Look up the dataset for a source key.
    #[must_use]
    pub fn resolve(&self, source_key: &str) -> Option<&DatasetId> {
        self.routes.get(source_key)
    }

    /// Distinct datasets in first-registration order.
    #[must_use]
    pub fn datasets(&self) -> Vec<DatasetId> {
        let mut seen = Vec::new();
        for key in &self.key_order {
            if let Some(dataset) = self.routes.get(key)
                && !seen.contains(dataset)
            {
                seen.push(dataset.clone());
            }
        }
        seen
    }

    /// Source keys routed to `dataset`, in registration order.
    #[must_use]
    pub fn source_keys_for(&self, dataset: &DatasetId) -> Vec<SourceKey> {
        self.key_order
            .iter()
            .filter(|key| self.routes.get(*key) == Some(dataset))
            .cloned()
            .collect()
    }

    /// Field mappings in configured order.
    #[must_use]
    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    /// Number of registered source keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no source key is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_registered_key() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("EURUSD", "DS1");

        assert_eq!(registry.resolve("EURUSD"), Some(&DatasetId::new("DS1")));
    }

    #[test]
    fn resolve_unknown_key_is_none() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("EURUSD", "DS1");

        assert!(registry.resolve("USDJPY").is_none());
        assert!(registry.resolve("eurusd").is_none());
    }

    #[test]
    fn reregistering_replaces_dataset() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("EURUSD", "DS1");
        registry.register("EURUSD", "DS2");

        assert_eq!(registry.resolve("EURUSD"), Some(&DatasetId::new("DS2")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.datasets(), vec![DatasetId::new("DS2")]);
    }

    #[test]
    fn datasets_are_distinct_and_ordered() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("GBPUSD", "DS2");
        registry.register("EURUSD", "DS1");
        registry.register("EURUSD.m", "DS1");
        registry.register("GBPUSD.m", "DS2");

        assert_eq!(
            registry.datasets(),
            vec![DatasetId::new("DS2"), DatasetId::new("DS1")]
        );
    }

    #[test]
    fn source_keys_for_dataset() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("EURUSD", "DS1");
        registry.register("GBPUSD", "DS2");
        registry.register("EURUSD.m", "DS1");

        assert_eq!(
            registry.source_keys_for(&DatasetId::new("DS1")),
            vec!["EURUSD".to_string(), "EURUSD.m".to_string()]
        );
        assert!(registry.source_keys_for(&DatasetId::new("DS9")).is_empty());
    }

    #[test]
    fn field_mappings_keep_configured_order() {
        let mut registry = SubscriptionRegistry::new();
        registry.map_field("ask", 3);
        registry.map_field("bid", 2);
        registry.map_field("ask", 4);

        let names: Vec<_> = registry
            .fields()
            .iter()
            .map(|f| (f.field_name.as_str(), f.column_index))
            .collect();
        assert_eq!(names, vec![("ask", 4), ("bid", 2)]);
    }

    #[test]
    fn from_parts_builds_both_tables() {
        let registry = SubscriptionRegistry::from_parts(
            vec![Subscription {
                source_key: "EURUSD".to_string(),
                dataset_id: DatasetId::new("DS1"),
            }],
            vec![FieldMapping {
                field_name: "bid".to_string(),
                column_index: 2,
            }],
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.fields().len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn concurrent_reads_after_freeze() {
        use std::sync::Arc;
        use std::thread;

        let mut registry = SubscriptionRegistry::new();
        for i in 0..10 {
            registry.register(format!("SYM{i}"), format!("DS{}", i % 3));
        }
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let r = Arc::clone(&registry);
                thread::spawn(move || r.resolve(&format!("SYM{i}")).cloned())
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let resolved = handle.join().unwrap();
            assert_eq!(resolved, Some(DatasetId::new(format!("DS{}", i % 3))));
        }
    }
}
