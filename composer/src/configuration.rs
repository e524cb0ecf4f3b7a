use crate::types::TenantId;
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Property keys with a meaning for downstream consumers. The composer itself
/// treats every value as opaque text.
pub mod keys {
    pub const CLIENT_ID: &str = "client-id";
    pub const CLIENT_SECRET: &str = "client-secret";
    pub const ISSUER_URI: &str = "issuer-uri";
    /// Comma-separated hostnames the tenant serves.
    pub const ROUTING_DOMAINS: &str = "routing-domains";
    /// Comma-separated allowed CORS origins.
    pub const CORS_ORIGINS: &str = "cors-origins";
}

/// Partial configuration of one tenant, contributed by one origin resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigurationFragment {
    /// Identity of the origin resource; stable across updates to it.
    pub fragment_id: String,
    pub tenant_id: TenantId,
    pub properties: BTreeMap<String, String>,
}

impl ConfigurationFragment {
    pub fn new<I>(fragment_id: I, tenant_id: TenantId, properties: BTreeMap<String, String>) -> Self
    where
        I: Into<String>,
    {
        ConfigurationFragment {
            fragment_id: fragment_id.into(),
            tenant_id,
            properties,
        }
    }
}

/// Layered union of a tenant's fragments, keyed by fragment id in
/// registration order. On key conflicts the most recently registered layer
/// wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposedConfiguration {
    layers: IndexMap<String, BTreeMap<String, String>>,
}

impl ComposedConfiguration {
    /// Effective value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.layers
            .values()
            .rev()
            .find_map(|layer| layer.get(key))
            .map(String::as_str)
    }

    /// Effective value of a comma-separated `key`, split and trimmed, with
    /// empty items dropped.
    pub fn get_list(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All effective properties.
    pub fn properties(&self) -> BTreeMap<&str, &str> {
        let mut merged = BTreeMap::new();
        for layer in self.layers.values() {
            for (key, value) in layer {
                merged.insert(key.as_str(), value.as_str());
            }
        }
        merged
    }

    pub fn layer(&self, fragment_id: &str) -> Option<&BTreeMap<String, String>> {
        self.layers.get(fragment_id)
    }

    /// Fragment ids in registration order.
    pub fn fragment_ids(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Adds a layer, or replaces it. A replaced layer moves to the most
    /// recent position.
    pub(crate) fn insert_layer(&mut self, fragment_id: String, properties: BTreeMap<String, String>) {
        self.layers.shift_remove(&fragment_id);
        self.layers.insert(fragment_id, properties);
    }

    pub(crate) fn remove_layer(&mut self, fragment_id: &str) -> bool {
        self.layers.shift_remove(fragment_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_last_registered_wins() {
        let mut config = ComposedConfiguration::default();
        config.insert_layer("f1".into(), props(&[("a", "1"), ("b", "2")]));
        config.insert_layer("f2".into(), props(&[("b", "3"), ("c", "4")]));

        assert_eq!(config.get("a"), Some("1"));
        assert_eq!(config.get("b"), Some("3"));
        assert_eq!(config.get("c"), Some("4"));
        assert_eq!(config.get("d"), None);
        assert_eq!(
            config.properties(),
            BTreeMap::from([("a", "1"), ("b", "3"), ("c", "4")])
        );

        // Replacing f1 makes it the most recent layer
        config.insert_layer("f1".into(), props(&[("b", "5")]));
        assert_eq!(config.get("b"), Some("5"));
        assert_eq!(config.get("a"), None);
        assert_eq!(config.fragment_ids().collect::<Vec<_>>(), vec!["f2", "f1"]);
    }

    #[test]
    fn test_remove_layer() {
        let mut config = ComposedConfiguration::default();
        config.insert_layer("f1".into(), props(&[("a", "1"), ("b", "2")]));
        config.insert_layer("f2".into(), props(&[("b", "3")]));

        assert!(config.remove_layer("f2"));
        assert!(!config.remove_layer("f2"));
        assert_eq!(config.get("b"), Some("2"));
        assert_eq!(config.len(), 1);

        assert!(config.remove_layer("f1"));
        assert!(config.is_empty());
    }

    #[test]
    fn test_get_list() {
        let mut config = ComposedConfiguration::default();
        config.insert_layer(
            "f1".into(),
            props(&[(keys::ROUTING_DOMAINS, " a.example, b.example ,,")]),
        );

        assert_eq!(
            config.get_list(keys::ROUTING_DOMAINS),
            vec!["a.example", "b.example"]
        );
        assert!(config.get_list(keys::CORS_ORIGINS).is_empty());
    }
}
