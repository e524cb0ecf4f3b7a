use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of external resources that can carry gateway configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Payload values are plain text.
    ConfigMap,
    /// Payload values are base64-encoded.
    Secret,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::ConfigMap, ResourceKind::Secret];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "config_map",
            ResourceKind::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw resource as delivered by a watch.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Resource {
    /// Stable identity; becomes the fragment id.
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceEvent {
    Added(Resource),
    Updated {
        old: Resource,
        new: Resource,
    },
    Deleted {
        resource: Resource,
        /// The watch lost track of the resource and this delete is its best
        /// guess at the final state.
        final_state_unknown: bool,
    },
}
