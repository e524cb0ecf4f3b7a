use crate::configuration::ConfigurationFragment;
use crate::sync::resource::{Resource, ResourceKind};
use crate::types::TenantId;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Labels a resource must carry to contribute gateway configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LabelSelector {
    /// Label holding the owning tenant id.
    pub tenant: String,
    /// Label marking the resource as gateway configuration.
    pub kind: String,
    /// Required value of the `kind` label.
    pub kind_value: String,
}

impl Default for LabelSelector {
    fn default() -> Self {
        LabelSelector {
            tenant: "gateway.io/tenant".into(),
            kind: "gateway.io/kind".into(),
            kind_value: "gateway-config".into(),
        }
    }
}

/// Maps raw resources to configuration fragments. The payload decoding
/// strategy is selected by resource kind.
#[derive(Clone, Debug, Default)]
pub struct FragmentMapper {
    labels: LabelSelector,
}

impl FragmentMapper {
    pub fn new(labels: LabelSelector) -> Self {
        FragmentMapper { labels }
    }

    /// Tenant and fragment id of a qualifying resource, read from its labels
    /// and uid only. The payload is not inspected.
    pub fn identify(&self, resource: &Resource) -> Option<(TenantId, String)> {
        if resource.labels.get(&self.labels.kind) != Some(&self.labels.kind_value) {
            return None;
        }

        let tenant_id = resource
            .labels
            .get(&self.labels.tenant)
            .and_then(|raw| TenantId::new(raw))?;
        Some((tenant_id, resource.uid.clone()))
    }

    /// Returns `None` for resources that do not qualify: missing or blank
    /// tenant label, missing marker label, or an undecodable payload.
    pub fn map(&self, kind: ResourceKind, resource: &Resource) -> Option<ConfigurationFragment> {
        let (tenant_id, fragment_id) = self.identify(resource)?;

        let properties = match kind {
            ResourceKind::ConfigMap => resource.data.clone(),
            ResourceKind::Secret => decode_payload(resource)?,
        };

        Some(ConfigurationFragment::new(fragment_id, tenant_id, properties))
    }
}

fn decode_payload(resource: &Resource) -> Option<BTreeMap<String, String>> {
    let mut decoded = BTreeMap::new();
    for (key, value) in &resource.data {
        let bytes = match STANDARD.decode(value.trim()) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(uid = %resource.uid, key = %key, %error, "invalid base64 in resource payload");
                return None;
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => {
                decoded.insert(key.clone(), text);
            }
            Err(error) => {
                tracing::warn!(uid = %resource.uid, key = %key, %error, "resource payload is not utf-8");
                return None;
            }
        }
    }
    Some(decoded)
}
