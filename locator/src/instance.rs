use composer::{DeploymentId, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single reachable backend endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub tenant_id: TenantId,
    pub deployment_id: DeploymentId,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ServiceInstance {
    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme(), self.authority())
    }
}
