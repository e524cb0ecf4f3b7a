//! Per-tenant configuration composed from fragments contributed by external
//! resources.

mod composer;
mod configuration;
pub mod metrics_defs;
pub mod sync;
mod types;

pub use composer::{ConfigFragmentComposer, ConfigurationEvent};
pub use configuration::{ComposedConfiguration, ConfigurationFragment, keys};
pub use types::{DeploymentId, IdError, TenantId};
