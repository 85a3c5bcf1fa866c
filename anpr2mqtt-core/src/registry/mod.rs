//! Vehicle registry lookups

pub mod cache;
pub mod dvla;

pub use cache::LookupCache;
pub use dvla::DvlaClient;

use crate::config::DvlaSettings;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// A registry that can describe a target
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Target type the registry knows about
    fn target_type(&self) -> &'static str;

    /// Look up a target; failures are reported in the result, never raised
    async fn lookup(&self, identifier: &str) -> RegistryLookup;
}

/// Result of a registry lookup
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryLookup {
    Found(Value),
    Failed(LookupError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupError {
    /// Identifier is not in the registry's format; carries the registry id
    RegMatchFail(String),
    /// Registry answered with an error status
    ApiErrors { errors: Value, status: u16 },
    /// Request could not be made or decoded
    ApiException(String),
}

impl RegistryLookup {
    /// Payload for the `reg_info` attribute of the state message
    pub fn to_json(&self) -> Value {
        match self {
            RegistryLookup::Found(value) => value.clone(),
            RegistryLookup::Failed(LookupError::RegMatchFail(id)) => json!({ "reg_match_fail": id }),
            RegistryLookup::Failed(LookupError::ApiErrors { errors, status }) => {
                json!({ "api_errors": errors, "api_status": status })
            }
            RegistryLookup::Failed(LookupError::ApiException(message)) => json!({ "api_exception": message }),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, RegistryLookup::Found(_))
    }
}

/// The configured registry, if any
pub fn build_registry(settings: &DvlaSettings) -> Result<Option<Arc<dyn RegistryClient>>> {
    Ok(DvlaClient::from_settings(settings)?.map(|client| Arc::new(client) as Arc<dyn RegistryClient>))
}
