//! UK DVLA vehicle enquiry service
//!
//! <https://developer-portal.driver-vehicle-licensing.api.gov.uk>

use super::{LookupCache, LookupError, RegistryClient, RegistryLookup};
use crate::config::{DvlaSettings, TARGET_TYPE_PLATE};
use crate::error::{Anpr2MqttError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Current and historic GB registration formats
const REG_RE: &str = r"(^[A-Z]{2}[0-9]{2}\s?[A-Z]{3}$)|(^[A-Z][0-9]{1,3}[A-Z]{3}$)|(^[A-Z]{3}[0-9]{1,3}[A-Z]$)|(^[0-9]{1,4}[A-Z]{1,2}$)|(^[0-9]{1,3}[A-Z]{1,3}$)|(^[A-Z]{1,2}[0-9]{1,4}$)|(^[A-Z]{1,3}[0-9]{1,3}$)|(^[A-Z]{1,3}[0-9]{1,4}$)|(^[0-9]{3}[DX]{1}[0-9]{3}$)";

const ENQUIRY_PATH: &str = "/vehicle-enquiry/v1/vehicles";
const CACHE_CAPACITY: usize = 512;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DvlaClient {
    api_key: String,
    client: Client,
    base_url: String,
    reg_re: Regex,
    cache: LookupCache,
    cache_ttl: u64,
}

impl DvlaClient {
    pub const ID: &'static str = "GB";

    pub fn new(api_key: impl Into<String>, cache_ttl: u64) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Anpr2MqttError::Registry("DVLA API key is empty".to_string()));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let reg_re = Regex::new(REG_RE).map_err(|e| Anpr2MqttError::Pattern(e.to_string()))?;
        Ok(Self {
            api_key,
            client,
            base_url: DvlaSettings::default().base_url,
            reg_re,
            cache: LookupCache::new(CACHE_CAPACITY),
            cache_ttl,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build a client if an API key is configured
    pub fn from_settings(settings: &DvlaSettings) -> Result<Option<Self>> {
        match settings.api_key.as_deref() {
            Some(key) if !key.is_empty() => {
                Ok(Some(Self::new(key, settings.cache_ttl)?.with_base_url(settings.base_url.clone())))
            }
            _ => Ok(None),
        }
    }

    /// True if the identifier looks like a GB registration
    pub fn is_valid_registration(&self, identifier: &str) -> bool {
        self.reg_re.is_match(identifier)
    }

    async fn fetch(&self, registration: &str) -> std::result::Result<Value, LookupError> {
        debug!("Fetching DVLA info from API, cache_ttl={}", self.cache_ttl);
        let response = self
            .client
            .post(format!("{}{}", self.base_url, ENQUIRY_PATH))
            .header("x-api-key", &self.api_key)
            .json(&json!({ "registrationNumber": registration }))
            .send()
            .await
            .map_err(|e| LookupError::ApiException(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| LookupError::ApiException(e.to_string()))?;

        if status == StatusCode::OK {
            return Ok(payload);
        }
        error!("DVLA API FAIL: {} {}", status, payload);
        Err(LookupError::ApiErrors {
            errors: payload.get("errors").cloned().unwrap_or(Value::Null),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl RegistryClient for DvlaClient {
    fn target_type(&self) -> &'static str {
        TARGET_TYPE_PLATE
    }

    async fn lookup(&self, identifier: &str) -> RegistryLookup {
        if !self.is_valid_registration(identifier) {
            warn!("DVLA SKIP invalid reg {}", identifier);
            return RegistryLookup::Failed(LookupError::RegMatchFail(Self::ID.to_string()));
        }

        let registration = identifier.to_uppercase();
        if let Some(cached) = self.cache.get(&registration) {
            debug!("DVLA API cached response for {}", registration);
            return RegistryLookup::Found(cached);
        }

        match self.fetch(&registration).await {
            Ok(payload) => {
                self.cache.set(&registration, payload.clone(), self.cache_ttl);
                RegistryLookup::Found(payload)
            }
            Err(e) => RegistryLookup::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_formats() {
        let client = DvlaClient::new("key", 60).unwrap();
        for reg in ["AB12CDE", "AB12 CDE", "A123BCD", "ABC123D", "1234AB", "AB1234", "ABC123", "123D456"] {
            assert!(client.is_valid_registration(reg), "{} should be valid", reg);
        }
        for reg in ["", "ab12cde", "AB12CDEF", "B4DM3N!", "12345678"] {
            assert!(!client.is_valid_registration(reg), "{} should be invalid", reg);
        }
    }

    #[tokio::test]
    async fn test_invalid_registration_skips_network() {
        let client = DvlaClient::new("key", 60)
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let result = client.lookup("NOT A PLATE").await;
        assert_eq!(result, RegistryLookup::Failed(LookupError::RegMatchFail("GB".to_string())));
    }

    #[tokio::test]
    async fn test_transport_failure_is_exception() {
        let client = DvlaClient::new("key", 60)
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        match client.lookup("AB12CDE").await {
            RegistryLookup::Failed(LookupError::ApiException(_)) => {}
            other => panic!("Expected api_exception, got {:?}", other),
        }
    }

    #[test]
    fn test_from_settings_requires_key() {
        assert!(DvlaClient::from_settings(&DvlaSettings::default()).unwrap().is_none());
        let settings = DvlaSettings {
            api_key: Some("secret".to_string()),
            ..DvlaSettings::default()
        };
        let client = DvlaClient::from_settings(&settings).unwrap().unwrap();
        assert_eq!(client.target_type(), "plate");
    }

    #[test]
    fn test_blank_key_rejected() {
        assert!(matches!(DvlaClient::new("  ", 60), Err(Anpr2MqttError::Registry(_))));
    }
}
