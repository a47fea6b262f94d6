//! Broker configuration with production defaults

use std::time::Duration;

use crate::error::BrokerError;
use crate::identity::{normalize_scopes, Authority, AuthorityTemplate};

/// Azure CLI public client
pub const DEFAULT_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/organizations";
pub const DEFAULT_AUTHORITY_TEMPLATE: &str = "https://login.microsoftonline.com/{tenant}";
pub const DEFAULT_SCOPE: &str = "https://management.azure.com//.default";
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub client_id: String,
    pub authority: String,
    pub authority_template: String,
    pub scopes: Vec<String>,
    pub management_endpoint: String,
    pub http_timeout: Duration,
    /// Overall deadline for the run; none means wait for the user
    pub deadline: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            authority_template: DEFAULT_AUTHORITY_TEMPLATE.to_string(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
            management_endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            deadline: None,
        }
    }
}

/// Configuration after every value has been checked
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub client_id: String,
    pub authority: Authority,
    pub authority_template: AuthorityTemplate,
    pub scopes: Vec<String>,
    pub management_endpoint: String,
    pub http_timeout: Duration,
    pub deadline: Option<Duration>,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<ValidatedConfig, BrokerError> {
        let client_id = self.client_id.trim();
        if client_id.is_empty() {
            return Err(BrokerError::Config("client id must not be empty".to_string()));
        }

        let scopes = normalize_scopes(&self.scopes);
        if scopes.is_empty() {
            return Err(BrokerError::Config(
                "at least one resource scope is required".to_string(),
            ));
        }

        let endpoint = self.management_endpoint.trim_end_matches('/');
        if !endpoint.starts_with("https://") {
            return Err(BrokerError::Config(format!(
                "Management endpoint must use https: {}",
                self.management_endpoint
            )));
        }

        if self.http_timeout.is_zero() {
            return Err(BrokerError::Config("HTTP timeout must be positive".to_string()));
        }

        Ok(ValidatedConfig {
            client_id: client_id.to_string(),
            authority: Authority::parse(&self.authority)?,
            authority_template: AuthorityTemplate::new(self.authority_template.clone())?,
            scopes,
            management_endpoint: endpoint.to_string(),
            http_timeout: self.http_timeout,
            deadline: self.deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = BrokerConfig::default().validate().unwrap();
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.authority.tenant(), "organizations");
        assert_eq!(
            config.authority_template.for_realm("t1").unwrap().tenant(),
            "t1"
        );
        assert_eq!(config.scopes, vec![DEFAULT_SCOPE.to_string()]);
        assert_eq!(config.management_endpoint, DEFAULT_MANAGEMENT_ENDPOINT);
    }

    #[test]
    fn test_rejects_only_reserved_scopes() {
        let config = BrokerConfig {
            scopes: vec!["openid".to_string(), "offline_access".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BrokerError::Config(_))));
    }

    #[test]
    fn test_rejects_plain_http() {
        let endpoint = BrokerConfig {
            management_endpoint: "http://management.azure.com".to_string(),
            ..Default::default()
        };
        assert!(endpoint.validate().is_err());

        let authority = BrokerConfig {
            authority: "http://login.microsoftonline.com/common".to_string(),
            ..Default::default()
        };
        assert!(authority.validate().is_err());
    }

    #[test]
    fn test_rejects_blank_client_id_and_zero_timeout() {
        let blank = BrokerConfig {
            client_id: "  ".to_string(),
            ..Default::default()
        };
        assert!(blank.validate().is_err());

        let zero = BrokerConfig {
            http_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
