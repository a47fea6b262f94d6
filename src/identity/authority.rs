//! Authorities: which realm a sign-in or token request targets

use std::fmt;

use reqwest::Url;

use crate::error::BrokerError;

const TENANT_PLACEHOLDER: &str = "{tenant}";

/// An `https` authority URL whose first path segment names the tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    url: Url,
    tenant: String,
}

impl Authority {
    pub fn parse(raw: &str) -> Result<Self, BrokerError> {
        let url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| BrokerError::Config(format!("Invalid authority '{}': {}", raw, e)))?;

        if url.scheme() != "https" {
            return Err(BrokerError::Config(format!(
                "Authority must use https: {}",
                raw
            )));
        }
        if url.host_str().is_none() {
            return Err(BrokerError::Config(format!("Authority has no host: {}", raw)));
        }

        let tenant = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_string())
            .ok_or_else(|| BrokerError::Config(format!("Authority has no tenant: {}", raw)))?;

        Ok(Self { url, tenant })
    }

    /// Tenant segment, e.g. `organizations` or a tenant id
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Host, used as the account environment
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.base())
    }

    pub fn device_code_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.base())
    }

    fn base(&self) -> String {
        format!("{}://{}/{}", self.url.scheme(), self.url.authority(), self.tenant)
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base())
    }
}

/// Builds realm authorities from a template such as
/// `https://login.microsoftonline.com/{tenant}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityTemplate {
    template: String,
}

impl AuthorityTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, BrokerError> {
        let mut template: String = template.into();
        if !template.contains(TENANT_PLACEHOLDER) {
            // Plain base URL: the realm id becomes the next path segment
            template = format!("{}/{}", template.trim_end_matches('/'), TENANT_PLACEHOLDER);
        }

        // Validate the shape once with a dummy realm
        Authority::parse(&template.replace(TENANT_PLACEHOLDER, "common"))?;

        Ok(Self { template })
    }

    pub fn for_realm(&self, realm_id: &str) -> Result<Authority, BrokerError> {
        let valid = !realm_id.is_empty()
            && realm_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');
        if !valid {
            return Err(BrokerError::Config(format!("Invalid realm id: '{}'", realm_id)));
        }

        Authority::parse(&self.template.replace(TENANT_PLACEHOLDER, realm_id))
    }
}
