//! Sovereign cloud endpoints

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::AuthError;

/// A cloud deployment with its own authority and management endpoints.
///
/// Deserializes from a cloud name (`"azure_china"`) or from a table with
/// explicit endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvironmentRepr")]
pub struct AzureEnvironment {
    name: String,
    authority_host: String,
    resource_manager_endpoint: String,
}

impl AzureEnvironment {
    pub fn azure() -> Self {
        Self::custom(
            "azure",
            "https://login.microsoftonline.com",
            "https://management.azure.com/",
        )
    }

    pub fn azure_us_government() -> Self {
        Self::custom(
            "azure_us_government",
            "https://login.microsoftonline.us",
            "https://management.usgovcloudapi.net/",
        )
    }

    pub fn azure_china() -> Self {
        Self::custom(
            "azure_china",
            "https://login.chinacloudapi.cn",
            "https://management.chinacloudapi.cn/",
        )
    }

    pub fn azure_germany() -> Self {
        Self::custom(
            "azure_germany",
            "https://login.microsoftonline.de",
            "https://management.microsoftazure.de/",
        )
    }

    /// Private clouds, or a local double in tests.
    pub fn custom(
        name: impl Into<String>,
        authority_host: impl Into<String>,
        resource_manager_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            authority_host: authority_host.into().trim_end_matches('/').to_string(),
            resource_manager_endpoint: resource_manager_endpoint.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Authority host URL without trailing slash, e.g. `https://login.microsoftonline.com`
    pub fn authority_host(&self) -> &str {
        &self.authority_host
    }

    /// Authority host name only, as recorded in MSAL cache entries.
    pub fn authority_host_name(&self) -> &str {
        self.authority_host
            .split("://")
            .nth(1)
            .unwrap_or(&self.authority_host)
            .split('/')
            .next()
            .unwrap_or_default()
    }

    pub fn resource_manager_endpoint(&self) -> &str {
        &self.resource_manager_endpoint
    }

    /// Scope requested to validate a credential against the management plane.
    pub fn management_scope(&self) -> String {
        format!(
            "{}/.default",
            self.resource_manager_endpoint.trim_end_matches('/')
        )
    }

    pub fn authorize_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", self.authority_host, tenant)
    }

    pub fn token_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, tenant)
    }

    pub fn device_code_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/v2.0/devicecode", self.authority_host, tenant)
    }

    /// Join a path onto the resource manager endpoint.
    pub fn management_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.resource_manager_endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvironmentRepr {
    Name(String),
    Custom {
        name: String,
        authority_host: String,
        resource_manager_endpoint: String,
    },
}

impl TryFrom<EnvironmentRepr> for AzureEnvironment {
    type Error = AuthError;

    fn try_from(repr: EnvironmentRepr) -> Result<Self, Self::Error> {
        match repr {
            EnvironmentRepr::Name(name) => name.parse(),
            EnvironmentRepr::Custom {
                name,
                authority_host,
                resource_manager_endpoint,
            } => Ok(Self::custom(name, authority_host, resource_manager_endpoint)),
        }
    }
}

impl Default for AzureEnvironment {
    fn default() -> Self {
        Self::azure()
    }
}

impl fmt::Display for AzureEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for AzureEnvironment {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "" | "azure" | "azurecloud" | "public" | "azurepubliccloud" => Ok(Self::azure()),
            "azurechina" | "azurechinacloud" | "china" => Ok(Self::azure_china()),
            "azureusgovernment" | "azureusgovernmentcloud" | "usgovernment" | "usgov" => {
                Ok(Self::azure_us_government())
            }
            "azuregermany" | "azuregermancloud" | "germany" => Ok(Self::azure_germany()),
            _ => Err(AuthError::InvalidConfiguration(format!(
                "unknown Azure environment '{}'",
                s
            ))),
        }
    }
}
