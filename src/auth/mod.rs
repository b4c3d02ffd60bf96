//! Authentication for Azure management-plane tools
//!
//! Decides which login strategy works in the current environment, builds a
//! credential from it, proves it with a live token round-trip and hands back
//! an [`Account`].

pub mod account;
pub mod credential;
pub mod environment;
pub mod error;
pub mod executor;
pub mod oauth;
pub mod probe;
pub mod resolver;
pub mod strategies;
pub mod tokens;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use account::Account;
pub use credential::{TokenCredential, TokenCredentialHandle, TokenRequest};
pub use environment::AzureEnvironment;
pub use error::{AuthError, CredentialError, LoginFailure};
pub use executor::WorkerPool;
pub use probe::HostProbe;
pub use resolver::{Resolver, ValidationResult};
pub use strategies::{Availability, StrategyKind};
pub use tokens::{AccessToken, CachedLogin, TokenCache};

/// Azure CLI first-party client id, used when no client is configured
pub const DEFAULT_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// VS Code Azure Account client id, owner of the shared IDE token cache
pub const VSCODE_CLIENT_ID: &str = "aebc6443-996d-45c2-90f0-388ff96faa56";

/// Tenant used by user logins when none is configured (work/school accounts)
pub const DEFAULT_TENANT: &str = "organizations";

/// Which strategy the user asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    /// Try every strategy in priority order
    #[default]
    Auto,
    ServicePrincipal,
    ManagedIdentity,
    DeviceCode,
    /// Interactive browser login
    #[serde(rename = "OAUTH2")]
    OAuth2,
    /// Shared IDE token cache
    #[serde(rename = "VSCODE")]
    VsCode,
    /// Environment variables or an Azure CLI session
    AzureCli,
}

impl AuthType {
    /// The one strategy this hint pins, or `None` for AUTO.
    pub fn pinned_strategy(self) -> Option<StrategyKind> {
        match self {
            AuthType::Auto => None,
            AuthType::ServicePrincipal => Some(StrategyKind::ServicePrincipal),
            AuthType::ManagedIdentity => Some(StrategyKind::ManagedIdentity),
            AuthType::DeviceCode => Some(StrategyKind::DeviceCode),
            AuthType::OAuth2 => Some(StrategyKind::InteractiveBrowser),
            AuthType::VsCode => Some(StrategyKind::SharedTokenCache),
            AuthType::AzureCli => Some(StrategyKind::EnvironmentDelegated),
        }
    }
}

impl FromStr for AuthType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "" | "AUTO" => Ok(AuthType::Auto),
            "SERVICE_PRINCIPAL" => Ok(AuthType::ServicePrincipal),
            "MANAGED_IDENTITY" => Ok(AuthType::ManagedIdentity),
            "DEVICE_CODE" => Ok(AuthType::DeviceCode),
            "OAUTH2" | "INTERACTIVE" => Ok(AuthType::OAuth2),
            "VSCODE" | "VS_CODE" => Ok(AuthType::VsCode),
            "AZURE_CLI" | "ENVIRONMENT" => Ok(AuthType::AzureCli),
            other => Err(AuthError::InvalidConfiguration(format!(
                "unknown authentication type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthType::Auto => "AUTO",
            AuthType::ServicePrincipal => "SERVICE_PRINCIPAL",
            AuthType::ManagedIdentity => "MANAGED_IDENTITY",
            AuthType::DeviceCode => "DEVICE_CODE",
            AuthType::OAuth2 => "OAUTH2",
            AuthType::VsCode => "VSCODE",
            AuthType::AzureCli => "AZURE_CLI",
        };
        f.write_str(name)
    }
}

/// Shown to the user while a device-code login waits for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodeInfo {
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in_secs: u64,
    pub message: String,
}

/// Receives the device code so it can be displayed.
pub type DeviceCodeCallback = Arc<dyn Fn(&DeviceCodeInfo) + Send + Sync>;

/// User intent for one resolution. Treated as read-only once handed to the
/// resolver; the resolver keeps its own copy inside the returned account.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfiguration {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// Application (client) id; absent means the strategy default
    pub client: Option<String>,
    pub tenant: Option<String>,
    /// Client secret
    pub key: Option<String>,
    /// PEM file path or inline PEM (certificate + private key)
    pub certificate: Option<String>,
    pub certificate_password: Option<String>,
    pub environment: AzureEnvironment,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub selected_subscription_ids: Vec<String>,
    #[serde(skip)]
    pub executor: Option<WorkerPool>,
    #[serde(skip)]
    pub device_code_callback: Option<DeviceCodeCallback>,
}

impl AuthConfiguration {
    pub fn new(auth_type: AuthType) -> Self {
        Self {
            auth_type,
            ..Self::default()
        }
    }

    /// `http://host:port` when both halves of the proxy are configured.
    pub fn proxy_url(&self) -> Option<String> {
        match (self.proxy_host.as_deref(), self.proxy_port) {
            (Some(host), Some(port)) if !host.trim().is_empty() => {
                if host.contains("://") {
                    Some(format!("{}:{}", host.trim_end_matches('/'), port))
                } else {
                    Some(format!("http://{}:{}", host, port))
                }
            }
            _ => None,
        }
    }

    pub(crate) fn client(&self) -> Option<&str> {
        non_blank(self.client.as_deref())
    }

    pub(crate) fn tenant(&self) -> Option<&str> {
        non_blank(self.tenant.as_deref())
    }

    pub(crate) fn key(&self) -> Option<&str> {
        non_blank(self.key.as_deref())
    }

    pub(crate) fn certificate(&self) -> Option<&str> {
        non_blank(self.certificate.as_deref())
    }

    pub(crate) fn certificate_password(&self) -> Option<&str> {
        non_blank(self.certificate_password.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl fmt::Debug for AuthConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[redacted]");
        f.debug_struct("AuthConfiguration")
            .field("auth_type", &self.auth_type)
            .field("client", &self.client)
            .field("tenant", &self.tenant)
            .field("key", &redact(&self.key))
            .field("certificate", &self.certificate.as_ref().map(|_| "[set]"))
            .field("certificate_password", &redact(&self.certificate_password))
            .field("environment", &self.environment.name())
            .field("proxy", &self.proxy_url())
            .field("selected_subscription_ids", &self.selected_subscription_ids)
            .field("executor", &self.executor)
            .field(
                "device_code_callback",
                &self.device_code_callback.as_ref().map(|_| "[callback]"),
            )
            .finish()
    }
}
