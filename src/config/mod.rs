//! On-disk defaults for the command line

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::{AuthConfiguration, AuthType, AzureEnvironment};

/// Defaults applied to every login unless a flag overrides them.
///
/// Secrets are never read from or written to this file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    pub client: Option<String>,
    pub tenant: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub selected_subscription_ids: Vec<String>,
    /// Last so a custom cloud serializes as a trailing table
    pub environment: Option<AzureEnvironment>,
}

/// Values given on the command line. `None` keeps the file's value.
#[derive(Debug, Default)]
pub struct Overrides {
    pub auth_type: Option<AuthType>,
    pub client: Option<String>,
    pub tenant: Option<String>,
    pub key: Option<String>,
    pub certificate: Option<String>,
    pub certificate_password: Option<String>,
    pub environment: Option<AzureEnvironment>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    /// Replaces the configured selection when non-empty
    pub subscriptions: Vec<String>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "azure-login", "azure-login")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (names tenants and clients)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Fold the non-secret overrides into the stored defaults. Keys,
    /// certificates and passwords are dropped.
    pub fn update(&mut self, overrides: Overrides) {
        if let Some(auth_type) = overrides.auth_type {
            self.auth_type = auth_type;
        }
        if overrides.client.is_some() {
            self.client = overrides.client;
        }
        if overrides.tenant.is_some() {
            self.tenant = overrides.tenant;
        }
        if overrides.environment.is_some() {
            self.environment = overrides.environment;
        }
        if overrides.proxy_host.is_some() {
            self.proxy_host = overrides.proxy_host;
        }
        if overrides.proxy_port.is_some() {
            self.proxy_port = overrides.proxy_port;
        }
        if !overrides.subscriptions.is_empty() {
            self.selected_subscription_ids = overrides.subscriptions;
        }
    }

    /// Merge file defaults with command-line overrides.
    pub fn into_auth_configuration(self, overrides: Overrides) -> AuthConfiguration {
        let selected_subscription_ids = if overrides.subscriptions.is_empty() {
            self.selected_subscription_ids
        } else {
            overrides.subscriptions
        };
        AuthConfiguration {
            auth_type: overrides.auth_type.unwrap_or(self.auth_type),
            client: overrides.client.or(self.client),
            tenant: overrides.tenant.or(self.tenant),
            key: overrides.key,
            certificate: overrides.certificate,
            certificate_password: overrides.certificate_password,
            environment: overrides
                .environment
                .or(self.environment)
                .unwrap_or_default(),
            proxy_host: overrides.proxy_host.or(self.proxy_host),
            proxy_port: overrides.proxy_port.or(self.proxy_port),
            selected_subscription_ids,
            executor: None,
            device_code_callback: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.auth_type, AuthType::Auto);
        assert!(config.selected_subscription_ids.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            auth_type: AuthType::DeviceCode,
            tenant: Some("contoso.onmicrosoft.com".to_string()),
            environment: Some(AzureEnvironment::azure_china()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.auth_type, AuthType::DeviceCode);
        assert_eq!(loaded.tenant.as_deref(), Some("contoso.onmicrosoft.com"));
        assert_eq!(loaded.environment, Some(AzureEnvironment::azure_china()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_flags_override_file() {
        let config: Config = toml::from_str(
            r#"
            type = "VSCODE"
            tenant = "file-tenant"
            client = "file-client"
            environment = "AzureUSGovernment"
            selected_subscription_ids = ["file-sub"]
            "#,
        )
        .unwrap();

        let auth = config.into_auth_configuration(Overrides {
            tenant: Some("flag-tenant".to_string()),
            key: Some("s3cret".to_string()),
            subscriptions: vec!["flag-sub".to_string()],
            ..Overrides::default()
        });
        assert_eq!(auth.auth_type, AuthType::VsCode);
        assert_eq!(auth.tenant.as_deref(), Some("flag-tenant"));
        assert_eq!(auth.client.as_deref(), Some("file-client"));
        assert_eq!(auth.key.as_deref(), Some("s3cret"));
        assert_eq!(auth.environment, AzureEnvironment::azure_us_government());
        assert_eq!(auth.selected_subscription_ids, ["flag-sub"]);
    }

    #[test]
    fn test_update_keeps_secrets_out_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config {
            tenant: Some("old-tenant".to_string()),
            proxy_port: Some(3128),
            ..Config::default()
        };

        config.update(Overrides {
            auth_type: Some(AuthType::ServicePrincipal),
            client: Some("app-id".to_string()),
            key: Some("s3cret".to_string()),
            certificate_password: Some("hunter2".to_string()),
            subscriptions: vec!["sub-1".to_string()],
            ..Overrides::default()
        });
        config.save_to(&path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("s3cret"));
        assert!(!written.contains("hunter2"));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.auth_type, AuthType::ServicePrincipal);
        assert_eq!(loaded.client.as_deref(), Some("app-id"));
        assert_eq!(loaded.tenant.as_deref(), Some("old-tenant"));
        assert_eq!(loaded.proxy_port, Some(3128));
        assert_eq!(loaded.selected_subscription_ids, ["sub-1"]);
    }
}
