//! Local host probing: environment variables, well-known files, desktop capability
//!
//! Availability checks only ever look at a `HostProbe` snapshot, so they stay
//! cheap and never touch the network.

use std::collections::HashMap;
use std::path::PathBuf;

/// Azure Instance Metadata Service token endpoint
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Where a managed identity token can be requested on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedIdentityEndpoint {
    /// VM / VMSS / AKS instance metadata service
    Imds(String),
    /// App Service / Functions local identity endpoint
    AppService { endpoint: String, header: String },
}

#[derive(Debug, Clone)]
pub struct HostProbe {
    vars: HashMap<String, String>,
    home: Option<PathBuf>,
    imds_endpoint: String,
    browser_available: bool,
    az_command: String,
}

impl HostProbe {
    /// Snapshot the current process environment.
    pub fn from_process() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let browser_available = if cfg!(any(target_os = "windows", target_os = "macos")) {
            true
        } else {
            ["DISPLAY", "WAYLAND_DISPLAY"]
                .iter()
                .any(|name| vars.get(*name).is_some_and(|v| !v.is_empty()))
        };
        Self {
            vars,
            home: home::home_dir(),
            imds_endpoint: IMDS_ENDPOINT.to_string(),
            browser_available,
            az_command: "az".to_string(),
        }
    }

    /// Probe with nothing detected: no variables, no home, no desktop.
    pub fn empty() -> Self {
        Self {
            vars: HashMap::new(),
            home: None,
            imds_endpoint: IMDS_ENDPOINT.to_string(),
            browser_available: false,
            az_command: "az".to_string(),
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_imds_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.imds_endpoint = endpoint.into();
        self
    }

    pub fn with_browser(mut self, available: bool) -> Self {
        self.browser_available = available;
        self
    }

    pub fn with_az_command(mut self, command: impl Into<String>) -> Self {
        self.az_command = command.into();
        self
    }

    /// Non-empty environment variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn home(&self) -> Option<&PathBuf> {
        self.home.as_ref()
    }

    pub fn browser_available(&self) -> bool {
        self.browser_available
    }

    pub fn az_command(&self) -> &str {
        &self.az_command
    }

    pub fn managed_identity_endpoint(&self) -> ManagedIdentityEndpoint {
        match (self.var("IDENTITY_ENDPOINT"), self.var("IDENTITY_HEADER")) {
            (Some(endpoint), Some(header)) => ManagedIdentityEndpoint::AppService {
                endpoint: endpoint.to_string(),
                header: header.to_string(),
            },
            _ => ManagedIdentityEndpoint::Imds(self.imds_endpoint.clone()),
        }
    }

    /// Azure CLI configuration directory (`AZURE_CONFIG_DIR` or `~/.azure`).
    pub fn azure_config_dir(&self) -> Option<PathBuf> {
        match self.var("AZURE_CONFIG_DIR") {
            Some(dir) => Some(PathBuf::from(dir)),
            None => self.home.as_ref().map(|h| h.join(".azure")),
        }
    }

    pub fn azure_cli_profile(&self) -> Option<PathBuf> {
        self.azure_config_dir()
            .map(|dir| dir.join("azureProfile.json"))
            .filter(|path| path.is_file())
    }

    /// MSAL cache shared by IDE sign-ins (VS Code Azure Account and friends).
    pub fn shared_token_cache(&self) -> Option<PathBuf> {
        let base = if cfg!(target_os = "windows") {
            self.var("LOCALAPPDATA").map(PathBuf::from)
        } else {
            self.home.clone()
        };
        base.map(|dir| dir.join(".IdentityService").join("msal.cache"))
            .filter(|path| path.is_file())
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::from_process()
    }
}
