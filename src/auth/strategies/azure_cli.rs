//! Environment-delegated login: `AZURE_*` variables or an Azure CLI session

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::service_principal::{ClientCertificate, ClientSecretKind, ServicePrincipalCredential};
use super::{Availability, ResolveContext};
use crate::auth::credential::CachedTokens;
use crate::auth::{AccessToken, CredentialError, HostProbe, TokenCredential, TokenRequest};

pub(crate) fn availability(probe: &HostProbe) -> Availability {
    if EnvServicePrincipal::from_probe(probe).is_some() || probe.azure_cli_profile().is_some() {
        Availability::Available
    } else {
        Availability::Unavailable(
            "no AZURE_CLIENT_ID/AZURE_TENANT_ID credentials in environment and no Azure CLI login"
                .to_string(),
        )
    }
}

pub(crate) async fn build(ctx: &ResolveContext<'_>) -> Result<Arc<dyn TokenCredential>, CredentialError> {
    if let Some(env) = EnvServicePrincipal::from_probe(ctx.probe) {
        tracing::debug!("Using service principal {} from environment", env.client_id);
        let secret = match env.secret {
            EnvSecret::Secret(secret) => ClientSecretKind::Secret(secret),
            EnvSecret::CertificatePath { path, password } => {
                ClientSecretKind::Certificate(ClientCertificate::load(&path, password.as_deref())?)
            }
        };
        return Ok(Arc::new(ServicePrincipalCredential::new(
            ctx.http.clone(),
            ctx.config.environment.clone(),
            &env.tenant,
            &env.client_id,
            secret,
        )));
    }

    let profile_path = ctx
        .probe
        .azure_cli_profile()
        .ok_or_else(|| anyhow!("no Azure CLI profile found"))?;
    let profile_tenant = default_tenant(&profile_path)?;
    let tenant = ctx
        .config
        .tenant()
        .map(str::to_string)
        .or(profile_tenant);
    tracing::debug!(
        "Using Azure CLI session from {} (tenant {})",
        profile_path.display(),
        tenant.as_deref().unwrap_or("default")
    );

    Ok(Arc::new(AzureCliCredential {
        command: ctx.probe.az_command().to_string(),
        tenant,
        pin_tenant: ctx.config.tenant().is_some(),
        tokens: CachedTokens::default(),
    }))
}

enum EnvSecret {
    Secret(String),
    CertificatePath {
        path: String,
        password: Option<String>,
    },
}

struct EnvServicePrincipal {
    client_id: String,
    tenant: String,
    secret: EnvSecret,
}

impl EnvServicePrincipal {
    fn from_probe(probe: &HostProbe) -> Option<Self> {
        let client_id = probe.var("AZURE_CLIENT_ID")?.to_string();
        let tenant = probe.var("AZURE_TENANT_ID")?.to_string();
        let secret = match (
            probe.var("AZURE_CLIENT_SECRET"),
            probe.var("AZURE_CLIENT_CERTIFICATE_PATH"),
        ) {
            (Some(secret), _) => EnvSecret::Secret(secret.to_string()),
            (None, Some(path)) => EnvSecret::CertificatePath {
                path: path.to_string(),
                password: probe
                    .var("AZURE_CLIENT_CERTIFICATE_PASSWORD")
                    .map(str::to_string),
            },
            (None, None) => return None,
        };
        Some(Self {
            client_id,
            tenant,
            secret,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CliProfile {
    #[serde(default)]
    subscriptions: Vec<CliSubscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliSubscription {
    tenant_id: String,
    #[serde(default)]
    is_default: bool,
}

/// Tenant of the CLI's default subscription.
fn default_tenant(profile: &Path) -> Result<Option<String>> {
    let content = fs::read_to_string(profile)
        .with_context(|| format!("Failed to read {}", profile.display()))?;
    // The CLI writes this file with a UTF-8 BOM
    let parsed: CliProfile = serde_json::from_str(content.trim_start_matches('\u{feff}'))
        .context("Failed to parse Azure CLI profile")?;
    Ok(parsed
        .subscriptions
        .into_iter()
        .find(|s| s.is_default)
        .map(|s| s.tenant_id))
}

/// Tokens minted by shelling out to `az account get-access-token`.
pub(crate) struct AzureCliCredential {
    command: String,
    tenant: Option<String>,
    /// Pass `--tenant` even for the default tenant
    pin_tenant: bool,
    tokens: CachedTokens,
}

#[derive(Debug, Deserialize)]
struct CliToken {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// Unix timestamp (newer CLI versions)
    expires_on: Option<u64>,
    /// Local time, `%Y-%m-%d %H:%M:%S%.f`
    #[serde(rename = "expiresOn")]
    expires_on_local: Option<String>,
}

impl CliToken {
    fn into_access_token(self) -> AccessToken {
        let expires_on = self.expires_on.or_else(|| {
            let local = self.expires_on_local.as_deref()?;
            chrono::NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
                .ok()?
                .and_local_timezone(chrono::Local)
                .single()
                .map(|dt| dt.timestamp().max(0) as u64)
        });
        match expires_on {
            Some(expires_on) => AccessToken::expiring_at(self.access_token, expires_on),
            None => AccessToken::new(self.access_token, 3600),
        }
    }
}

impl AzureCliCredential {
    async fn fetch(&self, scope: &str, tenant: Option<&str>) -> Result<AccessToken> {
        let mut args = vec![
            "account",
            "get-access-token",
            "--scope",
            scope,
            "--output",
            "json",
        ];
        if let Some(tenant) = tenant {
            args.extend(["--tenant", tenant]);
        }

        // az is a batch script on Windows
        let mut command = if cfg!(windows) {
            let mut command = tokio::process::Command::new("cmd");
            command.arg("/C").arg(&self.command);
            command
        } else {
            tokio::process::Command::new(&self.command)
        };
        let output = command
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Azure CLI returned error: {}", stderr.trim());
        }

        let token: CliToken =
            serde_json::from_slice(&output.stdout).context("Failed to parse Azure CLI token")?;
        Ok(token.into_access_token())
    }
}

impl fmt::Debug for AzureCliCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCliCredential")
            .field("command", &self.command)
            .field("tenant", &self.tenant)
            .finish()
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError> {
        let [scope] = request.scopes.as_slice() else {
            return Err(anyhow!("Azure CLI tokens take exactly one scope").into());
        };
        let tenant = match &request.tenant_id {
            Some(tenant) => Some(tenant.as_str()),
            None if self.pin_tenant => self.tenant.as_deref(),
            None => None,
        };
        self.tokens
            .get_or_fetch(request, || async { Ok(self.fetch(scope, tenant).await?) })
            .await
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = "\u{feff}{\"installationId\":\"x\",\"subscriptions\":[\
        {\"id\":\"s1\",\"name\":\"One\",\"tenantId\":\"t-other\",\"isDefault\":false},\
        {\"id\":\"s2\",\"name\":\"Two\",\"tenantId\":\"t-default\",\"isDefault\":true}]}";

    #[test]
    fn test_availability_from_env_vars() {
        let probe = HostProbe::empty()
            .with_var("AZURE_CLIENT_ID", "c")
            .with_var("AZURE_TENANT_ID", "t");
        assert!(!availability(&probe).is_available());
        assert!(availability(&probe.clone().with_var("AZURE_CLIENT_SECRET", "s")).is_available());
        assert!(availability(&probe.with_var("AZURE_CLIENT_CERTIFICATE_PATH", "/c.pem")).is_available());
    }

    #[test]
    fn test_availability_from_cli_profile() {
        let home = tempfile::tempdir().unwrap();
        let probe = HostProbe::empty().with_home(home.path());
        assert!(!availability(&probe).is_available());

        fs::create_dir_all(home.path().join(".azure")).unwrap();
        fs::write(home.path().join(".azure").join("azureProfile.json"), PROFILE).unwrap();
        assert!(availability(&probe).is_available());
    }

    #[test]
    fn test_default_tenant_from_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("azureProfile.json");
        fs::write(&path, PROFILE).unwrap();
        assert_eq!(default_tenant(&path).unwrap().as_deref(), Some("t-default"));
    }

    #[test]
    fn test_cli_token_expiry_formats() {
        let epoch: CliToken = serde_json::from_str(
            r#"{"accessToken":"a","expiresOn":"2030-01-01 00:00:00.000000","expires_on":1893456000}"#,
        )
        .unwrap();
        assert_eq!(epoch.into_access_token().expires_on, 1_893_456_000);

        let local: CliToken =
            serde_json::from_str(r#"{"accessToken":"a","expiresOn":"2030-01-01 00:00:00.000000"}"#)
                .unwrap();
        assert!(!local.into_access_token().is_expired());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_credential_runs_az() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args");
        let script = dir.path().join("az");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" > {}\necho '{{\"accessToken\":\"cli-token\",\"expires_on\":4102444800}}'\n",
                args_file.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let credential = AzureCliCredential {
            command: script.to_string_lossy().into_owned(),
            tenant: Some("t-default".to_string()),
            pin_tenant: false,
            tokens: CachedTokens::default(),
        };
        let request = TokenRequest::new("https://management.azure.com/.default").for_tenant("t2");
        let token = credential.get_token(&request).await.unwrap();
        assert_eq!(token.token, "cli-token");

        let args = fs::read_to_string(&args_file).unwrap();
        assert!(args.contains("--scope https://management.azure.com/.default"));
        assert!(args.contains("--tenant t2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_failure_surfaces_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("az");
        fs::write(&script, "#!/bin/sh\necho \"Please run 'az login'\" >&2\nexit 1\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let credential = AzureCliCredential {
            command: script.to_string_lossy().into_owned(),
            tenant: None,
            pin_tenant: false,
            tokens: CachedTokens::default(),
        };
        let err = credential
            .get_token(&TokenRequest::new("https://management.azure.com/.default"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("az login"), "{err}");
    }
}
