//! Refresh tokens left in the MSAL cache shared by IDE sign-ins

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use super::{Availability, ResolveContext};
use crate::auth::oauth::RefreshTokenCredential;
use crate::auth::{CredentialError, HostProbe, TokenCredential, DEFAULT_TENANT, VSCODE_CLIENT_ID};

pub(crate) fn availability(probe: &HostProbe) -> Availability {
    match probe.shared_token_cache() {
        Some(_) => Availability::Available,
        None => Availability::Unavailable(
            "no shared token cache found (sign in from VS Code first)".to_string(),
        ),
    }
}

pub(crate) fn build(ctx: &ResolveContext<'_>) -> Result<Arc<dyn TokenCredential>, CredentialError> {
    let path = ctx
        .probe
        .shared_token_cache()
        .ok_or_else(|| anyhow!("shared token cache disappeared"))?;
    let cache = MsalCache::load(&path)?;

    let environment = &ctx.config.environment;
    let entry = cache
        .pick(environment.authority_host_name(), ctx.config.tenant())
        .with_context(|| {
            format!(
                "No refresh token for {} in {}",
                environment.authority_host_name(),
                path.display()
            )
        })?;

    let tenant = ctx
        .config
        .tenant()
        .map(str::to_string)
        .or(entry.tenant)
        .unwrap_or_else(|| DEFAULT_TENANT.to_string());
    tracing::debug!(
        "Using shared cache refresh token for client {} (tenant {})",
        entry.client_id,
        tenant
    );

    Ok(Arc::new(RefreshTokenCredential::new(
        ctx.http.clone(),
        environment.clone(),
        entry.client_id,
        tenant,
        entry.secret,
    )))
}

#[derive(Debug, Default, Deserialize)]
struct MsalCache {
    #[serde(rename = "RefreshToken", default)]
    refresh_tokens: HashMap<String, MsalRefreshToken>,
    #[serde(rename = "Account", default)]
    accounts: HashMap<String, MsalAccount>,
}

#[derive(Debug, Deserialize)]
struct MsalRefreshToken {
    #[serde(default)]
    home_account_id: String,
    environment: String,
    client_id: String,
    secret: String,
    #[serde(default)]
    family_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MsalAccount {
    home_account_id: String,
    environment: String,
    realm: String,
}

/// The refresh token chosen for this login.
#[derive(Debug)]
struct SharedEntry {
    client_id: String,
    secret: String,
    /// The account's home realm
    tenant: Option<String>,
}

impl MsalCache {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read shared token cache {}", path.display()))?;
        serde_json::from_str(content.trim_start_matches('\u{feff}'))
            .context("Failed to parse shared token cache")
    }

    fn realm_of(&self, token: &MsalRefreshToken) -> Option<&str> {
        self.accounts
            .values()
            .find(|a| {
                a.home_account_id == token.home_account_id
                    && a.environment.eq_ignore_ascii_case(&token.environment)
            })
            .map(|a| a.realm.as_str())
    }

    /// VS Code's own token first, then any family (FOCI) token. When a tenant
    /// is configured, tokens of accounts homed there win.
    fn pick(&self, authority_host: &str, tenant: Option<&str>) -> Option<SharedEntry> {
        let mut candidates: Vec<&MsalRefreshToken> = self
            .refresh_tokens
            .values()
            .filter(|rt| rt.environment.eq_ignore_ascii_case(authority_host))
            .filter(|rt| {
                rt.client_id.eq_ignore_ascii_case(VSCODE_CLIENT_ID)
                    || rt.family_id.as_deref() == Some("1")
            })
            .collect();

        candidates.sort_by_key(|rt| {
            let in_tenant = match (tenant, self.realm_of(rt)) {
                (Some(wanted), Some(realm)) => realm.eq_ignore_ascii_case(wanted),
                (None, _) => true,
                _ => false,
            };
            (
                !in_tenant,
                !rt.client_id.eq_ignore_ascii_case(VSCODE_CLIENT_ID),
                rt.home_account_id.clone(),
            )
        });

        candidates.first().map(|rt| SharedEntry {
            client_id: rt.client_id.clone(),
            secret: rt.secret.clone(),
            tenant: self.realm_of(rt).map(str::to_string),
        })
    }
}
