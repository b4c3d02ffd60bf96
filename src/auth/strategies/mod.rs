//! Closed set of login strategies and their static dispatch table
//!
//! Every strategy answers two questions: is it structurally usable here
//! (local, cheap, never touches the network), and how to build a credential
//! (may do network I/O, including interactive user flows).

pub mod azure_cli;
pub mod device_code;
pub mod interactive;
pub mod managed_identity;
pub mod service_principal;
pub mod shared_cache;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use super::credential::tenant_from_token;
use super::oauth::{RefreshTokenCredential, TokenGrant};
use super::tokens::CacheKey;
use super::{
    AuthConfiguration, AuthError, CredentialError, HostProbe, TokenCache, TokenCredential,
    TokenRequest,
};

/// One authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Environment variables or an Azure CLI session
    EnvironmentDelegated,
    ServicePrincipal,
    ManagedIdentity,
    /// Refresh token left behind by an IDE sign-in
    SharedTokenCache,
    DeviceCode,
    InteractiveBrowser,
}

impl StrategyKind {
    /// Priority order for AUTO: least interactive first.
    pub const AUTO_ORDER: [StrategyKind; 6] = [
        StrategyKind::EnvironmentDelegated,
        StrategyKind::ServicePrincipal,
        StrategyKind::ManagedIdentity,
        StrategyKind::SharedTokenCache,
        StrategyKind::DeviceCode,
        StrategyKind::InteractiveBrowser,
    ];

    /// Whether the credential acts on behalf of a signed-in user, who may
    /// belong to several tenants.
    pub fn is_user_delegated(self) -> bool {
        match self {
            StrategyKind::ServicePrincipal | StrategyKind::ManagedIdentity => false,
            StrategyKind::EnvironmentDelegated
            | StrategyKind::SharedTokenCache
            | StrategyKind::DeviceCode
            | StrategyKind::InteractiveBrowser => true,
        }
    }

    /// Local availability check.
    ///
    /// `Err` only for hard preconditions that must fail the whole resolution
    /// (a device-code executor that was already shut down).
    pub(crate) fn check_available(self, ctx: &ResolveContext<'_>) -> Result<Availability, AuthError> {
        let availability = match self {
            StrategyKind::EnvironmentDelegated => azure_cli::availability(ctx.probe),
            StrategyKind::ServicePrincipal => service_principal::availability(ctx.config),
            StrategyKind::ManagedIdentity => Availability::Available,
            StrategyKind::SharedTokenCache => shared_cache::availability(ctx.probe),
            StrategyKind::DeviceCode => device_code::availability(ctx.config)?,
            StrategyKind::InteractiveBrowser => interactive::availability(ctx.probe),
        };
        Ok(availability)
    }

    /// Build the credential. Interactive strategies complete their user flow here.
    pub(crate) async fn build_credential(
        self,
        ctx: &ResolveContext<'_>,
    ) -> Result<Arc<dyn TokenCredential>, CredentialError> {
        match self {
            StrategyKind::EnvironmentDelegated => azure_cli::build(ctx).await,
            StrategyKind::ServicePrincipal => service_principal::build(ctx),
            StrategyKind::ManagedIdentity => managed_identity::build(ctx),
            StrategyKind::SharedTokenCache => shared_cache::build(ctx),
            StrategyKind::DeviceCode => device_code::build(ctx).await,
            StrategyKind::InteractiveBrowser => interactive::build(ctx).await,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::EnvironmentDelegated => "environment",
            StrategyKind::ServicePrincipal => "service principal",
            StrategyKind::ManagedIdentity => "managed identity",
            StrategyKind::SharedTokenCache => "shared token cache",
            StrategyKind::DeviceCode => "device code",
            StrategyKind::InteractiveBrowser => "interactive browser",
        };
        f.write_str(name)
    }
}

/// Outcome of a local availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Everything a strategy may look at while it is checked and built.
pub(crate) struct ResolveContext<'a> {
    pub config: &'a AuthConfiguration,
    pub probe: &'a HostProbe,
    /// Proxy-aware client for identity and management traffic
    pub http: reqwest::Client,
    pub token_cache: Option<&'a TokenCache>,
    pub cancel: CancellationToken,
}

/// Tenant a user-delegated login signs into: configured, else the default.
pub(crate) fn user_tenant(config: &AuthConfiguration) -> &str {
    config.tenant().unwrap_or(super::DEFAULT_TENANT)
}

/// Client a user-delegated login signs in with: configured, else the default.
pub(crate) fn user_client(config: &AuthConfiguration) -> &str {
    config.client().unwrap_or(super::DEFAULT_CLIENT_ID)
}

fn user_cache_key(config: &AuthConfiguration) -> CacheKey {
    CacheKey {
        environment: config.environment.name().to_string(),
        client_id: user_client(config).to_string(),
        tenant: user_tenant(config).to_string(),
    }
}

/// Reuse a refresh token persisted by an earlier interactive login.
///
/// `Ok(None)` when there is no entry or it no longer refreshes; the caller then
/// runs its interactive flow. Cancelling `ctx.cancel` stops the refresh.
pub(crate) async fn silent_login(
    ctx: &ResolveContext<'_>,
) -> Result<Option<RefreshTokenCredential>, CredentialError> {
    let Some(cache) = ctx.token_cache else {
        return Ok(None);
    };
    let key = user_cache_key(ctx.config);
    let login = match cache.find(&key) {
        Ok(Some(login)) => login,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::warn!("Ignoring unreadable token cache: {:#}", e);
            return Ok(None);
        }
    };

    let credential = RefreshTokenCredential::new(
        ctx.http.clone(),
        ctx.config.environment.clone(),
        key.client_id.clone(),
        key.tenant.clone(),
        login.refresh_token,
    )
    .persisting_to(cache.clone(), key, login.home_tenant);

    let request = TokenRequest::new(ctx.config.environment.management_scope());
    let refreshed = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(CredentialError::Cancelled),
        refreshed = credential.get_token(&request) => refreshed,
    };
    match refreshed {
        Ok(_) => {
            tracing::info!("Reusing cached login from {}", cache.path().display());
            Ok(Some(credential))
        }
        Err(e) => {
            tracing::warn!("Cached login could not be refreshed, signing in again: {:#}", e);
            Ok(None)
        }
    }
}

/// Turn the grant of a completed user sign-in into a refreshable credential
/// and persist it for the next run.
pub(crate) async fn complete_user_login(
    ctx: &ResolveContext<'_>,
    grant: TokenGrant,
) -> Result<RefreshTokenCredential> {
    let refresh_token = grant
        .refresh_token
        .context("Identity provider did not return a refresh token")?;
    let key = user_cache_key(ctx.config);
    let home_tenant = tenant_from_token(&grant.access.token);

    let mut credential = RefreshTokenCredential::new(
        ctx.http.clone(),
        ctx.config.environment.clone(),
        key.client_id.clone(),
        key.tenant.clone(),
        refresh_token,
    );
    if let Some(cache) = ctx.token_cache {
        credential = credential.persisting_to(cache.clone(), key, home_tenant);
    }

    credential
        .seed(&TokenRequest::new(ctx.config.environment.management_scope()), grant.access)
        .await;
    credential.save().await;
    Ok(credential)
}
