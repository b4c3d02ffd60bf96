//! Device code login, polled on the caller's worker pool

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use oauth2::{
    DeviceCodeErrorResponseType, RequestTokenError, Scope, StandardDeviceAuthorizationResponse,
};

use super::{complete_user_login, silent_login, user_client, user_tenant, Availability, ResolveContext};
use crate::auth::oauth::{self, RefreshTokenCredential, TokenGrant};
use crate::auth::{
    AccessToken, AuthConfiguration, AuthError, AzureEnvironment, CredentialError,
    DeviceCodeCallback, DeviceCodeInfo, TokenCredential, TokenRequest, WorkerPool,
};

/// A shut-down executor is a hard failure, not a reason to skip.
pub(crate) fn availability(config: &AuthConfiguration) -> Result<Availability, AuthError> {
    match &config.executor {
        Some(executor) if executor.is_shutdown() => Err(AuthError::ExecutorUnavailable),
        Some(_) if config.device_code_callback.is_none() => Ok(Availability::Unavailable(
            "no device code callback configured".to_string(),
        )),
        Some(_) => Ok(Availability::Available),
        None => Ok(Availability::Unavailable(
            "no executor configured for device code polling".to_string(),
        )),
    }
}

pub(crate) async fn build(ctx: &ResolveContext<'_>) -> Result<Arc<dyn TokenCredential>, CredentialError> {
    let config = ctx.config;
    let executor = config
        .executor
        .clone()
        .ok_or_else(|| anyhow!("no executor configured for device code polling"))?;
    // Checked before any network call, including the silent refresh
    if executor.is_shutdown() {
        return Err(CredentialError::ExecutorUnavailable);
    }
    let callback = config
        .device_code_callback
        .clone()
        .ok_or_else(|| anyhow!("no device code callback configured"))?;

    if let Some(inner) = silent_login(ctx).await? {
        return Ok(Arc::new(DeviceCodeCredential { inner, executor }));
    }

    let flow = DeviceCodeFlow {
        http: ctx.http.clone(),
        environment: config.environment.clone(),
        tenant: user_tenant(config).to_string(),
        client_id: user_client(config).to_string(),
        scope: config.environment.management_scope(),
        callback,
    };

    tracing::info!("Initiating device code flow...");
    let mut task = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(CredentialError::Cancelled),
        spawned = executor.spawn(flow.run()) => spawned?,
    };

    let grant = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            tracing::info!("Device code login cancelled, stopping poll");
            task.abort();
            // Wait for the abort so the worker is free when we return
            let _ = task.await;
            return Err(CredentialError::Cancelled);
        }
        joined = &mut task => joined.context("Device code polling task failed")??,
    };

    let inner = complete_user_login(ctx, grant).await?;
    Ok(Arc::new(DeviceCodeCredential { inner, executor }))
}

/// One device code negotiation, owned so it can run on a worker.
struct DeviceCodeFlow {
    http: reqwest::Client,
    environment: AzureEnvironment,
    tenant: String,
    client_id: String,
    scope: String,
    callback: DeviceCodeCallback,
}

impl DeviceCodeFlow {
    async fn run(self) -> Result<TokenGrant> {
        let client = oauth::build_client(&self.environment, &self.tenant, &self.client_id, None)?;

        let details: StandardDeviceAuthorizationResponse = client
            .exchange_device_code()
            .context("Device code endpoint not configured")?
            .add_scope(Scope::new(self.scope.clone()))
            .add_scope(Scope::new("offline_access".to_string()))
            .request_async(|req| oauth::send(self.http.clone(), req))
            .await
            .map_err(oauth::token_error)
            .context("Failed to request device code")?;

        let verification_uri = details.verification_uri().as_str().to_string();
        let user_code = details.user_code().secret().to_string();
        let expires_in_secs = details.expires_in().as_secs();
        (self.callback)(&DeviceCodeInfo {
            message: format!(
                "To sign in, open {} and enter the code {}",
                verification_uri, user_code
            ),
            user_code,
            verification_uri,
            expires_in_secs,
        });

        tracing::info!("Waiting for authentication...");
        let polled = client
            .exchange_device_access_token(&details)
            .request_async(|req| oauth::send(self.http.clone(), req), tokio::time::sleep, None)
            .await;

        match polled {
            Ok(response) => Ok(TokenGrant::from_response(&response)),
            Err(RequestTokenError::ServerResponse(response))
                if matches!(response.error(), DeviceCodeErrorResponseType::ExpiredToken) =>
            {
                bail!(
                    "timed out: device code expired after {}s without sign-in",
                    expires_in_secs
                )
            }
            Err(e) => Err(oauth::token_error(e).context("Device code sign-in failed")),
        }
    }
}

/// Device code login bound to the executor it was negotiated on.
///
/// Once that executor is shut down the login is dead: every call fails with
/// `ExecutorUnavailable` instead of serving a cached token.
pub(crate) struct DeviceCodeCredential {
    inner: RefreshTokenCredential,
    executor: WorkerPool,
}

impl fmt::Debug for DeviceCodeCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCodeCredential")
            .field("inner", &self.inner)
            .field("executor_shutdown", &self.executor.is_shutdown())
            .finish()
    }
}

#[async_trait]
impl TokenCredential for DeviceCodeCredential {
    async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError> {
        if self.executor.is_shutdown() {
            return Err(CredentialError::ExecutorUnavailable);
        }
        self.inner.get_token(request).await
    }

    fn tenant_id(&self) -> Option<&str> {
        self.inner.tenant_id()
    }
}
