//! Token credential seam shared by every strategy

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{AccessToken, AuthConfiguration, AzureEnvironment, CredentialError};

/// What a caller wants a token for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub scopes: Vec<String>,
    /// Mint for this tenant instead of the credential's own, if the
    /// credential supports it (user-delegated logins do).
    pub tenant_id: Option<String>,
}

impl TokenRequest {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scopes: vec![scope.into()],
            tenant_id: None,
        }
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    fn cache_key(&self) -> String {
        format!(
            "{}|{}",
            self.tenant_id.as_deref().unwrap_or_default(),
            self.scopes.join(" ")
        )
    }
}

/// Something that can mint access tokens.
///
/// Implementations are safe for concurrent use; token refresh is
/// serialized internally.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError>;

    /// Tenant the credential is bound to, if it knows it up front.
    fn tenant_id(&self) -> Option<&str> {
        None
    }
}

/// Per-credential in-memory token cache, keyed by tenant and scopes.
#[derive(Default)]
pub(crate) struct CachedTokens {
    tokens: Mutex<HashMap<String, AccessToken>>,
}

impl CachedTokens {
    /// Return a live cached token or run `fetch` while holding the lock, so
    /// concurrent callers share a single refresh.
    pub(crate) async fn get_or_fetch<F, Fut>(
        &self,
        request: &TokenRequest,
        fetch: F,
    ) -> Result<AccessToken, CredentialError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, CredentialError>>,
    {
        let key = request.cache_key();
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(&key) {
            if !token.is_expired() {
                tracing::debug!("Using cached token for {}", key);
                return Ok(token.clone());
            }
        }

        let token = fetch().await?;
        tokens.insert(key, token.clone());
        Ok(token)
    }
}

impl fmt::Debug for CachedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CachedTokens([cached])")
    }
}

/// Validated, reusable output of a resolution.
#[derive(Debug, Clone)]
pub struct TokenCredentialHandle {
    inner: Arc<dyn TokenCredential>,
    environment: AzureEnvironment,
    tenant_id: Option<String>,
}

impl TokenCredentialHandle {
    pub(crate) fn new(
        inner: Arc<dyn TokenCredential>,
        environment: AzureEnvironment,
        tenant_id: Option<String>,
    ) -> Self {
        Self {
            inner,
            environment,
            tenant_id,
        }
    }

    /// Token for `scope` in the bound tenant.
    pub async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        self.inner.get_token(&TokenRequest::new(scope)).await
    }

    pub async fn get_token_for(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError> {
        self.inner.get_token(request).await
    }

    /// Token for the management plane of the bound environment.
    pub async fn management_token(&self) -> Result<AccessToken, CredentialError> {
        self.get_token(&self.environment.management_scope()).await
    }

    pub fn environment(&self) -> &AzureEnvironment {
        &self.environment
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn credential(&self) -> Arc<dyn TokenCredential> {
        Arc::clone(&self.inner)
    }
}

/// HTTP client honouring the configured proxy.
pub(crate) fn build_http_client(config: &AuthConfiguration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
    if let Some(proxy) = config.proxy_url() {
        tracing::debug!("Routing identity traffic through proxy {}", proxy);
        builder = builder.proxy(reqwest::Proxy::all(&proxy).context("Invalid proxy setting")?);
    }
    builder.build().context("Failed to create HTTP client")
}

#[derive(Debug, Deserialize)]
struct TenantClaims {
    tid: Option<String>,
}

/// Read the `tid` claim from a JWT access token without verifying it.
pub fn tenant_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<TenantClaims>(&bytes).ok()?.tid
}

#[cfg(test)]
pub(crate) fn fake_jwt(tenant: &str) -> String {
    let encode = |value: serde_json::Value| {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(value.to_string())
    };
    format!(
        "{}.{}.sig",
        encode(serde_json::json!({"alg": "none", "typ": "JWT"})),
        encode(serde_json::json!({"tid": tenant, "aud": "https://management.azure.com"}))
    )
}
