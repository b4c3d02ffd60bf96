//! OAuth2 plumbing shared by the strategies: client construction, transport,
//! client-credentials and refresh-token grants

use std::fmt;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthType as ClientAuthType, AuthUrl, ClientId, ClientSecret, DeviceAuthorizationUrl,
    ErrorResponseType, HttpRequest, HttpResponse, RefreshToken, RequestTokenError, Scope,
    StandardErrorResponse, TokenResponse, TokenUrl,
};
use tokio::sync::Mutex;

use super::credential::CachedTokens;
use super::tokens::{CacheKey, CachedLogin};
use super::{
    AccessToken, AzureEnvironment, CredentialError, TokenCache, TokenCredential, TokenRequest,
};

/// Lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Build the OAuth2 client for one environment/tenant/client.
pub(crate) fn build_client(
    environment: &AzureEnvironment,
    tenant: &str,
    client_id: &str,
    client_secret: Option<&str>,
) -> Result<BasicClient> {
    let auth_url = AuthUrl::new(environment.authorize_url(tenant))?;
    let token_url = TokenUrl::new(environment.token_url(tenant))?;
    let device_url = DeviceAuthorizationUrl::new(environment.device_code_url(tenant))?;

    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        client_secret.map(|s| ClientSecret::new(s.to_string())),
        auth_url,
        Some(token_url),
    )
    .set_auth_type(ClientAuthType::RequestBody)
    .set_device_authorization_url(device_url))
}

/// Send an `oauth2` request through our own client so proxy settings apply.
pub(crate) async fn send(
    http: reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = http
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();
    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

/// Render an `oauth2` failure, keeping the provider's error description.
pub(crate) fn token_error<T>(
    err: RequestTokenError<reqwest::Error, StandardErrorResponse<T>>,
) -> anyhow::Error
where
    T: ErrorResponseType + fmt::Display,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            anyhow!("identity provider rejected the request: {}", response)
        }
        RequestTokenError::Request(e) => {
            anyhow::Error::new(e).context("request to identity provider failed")
        }
        RequestTokenError::Parse(e, body) => anyhow!(
            "unexpected identity provider response: {} ({})",
            e,
            String::from_utf8_lossy(&body)
        ),
        RequestTokenError::Other(message) => anyhow!(message),
    }
}

/// Access token plus the refresh token that came with it, if any.
pub(crate) struct TokenGrant {
    pub access: AccessToken,
    pub refresh_token: Option<String>,
}

impl TokenGrant {
    pub(crate) fn from_response(response: &BasicTokenResponse) -> Self {
        Self {
            access: AccessToken::new(
                response.access_token().secret().to_string(),
                response
                    .expires_in()
                    .map(|d| d.as_secs())
                    .unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            ),
            refresh_token: response.refresh_token().map(|rt| rt.secret().to_string()),
        }
    }
}

pub(crate) fn scopes(scopes: &[String]) -> impl Iterator<Item = Scope> + '_ {
    scopes.iter().map(|s| Scope::new(s.clone()))
}

/// How a confidential client proves its identity.
pub(crate) enum ClientAuth<'a> {
    Secret(&'a str),
    /// Signed JWT client assertion
    Assertion(String),
}

/// Client-credentials grant (service principals).
pub(crate) async fn client_credentials(
    http: &reqwest::Client,
    environment: &AzureEnvironment,
    tenant: &str,
    client_id: &str,
    auth: ClientAuth<'_>,
    requested: &[String],
) -> Result<AccessToken> {
    let (client, assertion) = match auth {
        ClientAuth::Secret(secret) => (build_client(environment, tenant, client_id, Some(secret))?, None),
        ClientAuth::Assertion(jwt) => (build_client(environment, tenant, client_id, None)?, Some(jwt)),
    };

    let mut request = client.exchange_client_credentials().add_scopes(scopes(requested));
    if let Some(jwt) = assertion {
        request = request
            .add_extra_param(
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            )
            .add_extra_param("client_assertion", jwt);
    }

    let response = request
        .request_async(|req| send(http.clone(), req))
        .await
        .map_err(token_error)
        .context("Client credentials grant failed")?;
    Ok(TokenGrant::from_response(&response).access)
}

/// Exchange a refresh token for an access token on `requested` scopes.
pub(crate) async fn refresh_grant(
    http: &reqwest::Client,
    environment: &AzureEnvironment,
    tenant: &str,
    client_id: &str,
    refresh_token: &str,
    requested: &[String],
) -> Result<TokenGrant> {
    let client = build_client(environment, tenant, client_id, None)?;
    let response = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .add_scopes(scopes(requested))
        .add_scope(Scope::new("offline_access".to_string()))
        .request_async(|req| send(http.clone(), req))
        .await
        .map_err(token_error)
        .context("Failed to refresh token")?;
    Ok(TokenGrant::from_response(&response))
}

/// User-delegated credential backed by a refresh token.
///
/// Rotated refresh tokens replace the held one and, when a persisted cache is
/// attached, are written back for the next process.
pub struct RefreshTokenCredential {
    http: reqwest::Client,
    environment: AzureEnvironment,
    client_id: String,
    tenant: String,
    refresh_token: Mutex<String>,
    tokens: CachedTokens,
    persist: Option<Persisted>,
}

struct Persisted {
    cache: TokenCache,
    key: CacheKey,
    home_tenant: Option<String>,
}

impl RefreshTokenCredential {
    pub fn new(
        http: reqwest::Client,
        environment: AzureEnvironment,
        client_id: impl Into<String>,
        tenant: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            environment,
            client_id: client_id.into(),
            tenant: tenant.into(),
            refresh_token: Mutex::new(refresh_token.into()),
            tokens: CachedTokens::default(),
            persist: None,
        }
    }

    pub(crate) fn persisting_to(
        mut self,
        cache: TokenCache,
        key: CacheKey,
        home_tenant: Option<String>,
    ) -> Self {
        self.persist = Some(Persisted {
            cache,
            key,
            home_tenant,
        });
        self
    }

    /// Record a token already obtained during login so validation reuses it.
    pub(crate) async fn seed(&self, request: &TokenRequest, token: AccessToken) {
        let _ = self
            .tokens
            .get_or_fetch(request, || async move { Ok(token) })
            .await;
    }

    /// Write the current refresh token to the persisted cache, if attached.
    pub(crate) async fn save(&self) {
        let refresh_token = self.refresh_token.lock().await.clone();
        self.store(refresh_token);
    }

    fn store(&self, refresh_token: String) {
        let Some(persisted) = &self.persist else {
            return;
        };
        let login = CachedLogin::new(&persisted.key, refresh_token, persisted.home_tenant.clone());
        if let Err(e) = persisted.cache.store(login) {
            tracing::warn!("Failed to persist login for reuse: {:#}", e);
        }
    }
}

impl fmt::Debug for RefreshTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenCredential")
            .field("environment", &self.environment.name())
            .field("client_id", &self.client_id)
            .field("tenant", &self.tenant)
            .field("refresh_token", &"[redacted]")
            .finish()
    }
}

#[async_trait]
impl TokenCredential for RefreshTokenCredential {
    async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError> {
        let tenant = request.tenant_id.as_deref().unwrap_or(&self.tenant);
        self.tokens
            .get_or_fetch(request, || async {
                let mut refresh_token = self.refresh_token.lock().await;
                tracing::debug!("Refreshing token for tenant {}", tenant);
                let grant = refresh_grant(
                    &self.http,
                    &self.environment,
                    tenant,
                    &self.client_id,
                    &refresh_token,
                    &request.scopes,
                )
                .await?;

                if let Some(rotated) = grant.refresh_token {
                    self.store(rotated.clone());
                    *refresh_token = rotated;
                }
                Ok(grant.access)
            })
            .await
    }

    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant)
    }
}
