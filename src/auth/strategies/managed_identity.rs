//! Managed identity via the instance metadata service or App Service endpoint

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use url::Url;

use super::ResolveContext;
use crate::auth::credential::CachedTokens;
use crate::auth::probe::ManagedIdentityEndpoint;
use crate::auth::{AccessToken, CredentialError, TokenCredential, TokenRequest};

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

pub(crate) fn build(ctx: &ResolveContext<'_>) -> Result<Arc<dyn TokenCredential>, CredentialError> {
    let endpoint = ctx.probe.managed_identity_endpoint();
    let client_id = ctx.config.client().map(str::to_string);
    tracing::debug!(
        "Managed identity via {:?} ({})",
        endpoint,
        client_id.as_deref().unwrap_or("system-assigned")
    );
    Ok(Arc::new(ManagedIdentityCredential::new(endpoint, client_id)?))
}

/// Token source for the identity assigned to this host.
pub(crate) struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: ManagedIdentityEndpoint,
    /// User-assigned identity; `None` is the system-assigned one
    client_id: Option<String>,
    tokens: CachedTokens,
}

impl ManagedIdentityCredential {
    pub(crate) fn new(endpoint: ManagedIdentityEndpoint, client_id: Option<String>) -> Result<Self> {
        // Link-local endpoint: never proxied, and absence must fail fast
        let http = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create managed identity HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            client_id,
            tokens: CachedTokens::default(),
        })
    }

    fn request_url(&self, resource: &str) -> Result<(Url, Option<&str>)> {
        let (base, api_version, header) = match &self.endpoint {
            ManagedIdentityEndpoint::Imds(url) => (url.as_str(), IMDS_API_VERSION, None),
            ManagedIdentityEndpoint::AppService { endpoint, header } => {
                (endpoint.as_str(), APP_SERVICE_API_VERSION, Some(header.as_str()))
            }
        };
        let mut url = Url::parse(base).context("Invalid managed identity endpoint")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", api_version);
            query.append_pair("resource", resource);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }
        Ok((url, header))
    }

    async fn fetch(&self, resource: &str) -> Result<AccessToken> {
        let (url, header) = self.request_url(resource)?;
        let request = match header {
            Some(secret) => self.http.get(url).header("X-IDENTITY-HEADER", secret),
            None => self.http.get(url).header("Metadata", "true"),
        };

        let response = request
            .send()
            .await
            .context("Managed identity endpoint unreachable (not running on an Azure host?)")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Managed identity endpoint returned HTTP {}: {}", status.as_u16(), body);
        }

        let token: ManagedIdentityToken = response
            .json()
            .await
            .context("Invalid managed identity token response")?;
        Ok(AccessToken::expiring_at(token.access_token, token.expires_on))
    }
}

impl fmt::Debug for ManagedIdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = match &self.endpoint {
            ManagedIdentityEndpoint::Imds(url) => url.as_str(),
            ManagedIdentityEndpoint::AppService { endpoint, .. } => endpoint.as_str(),
        };
        f.debug_struct("ManagedIdentityCredential")
            .field("endpoint", &endpoint)
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError> {
        let resource = scope_to_resource(&request.scopes)?;
        self.tokens
            .get_or_fetch(request, || async { Ok(self.fetch(&resource).await?) })
            .await
    }
}

/// Managed identity endpoints take a resource, not a list of scopes.
fn scope_to_resource(scopes: &[String]) -> Result<String> {
    match scopes {
        [scope] => Ok(scope.trim_end_matches("/.default").to_string()),
        _ => bail!("managed identity tokens take exactly one scope, got {}", scopes.len()),
    }
}

#[derive(Deserialize)]
struct ManagedIdentityToken {
    access_token: String,
    /// IMDS sends a string, some hosts a number
    #[serde(deserialize_with = "string_or_number")]
    expires_on: u64,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::now_secs;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_scope_to_resource() {
        assert_eq!(
            scope_to_resource(&["https://management.azure.com/.default".to_string()]).unwrap(),
            "https://management.azure.com"
        );
        assert!(scope_to_resource(&[]).is_err());
    }

    #[tokio::test]
    async fn test_imds_token() {
        let server = MockServer::start().await;
        let expires_on = now_secs() + 3600;
        Mock::given(method("GET"))
            .and(path("/metadata/identity/oauth2/token"))
            .and(header("Metadata", "true"))
            .and(query_param("api-version", "2018-02-01"))
            .and(query_param("resource", "https://management.azure.com"))
            .and(query_param("client_id", "user-assigned"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "mi-token",
                "expires_on": expires_on.to_string(),
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = ManagedIdentityCredential::new(
            ManagedIdentityEndpoint::Imds(format!("{}/metadata/identity/oauth2/token", server.uri())),
            Some("user-assigned".to_string()),
        )
        .unwrap();
        let request = TokenRequest::new("https://management.azure.com/.default");
        let token = credential.get_token(&request).await.unwrap();
        assert_eq!(token.token, "mi-token");
        assert_eq!(token.expires_on, expires_on);
        // Cached
        credential.get_token(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_app_service_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/msi/token"))
            .and(header("X-IDENTITY-HEADER", "local-secret"))
            .and(query_param("api-version", "2019-08-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "app-token",
                "expires_on": now_secs() + 3600
            })))
            .mount(&server)
            .await;

        let credential = ManagedIdentityCredential::new(
            ManagedIdentityEndpoint::AppService {
                endpoint: format!("{}/msi/token", server.uri()),
                header: "local-secret".to_string(),
            },
            None,
        )
        .unwrap();
        let token = credential
            .get_token(&TokenRequest::new("https://management.azure.com/.default"))
            .await
            .unwrap();
        assert_eq!(token.token, "app-token");
    }

    #[tokio::test]
    async fn test_endpoint_error_is_failure_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Identity not found"))
            .mount(&server)
            .await;

        let credential =
            ManagedIdentityCredential::new(ManagedIdentityEndpoint::Imds(server.uri()), None).unwrap();
        let err = credential
            .get_token(&TokenRequest::new("https://management.azure.com/.default"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 400"), "{err}");
    }
}
