//! Authenticated HTTP client for the Azure Resource Manager API
//!
//! Wraps reqwest::Client with bearer tokens minted by the resolved account.

use anyhow::{bail, Context, Result};

use crate::auth::{Account, TokenCredentialHandle, TokenRequest};

/// Client for management-plane calls on behalf of one account.
#[derive(Debug, Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    handle: TokenCredentialHandle,
}

impl ArmClient {
    pub fn new(http: reqwest::Client, handle: TokenCredentialHandle) -> Self {
        Self { http, handle }
    }

    /// Client sharing the account's proxy-aware HTTP client.
    pub fn for_account(account: &Account) -> Self {
        Self::new(account.http_client(), account.token_credential().clone())
    }

    pub fn handle(&self) -> &TokenCredentialHandle {
        &self.handle
    }

    /// Bearer token for the management plane, in `tenant` when given.
    async fn token(&self, tenant: Option<&str>) -> Result<String> {
        let mut request = TokenRequest::new(self.handle.environment().management_scope());
        if let Some(tenant) = tenant {
            request = request.for_tenant(tenant);
        }
        let token = self
            .handle
            .get_token_for(&request)
            .await
            .with_context(|| match tenant {
                Some(tenant) => format!("Failed to get a management token for tenant {}", tenant),
                None => "Failed to get a management token".to_string(),
            })?;
        Ok(token.token)
    }

    /// GET a management path (`/subscriptions?...`) or an absolute `nextLink`.
    pub async fn get(&self, path_or_url: &str, tenant: Option<&str>) -> Result<reqwest::Response> {
        let token = self.token(tenant).await?;
        let url = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            self.handle.environment().management_url(path_or_url)
        };
        tracing::debug!("ARM GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .with_context(|| format!("ARM GET {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'azure-login login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, AzureEnvironment, CredentialError, TokenCredential};
    use async_trait::async_trait;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out `token-<tenant>` so tests can see which tenant was asked for.
    #[derive(Debug)]
    struct StaticCredential;

    #[async_trait]
    impl TokenCredential for StaticCredential {
        async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError> {
            let tenant = request.tenant_id.as_deref().unwrap_or("home");
            Ok(AccessToken::new(format!("token-{}", tenant), 3600))
        }
    }

    fn client(server: &MockServer) -> ArmClient {
        let environment = AzureEnvironment::custom("mock", server.uri(), format!("{}/", server.uri()));
        ArmClient::new(
            reqwest::Client::new(),
            TokenCredentialHandle::new(Arc::new(StaticCredential), environment, None),
        )
    }

    #[tokio::test]
    async fn test_get_sends_bearer_for_tenant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("api-version", "2020-01-01"))
            .and(header("authorization", "Bearer token-t2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .get("/subscriptions?api-version=2020-01-01", Some("t2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_reports_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .respond_with(ResponseTemplate::new(403).set_body_string("AuthorizationFailed"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tenants"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let arm = client(&server);
        let err = arm.get("/subscriptions", None).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 403"));
        assert!(err.to_string().contains("AuthorizationFailed"));

        let err = arm.get("/tenants", None).await.unwrap_err();
        assert!(err.to_string().contains("401 Unauthorized"));
    }
}
