//! The resolved login handed back to callers

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{AuthConfiguration, AzureEnvironment, StrategyKind, TokenCredentialHandle};
use crate::api::SubscriptionDirectory;
use crate::models::Subscription;

/// A validated login. Owned by the caller; the resolver keeps no reference.
#[derive(Debug, Clone)]
pub struct Account {
    strategy: StrategyKind,
    handle: TokenCredentialHandle,
    config: Arc<AuthConfiguration>,
    http: reqwest::Client,
    /// Held while a user-facing login runs again for this account
    login_in_flight: Arc<Mutex<()>>,
}

impl Account {
    pub(crate) fn new(
        strategy: StrategyKind,
        handle: TokenCredentialHandle,
        config: Arc<AuthConfiguration>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            strategy,
            handle,
            config,
            http,
            login_in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn token_credential(&self) -> &TokenCredentialHandle {
        &self.handle
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.handle.tenant_id()
    }

    pub fn environment(&self) -> &AzureEnvironment {
        self.handle.environment()
    }

    /// The configuration this account was resolved from.
    pub fn configuration(&self) -> &AuthConfiguration {
        &self.config
    }

    /// Proxy-aware client used for identity and management calls.
    pub fn http_client(&self) -> reqwest::Client {
        self.http.clone()
    }

    /// False once a device-code account's executor has been shut down.
    pub fn is_valid(&self) -> bool {
        match (self.strategy, &self.config.executor) {
            (StrategyKind::DeviceCode, Some(executor)) => !executor.is_shutdown(),
            _ => true,
        }
    }

    /// Claim the account for a new interactive login. `None` while another
    /// one is still running; clones of this account share the claim.
    pub(crate) fn begin_login(&self) -> Option<OwnedMutexGuard<()>> {
        self.login_in_flight.clone().try_lock_owned().ok()
    }

    /// Every subscription this account can see, with `is_selected` set from
    /// the configured selection.
    pub async fn available_subscriptions(&self) -> Result<Vec<Subscription>> {
        SubscriptionDirectory::for_account(self)
            .marked(&self.config.selected_subscription_ids)
            .await
    }

    /// Subscriptions narrowed to the configured selection.
    pub async fn selected_subscriptions(&self) -> Result<Vec<Subscription>> {
        SubscriptionDirectory::for_account(self)
            .selected(&self.config.selected_subscription_ids)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::strategies::service_principal::tests::sp_config;
    use crate::auth::{HostProbe, Resolver};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_selected_subscriptions_from_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "sp-token",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(header("authorization", "Bearer sp-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [
                    {"subscriptionId": "AAA", "tenantId": "t1", "displayName": "A"},
                    {"subscriptionId": "BBB", "tenantId": "t1", "displayName": "B"},
                    {"subscriptionId": "CCC", "tenantId": "t1", "displayName": "C"}
                ]
            })))
            .mount(&server)
            .await;

        let config = AuthConfiguration {
            selected_subscription_ids: vec!["bbb".to_string()],
            ..sp_config(&server)
        };
        let account = Resolver::new(HostProbe::empty()).resolve(&config).await.unwrap();

        let selected = account.selected_subscriptions().await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "BBB");
        assert!(selected[0].is_selected);

        let available = account.available_subscriptions().await.unwrap();
        let flags: Vec<(&str, bool)> = available
            .iter()
            .map(|s| (s.id.as_str(), s.is_selected))
            .collect();
        assert_eq!(flags, [("AAA", false), ("BBB", true), ("CCC", false)]);
    }

    #[tokio::test]
    async fn test_empty_selection_marks_every_available_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "sp-token",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [
                    {"subscriptionId": "AAA", "tenantId": "t1", "displayName": "A"},
                    {"subscriptionId": "BBB", "tenantId": "t1", "displayName": "B"}
                ]
            })))
            .mount(&server)
            .await;

        let account = Resolver::new(HostProbe::empty())
            .resolve(&sp_config(&server))
            .await
            .unwrap();
        let available = account.available_subscriptions().await.unwrap();
        assert_eq!(available.len(), 2);
        assert!(available.iter().all(|s| s.is_selected));
    }
}
