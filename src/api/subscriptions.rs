//! Subscription directory: what the resolved account can see, and which of it
//! the user selected

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;

use super::client::ArmClient;
use crate::auth::Account;
use crate::models::{Subscription, SubscriptionListResult, Tenant, TenantListResult};

const API_VERSION: &str = "2020-01-01";

/// Where subscriptions come from. Implemented against ARM; swapped for a
/// fixed listing in tests.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Every subscription visible in `tenant`, or in the credential's own
    /// tenant when `None`.
    async fn list_subscriptions(&self, tenant: Option<&str>) -> Result<Vec<Subscription>>;
}

/// ARM-backed source following `nextLink` pagination.
#[derive(Debug, Clone)]
pub struct ArmSubscriptionSource {
    client: ArmClient,
}

impl ArmSubscriptionSource {
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubscriptionSource for ArmSubscriptionSource {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let mut tenants = Vec::new();
        let mut next = Some(format!("/tenants?api-version={}", API_VERSION));
        while let Some(url) = next {
            let page: TenantListResult = self
                .client
                .get(&url, None)
                .await?
                .json()
                .await
                .context("Failed to parse tenant list")?;
            tenants.extend(page.value);
            next = page.next_link;
        }
        Ok(tenants)
    }

    async fn list_subscriptions(&self, tenant: Option<&str>) -> Result<Vec<Subscription>> {
        let mut subscriptions = Vec::new();
        let mut next = Some(format!("/subscriptions?api-version={}", API_VERSION));
        while let Some(url) = next {
            let page: SubscriptionListResult = self
                .client
                .get(&url, tenant)
                .await?
                .json()
                .await
                .context("Failed to parse subscription list")?;
            tracing::debug!("Fetched {} subscriptions", page.value.len());
            subscriptions.extend(page.value);
            next = page.next_link;
        }
        Ok(subscriptions)
    }
}

/// Subscriptions visible to one account.
pub struct SubscriptionDirectory<S> {
    source: S,
    user_delegated: bool,
}

impl SubscriptionDirectory<ArmSubscriptionSource> {
    pub fn for_account(account: &Account) -> Self {
        Self::new(
            ArmSubscriptionSource::new(ArmClient::for_account(account)),
            account.strategy().is_user_delegated(),
        )
    }
}

impl<S: SubscriptionSource> SubscriptionDirectory<S> {
    /// `user_delegated` accounts may span tenants, so each tenant is listed.
    pub fn new(source: S, user_delegated: bool) -> Self {
        Self {
            source,
            user_delegated,
        }
    }

    /// Everything visible, deduplicated by id. Nothing is marked selected.
    pub async fn list_available(&self) -> Result<Vec<Subscription>> {
        let listing = if self.user_delegated {
            self.list_across_tenants().await?
        } else {
            self.source.list_subscriptions(None).await?
        };
        Ok(dedupe(listing))
    }

    /// [`list_available`](Self::list_available) with every entry marked per
    /// [`mark`].
    pub async fn marked(&self, selected_ids: &[String]) -> Result<Vec<Subscription>> {
        let listing = self.list_available().await?;
        Ok(mark(listing, selected_ids))
    }

    /// [`list_available`](Self::list_available) with selection applied.
    pub async fn selected(&self, selected_ids: &[String]) -> Result<Vec<Subscription>> {
        let listing = self.list_available().await?;
        Ok(select(listing, selected_ids))
    }

    async fn list_across_tenants(&self) -> Result<Vec<Subscription>> {
        let tenants = self
            .source
            .list_tenants()
            .await
            .context("Failed to enumerate tenants")?;
        tracing::info!("Listing subscriptions across {} tenants", tenants.len());

        let listings = join_all(tenants.iter().map(|tenant| async move {
            let result = self.source.list_subscriptions(Some(tenant.tenant_id.as_str())).await;
            (tenant, result)
        }))
        .await;

        let mut subscriptions = Vec::new();
        for (tenant, result) in listings {
            match result {
                Ok(found) => subscriptions.extend(found),
                Err(e) => tracing::warn!("Skipping tenant {}: {:#}", tenant.tenant_id, e),
            }
        }
        Ok(subscriptions)
    }
}

/// Keep the first occurrence of each id, compared case-insensitively.
fn dedupe(listing: Vec<Subscription>) -> Vec<Subscription> {
    let mut seen = HashSet::new();
    listing
        .into_iter()
        .filter(|s| seen.insert(s.id.to_ascii_lowercase()))
        .collect()
}

/// The subscriptions of `listing` whose id is in `selected_ids`
/// (case-insensitive), marked selected. An empty selection selects everything.
pub fn select(listing: Vec<Subscription>, selected_ids: &[String]) -> Vec<Subscription> {
    mark(listing, selected_ids)
        .into_iter()
        .filter(|s| s.is_selected)
        .collect()
}

/// The whole listing with `is_selected` set per [`select`].
pub fn mark(listing: Vec<Subscription>, selected_ids: &[String]) -> Vec<Subscription> {
    let wanted: HashSet<String> = selected_ids
        .iter()
        .map(|id| id.trim().to_ascii_lowercase())
        .filter(|id| !id.is_empty())
        .collect();
    listing
        .into_iter()
        .map(|mut s| {
            s.is_selected = wanted.is_empty() || wanted.contains(&s.id.to_ascii_lowercase());
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, AzureEnvironment, CredentialError, TokenCredential, TokenCredentialHandle, TokenRequest};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_test::assert_ok;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sub(id: &str, tenant: &str) -> Subscription {
        Subscription {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            display_name: format!("Subscription {}", id),
            state: Some("Enabled".to_string()),
            is_selected: false,
        }
    }

    /// Fixed listing per tenant; tenants missing from the map fail.
    struct FixedSource {
        tenants: Vec<&'static str>,
        by_tenant: HashMap<Option<&'static str>, Vec<Subscription>>,
    }

    #[async_trait]
    impl SubscriptionSource for FixedSource {
        async fn list_tenants(&self) -> Result<Vec<Tenant>> {
            Ok(self
                .tenants
                .iter()
                .map(|t| Tenant {
                    tenant_id: t.to_string(),
                    display_name: None,
                    default_domain: None,
                })
                .collect())
        }

        async fn list_subscriptions(&self, tenant: Option<&str>) -> Result<Vec<Subscription>> {
            self.by_tenant
                .iter()
                .find(|(k, _)| **k == tenant)
                .map(|(_, v)| v.clone())
                .with_context(|| format!("AADSTS50076: MFA required for {:?}", tenant))
        }
    }

    #[test]
    fn test_select_is_case_insensitive() {
        let listing = vec![sub("A", "t"), sub("B", "t"), sub("C", "t")];
        let selected = select(listing, &["b".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "B");
        assert!(selected[0].is_selected);
    }

    #[test]
    fn test_empty_selection_selects_all() {
        let listing = vec![sub("A", "t"), sub("B", "t"), sub("C", "t")];
        let selected = select(listing, &[]);
        assert_eq!(
            selected.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            ["A", "B", "C"]
        );
        assert!(selected.iter().all(|s| s.is_selected));
    }

    #[test]
    fn test_mark_keeps_unselected() {
        let marked = mark(vec![sub("A", "t"), sub("B", "t")], &["a".to_string()]);
        assert!(marked[0].is_selected);
        assert!(!marked[1].is_selected);
        // Unknown ids select nothing rather than everything
        assert!(select(vec![sub("A", "t")], &["zzz".to_string()]).is_empty());
    }

    #[tokio::test]
    async fn test_delegated_listing_dedupes_and_skips_failed_tenants() {
        let source = FixedSource {
            tenants: vec!["t1", "t2", "t-mfa"],
            by_tenant: HashMap::from([
                (Some("t1"), vec![sub("aaa", "t1"), sub("bbb", "t1")]),
                (Some("t2"), vec![sub("BBB", "t1"), sub("ccc", "t2")]),
            ]),
        };
        let directory = SubscriptionDirectory::new(source, true);
        let listing = assert_ok!(directory.list_available().await);
        let ids: Vec<&str> = listing.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["aaa", "bbb", "ccc"]);
    }

    #[tokio::test]
    async fn test_service_principal_lists_once() {
        let source = FixedSource {
            tenants: vec![],
            by_tenant: HashMap::from([(None, vec![sub("aaa", "t1"), sub("AAA", "t1")])]),
        };
        let directory = SubscriptionDirectory::new(source, false);
        let selected = directory.selected(&["AaA".to_string()]).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected[0].is_selected);

        let marked = directory.marked(&[]).await.unwrap();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].is_selected);
    }

    #[derive(Debug)]
    struct StaticCredential;

    #[async_trait]
    impl TokenCredential for StaticCredential {
        async fn get_token(&self, _request: &TokenRequest) -> Result<AccessToken, CredentialError> {
            Ok(AccessToken::new("arm-token".to_string(), 3600))
        }
    }

    #[tokio::test]
    async fn test_arm_source_follows_next_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("api-version", "2020-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{
                    "id": "/subscriptions/s1",
                    "subscriptionId": "s1",
                    "tenantId": "t1",
                    "displayName": "First",
                    "state": "Enabled"
                }],
                "nextLink": format!("{}/subscriptions/page2?api-version=2020-01-01", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{
                    "subscriptionId": "s2",
                    "tenantId": "t1",
                    "displayName": "Second"
                }]
            })))
            .mount(&server)
            .await;

        let environment = AzureEnvironment::custom("mock", server.uri(), format!("{}/", server.uri()));
        let handle = TokenCredentialHandle::new(Arc::new(StaticCredential), environment, Some("t1".to_string()));
        let source = ArmSubscriptionSource::new(ArmClient::new(reqwest::Client::new(), handle));

        let listing = source.list_subscriptions(None).await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].display_name, "First");
        assert_eq!(listing[1].id, "s2");
        assert_eq!(listing[1].state, None);
    }
}
