//! Subscription models

use serde::{Deserialize, Serialize};

/// A subscription visible to the resolved account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Subscription GUID, as returned by the management plane
    #[serde(rename = "subscriptionId")]
    pub id: String,
    pub tenant_id: String,
    pub display_name: String,
    #[serde(default)]
    pub state: Option<String>,
    /// Set by the directory, never by the wire
    #[serde(skip)]
    pub is_selected: bool,
}

/// One page of `GET /subscriptions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionListResult {
    #[serde(default)]
    pub value: Vec<Subscription>,
    pub next_link: Option<String>,
}
