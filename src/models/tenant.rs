//! Tenant models

use serde::{Deserialize, Serialize};

/// A directory the signed-in user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub tenant_id: String,
    pub display_name: Option<String>,
    pub default_domain: Option<String>,
}

/// One page of `GET /tenants`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantListResult {
    #[serde(default)]
    pub value: Vec<Tenant>,
    pub next_link: Option<String>,
}
