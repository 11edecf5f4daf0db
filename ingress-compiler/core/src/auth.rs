use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// External-authentication configuration. Used both per-location and as
/// the global default; a per-location `url` always wins over the global
/// one (see the compiler's auth resolution).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalAuth {
    pub url: String,
    /// Hostname extracted from `url`, pre-resolved by the aggregator.
    pub host: String,
    pub method: String,
    pub signin_url: String,
    pub signin_url_redirect_param: String,
    /// Auth-service response headers copied onto the upstream request.
    pub response_headers: Vec<String>,
    pub request_redirect: String,
    pub auth_cache_key: String,
    pub auth_cache_duration: Vec<String>,
    pub keepalive_connections: u32,
    pub keepalive_share_vars: bool,
    pub keepalive_requests: u32,
    pub keepalive_timeout: u64,
    pub proxy_set_headers: BTreeMap<String, String>,
    pub always_set_cookie: bool,
}

// === impl ExternalAuth ===

impl ExternalAuth {
    pub fn is_set(&self) -> bool {
        !self.url.is_empty()
    }
}
