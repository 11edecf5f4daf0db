use serde::{Deserialize, Serialize};

/// Per-location rate limiting. Each rule may declare up to three zones
/// (connections by IP, requests per second, requests per minute) plus raw
/// bandwidth throttling.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// Unique id shared by the zones of this rule; also keys the
    /// allowlist `geo`/`map` pair in the http block.
    pub id: String,
    pub connections: RateLimitZone,
    pub rps: RateLimitZone,
    pub rpm: RateLimitZone,
    /// Bandwidth limit in kilobytes/s; 0 disables.
    pub limit_rate: u32,
    /// Bytes (k) served before `limit_rate` kicks in.
    pub limit_rate_after: u32,
    /// Client CIDRs exempt from the limits.
    pub allowlist: Vec<String>,
    /// Human-readable name used in generated comments.
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitZone {
    pub name: String,
    pub limit: u32,
    pub burst: u32,
    /// Shared-memory size in megabytes.
    pub shared_size: u32,
}

// === impl RateLimit ===

impl RateLimit {
    pub fn is_set(&self) -> bool {
        self.connections.limit > 0
            || self.rps.limit > 0
            || self.rpm.limit > 0
            || self.limit_rate > 0
    }
}
