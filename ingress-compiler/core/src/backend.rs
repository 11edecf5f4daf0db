use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named upstream pool. `name` is unique across the snapshot and is the
/// value referenced by [`crate::Location::backend`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backend {
    pub name: String,
    /// Forces TLS towards the endpoints regardless of the location's
    /// backend protocol (legacy `secure-backends` behavior).
    pub secure: bool,
    /// TLS termination is delegated to the endpoints.
    pub ssl_passthrough: bool,
    pub session_affinity: Affinity,
    /// Consistent hashing by nginx variable/expression.
    pub upstream_hash_by: String,
    /// Load-balancing algorithm override for this pool.
    pub load_balancing: String,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "lowercase")]
pub struct Affinity {
    /// Affinity mode; only `"cookie"` is meaningful today.
    pub affinity_type: String,
    pub cookie: CookieAffinity,
}

/// Cookie-based session affinity. `locations` records, per hostname, the
/// location paths that were annotated sticky for this backend; upstream
/// naming consults it (see the compiler's `upstream_name`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieAffinity {
    pub name: String,
    pub hash: String,
    pub locations: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub address: String,
    pub port: String,
}

// === impl Backend ===

impl Backend {
    pub fn has_cookie_affinity(&self) -> bool {
        self.session_affinity.affinity_type == "cookie"
    }

    /// Whether the (host, path) pair was registered sticky for this pool.
    pub fn is_sticky(&self, host: &str, path: &str) -> bool {
        self.session_affinity
            .cookie
            .locations
            .get(host)
            .is_some_and(|paths| paths.iter().any(|p| p == path))
    }
}
