#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! In-memory model of the ingress configuration handed to the nginx
//! compiler. The model is rebuilt wholesale by the cluster-state
//! aggregator on every relevant change and consumed as an immutable
//! snapshot; absent optional sections mean "feature disabled".

mod auth;
mod backend;
mod location;
mod options;
mod ratelimit;
mod server;

pub use self::{
    auth::ExternalAuth,
    backend::{Affinity, Backend, CookieAffinity, Endpoint},
    location::{
        BackendProtocol, BasicDigestAuth, BasicDigestAuthType, Connection, CorsConfig, FastCgi,
        IngressRef, Location, Logs, Mirror, Override, PathType, Proxy, Redirect, Rewrite,
    },
    options::{GlobalExternalAuth, ListenPorts, LogFormatEscape, Options},
    ratelimit::{RateLimit, RateLimitZone},
    server::{CertificateAuth, HostRedirect, ProxySsl, Server},
};
pub use ipnet::IpNet;

use serde::{Deserialize, Serialize};

/// Name of the shared upstream used when routing decisions are delegated
/// to the in-proxy balancer at request time.
pub const DYNAMIC_UPSTREAM: &str = "upstream_balancer";

/// Name of the backend every unmatched request falls through to.
pub const DEFAULT_BACKEND: &str = "upstream-default-backend";

/// A complete configuration snapshot: one compile pass consumes exactly
/// one of these.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub options: Options,
    pub backends: Vec<Backend>,
    pub servers: Vec<Server>,
    /// Host-level redirects (e.g. from/to-www) rendered as dedicated
    /// redirect-only server blocks.
    pub redirect_servers: Vec<HostRedirect>,
}

// === impl Configuration ===

impl Configuration {
    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_snapshot_fills_defaults() {
        let cfg: Configuration = serde_json::from_str(
            r#"{"servers": [{"hostname": "example.com", "locations": [{"path": "/"}]}]}"#,
        )
        .unwrap();

        assert_eq!(cfg.options.listen_ports.http, 80);
        assert_eq!(cfg.options.listen_ports.https, 443);
        let location = &cfg.servers[0].locations[0];
        assert_eq!(location.proxy.body_size, "1m");
        assert!(location.logs.access);
        assert_eq!(location.opentelemetry, Override::Unset);
        assert!(cfg.backend("missing").is_none());
    }

    #[test]
    fn override_resolution() {
        assert!(Override::Unset.resolve(true));
        assert!(!Override::Unset.resolve(false));
        assert!(Override::Enabled.resolve(false));
        assert!(!Override::Disabled.resolve(true));
    }

    #[test]
    fn sticky_lookup_is_per_host_and_path() {
        let backend: Backend = serde_json::from_str(
            r#"{
                "name": "ns-svc-80",
                "session_affinity": {
                    "affinity_type": "cookie",
                    "cookie": {"name": "route", "hash": "sha1",
                               "locations": {"example.com": ["/app"]}}
                }
            }"#,
        )
        .unwrap();

        assert!(backend.has_cookie_affinity());
        assert!(backend.is_sticky("example.com", "/app"));
        assert!(!backend.is_sticky("example.com", "/other"));
        assert!(!backend.is_sticky("other.com", "/app"));
    }
}
