use crate::{auth::ExternalAuth, ratelimit::RateLimit, server::ProxySsl};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One routing rule inside a [`crate::Server`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub path: String,
    pub path_type: PathType,
    /// Name of the [`crate::Backend`] requests are forwarded to.
    pub backend: String,
    /// Upstream serving the custom error pages for this rule.
    pub default_backend_upstream_name: String,
    pub backend_protocol: BackendProtocol,
    /// Identity of the Ingress rule this location was generated from,
    /// surfaced to the proxy as request-scoped variables.
    pub ingress: IngressRef,
    pub rewrite: Rewrite,
    pub proxy: Proxy,
    /// When set the location answers 503 unconditionally; the string is
    /// the reason recorded by the aggregator.
    pub denied: Option<String>,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub cors: CorsConfig,
    pub external_auth: ExternalAuth,
    /// Whether the global external auth (if configured) applies here.
    pub enable_global_auth: bool,
    pub rate_limit: RateLimit,
    pub mirror: Mirror,
    pub basic_digest_auth: BasicDigestAuth,
    pub custom_http_errors: Vec<u16>,
    pub disable_proxy_intercept_errors: bool,
    pub custom_headers: BTreeMap<String, String>,
    pub satisfy: String,
    /// Overwrites the Host header sent upstream.
    pub upstream_vhost: String,
    pub x_forwarded_prefix: String,
    pub connection: Connection,
    pub client_body_buffer_size: String,
    pub redirect: Redirect,
    pub logs: Logs,
    pub opentelemetry: Override,
    pub opentelemetry_operation_name: String,
    pub opentelemetry_trust_incoming_span: Override,
    pub fastcgi: FastCgi,
    pub use_port_in_redirects: bool,
    /// TLS policy towards this rule's upstream, overriding the server's.
    pub proxy_ssl: ProxySsl,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathType {
    #[default]
    Prefix,
    Exact,
    ImplementationSpecific,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendProtocol {
    #[default]
    Http,
    AutoHttp,
    Https,
    Grpc,
    Grpcs,
    Fcgi,
    Ajp,
}

/// Tri-state feature override. `Unset` defers to the global setting;
/// the other two variants win over it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressRef {
    pub namespace: String,
    pub name: String,
    pub service_name: String,
    pub service_port: String,
    pub path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rewrite {
    pub target: String,
    pub use_regex: bool,
    /// Injects a `<base>` tag into HTML responses pointing at the
    /// rewritten prefix.
    pub add_base_url: bool,
    pub base_url_scheme: String,
    /// Redirects `/` to this application root.
    pub app_root: String,
    pub force_ssl_redirect: bool,
    pub ssl_redirect: bool,
    pub preserve_trailing_slash: bool,
}

/// Per-location proxying knobs (timeouts are seconds).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Proxy {
    pub body_size: String,
    pub connect_timeout: u64,
    pub send_timeout: u64,
    pub read_timeout: u64,
    pub buffers_number: u32,
    pub buffer_size: String,
    pub busy_buffers_size: String,
    pub request_buffering: String,
    pub proxy_buffering: String,
    pub proxy_http_version: String,
    pub cookie_domain: String,
    pub cookie_path: String,
    pub next_upstream: String,
    pub next_upstream_timeout: u64,
    pub next_upstream_tries: u32,
    pub proxy_redirect_from: String,
    pub proxy_redirect_to: String,
    pub proxy_max_temp_file_size: String,
}

impl Default for Proxy {
    fn default() -> Self {
        Self {
            body_size: "1m".into(),
            connect_timeout: 5,
            send_timeout: 60,
            read_timeout: 60,
            buffers_number: 4,
            buffer_size: "4k".into(),
            busy_buffers_size: "8k".into(),
            request_buffering: "on".into(),
            proxy_buffering: "off".into(),
            proxy_http_version: "1.1".into(),
            cookie_domain: "off".into(),
            cookie_path: "off".into(),
            next_upstream: "error timeout".into(),
            next_upstream_timeout: 0,
            next_upstream_tries: 3,
            proxy_redirect_from: "off".into(),
            proxy_redirect_to: "off".into(),
            proxy_max_temp_file_size: "1024m".into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_origins: Vec<String>,
    pub allow_methods: String,
    pub allow_headers: String,
    pub allow_credentials: bool,
    pub expose_headers: String,
    pub max_age: u64,
}

/// Traffic mirroring: `source` is the internal location requests are
/// mirrored to, `target` the URL it forwards to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mirror {
    pub source: String,
    pub target: String,
    pub host: String,
    pub request_body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicDigestAuth {
    pub secured: bool,
    pub auth_type: BasicDigestAuthType,
    pub realm: String,
    pub file: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasicDigestAuthType {
    #[default]
    Basic,
    Digest,
}

/// Connection-header override towards the upstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub enabled: bool,
    pub header: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Redirect {
    pub url: String,
    pub code: u16,
    pub relative: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logs {
    pub access: bool,
    pub rewrite: bool,
}

impl Default for Logs {
    fn default() -> Self {
        Self {
            access: true,
            rewrite: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastCgi {
    pub index: String,
    pub params: BTreeMap<String, String>,
}

// === impl Location ===

impl Location {
    /// A rewrite applies only when a target is set and differs from the
    /// literal path.
    pub fn needs_rewrite(&self) -> bool {
        !self.rewrite.target.is_empty() && self.rewrite.target != self.path
    }

    pub fn is_grpc(&self) -> bool {
        matches!(
            self.backend_protocol,
            BackendProtocol::Grpc | BackendProtocol::Grpcs
        )
    }
}

// === impl Override ===

impl Override {
    /// Resolves the tri-state against the global default.
    pub fn resolve(self, global: bool) -> bool {
        match self {
            Self::Unset => global,
            Self::Enabled => true,
            Self::Disabled => false,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }
}
