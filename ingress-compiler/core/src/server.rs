use crate::location::Location;
use serde::{Deserialize, Serialize};

/// One virtual host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    /// FQDN, or `_` for the catch-all server.
    pub hostname: String,
    pub aliases: Vec<String>,
    pub ssl_certificate: String,
    pub ssl_full_chain_certificate: String,
    pub ssl_pem_checksum: String,
    pub ssl_ciphers: String,
    pub ssl_prefer_server_ciphers: String,
    /// Client-certificate (mutual TLS) policy.
    pub certificate_auth: CertificateAuth,
    /// TLS policy towards the upstreams of this host.
    pub proxy_ssl: ProxySsl,
    /// When set the TLS auth material could not be loaded and every
    /// request is answered 403; the string is the reason.
    pub auth_tls_error: Option<String>,
    pub locations: Vec<Location>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateAuth {
    pub ca_file: String,
    pub crl_file: String,
    pub verify_client: String,
    pub validation_depth: u32,
    pub error_page: String,
    pub pass_cert_to_upstream: bool,
    /// Regex the client certificate subject CN must match.
    pub match_cn: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySsl {
    pub ca_file: String,
    pub ca_sha: String,
    pub ciphers: String,
    pub protocols: String,
    pub verify: String,
    pub verify_depth: u32,
    pub pem_file: String,
    pub proxy_ssl_name: String,
    pub proxy_ssl_server_name: String,
}

/// A host-level redirect rendered as a dedicated server block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRedirect {
    pub from: String,
    pub to: String,
}

// === impl Server ===

impl Server {
    pub fn is_catch_all(&self) -> bool {
        self.hostname == "_"
    }
}
