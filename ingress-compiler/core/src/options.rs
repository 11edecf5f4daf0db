use crate::auth::ExternalAuth;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::IpAddr};

/// Process-wide options for one compile pass. Defaults mirror the
/// controller's shipped configuration; the aggregator overlays the
/// user-facing ConfigMap on top before handing the snapshot over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    // Worker model.
    pub pid: String,
    pub worker_processes: String,
    pub worker_rlimit_nofile: u64,
    pub worker_shutdown_timeout: String,
    pub worker_cpu_affinity: String,
    pub max_worker_connections: u64,
    pub enable_multi_accept: bool,
    pub debug_connections: Vec<String>,

    // Core http behavior.
    pub default_type: String,
    pub show_server_tokens: bool,
    pub enable_aio_write: bool,
    pub resolvers: Vec<IpAddr>,
    pub disable_ipv6_dns: bool,
    pub keep_alive: u64,
    pub keep_alive_requests: u64,
    pub client_header_buffer_size: String,
    pub client_header_timeout: u64,
    pub large_client_header_buffers: String,
    pub client_body_buffer_size: String,
    pub client_body_timeout: u64,
    pub server_name_hash_max_size: u32,
    pub server_name_hash_bucket_size: u32,
    pub map_hash_bucket_size: u32,
    pub proxy_headers_hash_max_size: u32,
    pub proxy_headers_hash_bucket_size: u32,
    pub variables_hash_bucket_size: u32,
    pub variables_hash_max_size: u32,
    pub enable_underscores_in_headers: bool,
    pub ignore_invalid_headers: bool,
    pub limit_req_status_code: u16,
    pub limit_conn_status_code: u16,
    pub limit_conn_zone_variable: String,
    pub http2_max_concurrent_streams: u32,
    pub grpc_buffer_size_kb: u32,

    // TLS policy.
    pub ssl_protocols: String,
    pub ssl_early_data: bool,
    pub ssl_session_tickets: bool,
    pub ssl_session_ticket_key: String,
    pub ssl_session_cache: bool,
    pub ssl_session_cache_size: String,
    pub ssl_session_timeout: String,
    pub ssl_buffer_size: String,
    pub ssl_ecdh_curve: String,
    pub ssl_ciphers: String,
    pub ssl_dh_param: String,
    pub default_ssl_certificate: String,
    pub ssl_reject_handshake: bool,

    // Compression.
    pub use_gzip: bool,
    pub gzip_level: u32,
    pub gzip_min_length: u32,
    pub gzip_types: String,
    pub gzip_disable: String,
    pub enable_brotli: bool,
    pub brotli_level: u32,
    pub brotli_min_length: u32,
    pub brotli_types: String,

    // Observability toggles. These gate module loading and per-location
    // directives; the compiler itself emits no telemetry.
    pub enable_opentelemetry: bool,
    pub opentelemetry_config: String,
    pub opentelemetry_operation_name: String,
    pub opentelemetry_trust_incoming_span: bool,
    pub enable_modsecurity: bool,
    pub enable_metrics: bool,

    // Logging.
    pub log_format_upstream: String,
    pub log_format_escape: LogFormatEscape,
    pub skip_access_log_urls: Vec<String>,
    pub access_log_path: String,
    pub http_access_log_path: String,
    pub error_log_path: String,
    pub error_log_level: String,
    pub disable_access_log: bool,
    pub disable_http_access_log: bool,
    pub enable_syslog: bool,
    pub syslog_host: String,
    pub syslog_port: u16,
    pub enable_auth_access_log: bool,

    // Client address recovery.
    pub use_forwarded_headers: bool,
    pub compute_full_forwarded_for: bool,
    pub use_proxy_protocol: bool,
    pub enable_real_ip: bool,
    pub forwarded_for_header: String,
    pub proxy_real_ip_cidr: Vec<String>,
    pub proxy_add_original_uri_header: bool,

    // Routing/global behavior.
    pub retry_non_idempotent: bool,
    pub use_http2: bool,
    pub dynamic_configuration_enabled: bool,
    pub generate_request_id: bool,
    pub allow_backend_server_header: bool,
    pub hide_headers: Vec<String>,
    pub add_headers: BTreeMap<String, String>,
    pub proxy_set_headers: BTreeMap<String, String>,
    pub relative_redirects: bool,
    pub custom_http_errors: Vec<u16>,
    pub disable_proxy_intercept_errors: bool,
    pub http_redirect_code: u16,
    pub upstream_keepalive_connections: u32,
    pub upstream_keepalive_time: String,
    pub upstream_keepalive_timeout: u64,
    pub upstream_keepalive_requests: u32,
    pub block_cidrs: Vec<String>,
    pub block_user_agents: Vec<String>,
    pub block_referers: Vec<String>,
    pub lua_shared_dicts: BTreeMap<String, u64>,

    // External authentication defaults.
    pub global_external_auth: ExternalAuth,
    /// Comma-separated path prefixes exempt from any authentication.
    pub no_auth_locations: String,
    /// Comma-separated path prefixes exempt from TLS redirection.
    pub no_tls_redirect_locations: String,

    // Listener topology.
    pub listen_ports: ListenPorts,
    pub bind_address_ipv4: Vec<String>,
    pub bind_address_ipv6: Vec<String>,
    pub is_ipv6_enabled: bool,
    pub is_ssl_passthrough_enabled: bool,
    pub reuse_port: bool,
    pub backlog_size: u32,

    // Operational endpoints.
    pub healthz_uri: String,
    pub status_path: String,
    pub status_ipv4_allowlist: Vec<String>,
    pub status_ipv6_allowlist: Vec<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatEscape {
    #[default]
    Default,
    Json,
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenPorts {
    pub http: u16,
    pub https: u16,
    pub ssl_proxy: u16,
    pub default_backend: u16,
    pub status: u16,
}

/// Re-exported under the name the aggregator uses for the global auth
/// section of the ConfigMap.
pub type GlobalExternalAuth = ExternalAuth;

impl Default for ListenPorts {
    fn default() -> Self {
        Self {
            http: 80,
            https: 443,
            ssl_proxy: 442,
            default_backend: 8181,
            status: 10246,
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pid: "/tmp/nginx/nginx.pid".into(),
            worker_processes: "auto".into(),
            worker_rlimit_nofile: 1047552,
            worker_shutdown_timeout: "240s".into(),
            worker_cpu_affinity: String::new(),
            max_worker_connections: 16384,
            enable_multi_accept: true,
            debug_connections: Vec::new(),

            default_type: "text/html".into(),
            show_server_tokens: false,
            enable_aio_write: true,
            resolvers: Vec::new(),
            disable_ipv6_dns: false,
            keep_alive: 75,
            keep_alive_requests: 1000,
            client_header_buffer_size: "1k".into(),
            client_header_timeout: 60,
            large_client_header_buffers: "4 8k".into(),
            client_body_buffer_size: "8k".into(),
            client_body_timeout: 60,
            server_name_hash_max_size: 1024,
            server_name_hash_bucket_size: 64,
            map_hash_bucket_size: 64,
            proxy_headers_hash_max_size: 512,
            proxy_headers_hash_bucket_size: 64,
            variables_hash_bucket_size: 256,
            variables_hash_max_size: 2048,
            enable_underscores_in_headers: false,
            ignore_invalid_headers: true,
            limit_req_status_code: 503,
            limit_conn_status_code: 503,
            limit_conn_zone_variable: "$binary_remote_addr".into(),
            http2_max_concurrent_streams: 128,
            grpc_buffer_size_kb: 0,

            ssl_protocols: "TLSv1.2 TLSv1.3".into(),
            ssl_early_data: false,
            ssl_session_tickets: false,
            ssl_session_ticket_key: String::new(),
            ssl_session_cache: true,
            ssl_session_cache_size: "10m".into(),
            ssl_session_timeout: "10m".into(),
            ssl_buffer_size: "4k".into(),
            ssl_ecdh_curve: "auto".into(),
            ssl_ciphers: String::new(),
            ssl_dh_param: String::new(),
            default_ssl_certificate: "/etc/ingress-controller/ssl/default-fake-certificate.pem"
                .into(),
            ssl_reject_handshake: false,

            use_gzip: false,
            gzip_level: 1,
            gzip_min_length: 256,
            gzip_types: "application/javascript application/json application/xml text/css \
                         text/javascript text/plain text/xml"
                .into(),
            gzip_disable: String::new(),
            enable_brotli: false,
            brotli_level: 4,
            brotli_min_length: 20,
            brotli_types: "application/javascript application/json text/css text/plain".into(),

            enable_opentelemetry: false,
            opentelemetry_config: "/etc/nginx/opentelemetry.toml".into(),
            opentelemetry_operation_name: String::new(),
            opentelemetry_trust_incoming_span: true,
            enable_modsecurity: false,
            enable_metrics: true,

            log_format_upstream: "$remote_addr - $remote_user [$time_local] \"$request\" \
                                  $status $body_bytes_sent \"$http_referer\" \
                                  \"$http_user_agent\" $request_length $request_time \
                                  [$proxy_upstream_name] [$proxy_alternative_upstream_name] \
                                  $upstream_addr $upstream_response_length \
                                  $upstream_response_time $upstream_status $req_id"
                .into(),
            log_format_escape: LogFormatEscape::Default,
            skip_access_log_urls: Vec::new(),
            access_log_path: "/var/log/nginx/access.log".into(),
            http_access_log_path: String::new(),
            error_log_path: "/var/log/nginx/error.log".into(),
            error_log_level: "notice".into(),
            disable_access_log: false,
            disable_http_access_log: false,
            enable_syslog: false,
            syslog_host: String::new(),
            syslog_port: 514,
            enable_auth_access_log: false,

            use_forwarded_headers: false,
            compute_full_forwarded_for: false,
            use_proxy_protocol: false,
            enable_real_ip: false,
            forwarded_for_header: "X-Forwarded-For".into(),
            proxy_real_ip_cidr: vec!["0.0.0.0/0".into()],
            proxy_add_original_uri_header: false,

            retry_non_idempotent: false,
            use_http2: true,
            dynamic_configuration_enabled: true,
            generate_request_id: true,
            allow_backend_server_header: false,
            hide_headers: Vec::new(),
            add_headers: BTreeMap::new(),
            proxy_set_headers: BTreeMap::new(),
            relative_redirects: false,
            custom_http_errors: Vec::new(),
            disable_proxy_intercept_errors: false,
            http_redirect_code: 308,
            upstream_keepalive_connections: 320,
            upstream_keepalive_time: "1h".into(),
            upstream_keepalive_timeout: 60,
            upstream_keepalive_requests: 10000,
            block_cidrs: Vec::new(),
            block_user_agents: Vec::new(),
            block_referers: Vec::new(),
            lua_shared_dicts: BTreeMap::new(),

            global_external_auth: ExternalAuth::default(),
            no_auth_locations: "/.well-known/acme-challenge".into(),
            no_tls_redirect_locations: "/.well-known/acme-challenge".into(),

            listen_ports: ListenPorts::default(),
            bind_address_ipv4: Vec::new(),
            bind_address_ipv6: Vec::new(),
            is_ipv6_enabled: true,
            is_ssl_passthrough_enabled: false,
            reuse_port: true,
            backlog_size: 511,

            healthz_uri: "/healthz".into(),
            status_path: "/nginx_status".into(),
            status_ipv4_allowlist: vec!["127.0.0.1".into()],
            status_ipv6_allowlist: vec!["::1".into()],
        }
    }
}
