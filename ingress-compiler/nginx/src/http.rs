//! Top-level assembly: the main context, the `events` block, and the
//! `http` block that stitches together upstreams, shared maps, rate-limit
//! zones, and every server block.

use crate::{
    authreq::{self, LocationAuth},
    directive::{block, directive, Arg, Directive},
    expr, Pass,
};
use ingress_compiler_core::{
    BasicDigestAuthType, LogFormatEscape, DEFAULT_BACKEND, DYNAMIC_UPSTREAM,
};
use std::collections::BTreeSet;

// === impl Pass ===

impl Pass<'_> {
    /// The complete directive tree for one configuration snapshot.
    pub(crate) fn compile(&self) -> Vec<Directive> {
        let options = &self.cfg.options;
        let mut dirs = vec![
            directive!("pid", &options.pid),
            directive!("daemon", "off"),
        ];
        dirs.extend(self.load_modules());
        dirs.extend([
            directive!("worker_processes", &options.worker_processes),
            directive!("worker_rlimit_nofile", options.worker_rlimit_nofile),
            directive!("worker_shutdown_timeout", &options.worker_shutdown_timeout),
        ]);
        if !options.worker_cpu_affinity.is_empty() {
            dirs.push(directive!(
                "worker_cpu_affinity",
                expr::split_tokens(&options.worker_cpu_affinity)
            ));
        }
        dirs.push(self.events());
        dirs.push(self.http());
        dirs
    }

    fn events(&self) -> Directive {
        let options = &self.cfg.options;
        let mut dirs = vec![
            directive!("worker_connections", options.max_worker_connections),
            directive!("use", "epoll"),
            directive!("multi_accept", options.enable_multi_accept),
        ];
        for conn in &options.debug_connections {
            dirs.push(directive!("debug_connection", conn));
        }
        block!("events", [], dirs)
    }

    fn http(&self) -> Directive {
        let options = &self.cfg.options;
        let mut dirs = vec![
            directive!("lua_package_path", "/etc/nginx/lua/?.lua;;"),
            directive!("lua_shared_dict", "luaconfig", "5m"),
            directive!("init_by_lua_file", "/etc/nginx/lua/nginx/ngx_conf_init.lua"),
            directive!(
                "init_worker_by_lua_file",
                "/etc/nginx/lua/nginx/ngx_conf_init_worker.lua"
            ),
            directive!("include", "/etc/nginx/mime.types"),
            directive!("default_type", &options.default_type),
            directive!("aio", "threads"),
            directive!("aio_write", options.enable_aio_write),
            directive!("server_tokens", options.show_server_tokens),
        ];

        if !options.resolvers.is_empty() {
            dirs.push(directive!(
                "resolver",
                expr::resolvers(&options.resolvers, options.disable_ipv6_dns)
            ));
        }

        dirs.extend([
            directive!("tcp_nopush", "on"),
            directive!("tcp_nodelay", "on"),
            directive!("log_subrequest", "on"),
            directive!("reset_timedout_connection", "on"),
            directive!("keepalive_timeout", Arg::seconds(options.keep_alive)),
            directive!("keepalive_requests", options.keep_alive_requests),
            directive!("client_body_temp_path", "/tmp/nginx/client-body"),
            directive!("fastcgi_temp_path", "/tmp/nginx/fastcgi-temp"),
            directive!("proxy_temp_path", "/tmp/nginx/proxy-temp"),
            directive!(
                "client_header_buffer_size",
                &options.client_header_buffer_size
            ),
            directive!(
                "client_header_timeout",
                Arg::seconds(options.client_header_timeout)
            ),
            directive!(
                "large_client_header_buffers",
                expr::split_tokens(&options.large_client_header_buffers)
            ),
            directive!("client_body_buffer_size", &options.client_body_buffer_size),
            directive!(
                "client_body_timeout",
                Arg::seconds(options.client_body_timeout)
            ),
            directive!("types_hash_max_size", 2048u32),
            directive!("server_names_hash_max_size", options.server_name_hash_max_size),
            directive!(
                "server_names_hash_bucket_size",
                options.server_name_hash_bucket_size
            ),
            directive!("map_hash_bucket_size", options.map_hash_bucket_size),
            directive!(
                "proxy_headers_hash_max_size",
                options.proxy_headers_hash_max_size
            ),
            directive!(
                "proxy_headers_hash_bucket_size",
                options.proxy_headers_hash_bucket_size
            ),
            directive!(
                "variables_hash_bucket_size",
                options.variables_hash_bucket_size
            ),
            directive!("variables_hash_max_size", options.variables_hash_max_size),
            directive!(
                "underscores_in_headers",
                options.enable_underscores_in_headers
            ),
            directive!("ignore_invalid_headers", options.ignore_invalid_headers),
            directive!("limit_req_status", options.limit_req_status_code),
            directive!("limit_conn_status", options.limit_conn_status_code),
            directive!("uninitialized_variable_warn", "off"),
            directive!("server_name_in_redirect", "off"),
            directive!("port_in_redirect", "off"),
            directive!(
                "http2_max_concurrent_streams",
                options.http2_max_concurrent_streams
            ),
            directive!("ssl_protocols", expr::split_tokens(&options.ssl_protocols)),
            directive!("ssl_early_data", options.ssl_early_data),
            directive!("ssl_session_tickets", options.ssl_session_tickets),
            directive!("ssl_buffer_size", &options.ssl_buffer_size),
            directive!("ssl_ecdh_curve", &options.ssl_ecdh_curve),
            directive!("ssl_certificate", &options.default_ssl_certificate),
            directive!("ssl_certificate_key", &options.default_ssl_certificate),
            directive!("proxy_ssl_session_reuse", "on"),
            directive!(
                "proxy_cache_path",
                "/tmp/nginx/nginx-cache-auth",
                "levels=1:2",
                "keys_zone=auth_cache:10m",
                "max_size=128m",
                "inactive=30m",
                "use_temp_path=off"
            ),
        ]);

        for (name, kb) in &options.lua_shared_dicts {
            dirs.push(directive!("lua_shared_dict", name, expr::dict_size(*kb)));
        }

        if self.opentelemetry_module_needed() {
            dirs.push(directive!(
                "opentelemetry_config",
                &options.opentelemetry_config
            ));
        }

        dirs.extend(self.real_ip_directives());

        if options.grpc_buffer_size_kb > 0 {
            dirs.push(directive!(
                "grpc_buffer_size",
                format!("{}k", options.grpc_buffer_size_kb)
            ));
        }

        if options.use_gzip {
            dirs.extend([
                directive!("gzip", "on"),
                directive!("gzip_comp_level", options.gzip_level),
                directive!("gzip_http_version", "1.1"),
                directive!("gzip_min_length", options.gzip_min_length),
                directive!("gzip_types", expr::split_tokens(&options.gzip_types)),
                directive!("gzip_proxied", "any"),
                directive!("gzip_vary", "on"),
            ]);
            if !options.gzip_disable.is_empty() {
                dirs.push(directive!(
                    "gzip_disable",
                    expr::split_tokens(&options.gzip_disable)
                ));
            }
        }

        if options.enable_brotli {
            dirs.extend([
                directive!("brotli", "on"),
                directive!("brotli_comp_level", options.brotli_level),
                directive!("brotli_min_length", options.brotli_min_length),
                directive!("brotli_types", expr::split_tokens(&options.brotli_types)),
            ]);
        }

        if !options.opentelemetry_operation_name.is_empty() {
            dirs.push(directive!(
                "opentelemetry_operation_name",
                &options.opentelemetry_operation_name
            ));
        }

        if !options.show_server_tokens {
            dirs.push(directive!("more_clear_headers", "Server"));
        }

        // Expansion-proofing for user-supplied text carrying literal `$`.
        dirs.push(block!(
            "geo",
            ["$literal_dollar"],
            vec![directive!("default", "$")],
        ));

        for (name, value) in &options.add_headers {
            dirs.push(directive!("more_set_headers", format!("'{name}: {value}'")));
        }

        dirs.push(self.log_format());
        dirs.push(self.loggable_map());
        dirs.extend(self.access_log_directives());
        dirs.push(self.error_log_directive());

        if options.ssl_session_cache {
            dirs.push(directive!(
                "ssl_session_cache",
                format!("shared:SSL:{}", options.ssl_session_cache_size)
            ));
            dirs.push(directive!("ssl_session_timeout", &options.ssl_session_timeout));
        }
        if !options.ssl_session_ticket_key.is_empty() {
            dirs.push(directive!(
                "ssl_session_ticket_key",
                "/etc/ingress-controller/tickets.key"
            ));
        }
        if !options.ssl_ciphers.is_empty() {
            dirs.push(directive!("ssl_ciphers", &options.ssl_ciphers));
            dirs.push(directive!("ssl_prefer_server_ciphers", "on"));
        }
        if !options.ssl_dh_param.is_empty() {
            dirs.push(directive!("ssl_dhparam", &options.ssl_dh_param));
        }

        if !options.custom_http_errors.is_empty() && !options.disable_proxy_intercept_errors {
            dirs.push(directive!("proxy_intercept_errors", "on"));
        }
        if options.relative_redirects {
            dirs.push(directive!("absolute_redirect", "off"));
        }

        dirs.push(self.connection_upgrade_map());
        dirs.push(self.request_id_map());
        if options.use_forwarded_headers && options.compute_full_forwarded_for {
            dirs.push(self.full_forwarded_for_map());
        }

        if options.allow_backend_server_header {
            dirs.push(directive!("proxy_pass_header", "Server"));
        }
        for header in &options.hide_headers {
            dirs.push(directive!("proxy_hide_header", header));
        }

        dirs.push(self.balancer_upstream());
        dirs.extend(self.rate_limit_context());

        for cidr in &options.block_cidrs {
            dirs.push(directive!("deny", cidr.trim()));
        }
        if !options.block_user_agents.is_empty() {
            dirs.push(match_map("$http_user_agent", "$block_ua", &options.block_user_agents));
        }
        if !options.block_referers.is_empty() {
            dirs.push(match_map("$http_referer", "$block_ref", &options.block_referers));
        }

        for code in &options.custom_http_errors {
            dirs.push(directive!(
                "error_page",
                *code,
                "=",
                format!("@custom_{DEFAULT_BACKEND}_{code}")
            ));
        }

        for redirect in &self.cfg.redirect_servers {
            dirs.push(Directive::marker(["start", "server", redirect.from.as_str()]));
            dirs.push(self.redirect_server(redirect));
            dirs.push(Directive::marker(["end", "server", redirect.from.as_str()]));
        }

        dirs.extend(self.auth_upstreams());

        for server in &self.cfg.servers {
            dirs.push(Directive::marker(["start", "server", server.hostname.as_str()]));
            dirs.push(self.server_directive(server));
            dirs.push(Directive::marker(["end", "server", server.hostname.as_str()]));
        }

        dirs.push(self.default_backend_server());
        dirs.push(self.health_stats_server());

        Directive::new("http").with_block(dirs)
    }

    /// Dynamic modules are loaded only when something in the snapshot
    /// uses them; every module costs worker memory.
    fn load_modules(&self) -> Vec<Directive> {
        let options = &self.cfg.options;
        let mut dirs = Vec::new();
        if options.enable_brotli {
            dirs.push(directive!(
                "load_module",
                "/etc/nginx/modules/ngx_http_brotli_filter_module.so"
            ));
            dirs.push(directive!(
                "load_module",
                "/etc/nginx/modules/ngx_http_brotli_static_module.so"
            ));
        }
        if self.digest_auth_needed() {
            dirs.push(directive!(
                "load_module",
                "/etc/nginx/modules/ngx_http_auth_digest_module.so"
            ));
        }
        if options.enable_modsecurity {
            dirs.push(directive!(
                "load_module",
                "/etc/nginx/modules/ngx_http_modsecurity_module.so"
            ));
        }
        if self.opentelemetry_module_needed() {
            dirs.push(directive!(
                "load_module",
                "/etc/nginx/modules/otel_ngx_module.so"
            ));
        }
        dirs
    }

    fn digest_auth_needed(&self) -> bool {
        self.cfg
            .servers
            .iter()
            .flat_map(|s| &s.locations)
            .any(|loc| {
                loc.basic_digest_auth.secured
                    && loc.basic_digest_auth.auth_type == BasicDigestAuthType::Digest
            })
    }

    fn opentelemetry_module_needed(&self) -> bool {
        self.cfg.options.enable_opentelemetry
            || self
                .cfg
                .servers
                .iter()
                .flat_map(|s| &s.locations)
                .any(|loc| loc.opentelemetry.is_enabled())
    }

    fn real_ip_directives(&self) -> Vec<Directive> {
        let options = &self.cfg.options;
        if !(options.use_forwarded_headers || options.use_proxy_protocol || options.enable_real_ip)
        {
            return Vec::new();
        }

        let header = if options.use_proxy_protocol {
            "proxy_protocol".to_string()
        } else {
            options.forwarded_for_header.clone()
        };
        let mut dirs = vec![
            directive!("real_ip_header", header),
            directive!("real_ip_recursive", "on"),
        ];
        for cidr in &options.proxy_real_ip_cidr {
            dirs.push(directive!("set_real_ip_from", cidr));
        }
        dirs
    }

    fn log_format(&self) -> Directive {
        let options = &self.cfg.options;
        let mut d = Directive::new("log_format").arg("upstreaminfo");
        match options.log_format_escape {
            LogFormatEscape::Json => d = d.arg("escape=json"),
            LogFormatEscape::None => d = d.arg("escape=none"),
            LogFormatEscape::Default => {}
        }
        d.arg(format!("'{}'", options.log_format_upstream))
    }

    /// `$loggable` is 0 for request URIs the operator asked not to log.
    fn loggable_map(&self) -> Directive {
        let mut entries = Vec::new();
        for url in &self.cfg.options.skip_access_log_urls {
            entries.push(directive!(url, "0"));
        }
        entries.push(directive!("default", "1"));
        block!("map", ["$request_uri", "$loggable"], entries)
    }

    fn access_log_directives(&self) -> Vec<Directive> {
        let options = &self.cfg.options;
        if options.disable_access_log || options.disable_http_access_log {
            return vec![directive!("access_log", "off")];
        }

        let target = if options.enable_syslog {
            format!("syslog:server={}:{}", options.syslog_host, options.syslog_port)
        } else if !options.http_access_log_path.is_empty() {
            options.http_access_log_path.clone()
        } else {
            options.access_log_path.clone()
        };
        vec![directive!("access_log", target, "upstreaminfo", "if=$loggable")]
    }

    fn error_log_directive(&self) -> Directive {
        let options = &self.cfg.options;
        let target = if options.enable_syslog {
            format!("syslog:server={}:{}", options.syslog_host, options.syslog_port)
        } else {
            options.error_log_path.clone()
        };
        directive!("error_log", target, &options.error_log_level)
    }

    fn connection_upgrade_map(&self) -> Directive {
        // With upstream keepalive the Connection header must not default
        // to `close` on non-upgrade requests.
        let empty_value = if self.cfg.options.upstream_keepalive_connections < 1 {
            "close"
        } else {
            "''"
        };
        block!(
            "map",
            ["$http_upgrade", "$connection_upgrade"],
            vec![
                directive!("default", "upgrade"),
                directive!("''", empty_value),
            ],
        )
    }

    fn request_id_map(&self) -> Directive {
        let mut entries = vec![directive!("default", "$http_x_request_id")];
        if self.cfg.options.generate_request_id {
            entries.push(directive!("''", "$request_id"));
        }
        block!("map", ["$http_x_request_id", "$req_id"], entries)
    }

    fn full_forwarded_for_map(&self) -> Directive {
        let source = expr::header_variable(&self.cfg.options.forwarded_for_header);
        let client = if self.cfg.options.use_proxy_protocol {
            "$proxy_protocol_addr"
        } else {
            "$realip_remote_addr"
        };
        block!(
            "map",
            [source.as_str(), "$full_x_forwarded_for"],
            vec![
                directive!("default", format!("\"{source}, {client}\"")),
                directive!("''", format!("\"{client}\"")),
            ],
        )
    }

    /// The shared upstream every dynamically-balanced location points at.
    fn balancer_upstream(&self) -> Directive {
        let options = &self.cfg.options;
        let mut dirs = vec![
            // Placeholder address; the Lua balancer picks real endpoints.
            directive!("server", "0.0.0.1"),
            directive!(
                "balancer_by_lua_file",
                "/etc/nginx/lua/nginx/ngx_conf_balancer.lua"
            ),
        ];
        if options.upstream_keepalive_connections > 0 {
            dirs.extend([
                directive!("keepalive", options.upstream_keepalive_connections),
                directive!("keepalive_time", &options.upstream_keepalive_time),
                directive!(
                    "keepalive_timeout",
                    Arg::seconds(options.upstream_keepalive_timeout)
                ),
                directive!("keepalive_requests", options.upstream_keepalive_requests),
            ]);
        }
        block!("upstream", [DYNAMIC_UPSTREAM], dirs)
    }

    /// Allowlist geo/map pairs and shared-memory zones for every rate
    /// limit in the snapshot, deduplicated across locations.
    fn rate_limit_context(&self) -> Vec<Directive> {
        let options = &self.cfg.options;
        let mut seen_ids = BTreeSet::new();
        let mut zones: BTreeSet<String> = BTreeSet::new();
        let mut dirs = Vec::new();
        let mut zone_dirs = Vec::new();

        for location in self.cfg.servers.iter().flat_map(|s| &s.locations) {
            let rl = &location.rate_limit;
            if !rl.is_set() {
                continue;
            }

            if seen_ids.insert(rl.id.clone()) {
                dirs.push(Directive::comment(format!("Ratelimit {}", rl.name)));
                let mut geo = vec![directive!("default", "0")];
                for cidr in &rl.allowlist {
                    geo.push(directive!(cidr, "1"));
                }
                dirs.push(block!(
                    "geo",
                    ["$remote_addr", format!("$allowlist_{}", rl.id)],
                    geo,
                ));
                dirs.push(block!(
                    "map",
                    [format!("$allowlist_{}", rl.id), format!("$limit_{}", rl.id)],
                    vec![
                        directive!("0", &options.limit_conn_zone_variable),
                        directive!("1", "''"),
                    ],
                ));
            }

            if rl.connections.limit > 0 {
                let zone = format!(
                    "zone={}:{}m",
                    rl.connections.name, rl.connections.shared_size
                );
                if zones.insert(format!("conn {zone}")) {
                    zone_dirs.push(directive!(
                        "limit_conn_zone",
                        format!("$limit_{}", rl.id),
                        zone
                    ));
                }
            }
            if rl.rps.limit > 0 {
                let zone = format!(
                    "zone={}:{}m rate={}r/s",
                    rl.rps.name, rl.rps.shared_size, rl.rps.limit
                );
                if zones.insert(format!("req {zone}")) {
                    zone_dirs.push(directive!(
                        "limit_req_zone",
                        format!("$limit_{}", rl.id),
                        format!("zone={}:{}m", rl.rps.name, rl.rps.shared_size),
                        format!("rate={}r/s", rl.rps.limit)
                    ));
                }
            }
            if rl.rpm.limit > 0 {
                let zone = format!(
                    "zone={}:{}m rate={}r/m",
                    rl.rpm.name, rl.rpm.shared_size, rl.rpm.limit
                );
                if zones.insert(format!("req {zone}")) {
                    zone_dirs.push(directive!(
                        "limit_req_zone",
                        format!("$limit_{}", rl.id),
                        format!("zone={}:{}m", rl.rpm.name, rl.rpm.shared_size),
                        format!("rate={}r/m", rl.rpm.limit)
                    ));
                }
            }
        }

        dirs.extend(zone_dirs);
        dirs
    }

    /// Keepalive upstreams for external-auth services, one per location
    /// that opts into connection reuse.
    fn auth_upstreams(&self) -> Vec<Directive> {
        let options = &self.cfg.options;
        let mut seen = BTreeSet::new();
        let mut dirs = Vec::new();

        for server in &self.cfg.servers {
            for location in &server.locations {
                let auth = LocationAuth::resolve(location, options);
                if !(auth.apply_upstream && !auth.apply_global) {
                    continue;
                }
                let Some(name) = authreq::auth_upstream_name(location, &server.hostname) else {
                    continue;
                };
                if !seen.insert(name.clone()) {
                    continue;
                }
                let Some(endpoint) = authreq::extract_host_port(&auth.auth.url) else {
                    tracing::warn!(
                        url = %auth.auth.url,
                        "skipping auth upstream with unparseable url",
                    );
                    continue;
                };

                dirs.push(Directive::marker([
                    "start",
                    "auth",
                    "upstream",
                    auth.auth.host.as_str(),
                    location.path.as_str(),
                ]));
                dirs.push(block!(
                    "upstream",
                    [name],
                    vec![
                        directive!("server", endpoint),
                        directive!("keepalive", auth.auth.keepalive_connections),
                        directive!("keepalive_requests", auth.auth.keepalive_requests),
                        directive!(
                            "keepalive_timeout",
                            Arg::seconds(auth.auth.keepalive_timeout)
                        ),
                    ],
                ));
                dirs.push(Directive::marker([
                    "end",
                    "auth",
                    "upstream",
                    auth.auth.host.as_str(),
                    location.path.as_str(),
                ]));
            }
        }

        dirs
    }
}

fn match_map(source: &str, variable: &str, entries: &[String]) -> Directive {
    let mut body = vec![directive!("default", "0")];
    for entry in entries {
        body.push(directive!(entry, "1"));
    }
    block!("map", [source, variable], body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingress_compiler_core::{
        Configuration, Location, RateLimit, RateLimitZone, Server,
    };

    fn pass_over(cfg: &Configuration) -> Pass<'_> {
        Pass {
            cfg,
            deny: Box::leak(Box::new(expr::DenyVariables::new())),
        }
    }

    fn find<'a>(dirs: &'a [Directive], name: &str) -> Vec<&'a Directive> {
        dirs.iter().filter(|d| d.name == name).collect()
    }

    fn http_block(cfg: &Configuration) -> Vec<Directive> {
        let tree = pass_over(cfg).compile();
        tree.into_iter()
            .find(|d| d.name == "http")
            .unwrap()
            .block
            .unwrap()
    }

    fn limited_location(id: &str, zone_name: &str) -> Location {
        Location {
            path: "/".to_string(),
            rate_limit: RateLimit {
                id: id.to_string(),
                name: format!("limit-{id}"),
                rps: RateLimitZone {
                    name: zone_name.to_string(),
                    limit: 10,
                    burst: 50,
                    shared_size: 5,
                },
                ..RateLimit::default()
            },
            ..Location::default()
        }
    }

    #[test]
    fn main_context_shape() {
        let cfg = Configuration::default();
        let tree = pass_over(&cfg).compile();
        let names: Vec<&str> = tree.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "pid",
                "daemon",
                "worker_processes",
                "worker_rlimit_nofile",
                "worker_shutdown_timeout",
                "events",
                "http"
            ]
        );

        let events = tree.iter().find(|d| d.name == "events").unwrap();
        let body = events.block.as_ref().unwrap();
        assert_eq!(find(body, "use")[0].arg_tokens(), vec!["epoll"]);
    }

    #[test]
    fn modules_load_only_when_used() {
        let cfg = Configuration::default();
        let tree = pass_over(&cfg).compile();
        assert!(tree.iter().all(|d| d.name != "load_module"));

        let mut cfg = Configuration::default();
        cfg.options.enable_brotli = true;
        cfg.options.enable_opentelemetry = true;
        let tree = pass_over(&cfg).compile();
        let modules: Vec<String> = tree
            .iter()
            .filter(|d| d.name == "load_module")
            .map(|d| d.arg_tokens()[0].clone())
            .collect();
        assert_eq!(
            modules,
            vec![
                "/etc/nginx/modules/ngx_http_brotli_filter_module.so",
                "/etc/nginx/modules/ngx_http_brotli_static_module.so",
                "/etc/nginx/modules/otel_ngx_module.so",
            ]
        );
    }

    #[test]
    fn resolver_emitted_when_configured() {
        let mut cfg = Configuration::default();
        cfg.options.resolvers = vec!["10.96.0.10".parse().unwrap()];
        let http = http_block(&cfg);
        assert_eq!(
            find(&http, "resolver")[0].arg_tokens(),
            vec!["10.96.0.10", "valid=30s"]
        );
    }

    #[test]
    fn rate_limit_zones_deduplicate() {
        let cfg = Configuration {
            servers: vec![Server {
                hostname: "example.com".to_string(),
                locations: vec![
                    limited_location("abc", "zone_a"),
                    limited_location("abc", "zone_a"),
                    limited_location("xyz", "zone_b"),
                ],
                ..Server::default()
            }],
            ..Configuration::default()
        };

        let http = http_block(&cfg);
        // The literal-dollar geo plus one allowlist geo per unique id.
        assert_eq!(find(&http, "geo").len(), 3);

        let req_zones = find(&http, "limit_req_zone");
        assert_eq!(req_zones.len(), 2);
        assert_eq!(
            req_zones[0].arg_tokens(),
            vec!["$limit_abc", "zone=zone_a:5m", "rate=10r/s"]
        );
        assert_eq!(
            req_zones[1].arg_tokens(),
            vec!["$limit_xyz", "zone=zone_b:5m", "rate=10r/s"]
        );
    }

    #[test]
    fn servers_are_wrapped_in_markers() {
        let cfg = Configuration {
            servers: vec![Server {
                hostname: "example.com".to_string(),
                ..Server::default()
            }],
            ..Configuration::default()
        };

        let http = http_block(&cfg);
        let server_pos = http.iter().position(|d| d.name == "server").unwrap();
        assert_eq!(
            http[server_pos - 1].arg_tokens(),
            vec!["start", "server", "example.com"]
        );
        assert_eq!(
            http[server_pos + 1].arg_tokens(),
            vec!["end", "server", "example.com"]
        );
    }

    #[test]
    fn connection_map_respects_upstream_keepalive() {
        let mut cfg = Configuration::default();
        let http = http_block(&cfg);
        let map = find(&http, "map")
            .into_iter()
            .find(|d| d.arg_tokens()[0] == "$http_upgrade")
            .unwrap();
        assert_eq!(map.block.as_ref().unwrap()[1].arg_tokens(), vec!["''"]);

        cfg.options.upstream_keepalive_connections = 0;
        let http = http_block(&cfg);
        let map = find(&http, "map")
            .into_iter()
            .find(|d| d.arg_tokens()[0] == "$http_upgrade")
            .unwrap();
        assert_eq!(map.block.as_ref().unwrap()[1].arg_tokens(), vec!["close"]);
    }

    #[test]
    fn auth_upstream_for_keepalive_locations() {
        let mut location = Location {
            path: "/app".to_string(),
            ..Location::default()
        };
        location.external_auth.url = "http://auth.ns.svc.cluster.local:8080/check".to_string();
        location.external_auth.host = "auth.ns.svc.cluster.local".to_string();
        location.external_auth.keepalive_connections = 10;

        let mut cfg = Configuration {
            servers: vec![Server {
                hostname: "example.com".to_string(),
                locations: vec![location],
                ..Server::default()
            }],
            ..Configuration::default()
        };
        cfg.options.use_http2 = false;

        let http = http_block(&cfg);
        let upstreams = find(&http, "upstream");
        let auth_upstream = upstreams
            .iter()
            .find(|d| d.arg_tokens()[0] != DYNAMIC_UPSTREAM)
            .unwrap();
        assert_eq!(
            auth_upstream.arg_tokens(),
            vec!["example.com-external-auth-L2FwcA-Prefix"]
        );
        let body = auth_upstream.block.as_ref().unwrap();
        assert_eq!(
            body[0].arg_tokens(),
            vec!["auth.ns.svc.cluster.local:8080"]
        );
        assert_eq!(find(body, "keepalive")[0].arg_tokens(), vec!["10"]);
    }

    #[test]
    fn terminal_servers_close_the_http_block() {
        let cfg = Configuration::default();
        let http = http_block(&cfg);
        let servers = find(&http, "server");
        assert_eq!(servers.len(), 2);
        // Default backend first, then the loopback status server.
        assert_eq!(
            servers[0].block.as_ref().unwrap()[0].arg_tokens()[0],
            "8181"
        );
        assert!(servers[1].block.as_ref().unwrap()[0].arg_tokens()[0]
            .starts_with("127.0.0.1:"));
    }
}
