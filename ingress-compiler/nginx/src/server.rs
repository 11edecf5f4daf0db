//! Per-virtual-host compilation: listeners, TLS policy, request
//! blocking, and the operational server blocks every proxy instance
//! carries.

use crate::{
    directive::{block, directive, Directive},
    expr, location, Pass,
};
use ingress_compiler_core::{HostRedirect, Server, DEFAULT_BACKEND};

// === impl Pass ===

impl Pass<'_> {
    /// Compiles one virtual host into its `server` block.
    pub(crate) fn server_directive(&self, server: &Server) -> Directive {
        let options = &self.cfg.options;
        let mut dirs = vec![
            Directive::new("server_name")
                .arg(expr::server_name(&server.hostname))
                .with_args(server.aliases.iter().map(|alias| expr::server_name(alias))),
            directive!("http2", options.use_http2),
            directive!("set", "$proxy_upstream_name", "-"),
            directive!(
                "ssl_certificate_by_lua_file",
                "/etc/nginx/lua/nginx/ngx_conf_certificate.lua"
            ),
        ];

        dirs.extend(self.listeners(&server.hostname));
        dirs.extend(self.blockers());

        if server.is_catch_all() && options.ssl_reject_handshake {
            dirs.push(directive!("ssl_reject_handshake", "on"));
        }

        if !server.certificate_auth.match_cn.is_empty() {
            dirs.push(block!(
                "if",
                ["$ssl_client_s_dn", "!~", &server.certificate_auth.match_cn],
                vec![directive!("return", "403", "\"client certificate unauthorized\"")],
            ));
        }

        if let Some(reason) = &server.auth_tls_error {
            // TLS auth material failed to load; the host answers nothing
            // until the aggregator recovers it.
            dirs.push(directive!("return", "403").with_comment(reason.clone()));
        } else {
            dirs.extend(client_certificate_directives(server));
            dirs.extend(upstream_tls_directives(server));

            if !server.ssl_ciphers.is_empty() {
                dirs.push(directive!("ssl_ciphers", &server.ssl_ciphers));
            }
            if !server.ssl_prefer_server_ciphers.is_empty() {
                dirs.push(directive!(
                    "ssl_prefer_server_ciphers",
                    &server.ssl_prefer_server_ciphers
                ));
            }

            dirs.extend(location::custom_error_locations(server, options.enable_metrics));
            dirs.extend(location::mirror_locations(&server.locations));
            dirs.extend(self.server_locations(server));

            if server.is_catch_all() {
                dirs.push(self.healthz_location());
                dirs.push(self.status_location());
            }
        }

        // Every host can dispatch its globally-configured error codes.
        dirs.extend(location::custom_error_location(
            DEFAULT_BACKEND,
            &options.custom_http_errors,
            options.enable_metrics,
        ));

        Directive::new("server").with_block(dirs)
    }

    /// A redirect-only server block (from/to-www style host redirects).
    pub(crate) fn redirect_server(&self, redirect: &HostRedirect) -> Directive {
        let mut dirs = vec![
            directive!("server_name", expr::server_name(&redirect.from)),
            directive!(
                "ssl_certificate_by_lua_file",
                "/etc/nginx/lua/nginx/ngx_conf_certificate.lua"
            ),
            directive!(
                "set_by_lua_file",
                "$redirect_to",
                "/etc/nginx/lua/nginx/ngx_srv_redirect.lua",
                &redirect.to
            ),
        ];
        dirs.extend(self.listeners(&redirect.from));
        dirs.extend(self.blockers());
        dirs.push(directive!(
            "return",
            self.cfg.options.http_redirect_code,
            "$redirect_to"
        ));

        Directive::new("server").with_block(dirs)
    }

    /// The server answering requests no host matched.
    pub(crate) fn default_backend_server(&self) -> Directive {
        let options = &self.cfg.options;
        let port = options.listen_ports.default_backend;
        let mut listen = directive!("listen", port, "default_server");
        if options.reuse_port {
            listen = listen.arg("reuseport");
        }
        listen = listen.arg(format!("backlog={}", options.backlog_size));
        let mut dirs = vec![listen];

        if options.is_ipv6_enabled {
            let mut listen6 = directive!("listen", format!("[::]:{port}"), "default_server");
            if options.reuse_port {
                listen6 = listen6.arg("reuseport");
            }
            dirs.push(listen6.arg(format!("backlog={}", options.backlog_size)));
        }

        dirs.extend([
            directive!("set", "$proxy_upstream_name", "internal"),
            directive!("access_log", "off"),
            block!("location", ["/"], vec![directive!("return", "404")]),
        ]);

        Directive::new("server").with_block(dirs)
    }

    /// The loopback-only server carrying the health/status endpoints and
    /// the dynamic configuration endpoint.
    pub(crate) fn health_stats_server(&self) -> Directive {
        let options = &self.cfg.options;
        let mut dirs = vec![
            directive!(
                "listen",
                format!("127.0.0.1:{}", options.listen_ports.status)
            ),
            directive!("set", "$proxy_upstream_name", "internal"),
            directive!("keepalive_timeout", "0"),
            directive!("gzip", "off"),
            directive!("access_log", "off"),
        ];

        if options.enable_opentelemetry {
            dirs.push(directive!("opentelemetry", "off"));
        }

        // Shared-dict sizing for POSTed configuration payloads: the
        // larger of the two backend dicts plus headroom.
        let configuration_dict = options
            .lua_shared_dicts
            .get("configuration_data")
            .copied()
            .unwrap_or(20480);
        let certificate_dict = options
            .lua_shared_dicts
            .get("certificate_data")
            .copied()
            .unwrap_or(20480);
        let body_size = expr::dict_size(configuration_dict.max(certificate_dict) + 1024);

        dirs.extend([
            block!(
                "location",
                [&options.healthz_uri],
                vec![directive!("return", "200")],
            ),
            block!(
                "location",
                ["/is-dynamic-lb-initialized"],
                vec![directive!(
                    "content_by_lua_file",
                    "/etc/nginx/lua/nginx/ngx_conf_is_dynamic_lb_initialized.lua"
                )],
            ),
            block!(
                "location",
                [&options.status_path],
                vec![directive!("stub_status", "on")],
            ),
            block!(
                "location",
                ["/configuration"],
                vec![
                    directive!("client_max_body_size", &body_size),
                    directive!("client_body_buffer_size", &body_size),
                    directive!("proxy_buffering", "off"),
                    directive!(
                        "content_by_lua_file",
                        "/etc/nginx/lua/nginx/ngx_conf_configuration.lua"
                    ),
                ],
            ),
            block!("location", ["/"], vec![directive!("return", "404")]),
        ]);

        Directive::new("server").with_block(dirs)
    }

    fn healthz_location(&self) -> Directive {
        let mut dirs = vec![directive!("access_log", "off"), directive!("return", "200")];
        if self.cfg.options.enable_opentelemetry {
            dirs.insert(0, directive!("opentelemetry", "off"));
        }
        block!("location", [&self.cfg.options.healthz_uri], dirs)
    }

    fn status_location(&self) -> Directive {
        let options = &self.cfg.options;
        let mut dirs = Vec::new();
        if options.enable_opentelemetry {
            dirs.push(directive!("opentelemetry", "off"));
        }
        for cidr in &options.status_ipv4_allowlist {
            dirs.push(directive!("allow", cidr));
        }
        if options.is_ipv6_enabled {
            for cidr in &options.status_ipv6_allowlist {
                dirs.push(directive!("allow", cidr));
            }
        }
        dirs.extend([
            directive!("deny", "all"),
            directive!("access_log", "off"),
            directive!("stub_status", "on"),
        ]);
        block!("location", [&options.status_path], dirs)
    }

    /// The `listen` directives for a hostname, across both address
    /// families and both the plain and TLS ports.
    pub(crate) fn listeners(&self, hostname: &str) -> Vec<Directive> {
        let options = &self.cfg.options;
        let common = self.common_listen_options(hostname);

        let ssl_port = if options.is_ssl_passthrough_enabled {
            options.listen_ports.ssl_proxy
        } else {
            options.listen_ports.https
        };
        let mut ssl_extra: Vec<String> = Vec::new();
        if options.is_ssl_passthrough_enabled {
            // Traffic arrives from the passthrough proxy, which always
            // speaks proxy-protocol on this port.
            ssl_extra.push("proxy_protocol".to_string());
        }
        ssl_extra.push("ssl".to_string());

        let mut dirs = Vec::new();

        let v4: Vec<String> = if options.bind_address_ipv4.is_empty() {
            vec![String::new()]
        } else {
            options.bind_address_ipv4.clone()
        };
        for addr in &v4 {
            dirs.push(listen(addr, options.listen_ports.http, &common, &[]));
            dirs.push(listen(addr, ssl_port, &common, &ssl_extra));
        }

        if options.is_ipv6_enabled {
            let v6: Vec<String> = if options.bind_address_ipv6.is_empty() {
                vec!["[::]".to_string()]
            } else {
                options.bind_address_ipv6.clone()
            };
            for addr in &v6 {
                dirs.push(listen(addr, options.listen_ports.http, &common, &[]));
                dirs.push(listen(addr, ssl_port, &common, &ssl_extra));
            }
        }

        dirs
    }

    fn common_listen_options(&self, hostname: &str) -> Vec<String> {
        let options = &self.cfg.options;
        let mut opts = Vec::new();
        if options.use_proxy_protocol {
            opts.push("proxy_protocol".to_string());
        }
        if hostname == "_" {
            opts.push("default_server".to_string());
            if options.reuse_port {
                opts.push("reuseport".to_string());
            }
            opts.push(format!("backlog={}", options.backlog_size));
        }
        opts
    }

    /// 403 guards driven by the user-agent and referer block maps.
    pub(crate) fn blockers(&self) -> Vec<Directive> {
        let options = &self.cfg.options;
        let mut dirs = Vec::new();
        if !options.block_user_agents.is_empty() {
            dirs.push(block!(
                "if",
                ["$block_ua"],
                vec![directive!("return", "403")],
            ));
        }
        if !options.block_referers.is_empty() {
            dirs.push(block!(
                "if",
                ["$block_ref"],
                vec![directive!("return", "403")],
            ));
        }
        dirs
    }
}

fn listen(address: &str, port: u16, common: &[String], extra: &[String]) -> Directive {
    let bind = if address.is_empty() {
        port.to_string()
    } else {
        format!("{address}:{port}")
    };
    directive!("listen", bind)
        .with_args(common.iter().cloned())
        .with_args(extra.iter().cloned())
}

/// Mutual-TLS directives for the client side of the connection.
fn client_certificate_directives(server: &Server) -> Vec<Directive> {
    let auth = &server.certificate_auth;
    if auth.ca_file.is_empty() {
        return Vec::new();
    }

    let mut dirs = vec![
        directive!("ssl_client_certificate", &auth.ca_file),
        directive!("ssl_verify_client", &auth.verify_client),
        directive!("ssl_verify_depth", auth.validation_depth),
    ];
    if !auth.crl_file.is_empty() {
        dirs.push(directive!("ssl_crl", &auth.crl_file));
    }
    if !auth.error_page.is_empty() {
        dirs.push(directive!("error_page", "495", "496", "=", &auth.error_page));
    }
    dirs
}

/// TLS directives towards the upstreams, from the host-level policy.
fn upstream_tls_directives(server: &Server) -> Vec<Directive> {
    let ssl = &server.proxy_ssl;
    let mut dirs = Vec::new();
    if !ssl.ca_file.is_empty() {
        dirs.extend([
            directive!("proxy_ssl_trusted_certificate", &ssl.ca_file)
                .with_comment(format!("PEM sha: {}", ssl.ca_sha)),
            directive!("proxy_ssl_ciphers", &ssl.ciphers),
            directive!("proxy_ssl_protocols", expr::split_tokens(&ssl.protocols)),
            directive!("proxy_ssl_verify", &ssl.verify),
            directive!("proxy_ssl_verify_depth", ssl.verify_depth),
        ]);
    }
    if !ssl.proxy_ssl_name.is_empty() {
        dirs.push(directive!("proxy_ssl_name", &ssl.proxy_ssl_name));
    }
    if !ssl.proxy_ssl_server_name.is_empty() {
        dirs.push(directive!("proxy_ssl_server_name", &ssl.proxy_ssl_server_name));
    }
    if !ssl.pem_file.is_empty() {
        dirs.extend([
            directive!("proxy_ssl_certificate", &ssl.pem_file),
            directive!("proxy_ssl_certificate_key", &ssl.pem_file),
        ]);
    }
    dirs
}
