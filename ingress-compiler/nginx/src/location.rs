//! Per-routing-rule compilation: path matching, auth wiring, rate
//! limits, header injection, protocol dispatch, and proxy-pass emission.

use crate::{
    authreq::{self, LocationAuth},
    cors,
    directive::{block, directive, Arg, Directive},
    expr, Pass,
};
use ingress_compiler_core::{
    BackendProtocol, BasicDigestAuthType, Location, Override, Server, DEFAULT_BACKEND,
};
use std::collections::{BTreeMap, BTreeSet};

/// Compile-time facts shared by a location and its sibling auth blocks.
struct LocationCtx<'a> {
    path: Vec<Arg>,
    auth: LocationAuth<'a>,
    set_header: &'static str,
}

fn set_header_for(location: &Location) -> &'static str {
    if location.is_grpc() {
        "grpc_set_header"
    } else {
        "proxy_set_header"
    }
}

// === impl Pass ===

impl Pass<'_> {
    /// Compiles every routing rule of a server, including the internal
    /// auth and sign-in locations some rules need alongside them.
    pub(crate) fn server_locations(&self, server: &Server) -> Vec<Directive> {
        let options = &self.cfg.options;
        let enforce_regex = expr::enforce_regex(&server.locations);
        let mut out = Vec::with_capacity(server.locations.len());

        for location in &server.locations {
            let ctx = LocationCtx {
                path: expr::location_path(location, enforce_regex),
                auth: LocationAuth::resolve(location, options),
                set_header: set_header_for(location),
            };

            if !location.rewrite.app_root.is_empty() {
                out.push(block!(
                    "if",
                    ["$uri", "=", "/"],
                    vec![directive!(
                        "return",
                        "302",
                        format!("$scheme://$http_host{}", location.rewrite.app_root)
                    )],
                ));
            }

            if let Some(auth_path) = &ctx.auth.path {
                out.push(self.auth_request_location(server, location, &ctx.auth, auth_path));
            }

            if location.denied.is_none() && !ctx.auth.auth.signin_url.is_empty() {
                out.push(self.signin_redirect_location(location, &ctx.auth));
            }

            out.push(self.location(server, location, &ctx));
        }

        out
    }

    /// The internal location a `401` from the auth service redirects to.
    fn signin_redirect_location(&self, location: &Location, auth: &LocationAuth<'_>) -> Directive {
        let mut dirs = vec![
            directive!("internal"),
            directive!("add_header", "Set-Cookie", "$auth_cookie"),
        ];
        if location.cors.enabled {
            dirs.extend(cors::directives(&location.cors));
        }
        dirs.push(directive!(
            "return",
            "302",
            authreq::signin_url(&auth.auth.signin_url, &auth.auth.signin_url_redirect_param)
        ));

        block!(
            "location",
            [authreq::signin_location(&location.path, &auth.auth.signin_url)],
            dirs,
        )
    }

    fn location(&self, server: &Server, location: &Location, ctx: &LocationCtx<'_>) -> Directive {
        let options = &self.cfg.options;
        let ing = &location.ingress;
        let mut dirs = vec![
            directive!("set", "$namespace", &ing.namespace),
            directive!("set", "$ingress_name", &ing.name),
            directive!("set", "$service_name", &ing.service_name),
            directive!("set", "$service_port", &ing.service_port),
            directive!("set", "$balancer_ewma_score", "-1"),
            directive!("set", "$proxy_upstream_name", &location.backend),
            directive!("set", "$proxy_host", "$proxy_upstream_name"),
            directive!("set", "$pass_access_scheme", "$scheme"),
            directive!("set", "$best_http_host", "$http_host"),
            directive!("set", "$pass_port", "$pass_server_port"),
            directive!("set", "$proxy_alternative_upstream_name", ""),
            directive!(
                "set",
                "$location_path",
                expr::escape_literal_dollar(&ing.path)
            ),
        ];

        dirs.extend(redirect_control_variables(location, options));
        dirs.extend(certificate_directives(location));

        if options.use_proxy_protocol {
            dirs.push(directive!("set", "$pass_server_port", "$proxy_protocol_server_port"));
        } else {
            dirs.push(directive!("set", "$pass_server_port", "$server_port"));
        }

        dirs.extend(opentelemetry_directives(
            options.enable_opentelemetry,
            options.opentelemetry_trust_incoming_span,
            location,
        ));

        dirs.extend([
            directive!("rewrite_by_lua_file", "/etc/nginx/lua/nginx/ngx_rewrite.lua"),
            directive!(
                "header_filter_by_lua_file",
                "/etc/nginx/lua/nginx/ngx_conf_srv_hdr_filter.lua"
            ),
            directive!("log_by_lua_file", "/etc/nginx/lua/nginx/ngx_conf_log_block.lua"),
            directive!("rewrite_log", location.logs.rewrite),
            directive!("port_in_redirect", location.use_port_in_redirects),
        ]);

        if !location.mirror.source.is_empty() {
            dirs.push(directive!("mirror", &location.mirror.source));
            dirs.push(directive!("mirror_request_body", &location.mirror.request_body));
        }

        if !location.logs.access {
            dirs.push(directive!("access_log", "off"));
        }

        if let Some(reason) = &location.denied {
            let deny_var = self
                .deny
                .variable(&format!("{}{}", server.hostname, location.path));
            dirs.push(directive!("set", deny_var, "1"));
            dirs.push(
                directive!("return", "503")
                    .with_comment(format!("Location denied. Reason: {reason}")),
            );
        } else {
            dirs.extend(self.allowed_location(server, location, ctx));
        }

        Directive::new("location")
            .with_args(ctx.path.clone())
            .with_block(dirs)
    }

    fn allowed_location(
        &self,
        server: &Server,
        location: &Location,
        ctx: &LocationCtx<'_>,
    ) -> Vec<Directive> {
        let options = &self.cfg.options;
        let set_header = ctx.set_header;
        let mut dirs = Vec::new();

        for cidr in &location.denylist {
            dirs.push(directive!("deny", cidr));
        }
        if !location.allowlist.is_empty() {
            for cidr in &location.allowlist {
                dirs.push(directive!("allow", cidr));
            }
            dirs.push(directive!("deny", "all"));
        }

        if location.cors.enabled {
            dirs.extend(cors::directives(&location.cors));
        }

        if !expr::location_in_list(&location.path, &options.no_auth_locations) {
            dirs.extend(self.auth_directives(location, ctx));
        }

        dirs.extend(rate_limit_directives(location));

        if expr::is_valid_byte_size(&location.proxy.body_size, true) {
            dirs.push(directive!("client_max_body_size", &location.proxy.body_size));
        } else if !location.proxy.body_size.is_empty() {
            tracing::warn!(
                value = %location.proxy.body_size,
                path = %location.path,
                "dropping invalid proxy body size",
            );
        }
        if expr::is_valid_byte_size(&location.client_body_buffer_size, false) {
            dirs.push(directive!(
                "client_body_buffer_size",
                &location.client_body_buffer_size
            ));
        }

        if !location.upstream_vhost.is_empty() {
            dirs.push(directive!(set_header, "Host", &location.upstream_vhost));
        } else {
            dirs.push(directive!(set_header, "Host", "$best_http_host"));
        }

        if !server.certificate_auth.ca_file.is_empty() {
            dirs.extend([
                directive!(set_header, "ssl-client-verify", "$ssl_client_verify"),
                directive!(set_header, "ssl-client-subject-dn", "$ssl_client_s_dn"),
                directive!(set_header, "ssl-client-issuer-dn", "$ssl_client_i_dn"),
            ]);
            if server.certificate_auth.pass_cert_to_upstream {
                dirs.push(directive!(set_header, "ssl-client-cert", "$ssl_client_escaped_cert"));
            }
        }

        dirs.extend([
            directive!(set_header, "Upgrade", "$http_upgrade"),
            directive!(set_header, "X-Request-ID", "$req_id"),
            directive!(set_header, "X-Real-IP", "$remote_addr"),
            directive!(set_header, "X-Forwarded-Host", "$best_http_host"),
            directive!(set_header, "X-Forwarded-Port", "$pass_port"),
            directive!(set_header, "X-Forwarded-Proto", "$pass_access_scheme"),
            directive!(set_header, "X-Forwarded-Scheme", "$pass_access_scheme"),
            directive!(set_header, "X-Scheme", "$pass_access_scheme"),
            directive!(
                set_header,
                "X-Original-Forwarded-For",
                expr::header_variable(&options.forwarded_for_header)
            ),
            directive!(set_header, "Proxy", "\"\"")
                .with_comment("mitigate HTTProxy vulnerability"),
            directive!("proxy_connect_timeout", Arg::seconds(location.proxy.connect_timeout)),
            directive!("proxy_read_timeout", Arg::seconds(location.proxy.read_timeout)),
            directive!("proxy_send_timeout", Arg::seconds(location.proxy.send_timeout)),
            directive!("proxy_buffering", &location.proxy.proxy_buffering),
            directive!("proxy_buffer_size", &location.proxy.buffer_size),
            directive!(
                "proxy_buffers",
                location.proxy.buffers_number,
                &location.proxy.buffer_size
            ),
            directive!("proxy_request_buffering", &location.proxy.request_buffering),
            directive!("proxy_busy_buffers_size", &location.proxy.busy_buffers_size),
            directive!("proxy_http_version", &location.proxy.proxy_http_version),
            directive!(
                "proxy_cookie_domain",
                expr::split_tokens(&location.proxy.cookie_domain)
            ),
            directive!(
                "proxy_cookie_path",
                expr::split_tokens(&location.proxy.cookie_path)
            ),
            directive!(
                "proxy_next_upstream_timeout",
                location.proxy.next_upstream_timeout
            ),
            directive!("proxy_next_upstream_tries", location.proxy.next_upstream_tries),
            directive!(
                "proxy_next_upstream",
                expr::next_upstream(&location.proxy.next_upstream, options.retry_non_idempotent)
            ),
        ]);

        if expr::is_valid_byte_size(&location.proxy.proxy_max_temp_file_size, true) {
            dirs.push(directive!(
                "proxy_max_temp_file_size",
                &location.proxy.proxy_max_temp_file_size
            ));
        }

        if options.use_forwarded_headers && options.compute_full_forwarded_for {
            dirs.push(directive!(set_header, "X-Forwarded-For", "$full_x_forwarded_for"));
        } else {
            dirs.push(directive!(set_header, "X-Forwarded-For", "$remote_addr"));
        }

        if options.proxy_add_original_uri_header {
            dirs.push(directive!(set_header, "X-Original-URI", "$request_uri"));
        }

        if location.connection.enabled {
            dirs.push(directive!(set_header, "Connection", &location.connection.header));
        } else {
            dirs.push(directive!(set_header, "Connection", "$connection_upgrade"));
        }

        for (name, value) in &options.proxy_set_headers {
            dirs.push(directive!(set_header, name, value));
        }

        for (name, value) in &location.custom_headers {
            dirs.push(directive!(
                "more_set_headers",
                format!("'{name}: {}'", expr::escape_literal_dollar(value))
            ));
        }

        if location.backend.starts_with("custom-default-backend-") {
            dirs.extend([
                directive!("proxy_set_header", "X-Code", "503"),
                directive!("proxy_set_header", "X-Format", "$http_accept"),
                directive!("proxy_set_header", "X-Namespace", "$namespace"),
                directive!("proxy_set_header", "X-Ingress-Name", "$ingress_name"),
                directive!("proxy_set_header", "X-Service-Name", "$service_name"),
                directive!("proxy_set_header", "X-Service-Port", "$service_port"),
                directive!("proxy_set_header", "X-Request-ID", "$req_id"),
            ]);
        }

        if !location.satisfy.is_empty() {
            dirs.push(directive!("satisfy", &location.satisfy));
        }

        if location.redirect.relative || options.relative_redirects {
            dirs.push(directive!("absolute_redirect", false));
        }

        if !location.custom_http_errors.is_empty() && !location.disable_proxy_intercept_errors {
            dirs.push(directive!("proxy_intercept_errors", "on"));
        }

        for code in &location.custom_http_errors {
            dirs.push(directive!(
                "error_page",
                *code,
                "=",
                format!("@custom_{}_{code}", location.default_backend_upstream_name)
            ));
        }

        match location.backend_protocol {
            BackendProtocol::Grpc | BackendProtocol::Grpcs => {
                dirs.extend([
                    directive!("grpc_connect_timeout", Arg::seconds(location.proxy.connect_timeout)),
                    directive!("grpc_send_timeout", Arg::seconds(location.proxy.send_timeout)),
                    directive!("grpc_read_timeout", Arg::seconds(location.proxy.read_timeout)),
                ]);
            }
            BackendProtocol::Fcgi => {
                dirs.push(directive!("include", "/etc/nginx/fastcgi_params"));
                if !location.fastcgi.index.is_empty() {
                    dirs.push(directive!("fastcgi_index", &location.fastcgi.index));
                }
                for (param, value) in &location.fastcgi.params {
                    dirs.push(directive!("fastcgi_param", param, value));
                }
            }
            _ => {}
        }

        if !location.redirect.url.is_empty() {
            dirs.push(directive!(
                "return",
                location.redirect.code,
                &location.redirect.url
            ));
        }

        dirs.extend(self.proxy_pass(&server.hostname, location));

        let from = &location.proxy.proxy_redirect_from;
        let to = &location.proxy.proxy_redirect_to;
        if from == "default" || from == "off" {
            dirs.push(directive!("proxy_redirect", from));
        } else if to != "off" {
            dirs.push(directive!("proxy_redirect", from, to));
        }

        dirs
    }

    /// Authentication directives inside the parent location: either the
    /// `auth_request` wiring or the Lua keepalive path, plus the sign-in
    /// error page and basic/digest auth.
    fn auth_directives(&self, location: &Location, ctx: &LocationCtx<'_>) -> Vec<Directive> {
        let auth = &ctx.auth;
        let set_header = ctx.set_header;
        let mut dirs = Vec::new();

        if let Some(auth_path) = &auth.path {
            if auth.apply_upstream && !auth.apply_global {
                dirs.push(directive!("set", "$auth_cookie", ""));
                dirs.push(directive!("add_header", "Set-Cookie", "$auth_cookie"));
                dirs.extend(authreq::auth_response_headers(
                    set_header,
                    &auth.auth.response_headers,
                    true,
                ));
                if !auth.auth.response_headers.is_empty() {
                    dirs.push(directive!(
                        "set",
                        "$auth_response_headers",
                        auth.auth.response_headers.join(",")
                    ));
                }
                dirs.extend([
                    directive!("set", "$auth_path", auth_path),
                    directive!(
                        "set",
                        "$auth_keepalive_share_vars",
                        auth.auth.keepalive_share_vars.to_string()
                    ),
                    directive!(
                        "access_by_lua_file",
                        "/etc/nginx/lua/nginx/ngx_conf_external_auth.lua"
                    ),
                ]);
            } else {
                dirs.push(directive!("auth_request", auth_path));
                dirs.push(directive!(
                    "auth_request_set",
                    "$auth_cookie",
                    "$upstream_http_set_cookie"
                ));
                let mut cookie = directive!("add_header", "Set-Cookie", "$auth_cookie");
                if auth.auth.always_set_cookie {
                    cookie = cookie.arg("always");
                }
                dirs.push(cookie);
                dirs.extend(authreq::auth_response_headers(
                    set_header,
                    &auth.auth.response_headers,
                    false,
                ));
            }
        }

        if !auth.auth.signin_url.is_empty() {
            dirs.extend([
                directive!("set_escape_uri", "$escaped_request_uri", "$request_uri"),
                directive!(
                    "error_page",
                    "401",
                    "=",
                    authreq::signin_location(&location.path, &auth.auth.signin_url)
                ),
            ]);
        }

        if location.basic_digest_auth.secured {
            let (auth_directive, file_directive) = match location.basic_digest_auth.auth_type {
                BasicDigestAuthType::Basic => ("auth_basic", "auth_basic_user_file"),
                BasicDigestAuthType::Digest => ("auth_digest", "auth_digest_user_file"),
            };
            dirs.extend([
                directive!(auth_directive, &location.basic_digest_auth.realm),
                directive!(file_directive, &location.basic_digest_auth.file),
                directive!(set_header, "Authorization", ""),
            ]);
        }

        dirs
    }

    /// Emits the pass directive for the location's backend protocol,
    /// preceded by the rewrite when the target differs from the path.
    fn proxy_pass(&self, host: &str, location: &Location) -> Vec<Directive> {
        let options = &self.cfg.options;
        let backends = &self.cfg.backends;
        let upstream = expr::upstream_name(
            host,
            backends,
            location,
            options.dynamic_configuration_enabled,
        );

        let (mut pass, mut proto) = match location.backend_protocol {
            BackendProtocol::Http => ("proxy_pass", "http://"),
            BackendProtocol::AutoHttp => ("proxy_pass", "$scheme://"),
            BackendProtocol::Https => ("proxy_pass", "https://"),
            BackendProtocol::Grpc => ("grpc_pass", "grpc://"),
            BackendProtocol::Grpcs => ("grpc_pass", "grpcs://"),
            BackendProtocol::Fcgi => ("fastcgi_pass", ""),
            BackendProtocol::Ajp => ("ajp_pass", ""),
        };

        if let Some(backend) = backends.iter().find(|b| b.name == location.backend) {
            if backend.secure || backend.ssl_passthrough {
                proto = if location.backend_protocol == BackendProtocol::Grpcs {
                    "grpcs://"
                } else {
                    "https://"
                };
            }
        }

        // The default backend always speaks plain HTTP.
        if location.backend == DEFAULT_BACKEND {
            pass = "proxy_pass";
            proto = "http://";
        }

        let pass_directive = directive!(pass, format!("{proto}{upstream}"));
        if !location.needs_rewrite() {
            return vec![pass_directive];
        }

        let mut dirs = Vec::new();
        let set_header = set_header_for(location);
        if !location.x_forwarded_prefix.is_empty() {
            dirs.push(directive!(
                set_header,
                "X-Forwarded-Prefix",
                &location.x_forwarded_prefix
            ));
        }

        let target = &location.rewrite.target;
        let replacement = |suffix: &str| {
            if target == "/" {
                format!("/{suffix}")
            } else {
                format!("{target}/{suffix}")
            }
        };
        if location.path.ends_with('/') {
            dirs.push(directive!(
                "rewrite",
                format!("\"(?i){}(.*)\"", location.path),
                replacement("$1"),
                "break"
            ));
        } else {
            dirs.push(directive!(
                "rewrite",
                format!("\"(?i){}\\/?(?<baseuri>.*)\"", location.path),
                replacement("$baseuri"),
                "break"
            ));
        }

        if location.rewrite.add_base_url {
            let scheme = if location.rewrite.base_url_scheme.is_empty() {
                "$scheme"
            } else {
                &location.rewrite.base_url_scheme
            };
            dirs.push(directive!(
                "subs_filter",
                "'<head(\\s.*)*>'",
                format!("'<head$1><base href=\"{scheme}://$http_host{target}/\">'"),
                "ro"
            ));
        }

        dirs.push(pass_directive);
        dirs
    }
}

/// Request-scoped booleans the in-proxy rewrite logic reads back as
/// nginx variables; these are `true`/`false` strings, not `on`/`off`.
fn redirect_control_variables(location: &Location, options: &ingress_compiler_core::Options) -> Vec<Directive> {
    let force_no_ssl =
        expr::location_in_list(&location.path, &options.no_tls_redirect_locations);
    vec![
        directive!(
            "set",
            "$force_ssl_redirect",
            location.rewrite.force_ssl_redirect.to_string()
        ),
        directive!("set", "$ssl_redirect", location.rewrite.ssl_redirect.to_string()),
        directive!("set", "$force_no_ssl_redirect", force_no_ssl.to_string()),
        directive!(
            "set",
            "$preserve_trailing_slash",
            location.rewrite.preserve_trailing_slash.to_string()
        ),
        directive!(
            "set",
            "$use_port_in_redirects",
            location.use_port_in_redirects.to_string()
        ),
    ]
}

fn certificate_directives(location: &Location) -> Vec<Directive> {
    let ssl = &location.proxy_ssl;
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

/// Tri-state per-location telemetry against the global toggle.
fn opentelemetry_directives(
    globally_enabled: bool,
    global_trust: bool,
    location: &Location,
) -> Vec<Directive> {
    match (globally_enabled, location.opentelemetry) {
        (true, Override::Disabled) => return vec![directive!("opentelemetry", "off")],
        (true, _) => {}
        (false, Override::Enabled) => {}
        (false, _) => return Vec::new(),
    }

    let mut dirs = vec![
        directive!("opentelemetry", "on"),
        directive!("opentelemetry_propagate"),
    ];
    if !location.opentelemetry_operation_name.is_empty() {
        dirs.push(directive!(
            "opentelemetry_operation_name",
            &location.opentelemetry_operation_name
        ));
    }
    let trust = location.opentelemetry_trust_incoming_span.resolve(global_trust);
    dirs.push(directive!(
        "opentelemetry_trust_incoming_spans",
        if trust { "on" } else { "off" }
    ));
    dirs
}

/// Limit directives in contract order: connections, then per-second,
/// then per-minute, then bandwidth.
fn rate_limit_directives(location: &Location) -> Vec<Directive> {
    let rl = &location.rate_limit;
    let mut dirs = Vec::new();

    if rl.connections.limit > 0 {
        dirs.push(directive!("limit_conn", &rl.connections.name, rl.connections.limit));
    }
    if rl.rps.limit > 0 {
        dirs.push(directive!(
            "limit_req",
            format!("zone={}", rl.rps.name),
            format!("burst={}", rl.rps.burst),
            "nodelay"
        ));
    }
    if rl.rpm.limit > 0 {
        dirs.push(directive!(
            "limit_req",
            format!("zone={}", rl.rpm.name),
            format!("burst={}", rl.rpm.burst),
            "nodelay"
        ));
    }
    if rl.limit_rate_after > 0 {
        dirs.push(directive!("limit_rate_after", format!("{}k", rl.limit_rate_after)));
    }
    if rl.limit_rate > 0 {
        dirs.push(directive!("limit_rate", format!("{}k", rl.limit_rate)));
    }

    dirs
}

/// One internal mirror location per distinct mirror source in the
/// server.
pub(crate) fn mirror_locations(locations: &[Location]) -> Vec<Directive> {
    let mut seen = BTreeSet::new();
    let mut dirs = Vec::new();
    for location in locations {
        let mirror = &location.mirror;
        if mirror.source.is_empty() || mirror.target.is_empty() || mirror.host.is_empty() {
            continue;
        }
        if !seen.insert(mirror.source.clone()) {
            continue;
        }
        dirs.push(block!(
            "location",
            ["=", &mirror.source],
            vec![
                directive!("internal"),
                directive!("proxy_set_header", "Host", &mirror.host),
                directive!("proxy_pass", &mirror.target),
            ],
        ));
    }
    dirs
}

/// Custom-error locations for a server, deduplicated per
/// (default-backend upstream, code) and emitted in sorted order.
pub(crate) fn custom_error_locations(server: &Server, enable_metrics: bool) -> Vec<Directive> {
    let mut codes: BTreeMap<&str, BTreeSet<u16>> = BTreeMap::new();
    for location in &server.locations {
        codes
            .entry(location.default_backend_upstream_name.as_str())
            .or_default()
            .extend(location.custom_http_errors.iter().copied());
    }

    let mut dirs = Vec::new();
    for (upstream, codes) in codes {
        let sorted: Vec<u16> = codes.into_iter().collect();
        dirs.extend(custom_error_location(upstream, &sorted, enable_metrics));
    }
    dirs
}

/// The `@custom_<upstream>_<code>` locations error pages dispatch to.
pub(crate) fn custom_error_location(
    upstream: &str,
    codes: &[u16],
    enable_metrics: bool,
) -> Vec<Directive> {
    let mut dirs = Vec::with_capacity(codes.len());
    for code in codes {
        let mut location = vec![
            directive!("internal"),
            directive!("proxy_intercept_errors", "off"),
            directive!("proxy_set_header", "X-Code", *code),
            directive!("proxy_set_header", "X-Format", "$http_accept"),
            directive!("proxy_set_header", "X-Original-URI", "$request_uri"),
            directive!("proxy_set_header", "X-Namespace", "$namespace"),
            directive!("proxy_set_header", "X-Ingress-Name", "$ingress_name"),
            directive!("proxy_set_header", "X-Service-Name", "$service_name"),
            directive!("proxy_set_header", "X-Service-Port", "$service_port"),
            directive!("proxy_set_header", "X-Request-ID", "$req_id"),
            directive!("proxy_set_header", "X-Forwarded-For", "$remote_addr"),
            directive!("proxy_set_header", "Host", "$best_http_host"),
            directive!("set", "$proxy_upstream_name", upstream),
            directive!("rewrite", "(.*)", "/", "break"),
            directive!("proxy_pass", "http://upstream_balancer"),
        ];
        if enable_metrics {
            location.push(directive!(
                "log_by_lua_file",
                "/etc/nginx/lua/nginx/ngx_conf_log.lua"
            ));
        }
        dirs.push(block!(
            "location",
            [format!("@custom_{upstream}_{code}")],
            location,
        ));
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Compiler;
    use ingress_compiler_core::{
        Backend, Configuration, Mirror, RateLimit, RateLimitZone, Rewrite,
    };

    fn find<'a>(dirs: &'a [Directive], name: &str) -> Vec<&'a Directive> {
        dirs.iter().filter(|d| d.name == name).collect()
    }

    fn location(path: &str, backend: &str) -> Location {
        Location {
            path: path.to_string(),
            backend: backend.to_string(),
            ..Location::default()
        }
    }

    fn single_server_cfg(locations: Vec<Location>) -> Configuration {
        Configuration {
            servers: vec![Server {
                hostname: "example.com".to_string(),
                locations,
                ..Server::default()
            }],
            ..Configuration::default()
        }
    }

    fn compile_locations(cfg: &Configuration) -> Vec<Directive> {
        let compiler = Compiler::new();
        let pass = Pass {
            cfg,
            deny: &compiler.deny_vars,
        };
        pass.server_locations(&cfg.servers[0])
    }

    #[test]
    fn rewrite_of_root_path() {
        let mut loc = location("/", "default-jenkins-8080");
        loc.rewrite.target = "/jenkins".to_string();
        let cfg = single_server_cfg(vec![loc]);

        let dirs = compile_locations(&cfg);
        let block = dirs.last().unwrap();
        assert_eq!(block.arg_tokens(), vec!["~*", "^/"]);

        let body = block.block.as_ref().unwrap();
        let rewrite = &find(body, "rewrite")[0];
        assert_eq!(
            rewrite.arg_tokens(),
            vec!["\"(?i)/(.*)\"", "/jenkins/$1", "break"]
        );
    }

    #[test]
    fn rewrite_to_root_captures_baseuri() {
        let mut loc = location("/something", "default-app-80");
        loc.rewrite.target = "/".to_string();
        let cfg = single_server_cfg(vec![loc]);

        let dirs = compile_locations(&cfg);
        let block = dirs.last().unwrap();
        assert_eq!(
            block.arg_tokens(),
            vec!["~*", "\"^/something\\/?(?<baseuri>.*)\""]
        );

        let body = block.block.as_ref().unwrap();
        let rewrite = &find(body, "rewrite")[0];
        assert_eq!(
            rewrite.arg_tokens(),
            vec![
                "\"(?i)/something\\/?(?<baseuri>.*)\"",
                "/$baseuri",
                "break"
            ]
        );
    }

    #[test]
    fn secure_backend_forces_https() {
        let loc = location("/", "default-app-80");
        let mut cfg = single_server_cfg(vec![loc]);
        cfg.backends.push(Backend {
            name: "default-app-80".to_string(),
            secure: true,
            ..Backend::default()
        });
        cfg.options.dynamic_configuration_enabled = false;

        let dirs = compile_locations(&cfg);
        let body = dirs.last().unwrap().block.as_ref().unwrap();
        let pass = &find(body, "proxy_pass")[0];
        assert_eq!(pass.arg_tokens(), vec!["https://default-app-80"]);
    }

    #[test]
    fn grpcs_backend_in_dynamic_mode() {
        let mut loc = location("/", "default-grpc-50051");
        loc.backend_protocol = BackendProtocol::Grpcs;
        let mut cfg = single_server_cfg(vec![loc]);
        cfg.options.dynamic_configuration_enabled = true;

        let dirs = compile_locations(&cfg);
        let body = dirs.last().unwrap().block.as_ref().unwrap();
        let pass = &find(body, "grpc_pass")[0];
        assert_eq!(pass.arg_tokens(), vec!["grpcs://upstream_balancer"]);
        // gRPC locations carry the protocol timeouts.
        assert!(!find(body, "grpc_connect_timeout").is_empty());
        assert_eq!(find(body, "grpc_set_header")[0].arg_tokens()[0], "Host");
    }

    #[test]
    fn denied_location_returns_503() {
        let mut loc = location("/blocked", "default-app-80");
        loc.denied = Some("failed validation".to_string());
        let cfg = single_server_cfg(vec![loc]);

        let dirs = compile_locations(&cfg);
        let body = dirs.last().unwrap().block.as_ref().unwrap();
        let returns = find(body, "return");
        assert_eq!(returns[0].arg_tokens(), vec!["503"]);
        assert!(returns[0].comment.as_deref().unwrap().contains("failed validation"));
        // No proxying out of a denied location.
        assert!(find(body, "proxy_pass").is_empty());
    }

    #[test]
    fn allowlist_appends_deny_all() {
        let mut loc = location("/", "default-app-80");
        loc.denylist = vec!["10.0.0.0/8".to_string()];
        loc.allowlist = vec!["192.168.0.0/16".to_string()];
        let cfg = single_server_cfg(vec![loc]);

        let dirs = compile_locations(&cfg);
        let body = dirs.last().unwrap().block.as_ref().unwrap();
        assert_eq!(find(body, "deny")[0].arg_tokens(), vec!["10.0.0.0/8"]);
        assert_eq!(find(body, "allow")[0].arg_tokens(), vec!["192.168.0.0/16"]);
        assert_eq!(find(body, "deny")[1].arg_tokens(), vec!["all"]);
    }

    #[test]
    fn rate_limits_in_contract_order() {
        let mut loc = location("/", "default-app-80");
        loc.rate_limit = RateLimit {
            id: "abc".to_string(),
            connections: RateLimitZone {
                name: "conn_zone".to_string(),
                limit: 5,
                burst: 0,
                shared_size: 5,
            },
            rps: RateLimitZone {
                name: "rps_zone".to_string(),
                limit: 10,
                burst: 50,
                shared_size: 5,
            },
            rpm: RateLimitZone {
                name: "rpm_zone".to_string(),
                limit: 100,
                burst: 500,
                shared_size: 5,
            },
            limit_rate: 64,
            limit_rate_after: 128,
            ..RateLimit::default()
        };

        let directives = rate_limit_directives(&loc);
        let names: Vec<&str> = directives.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["limit_conn", "limit_req", "limit_req", "limit_rate_after", "limit_rate"]
        );
    }

    #[test]
    fn invalid_body_size_is_dropped() {
        let mut loc = location("/", "default-app-80");
        loc.proxy.body_size = "1000mk".to_string();
        let cfg = single_server_cfg(vec![loc]);

        let dirs = compile_locations(&cfg);
        let body = dirs.last().unwrap().block.as_ref().unwrap();
        assert!(find(body, "client_max_body_size").is_empty());
    }

    #[test]
    fn custom_errors_deduplicate_per_upstream_and_code() {
        let mut a = location("/a", "default-app-80");
        a.default_backend_upstream_name = "upstream-default-backend".to_string();
        a.custom_http_errors = vec![503, 404];
        let mut b = location("/b", "default-app-80");
        b.default_backend_upstream_name = "upstream-default-backend".to_string();
        b.custom_http_errors = vec![404];

        let server = Server {
            hostname: "example.com".to_string(),
            locations: vec![a, b],
            ..Server::default()
        };

        let dirs = custom_error_locations(&server, false);
        let names: Vec<Vec<String>> = dirs.iter().map(|d| d.arg_tokens()).collect();
        assert_eq!(
            names,
            vec![
                vec!["@custom_upstream-default-backend_404".to_string()],
                vec!["@custom_upstream-default-backend_503".to_string()],
            ]
        );
    }

    #[test]
    fn mirror_locations_deduplicate_by_source() {
        let mirror = Mirror {
            source: "/_mirror-1".to_string(),
            target: "https://mirror.example.com/".to_string(),
            host: "mirror.example.com".to_string(),
            request_body: "on".to_string(),
        };
        let mut a = location("/a", "x");
        a.mirror = mirror.clone();
        let mut b = location("/b", "x");
        b.mirror = mirror;

        let dirs = mirror_locations(&[a, b]);
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].arg_tokens(), vec!["=", "/_mirror-1"]);
    }

    #[test]
    fn regex_enforced_across_sibling_locations() {
        let mut rewritten = location("/app", "default-app-80");
        rewritten.rewrite = Rewrite {
            target: "/".to_string(),
            ..Rewrite::default()
        };
        let plain = location("/untouched", "default-app-80");
        let cfg = single_server_cfg(vec![rewritten, plain]);

        let dirs = compile_locations(&cfg);
        let locations: Vec<&Directive> = dirs.iter().filter(|d| d.name == "location").collect();
        for loc in locations {
            assert_eq!(loc.arg_tokens()[0], "~*");
        }
    }

    #[test]
    fn external_auth_emits_sibling_locations() {
        let mut loc = location("/admin", "default-app-80");
        loc.external_auth.url = "https://auth.internal/check".to_string();
        loc.external_auth.signin_url = "https://auth.internal/signin".to_string();
        let cfg = single_server_cfg(vec![loc]);

        let dirs = compile_locations(&cfg);
        let locations: Vec<&Directive> = dirs.iter().filter(|d| d.name == "location").collect();
        assert_eq!(locations.len(), 3);
        // Auth subrequest location first, then the sign-in redirect.
        assert_eq!(
            locations[0].arg_tokens(),
            vec!["=", "/_external-auth-L2FkbWlu-Prefix"]
        );
        assert!(locations[1].arg_tokens()[0].starts_with('@'));

        // The parent wires auth_request at the resolved path.
        let body = locations[2].block.as_ref().unwrap();
        assert_eq!(
            find(body, "auth_request")[0].arg_tokens(),
            vec!["/_external-auth-L2FkbWlu-Prefix"]
        );
        assert_eq!(
            find(body, "error_page")[0].arg_tokens()[..2],
            ["401".to_string(), "=".to_string()]
        );
    }

    #[test]
    fn no_auth_locations_skip_auth_wiring() {
        let mut loc = location("/.well-known/acme-challenge/token", "default-app-80");
        loc.external_auth.url = "https://auth.internal/check".to_string();
        let cfg = single_server_cfg(vec![loc]);

        let dirs = compile_locations(&cfg);
        let parent = dirs.last().unwrap().block.as_ref().unwrap();
        assert!(find(parent, "auth_request").is_empty());
    }
}
