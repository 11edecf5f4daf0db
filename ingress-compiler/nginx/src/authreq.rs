//! External-authentication wiring: deterministic auth location naming,
//! the internal auth-proxy location, and the sign-in redirect helpers.

use crate::{
    directive::{block, directive, Directive},
    expr, Pass,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ingress_compiler_core::{ExternalAuth, Location, Options, PathType, Server};
use sha1::{Digest, Sha1};
use std::fmt::Write as _;
use url::Url;

const DEFAULT_REDIRECT_PARAM: &str = "rd";

/// The auth settings in effect for one location after resolving the
/// global-versus-local precedence.
pub(crate) struct LocationAuth<'a> {
    pub auth: &'a ExternalAuth,
    /// Internal location the auth subrequest targets, when auth applies.
    pub path: Option<String>,
    pub apply_global: bool,
    /// Keepalive-capable Lua path instead of `auth_request`.
    pub apply_upstream: bool,
}

// === impl LocationAuth ===

impl<'a> LocationAuth<'a> {
    pub(crate) fn resolve(location: &'a Location, options: &'a Options) -> Self {
        let apply_global = applies_globally(location, &options.global_external_auth.url);
        let auth = if apply_global {
            &options.global_external_auth
        } else {
            &location.external_auth
        };

        Self {
            auth,
            path: auth_location_path(location, &options.global_external_auth.url),
            apply_global,
            apply_upstream: applies_upstream(location, options),
        }
    }
}

/// The global auth applies only when the location carries no auth of its
/// own and opted in.
fn applies_globally(location: &Location, global_url: &str) -> bool {
    !location.external_auth.is_set() && !global_url.is_empty() && location.enable_global_auth
}

/// The keepalive upstream path needs a per-location auth URL and a
/// keepalive budget. `auth_request` ignores upstream keepalive, so the
/// subrequest is issued from Lua instead; that mechanism is unavailable
/// under HTTP/2.
fn applies_upstream(location: &Location, options: &Options) -> bool {
    if !location.external_auth.is_set() || location.external_auth.keepalive_connections == 0 {
        return false;
    }
    !options.use_http2
}

fn path_type_tag(path_type: PathType) -> &'static str {
    match path_type {
        PathType::Prefix => "Prefix",
        PathType::Exact => "Exact",
        PathType::ImplementationSpecific => "ImplementationSpecific",
    }
}

/// Derives the internal auth location path: URL-safe base64 of the
/// location path, padding stripped, suffixed with the path type so two
/// match modes on one path cannot collide.
pub(crate) fn auth_location_path(location: &Location, global_url: &str) -> Option<String> {
    if !location.external_auth.is_set() && !applies_globally(location, global_url) {
        return None;
    }

    let encoded = URL_SAFE_NO_PAD.encode(&location.path);
    Some(format!(
        "/_external-auth-{encoded}-{}",
        path_type_tag(location.path_type)
    ))
}

/// Name of the keepalive upstream serving a location's auth subrequests.
pub(crate) fn auth_upstream_name(location: &Location, host: &str) -> Option<String> {
    if !location.external_auth.is_set() || host.is_empty() {
        return None;
    }
    let path = auth_location_path(location, "")?;
    Some(format!("{host}-{}", &path[2..]))
}

/// Names the sign-in redirect location for a (path, sign-in URL) pair.
pub(crate) fn signin_location(path: &str, signin_url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.as_bytes());
    hasher.update(signin_url.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(1 + digest.len() * 2);
    out.push('@');
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Builds the sign-in redirect target, appending the original request
/// URI as a query parameter unless the URL already pins one.
pub(crate) fn signin_url(signin: &str, redirect_param: &str) -> String {
    let url = match Url::parse(signin) {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(%error, url = %signin, "ignoring unparseable sign-in URL");
            return String::new();
        }
    };

    let param = if redirect_param.is_empty() {
        DEFAULT_REDIRECT_PARAM
    } else {
        redirect_param
    };

    if url.query_pairs().count() == 0 {
        return format!("{signin}?{param}=$pass_access_scheme://$http_host$escaped_request_uri");
    }
    if url.query_pairs().any(|(k, v)| k == param && !v.is_empty()) {
        return signin.to_string();
    }
    format!("{signin}&{param}=$pass_access_scheme://$http_host$escaped_request_uri")
}

/// Rewrites the host:port part of an auth URL, used to point the
/// subrequest at the generated keepalive upstream.
pub(crate) fn change_host_port(raw: &str, authority: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(%error, url = %raw, "ignoring unparseable auth URL");
            return None;
        }
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()),
        None => (authority, None),
    };
    url.set_host(Some(host)).ok()?;
    url.set_port(port).ok()?;

    Some(url.to_string())
}

/// The `host:port` part of an auth URL, for the upstream `server` line.
pub(crate) fn extract_host_port(raw: &str) -> Option<String> {
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(%error, url = %raw, "ignoring unparseable auth URL");
            return None;
        }
    };
    let host = url.host_str()?.to_string();
    match url.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host),
    }
}

/// Copies auth-service response headers onto the upstream request. The
/// Lua path pre-declares the variables; `auth_request` mode maps them
/// from the subrequest response.
pub(crate) fn auth_response_headers(
    set_header: &str,
    headers: &[String],
    lua: bool,
) -> Vec<Directive> {
    let mut out = Vec::with_capacity(headers.len() * 2);
    for (i, header) in headers.iter().enumerate() {
        let var = format!("$authHeader{i}");
        if lua {
            out.push(directive!("set", &var, ""));
        } else {
            let source = format!(
                "$upstream_http_{}",
                header.to_lowercase().replace('-', "_")
            );
            out.push(directive!("auth_request_set", &var, source));
        }
        out.push(directive!(set_header, header, var));
    }
    out
}

// === impl Pass ===

impl Pass<'_> {
    /// The internal location every auth subrequest for this routing rule
    /// goes through. Kept strict about which client headers reach the
    /// auth service.
    pub(crate) fn auth_request_location(
        &self,
        server: &Server,
        location: &Location,
        auth: &LocationAuth<'_>,
        auth_path: &str,
    ) -> Directive {
        let options = &self.cfg.options;
        let mut dirs = vec![directive!("internal")];

        if options.enable_opentelemetry || location.opentelemetry.is_enabled() {
            dirs.push(directive!("opentelemetry", "on"));
            dirs.push(directive!("opentelemetry_propagate"));
        }

        if !options.enable_auth_access_log {
            dirs.push(directive!("access_log", "off"));
        }

        if !auth.auth.auth_cache_key.is_empty() {
            dirs.push(directive!(
                "set",
                "$tmp_cache_key",
                format!("{}{auth_path}{}", server.hostname, auth.auth.auth_cache_key)
            ));
            dirs.push(directive!("set", "$cache_key", ""));
            dirs.push(directive!(
                "rewrite_by_lua_file",
                "/etc/nginx/lua/nginx/ngx_conf_rewrite_auth.lua"
            ));
            dirs.push(directive!("proxy_cache", "auth_cache"));
            dirs.push(directive!("proxy_cache_key", "$cache_key"));
            for duration in &auth.auth.auth_cache_duration {
                let parts: Vec<String> = duration.split(' ').map(str::to_string).collect();
                dirs.push(directive!("proxy_cache_valid", parts));
            }
        }

        // The auth_request module clobbers variables in the parent
        // request, so the upstream name is re-asserted here for the
        // balancer to pick up when the parent resumes.
        dirs.extend([
            directive!("set", "$proxy_upstream_name", &location.backend),
            directive!("proxy_pass_request_body", "off"),
            directive!("proxy_ssl_server_name", "on"),
            directive!("proxy_pass_request_headers", "on"),
            directive!("proxy_set_header", "Content-Length", ""),
            directive!("proxy_set_header", "X-Forwarded-Proto", ""),
            directive!("proxy_set_header", "X-Request-ID", "$req_id"),
            directive!("proxy_set_header", "Host", &auth.auth.host),
            directive!(
                "proxy_set_header",
                "X-Original-URL",
                "$scheme://$http_host$request_uri"
            ),
            directive!("proxy_set_header", "X-Original-Method", "$request_method"),
            directive!("proxy_set_header", "X-Sent-From", "nginx-ingress-controller"),
            directive!("proxy_set_header", "X-Real-IP", "$remote_addr"),
        ]);

        if !auth.auth.method.is_empty() {
            dirs.push(directive!("proxy_method", &auth.auth.method));
            dirs.push(directive!("proxy_set_header", "X-Original-URI", "$request_uri"));
            dirs.push(directive!("proxy_set_header", "X-Scheme", "$pass_access_scheme"));
        }

        if options.use_forwarded_headers && options.compute_full_forwarded_for {
            dirs.push(directive!(
                "proxy_set_header",
                "X-Forwarded-For",
                "$full_x_forwarded_for"
            ));
        } else {
            dirs.push(directive!("proxy_set_header", "X-Forwarded-For", "$remote_addr"));
        }

        if !auth.auth.request_redirect.is_empty() {
            dirs.push(directive!(
                "proxy_set_header",
                "X-Auth-Request-Redirect",
                &auth.auth.request_redirect
            ));
        } else {
            dirs.push(directive!(
                "proxy_set_header",
                "X-Auth-Request-Redirect",
                "$request_uri"
            ));
        }

        if !auth.auth.auth_cache_key.is_empty() {
            dirs.push(directive!("proxy_buffering", "on"));
        } else {
            dirs.push(directive!("proxy_buffering", &location.proxy.proxy_buffering));
        }

        dirs.extend([
            directive!("proxy_buffer_size", &location.proxy.buffer_size),
            directive!(
                "proxy_buffers",
                location.proxy.buffers_number,
                &location.proxy.buffer_size
            ),
            directive!("proxy_request_buffering", &location.proxy.request_buffering),
            directive!("proxy_busy_buffers_size", &location.proxy.busy_buffers_size),
        ]);

        if expr::is_valid_byte_size(&location.proxy.body_size, true) {
            dirs.push(directive!("client_max_body_size", &location.proxy.body_size));
        }
        if expr::is_valid_byte_size(&location.client_body_buffer_size, false) {
            dirs.push(directive!(
                "client_body_buffer_size",
                &location.client_body_buffer_size
            ));
        }

        if !server.certificate_auth.ca_file.is_empty() {
            dirs.extend([
                directive!("proxy_set_header", "ssl-client-verify", "$ssl_client_verify"),
                directive!("proxy_set_header", "ssl-client-subject-dn", "$ssl_client_s_dn"),
                directive!("proxy_set_header", "ssl-client-issuer-dn", "$ssl_client_i_dn"),
            ]);
            if server.certificate_auth.pass_cert_to_upstream {
                dirs.push(directive!(
                    "proxy_set_header",
                    "ssl-client-cert",
                    "$ssl_client_escaped_cert"
                ));
            }
        }

        for (name, value) in &auth.auth.proxy_set_headers {
            dirs.push(directive!("proxy_set_header", name, value));
        }

        if auth.apply_upstream && !auth.apply_global {
            let target = auth_upstream_name(location, &server.hostname)
                .and_then(|upstream| change_host_port(&auth.auth.url, &upstream))
                .unwrap_or_default();
            dirs.extend([
                directive!("proxy_http_version", "1.1"),
                directive!("proxy_set_header", "Connection", ""),
                directive!("set", "$target", target),
            ]);
        } else {
            dirs.extend([
                directive!("proxy_http_version", &location.proxy.proxy_http_version),
                directive!("set", "$target", &auth.auth.url),
            ]);
        }
        dirs.push(directive!("proxy_pass", "$target"));

        block!("location", ["=", auth_path], dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location_with_auth(path: &str, url: &str) -> Location {
        Location {
            path: path.to_string(),
            external_auth: ExternalAuth {
                url: url.to_string(),
                ..ExternalAuth::default()
            },
            ..Location::default()
        }
    }

    #[test]
    fn auth_path_encodes_location_path() {
        let loc = location_with_auth("/admin", "https://auth.internal/check");
        // base64url("/admin") without padding.
        assert_eq!(
            auth_location_path(&loc, "").as_deref(),
            Some("/_external-auth-L2FkbWlu-Prefix")
        );
    }

    #[test]
    fn auth_path_absent_without_any_auth() {
        let loc = Location {
            path: "/open".to_string(),
            ..Location::default()
        };
        assert_eq!(auth_location_path(&loc, ""), None);
        // Global auth alone is not enough without the opt-in flag.
        assert_eq!(auth_location_path(&loc, "https://auth.internal/check"), None);

        let opted_in = Location {
            enable_global_auth: true,
            ..loc
        };
        assert!(auth_location_path(&opted_in, "https://auth.internal/check").is_some());
    }

    #[test]
    fn signin_location_is_deterministic() {
        let a = signin_location("/app", "https://auth.internal/signin");
        let b = signin_location("/app", "https://auth.internal/signin");
        let c = signin_location("/other", "https://auth.internal/signin");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('@'));
        assert_eq!(a.len(), 41);
    }

    #[test]
    fn signin_url_appends_redirect_param() {
        assert_eq!(
            signin_url("https://auth.internal/signin", ""),
            "https://auth.internal/signin?rd=$pass_access_scheme://$http_host$escaped_request_uri"
        );
        assert_eq!(
            signin_url("https://auth.internal/signin?mode=x", ""),
            "https://auth.internal/signin?mode=x&rd=$pass_access_scheme://$http_host$escaped_request_uri"
        );
        // An existing redirect param wins.
        assert_eq!(
            signin_url("https://auth.internal/signin?rd=/home", ""),
            "https://auth.internal/signin?rd=/home"
        );
    }

    #[test]
    fn host_port_rewrite() {
        assert_eq!(
            change_host_port("http://auth.internal/check", "example.com-authpath:8080").as_deref(),
            Some("http://example.com-authpath:8080/check")
        );
        assert_eq!(change_host_port("", "x"), None);
    }

    #[test]
    fn upstream_name_strips_leading_slash_underscore() {
        let loc = location_with_auth("/admin", "http://auth.internal/check");
        assert_eq!(
            auth_upstream_name(&loc, "example.com").as_deref(),
            Some("example.com-external-auth-L2FkbWlu-Prefix")
        );
        assert_eq!(auth_upstream_name(&loc, ""), None);
    }

    #[test]
    fn response_headers_for_both_modes() {
        let headers = vec!["X-Auth-User".to_string()];
        let lua = auth_response_headers("proxy_set_header", &headers, true);
        assert_eq!(lua[0], directive!("set", "$authHeader0", ""));
        assert_eq!(
            lua[1],
            directive!("proxy_set_header", "X-Auth-User", "$authHeader0")
        );

        let request = auth_response_headers("proxy_set_header", &headers, false);
        assert_eq!(
            request[0],
            directive!("auth_request_set", "$authHeader0", "$upstream_http_x_auth_user")
        );
    }
}
