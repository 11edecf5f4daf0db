//! Pure helpers shared by the location, server and http compilers.

use crate::directive::Arg;
use ahash::AHashMap;
use ingress_compiler_core::{Backend, Location, PathType, DYNAMIC_UPSTREAM};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use std::net::IpAddr;

const NON_IDEMPOTENT: &str = "non_idempotent";

static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[kKmM]?$").expect("size regex"));
static OFFSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[kKmMgG]?$").expect("offset regex"));

/// Compiles a location path into its match arguments.
///
/// When the server carries any rewrite or forced-regex location, every
/// path in it switches to a case-insensitive anchored regex so nginx
/// match precedence stays consistent across the block. Paths that do not
/// already end in `/` get a `baseuri` capture for the rewrite engine.
pub fn location_path(location: &Location, enforce_regex: bool) -> Vec<Arg> {
    let path = &location.path;
    if enforce_regex {
        if path.ends_with('/') {
            return vec![Arg::from("~*"), Arg::from(format!("^{path}"))];
        }
        return vec![
            Arg::from("~*"),
            Arg::from(format!("\"^{path}\\/?(?<baseuri>.*)\"")),
        ];
    }

    if location.path_type == PathType::Exact {
        return vec![Arg::from("="), Arg::from(path)];
    }

    vec![Arg::from(path)]
}

/// Whether any location in the set forces regex path matching for the
/// whole server.
pub fn enforce_regex(locations: &[Location]) -> bool {
    locations
        .iter()
        .any(|loc| loc.needs_rewrite() || loc.rewrite.use_regex)
}

/// Resolves the upstream name a location forwards to.
///
/// With dynamic configuration the in-proxy balancer owns endpoint and
/// stickiness selection, so everything points at the shared balancer
/// upstream. Otherwise cookie-affine backends get a `sticky-` prefix
/// when this (host, path) pair was annotated sticky.
pub fn upstream_name(host: &str, backends: &[Backend], location: &Location, dynamic: bool) -> String {
    if dynamic {
        return DYNAMIC_UPSTREAM.to_string();
    }

    let name = &location.backend;
    match backends.iter().find(|b| b.name == *name) {
        Some(backend) => {
            if backend.has_cookie_affinity() && backend.is_sticky(host, &location.path) {
                return format!("sticky-{name}");
            }
        }
        None => {
            tracing::warn!(backend = %name, %host, "location references an unknown backend");
        }
    }

    name.clone()
}

/// Assembles the `proxy_next_upstream` token list. The non-idempotent
/// token is stripped from the input and re-appended exactly once when
/// requested locally or globally.
pub fn next_upstream(next_upstream: &str, retry_non_idempotent: bool) -> Vec<String> {
    let mut retry = retry_non_idempotent;
    let mut tokens = Vec::new();
    for part in next_upstream.split(' ') {
        if part == NON_IDEMPOTENT {
            retry = true;
        } else if !part.is_empty() {
            tokens.push(part.to_string());
        }
    }

    if retry {
        tokens.push(NON_IDEMPOTENT.to_string());
    }

    tokens
}

/// Validates an nginx byte-size value: a bare integer or one `k`/`m`
/// suffix (`g` additionally allowed for offsets). Anything else is
/// dropped by the caller.
pub fn is_valid_byte_size(value: &str, is_offset: bool) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }

    if is_offset {
        OFFSET_RE.is_match(value)
    } else {
        SIZE_RE.is_match(value)
    }
}

/// Formats the `resolver` argument list. IPv6 nameservers are bracketed,
/// or skipped entirely when IPv6 DNS is disabled.
pub fn resolvers(nameservers: &[IpAddr], disable_ipv6: bool) -> Vec<String> {
    let mut out = Vec::with_capacity(nameservers.len() + 2);
    for ns in nameservers {
        match ns {
            IpAddr::V6(_) if disable_ipv6 => continue,
            IpAddr::V6(v6) => out.push(format!("[{v6}]")),
            IpAddr::V4(v4) => out.push(v4.to_string()),
        }
    }
    out.push("valid=30s".to_string());

    if disable_ipv6 {
        out.push("ipv6=off".to_string());
    }

    out
}

/// Translates a wildcard hostname into the regex `server_name` form with
/// a named `subdomain` capture.
pub fn server_name(hostname: &str) -> String {
    if !hostname.starts_with('*') {
        return hostname.to_string();
    }

    let rest = hostname.trim_start_matches("*.");
    let escaped = rest.split('.').collect::<Vec<_>>().join("\\.");
    format!("~^(?<subdomain>[\\w-]+)\\.{escaped}$")
}

/// Whether a location path is covered by a comma-separated prefix list
/// (used for the no-auth and no-TLS-redirect exemptions).
pub fn location_in_list(path: &str, raw_list: &str) -> bool {
    raw_list
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .any(|item| path.starts_with(item))
}

/// Renders a Lua shared-dictionary size, given in kilobytes, the way the
/// proxy expects it.
pub fn dict_size(kb: u64) -> String {
    if kb % 1024 == 0 {
        format!("{}M", kb / 1024)
    } else {
        format!("{kb}K")
    }
}

/// Splits a space-separated value into one token per element, skipping
/// empty runs.
pub fn split_tokens(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// The `$http_*` variable for a configured forwarded-for header name.
pub fn header_variable(header: &str) -> String {
    format!("$http_{}", header.to_lowercase().replace('-', "_"))
}

/// Replaces literal `$` so user-supplied text cannot expand nginx
/// variables; pairs with the `geo $literal_dollar` block.
pub fn escape_literal_dollar(value: &str) -> String {
    value.replace('$', "${literal_dollar}")
}

/// Per-path deny-variable names.
///
/// The slug is random so the variable namespace stays within nginx's
/// variable-hash limits, and memoized so recompiles keep emitting the
/// same name for the same path. Owned by the compiler instance rather
/// than process-global state so tests stay isolated.
#[derive(Debug, Default)]
pub struct DenyVariables {
    slugs: Mutex<AHashMap<String, String>>,
}

// === impl DenyVariables ===

impl DenyVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stable `$deny_<slug>` variable for a path.
    pub fn variable(&self, path: &str) -> String {
        let mut slugs = self.slugs.lock();
        let slug = slugs
            .entry(path.to_string())
            .or_insert_with(|| {
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(32)
                    .map(char::from)
                    .collect()
            })
            .clone();
        format!("$deny_{slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingress_compiler_core::{Affinity, CookieAffinity, Rewrite};

    fn location(path: &str) -> Location {
        Location {
            path: path.to_string(),
            ..Location::default()
        }
    }

    #[test]
    fn path_without_rewrite_is_unmodified() {
        let loc = location("/static");
        let args = location_path(&loc, false);
        assert_eq!(args, vec![Arg::from("/static")]);
    }

    #[test]
    fn exact_path_uses_equality_match() {
        let loc = Location {
            path_type: PathType::Exact,
            ..location("/login")
        };
        assert_eq!(
            location_path(&loc, false),
            vec![Arg::from("="), Arg::from("/login")]
        );
    }

    #[test]
    fn regex_path_for_trailing_slash() {
        let loc = location("/");
        assert_eq!(
            location_path(&loc, true),
            vec![Arg::from("~*"), Arg::from("^/")]
        );
    }

    #[test]
    fn regex_path_captures_baseuri() {
        let loc = location("/something");
        assert_eq!(
            location_path(&loc, true),
            vec![
                Arg::from("~*"),
                Arg::from("\"^/something\\/?(?<baseuri>.*)\"")
            ]
        );
    }

    #[test]
    fn rewrite_anywhere_enforces_regex_for_all() {
        let plain = location("/a");
        let rewritten = Location {
            rewrite: Rewrite {
                target: "/b".to_string(),
                ..Rewrite::default()
            },
            ..location("/with-rewrite")
        };
        assert!(!enforce_regex(&[plain.clone()]));
        assert!(enforce_regex(&[plain, rewritten]));
    }

    #[test]
    fn rewrite_target_equal_to_path_is_not_a_rewrite() {
        let loc = Location {
            rewrite: Rewrite {
                target: "/same".to_string(),
                ..Rewrite::default()
            },
            ..location("/same")
        };
        assert!(!enforce_regex(&[loc]));
    }

    fn sticky_backend(host: &str, path: &str) -> Backend {
        Backend {
            name: "ns-svc-80".to_string(),
            session_affinity: Affinity {
                affinity_type: "cookie".to_string(),
                cookie: CookieAffinity {
                    name: "route".to_string(),
                    hash: "sha1".to_string(),
                    locations: [(host.to_string(), vec![path.to_string()])]
                        .into_iter()
                        .collect(),
                },
            },
            ..Backend::default()
        }
    }

    #[test]
    fn upstream_name_sticky_prefix() {
        let backends = vec![sticky_backend("example.com", "/app")];
        let mut loc = location("/app");
        loc.backend = "ns-svc-80".to_string();

        assert_eq!(
            upstream_name("example.com", &backends, &loc, false),
            "sticky-ns-svc-80"
        );
        // Same arguments, same answer.
        assert_eq!(
            upstream_name("example.com", &backends, &loc, false),
            "sticky-ns-svc-80"
        );
        // Not registered for this host.
        assert_eq!(
            upstream_name("other.com", &backends, &loc, false),
            "ns-svc-80"
        );
    }

    #[test]
    fn upstream_name_dynamic_suppresses_sticky() {
        let backends = vec![sticky_backend("example.com", "/app")];
        let mut loc = location("/app");
        loc.backend = "ns-svc-80".to_string();
        assert_eq!(
            upstream_name("example.com", &backends, &loc, true),
            DYNAMIC_UPSTREAM
        );
    }

    #[test]
    fn next_upstream_appends_non_idempotent_once() {
        assert_eq!(
            next_upstream("timeout http_500 http_502", true),
            vec!["timeout", "http_500", "http_502", "non_idempotent"]
        );
        assert_eq!(
            next_upstream("error timeout non_idempotent", false),
            vec!["error", "timeout", "non_idempotent"]
        );
        assert_eq!(
            next_upstream("error timeout non_idempotent", true),
            vec!["error", "timeout", "non_idempotent"]
        );
        assert_eq!(next_upstream("error  timeout", false), vec!["error", "timeout"]);
    }

    #[test]
    fn byte_size_validation() {
        assert!(is_valid_byte_size("1000k", false));
        assert!(is_valid_byte_size("1000", false));
        assert!(is_valid_byte_size(" 64M ", false));
        assert!(!is_valid_byte_size("1000mk", false));
        assert!(!is_valid_byte_size("1000kk", false));
        assert!(!is_valid_byte_size("", false));
        assert!(!is_valid_byte_size("1g", false));
        // Offsets additionally accept gigabytes.
        assert!(is_valid_byte_size("1g", true));
        assert!(!is_valid_byte_size("1t", true));
    }

    #[test]
    fn resolver_formatting() {
        let servers = vec![
            "10.96.0.10".parse().unwrap(),
            "2001:db8::53".parse().unwrap(),
        ];
        assert_eq!(
            resolvers(&servers, false),
            vec!["10.96.0.10", "[2001:db8::53]", "valid=30s"]
        );
        assert_eq!(
            resolvers(&servers, true),
            vec!["10.96.0.10", "valid=30s", "ipv6=off"]
        );
    }

    #[test]
    fn wildcard_server_name() {
        assert_eq!(server_name("example.com"), "example.com");
        assert_eq!(
            server_name("*.example.com"),
            "~^(?<subdomain>[\\w-]+)\\.example\\.com$"
        );
    }

    #[test]
    fn location_list_matches_prefixes() {
        let list = "/.well-known/acme-challenge, /healthz";
        assert!(location_in_list("/.well-known/acme-challenge/token", list));
        assert!(location_in_list("/healthz", list));
        assert!(!location_in_list("/app", list));
        assert!(!location_in_list("/app", ""));
    }

    #[test]
    fn dict_sizes() {
        assert_eq!(dict_size(5120), "5M");
        assert_eq!(dict_size(200), "200K");
    }

    #[test]
    fn deny_variable_is_memoized() {
        let vars = DenyVariables::new();
        let a = vars.variable("example.com/app");
        let b = vars.variable("example.com/app");
        let c = vars.variable("example.com/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("$deny_"));
        assert_eq!(a.len(), "$deny_".len() + 32);
    }
}
