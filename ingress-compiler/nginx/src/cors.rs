//! CORS directive generation. The `$cors` marker variable carries two
//! states: `true` for a matched origin and `trueoptions` for a matched
//! preflight, each answered by its own `if` block built from the same
//! header set.

use crate::directive::{block, directive, Directive};
use ingress_compiler_core::CorsConfig;

pub(crate) fn directives(cors: &CorsConfig) -> Vec<Directive> {
    let mut out = origin_directives(&cors.allow_origins);

    out.push(block!(
        "if",
        ["$request_method", "=", "'OPTIONS'"],
        vec![directive!("set", "$cors", "${cors}options")],
    ));

    out.push(block!(
        "if",
        ["$cors", "=", "'true'"],
        shared_headers(cors),
    ));

    let mut preflight = shared_headers(cors);
    preflight.extend([
        directive!("more_set_headers", "'Content-Type: text/plain charset=UTF-8'"),
        directive!("more_set_headers", "'Content-Length: 0'"),
        directive!("return", "204"),
    ]);
    out.push(block!("if", ["$cors", "=", "'trueoptions'"], preflight));

    out
}

/// Sets `$cors` when the request origin is acceptable. A single `*`
/// origin short-circuits the regex match entirely.
fn origin_directives(origins: &[String]) -> Vec<Directive> {
    if origins.len() == 1 && origins[0] == "*" {
        return vec![
            directive!("set", "$http_origin", "*"),
            directive!("set", "$cors", "'true'"),
        ];
    }

    let mut pattern = String::from("(");
    for (i, origin) in origins.iter().enumerate() {
        let trimmed = origin.trim();
        if !trimmed.is_empty() {
            pattern.push_str(&origin_regex(trimmed));
        }
        if i != origins.len() - 1 {
            pattern.push('|');
        }
    }
    pattern.push_str(")$");

    vec![block!(
        "if",
        ["$http_origin", "~*", pattern],
        vec![directive!("set", "$cors", "'true'")],
    )]
}

/// One alternation branch: the origin literal with a single leading
/// wildcard label allowed.
fn origin_regex(origin: &str) -> String {
    let escaped = regex::escape(origin).replacen("\\*", "[A-Za-z0-9\\-]+", 1);
    format!("({escaped})")
}

fn shared_headers(cors: &CorsConfig) -> Vec<Directive> {
    let mut headers = vec![directive!(
        "more_set_headers",
        "'Access-Control-Allow-Origin: $http_origin'"
    )];

    if cors.allow_credentials {
        headers.push(directive!(
            "more_set_headers",
            "'Access-Control-Allow-Credentials: true'"
        ));
    }

    headers.push(directive!(
        "more_set_headers",
        format!("'Access-Control-Allow-Methods: {}'", cors.allow_methods)
    ));
    headers.push(directive!(
        "more_set_headers",
        format!("'Access-Control-Allow-Headers: {}'", cors.allow_headers)
    ));

    if !cors.expose_headers.is_empty() {
        headers.push(directive!(
            "more_set_headers",
            format!("'Access-Control-Expose-Headers: {}'", cors.expose_headers)
        ));
    }

    headers.push(directive!(
        "more_set_headers",
        format!("'Access-Control-Max-Age: {}'", cors.max_age)
    ));

    headers
}
