//! Key builders for the supported limit scopes.
//!
//! Pure functions composing with `RateLimiter::check_limit`. Endpoint keys
//! normalize the path so that volatile segments (numeric ids, UUIDs) share
//! one counter instead of fanning out into a counter per resource.

use std::sync::OnceLock;

use regex::Regex;

pub fn by_ip(ip: &str) -> String {
    format!("ip:{}", ip)
}

pub fn by_tenant(tenant_id: &str) -> String {
    format!("tenant:{}", tenant_id)
}

pub fn by_endpoint(ip: &str, path: &str) -> String {
    format!("endpoint:{}:{}", ip, normalize_path(path))
}

/// Normalize a request path for use in an endpoint key: drop the query
/// string and trailing slash, lowercase, and collapse id-like segments.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return "/".to_string();
    }

    let normalized = path.to_ascii_lowercase();
    id_segment_pattern()
        .replace_all(&normalized, "/:id${2}")
        .into_owned()
}

fn id_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Numeric ids and UUIDs
        Regex::new(r"/(\d+|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})(/|$)")
            .expect("static pattern")
    })
}
