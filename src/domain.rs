use axum::http::{header, HeaderMap, Uri};

use crate::limits::MAX_DOMAIN_LEN;

/// Normalize a host-ish string to the form stored in the tenant directory:
/// no scheme, no userinfo, no path/query/fragment, no leading `www.`,
/// lower-case. The port is kept.
pub fn normalize(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if let Some(idx) = s.find("://") {
        s = &s[idx + 3..];
    }
    if let Some(end) = s.find(['/', '?', '#']) {
        s = &s[..end];
    }
    if let Some(at) = s.rfind('@') {
        s = &s[at + 1..];
    }
    let lower = s.trim().to_lowercase();
    let host = lower.strip_prefix("www.").unwrap_or(&lower);
    if host.is_empty() || host.len() > MAX_DOMAIN_LEN || host.contains(char::is_whitespace) {
        return None;
    }
    Some(host.to_string())
}

/// Pick the request's domain. Sources in order: `Origin`, `Host` (falling
/// back to the URI authority), `Referer`. The first one that normalizes to a
/// non-empty domain wins.
pub fn from_request(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let header_value = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    // Sandboxed documents send the literal `null` origin.
    let origin = header_value(header::ORIGIN).filter(|o| !o.eq_ignore_ascii_case("null"));
    let host = header_value(header::HOST).or_else(|| uri.authority().map(|a| a.as_str()));
    let referer = header_value(header::REFERER);

    [origin, host, referer]
        .into_iter()
        .flatten()
        .find_map(normalize)
}
