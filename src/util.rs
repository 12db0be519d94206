use std::time::Duration;

/// Statuses worth retrying: timeouts, throttling and gateway/server hiccups.
pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

/// Next poll interval: ×1.5, at least 1s, capped at `max`.
pub(crate) fn backoff(current: Duration, max: Duration) -> Duration {
    let next = Duration::from_secs_f64((current.as_secs_f64() * 1.5).max(1.0));
    next.min(max)
}

pub(crate) fn guess_filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Splits a legacy `<UID>:<APIKEY>` key. Token-only keys return `None`.
pub(crate) fn split_key_basic(key: &str) -> Option<(String, String)> {
    let (uid, secret) = key.split_once(':')?;
    let (uid, secret) = (uid.trim(), secret.trim());
    if uid.is_empty() || secret.is_empty() {
        return None;
    }
    Some((uid.to_string(), secret.to_string()))
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

pub(crate) fn append_query(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}{}{}", url, sep, query)
}

/// `/api` base to try when the legacy endpoint answers 404.
pub(crate) fn api_v2_variant(base: &str) -> Option<String> {
    let b = base.trim_end_matches('/');
    if b.ends_with("/api") {
        return Some(format!("{}/v2", b));
    }
    // host root
    if !b.contains("/api/") && !b.ends_with("/api/v2") {
        return Some(format!("{}/api/v2", b));
    }
    None
}
