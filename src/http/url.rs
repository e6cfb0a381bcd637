//! Destination URL composition.
//!
//! # Responsibilities
//! - Resolve a `source` against the configured base origin
//! - Refuse any source that would leave the base (absolute, scheme-relative, `../`)
//! - Resolve the outbound query string
//! - Decode unix socket destinations
//!
//! Composition is pure; callers memoize through [`crate::http::url_cache::UrlCache`].

use std::path::PathBuf;

use axum::http::{request::Parts, Uri};
use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::ForwardError;
use crate::forward::options::QueryString;

/// Compose the destination URL for `source`.
///
/// Without a base, `source` must be an absolute URL. With a base, `source` must be
/// relative and the resolved URL must stay under the base href (normalized to end in `/`).
pub fn compose(source: &str, base: Option<&str>) -> Result<Url, ForwardError> {
    let invalid = || ForwardError::InvalidSource(source.to_string());

    let Some(base) = base else {
        return Url::parse(source).map_err(|_| invalid());
    };

    if is_absolute(source) {
        return Err(invalid());
    }

    let base_url = Url::parse(base).map_err(|_| invalid())?;
    let dest = base_url.join(source).map_err(|_| invalid())?;

    let base_href = base_url.as_str();
    let prefix = if base_href.ends_with('/') {
        base_href.to_string()
    } else {
        format!("{base_href}/")
    };
    let dest_href = dest.as_str();
    let within = dest_href == base_href
        || dest_href.starts_with(&prefix)
        || without_query(dest_href) == base_href;

    if !within {
        tracing::debug!(source, base, resolved = dest_href, "Source escapes base origin");
        return Err(invalid());
    }
    Ok(dest)
}

fn without_query(href: &str) -> &str {
    href.split(['?', '#']).next().unwrap_or(href)
}

/// Absolute (`scheme:`) or scheme-relative (`//host`, `\\host`) sources.
fn is_absolute(source: &str) -> bool {
    let head: String = source.chars().take(2).collect();
    if matches!(head.as_str(), "//" | "\\\\" | "/\\" | "\\/") {
        return true;
    }
    Url::parse(source).is_ok()
}

/// Outbound query string, without the leading `?`. Precedence:
/// function > mapping (merged over the destination query) > destination query > inbound query.
pub fn resolve_query(
    dest: &Url,
    inbound: &Uri,
    parts: &Parts,
    option: Option<&QueryString>,
) -> Option<String> {
    let search = dest.query().unwrap_or("");
    match option {
        Some(QueryString::Dynamic(f)) => {
            let query = f(search, inbound, parts);
            let query = query.trim_start_matches('?');
            (!query.is_empty()).then(|| query.to_string())
        }
        Some(QueryString::Static(pairs)) => {
            let mut merged: Vec<(String, String)> = url::form_urlencoded::parse(search.as_bytes())
                .into_owned()
                .filter(|(k, _)| !pairs.iter().any(|(key, _)| key == k))
                .collect();
            merged.extend(pairs.iter().cloned());
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(merged)
                .finish();
            (!query.is_empty()).then_some(query)
        }
        None if !search.is_empty() => Some(search.to_string()),
        None => inbound.query().filter(|q| !q.is_empty()).map(str::to_string),
    }
}

/// Value for the `host` header sent upstream.
pub fn host_header(url: &Url) -> String {
    if is_unix(url) {
        return "localhost".to_string();
    }
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

pub fn is_unix(url: &Url) -> bool {
    matches!(url.scheme(), "unix+http" | "unix+https")
}

/// Socket path encoded in the host of a `unix+http(s)://` URL.
pub fn unix_socket_path(url: &Url) -> Option<PathBuf> {
    if !is_unix(url) {
        return None;
    }
    let host = url.host_str()?;
    let decoded = percent_decode_str(host).decode_utf8().ok()?;
    Some(PathBuf::from(decoded.as_ref()))
}

/// Origin-form target (`/path?query`) of a URL.
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
