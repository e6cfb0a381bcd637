//! Header normalization between the inbound and outbound legs.
//!
//! # Responsibilities
//! - Drop HTTP/2 pseudo-headers when converting raw header pairs
//! - Remove hop-by-hop headers, including every name listed in `Connection`
//! - Copy headers into an outbound carrier, keeping repeated values separate

use axum::http::{
    header::{self, HeaderName},
    HeaderMap, HeaderValue,
};

/// Pseudo-header sentinel (`:method`, `:path`, ...).
const PSEUDO_PREFIX: char = ':';

/// Headers that only describe one transport leg.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "upgrade",
    "http2-settings",
    "transfer-encoding",
    "proxy-connection",
    "keep-alive",
    "host",
];

/// Build a header map from raw name/value pairs as delivered by a multiplexed
/// frontend, dropping pseudo-headers and lower-casing names.
pub fn filter_pseudo_headers<'a, I>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if name.starts_with(PSEUDO_PREFIX) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) else {
            tracing::debug!(name, "Dropping invalid header name");
            continue;
        };
        if let Ok(value) = HeaderValue::from_bytes(value) {
            headers.append(name, value);
        }
    }
    headers
}

/// Remove hop-by-hop headers in place (RFC 7230 §6.1).
///
/// `te` survives only when its value is exactly `trailers`.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }

    let te_is_trailers = {
        let mut values = headers.get_all(header::TE).iter();
        matches!((values.next(), values.next()), (Some(v), None) if v.as_bytes() == b"trailers")
    };
    if !te_is_trailers {
        headers.remove(header::TE);
    }
}

/// Copy every header into `target`, appending so multi-value headers stay repeated.
/// Existing values for a copied name are replaced.
pub fn copy_headers(source: &HeaderMap, target: &mut HeaderMap) {
    for name in source.keys() {
        if name.as_str().starts_with(PSEUDO_PREFIX) {
            continue;
        }
        target.remove(name);
        for value in source.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}
