//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check base origins parse and use a supported scheme
//! - Reject combinations a transport cannot serve (unix sockets over HTTP/2)
//! - Validate value ranges (cache capacity, pipelining)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::Method;
use url::Url;

use crate::config::schema::{ForwardingConfig, ProxyConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const SCHEMES: [&str; 4] = ["http", "https", "unix+http", "unix+https"];

/// Validate the standalone proxy configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = match validate_forwarding(&config.forwarding) {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };

    if config.forwarding.bases().is_empty() {
        errors.push(ValidationError::new(
            "forwarding.base",
            "the standalone server needs at least one base origin",
        ));
    }
    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate forwarding registration options.
pub fn validate_forwarding(config: &ForwardingConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let pooled_selected = config.http2.is_none() && config.http.is_none() && config.pooled.enabled;

    if matches!(&config.base, Some(crate::config::BaseOrigins::Many(list)) if list.is_empty()) {
        errors.push(ValidationError::new("base", "origin list is empty"));
    }

    for (i, base) in config.bases().iter().enumerate() {
        let field = format!("base[{i}]");
        match Url::parse(base) {
            Ok(url) if !SCHEMES.contains(&url.scheme()) => {
                errors.push(ValidationError::new(field, format!("unsupported scheme {:?}", url.scheme())));
            }
            Ok(url) if url.scheme().starts_with("unix+") => {
                if config.http2.is_some() {
                    errors.push(ValidationError::new(field, "unix sockets are not supported over HTTP/2"));
                } else if pooled_selected {
                    errors.push(ValidationError::new(
                        field,
                        "unix sockets are not supported by the pooled dispatcher; configure `http`",
                    ));
                }
            }
            Ok(url) if url.host_str().is_none() => {
                errors.push(ValidationError::new(field, "origin has no host"));
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
        }
    }

    if !config.disable_cache && config.cache_urls == 0 {
        errors.push(ValidationError::new(
            "cache_urls",
            "must be greater than 0 unless disable_cache is set",
        ));
    }

    for method in &config.retry_methods {
        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::new("retry_methods", format!("{method:?} is not a method")));
        }
    }

    if config.pooled.pipelining == 0 {
        errors.push(ValidationError::new("pooled.pipelining", "must be at least 1"));
    }
    if let Some(proxy) = &config.pooled.proxy {
        if Url::parse(proxy).is_err() {
            errors.push(ValidationError::new("pooled.proxy", format!("{proxy:?} is not a URL")));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BaseOrigins, Http1Config, Http2Config};

    #[test]
    fn default_forwarding_is_valid() {
        assert!(validate_forwarding(&ForwardingConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ForwardingConfig::with_base("ftp://files.test");
        config.cache_urls = 0;
        config.retry_methods.push("NOT A METHOD".into());
        config.pooled.pipelining = 0;

        let errors = validate_forwarding(&config).unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn unix_base_needs_http1() {
        let mut config = ForwardingConfig::with_base("unix+http://%2Ftmp%2Fapp.sock/");
        assert!(validate_forwarding(&config).is_err(), "pooled is the default strategy");

        config.http = Some(Http1Config::default());
        assert!(validate_forwarding(&config).is_ok());

        config.http2 = Some(Http2Config::default());
        assert!(validate_forwarding(&config).is_err());
    }

    #[test]
    fn server_requires_base() {
        let config = ProxyConfig::default();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "forwarding.base"));

        let mut config = ProxyConfig::default();
        config.forwarding.base = Some(BaseOrigins::Many(vec!["http://a.test".into()]));
        assert!(validate_config(&config).is_ok());
    }
}
