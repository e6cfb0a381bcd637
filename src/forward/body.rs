//! Inbound request model and body resolution.
//!
//! # Responsibilities
//! - Carry the inbound request head and its body in one of its host-provided forms
//! - Pick the outbound body: replacement option first, then the inbound body
//! - Keep `content-type` and `content-length` consistent with the chosen body
//!
//! # Design Decisions
//! - GET and HEAD never carry a body; an explicit non-empty replacement is a caller error
//! - Parsed bodies are re-encoded as JSON only for content types in the encode set; a
//!   structured value outside it goes out relabelled as `application/json`
//! - Inbound streams are forwarded untouched

use axum::{
    body::{Body, Bytes},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, Request},
};
use serde_json::Value;

use crate::error::ForwardError;
use crate::forward::options::ReplacementBody;
use crate::transport::RequestBody;

/// Content type assumed for a body that declares none.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Body of an inbound request as the host handed it over.
#[derive(Debug, Default)]
pub enum InboundBody {
    #[default]
    Empty,
    /// Unread byte stream.
    Stream(Body),
    /// Fully buffered raw bytes.
    Raw(Bytes),
    /// Parsed by the host according to its declared content type.
    Parsed(Value),
}

/// An inbound request: its head plus body.
#[derive(Debug)]
pub struct InboundRequest {
    pub parts: Parts,
    pub body: InboundBody,
}

impl InboundRequest {
    pub fn new(parts: Parts, body: InboundBody) -> Self {
        Self { parts, body }
    }

    pub fn with_parsed_body(parts: Parts, value: Value) -> Self {
        Self::new(parts, InboundBody::Parsed(value))
    }
}

impl From<Request<Body>> for InboundRequest {
    fn from(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        Self::new(parts, InboundBody::Stream(body))
    }
}

impl From<Parts> for InboundRequest {
    fn from(parts: Parts) -> Self {
        Self::new(parts, InboundBody::Empty)
    }
}

/// Media type without parameters, lowercased.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Resolve the outbound body and fix up the body headers in `headers`.
pub fn resolve_body(
    method: &Method,
    inbound: InboundBody,
    replacement: ReplacementBody,
    content_type: Option<&str>,
    encode: &[String],
    headers: &mut HeaderMap,
) -> Result<RequestBody, ForwardError> {
    let no_body = *method == Method::GET || *method == Method::HEAD;

    let explicit = match replacement {
        ReplacementBody::Stream(_) => return Err(ForwardError::UnsupportedBodyStream),
        ReplacementBody::Null => {
            headers.remove(header::CONTENT_TYPE);
            if no_body {
                headers.remove(header::CONTENT_LENGTH);
            } else {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
            }
            return Ok(RequestBody::Empty);
        }
        ReplacementBody::Inbound => None,
        ReplacementBody::Json(value) => Some(Explicit::Json(value)),
        ReplacementBody::Text(text) => Some(Explicit::Text(text)),
        ReplacementBody::Bytes(bytes) => Some(Explicit::Bytes(bytes)),
    };

    if let Some(explicit) = explicit {
        if no_body {
            if !explicit.is_empty() {
                return Err(ForwardError::BodyNotAllowed(method.clone()));
            }
            headers.remove(header::CONTENT_LENGTH);
            return Ok(RequestBody::Empty);
        }
        let (bytes, content_type) = explicit.encode(content_type)?;
        set_content_type(headers, &content_type)?;
        return Ok(full(headers, bytes));
    }

    if no_body {
        headers.remove(header::CONTENT_LENGTH);
        return Ok(RequestBody::Empty);
    }

    match inbound {
        InboundBody::Empty => Ok(RequestBody::Empty),
        InboundBody::Stream(body) => Ok(RequestBody::Stream(body)),
        InboundBody::Raw(bytes) => Ok(full(headers, bytes)),
        InboundBody::Parsed(value) => {
            let declared = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(essence)
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            if encode.contains(&declared) {
                return Ok(full(headers, Bytes::from(to_json(&value)?)));
            }
            // Outside the encode set only text can go out as declared.
            let bytes = match value {
                Value::String(text) => Bytes::from(text),
                value => {
                    set_content_type(headers, "application/json")?;
                    Bytes::from(to_json(&value)?)
                }
            };
            Ok(full(headers, bytes))
        }
    }
}

enum Explicit {
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl Explicit {
    fn is_empty(&self) -> bool {
        match self {
            Explicit::Json(Value::Null) => true,
            Explicit::Json(Value::String(s)) | Explicit::Text(s) => s.is_empty(),
            Explicit::Json(_) => false,
            Explicit::Bytes(b) => b.is_empty(),
        }
    }

    /// Bytes to send and the content type they go out with.
    fn encode(self, content_type: Option<&str>) -> Result<(Bytes, String), ForwardError> {
        match (self, content_type) {
            (Explicit::Json(Value::String(text)), Some(ct)) | (Explicit::Text(text), Some(ct)) => {
                Ok((Bytes::from(text), ct.to_string()))
            }
            (Explicit::Bytes(bytes), Some(ct)) => Ok((bytes, ct.to_string())),
            (Explicit::Json(value), Some(ct)) => Ok((Bytes::from(to_json(&value)?), ct.to_string())),
            (Explicit::Json(value), None) => {
                Ok((Bytes::from(to_json(&value)?), "application/json".to_string()))
            }
            (Explicit::Text(text), None) => Ok((
                Bytes::from(to_json(&Value::String(text))?),
                "application/json".to_string(),
            )),
            (Explicit::Bytes(bytes), None) => Ok((bytes, DEFAULT_CONTENT_TYPE.to_string())),
        }
    }
}

fn to_json(value: &Value) -> Result<Vec<u8>, ForwardError> {
    serde_json::to_vec(value).map_err(|e| ForwardError::Internal(e.to_string()))
}

fn set_content_type(headers: &mut HeaderMap, content_type: &str) -> Result<(), ForwardError> {
    let value = HeaderValue::from_str(content_type)
        .map_err(|_| ForwardError::Internal(format!("invalid content type {content_type:?}")))?;
    headers.insert(header::CONTENT_TYPE, value);
    Ok(())
}

fn full(headers: &mut HeaderMap, bytes: Bytes) -> RequestBody {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len() as u64));
    if bytes.is_empty() {
        RequestBody::Empty
    } else {
        RequestBody::Full(bytes)
    }
}
