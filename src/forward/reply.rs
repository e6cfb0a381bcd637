//! Outbound reply handle.
//!
//! A `Reply` is consumed when it is sent, so a call can complete its response once only.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};

use crate::error::ForwardError;

#[derive(Debug, Default)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn send(self, body: impl Into<Body>) -> Response {
        let mut response = Response::new(body.into());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    /// Send `err` as the JSON error document.
    pub fn send_error(mut self, err: &ForwardError) -> Response {
        let json = serde_json::to_vec(&err.to_body()).unwrap_or_default();
        self.status = err.status();
        self.headers.remove(header::CONTENT_LENGTH);
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        self.send(json)
    }
}
