//! Outbound request value.
//!
//! Every pipeline stage takes an [`HttpRequest`] by value and returns a new one.

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::method::MethodDescriptor;

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub content_type: String,
    pub headers: HeaderMap,
    /// `None` for streams, which send their body through the transport stream.
    pub body: Option<Bytes>,
    pub method: Method,
    pub descriptor: MethodDescriptor,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>, descriptor: MethodDescriptor) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
            headers: HeaderMap::new(),
            body: None,
            method: Method::POST,
            descriptor,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}
