//! Response values.
//!
//! - [`HttpResponse`] and [`StreamResult`]: what the transport hands back,
//!   before and after protocol normalization
//! - [`ResponseMessage`]: the typed outcome of a unary call

use bytes::Bytes;
use connectrpc_client_core::{Code, ConnectError};
use http::{HeaderMap, StatusCode};

/// Transport-level details that are useful for tracing a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingInfo {
    pub http_status: StatusCode,
}

/// A unary HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub body: Bytes,
    /// Set when the call failed, by the transport or by a response rewrite.
    pub cause: Option<ConnectError>,
    pub tracing_info: Option<TracingInfo>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            trailers: HeaderMap::new(),
            body,
            cause: None,
            tracing_info: Some(TracingInfo { http_status: status }),
        }
    }

    /// A response that never reached the server, such as a connect failure.
    pub fn failed(cause: ConnectError) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            body: Bytes::new(),
            cause: Some(cause),
            tracing_info: None,
        }
    }

    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = trailers;
        self
    }

    pub fn with_cause(mut self, cause: ConnectError) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// One event of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamResult<T> {
    Headers(HeaderMap),
    Message(T),
    /// Terminal event. Exactly one is delivered per stream.
    Complete {
        code: Code,
        error: Option<ConnectError>,
        trailers: HeaderMap,
    },
}

impl<T> StreamResult<T> {
    /// A `Complete` event carrying `error`.
    pub fn failed(error: ConnectError) -> Self {
        StreamResult::Complete {
            code: error.code(),
            error: Some(error),
            trailers: HeaderMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, StreamResult::Complete { .. })
    }
}

/// Typed outcome of a unary call.
///
/// # Example
///
/// ```ignore
/// match client.unary_async(&method, &request, HeaderMap::new()).await {
///     ResponseMessage::Success { message, .. } => println!("{message:?}"),
///     ResponseMessage::Failure { error, .. } => eprintln!("{error}"),
/// }
/// ```
#[derive(Debug, Clone)]
pub enum ResponseMessage<T> {
    Success {
        message: T,
        headers: HeaderMap,
        trailers: HeaderMap,
    },
    Failure {
        error: ConnectError,
        code: Code,
        headers: HeaderMap,
        trailers: HeaderMap,
    },
}

impl<T> ResponseMessage<T> {
    /// A failure carrying no response metadata.
    pub fn failed(error: ConnectError) -> Self {
        ResponseMessage::Failure {
            code: error.code(),
            error,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
        }
    }

    pub fn code(&self) -> Code {
        match self {
            ResponseMessage::Success { .. } => Code::Ok,
            ResponseMessage::Failure { code, .. } => *code,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            ResponseMessage::Success { headers, .. } | ResponseMessage::Failure { headers, .. } => {
                headers
            }
        }
    }

    pub fn trailers(&self) -> &HeaderMap {
        match self {
            ResponseMessage::Success { trailers, .. }
            | ResponseMessage::Failure { trailers, .. } => trailers,
        }
    }

    /// Drop the metadata and keep the message or error.
    pub fn into_result(self) -> Result<T, ConnectError> {
        match self {
            ResponseMessage::Success { message, .. } => Ok(message),
            ResponseMessage::Failure { error, .. } => Err(error),
        }
    }

    /// Transform the message, preserving metadata.
    pub fn map<U, F>(self, f: F) -> ResponseMessage<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            ResponseMessage::Success {
                message,
                headers,
                trailers,
            } => ResponseMessage::Success {
                message: f(message),
                headers,
                trailers,
            },
            ResponseMessage::Failure {
                error,
                code,
                headers,
                trailers,
            } => ResponseMessage::Failure {
                error,
                code,
                headers,
                trailers,
            },
        }
    }
}
