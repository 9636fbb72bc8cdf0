//! Interceptors and the interceptor chain.
//!
//! An interceptor hands out a fresh set of rewrite functions for every call.
//! A [`UnaryFunction`] rewrites the request before it reaches the transport
//! and the response after. A [`StreamFunction`] additionally rewrites each
//! outbound message and each inbound stream event. Any state an interceptor
//! needs for one call is captured inside the functions it returns.
//!
//! # Example
//!
//! ```ignore
//! use connectrpc_client::{HeaderInterceptor, ProtocolClientConfig};
//!
//! let auth = HeaderInterceptor::try_new("authorization", "Bearer token123")?;
//!
//! let config = ProtocolClientConfig::builder("http://localhost:3000")
//!     .with_interceptor(auth)
//!     .build()?;
//! ```

use std::sync::Arc;

use bytes::Bytes;
use connectrpc_client_core::ConnectError;
use http::{HeaderName, HeaderValue};

use crate::request::HttpRequest;
use crate::response::{HttpResponse, StreamResult};

pub type RequestFn = Box<dyn Fn(HttpRequest) -> Result<HttpRequest, ConnectError> + Send + Sync>;
pub type ResponseFn = Box<dyn Fn(HttpResponse) -> HttpResponse + Send + Sync>;
pub type RequestBodyFn = Box<dyn Fn(Bytes) -> Result<Bytes, ConnectError> + Send + Sync>;
pub type StreamResultFn = Box<dyn Fn(StreamResult<Bytes>) -> StreamResult<Bytes> + Send + Sync>;

/// Rewrites for one unary call.
pub struct UnaryFunction {
    pub request: RequestFn,
    pub response: ResponseFn,
}

impl UnaryFunction {
    pub fn new<Req, Res>(request: Req, response: Res) -> Self
    where
        Req: Fn(HttpRequest) -> Result<HttpRequest, ConnectError> + Send + Sync + 'static,
        Res: Fn(HttpResponse) -> HttpResponse + Send + Sync + 'static,
    {
        Self {
            request: Box::new(request),
            response: Box::new(response),
        }
    }

    pub fn passthrough() -> Self {
        Self::new(Ok, |response| response)
    }
}

/// Rewrites for one streaming call.
pub struct StreamFunction {
    pub request: RequestFn,
    pub request_body: RequestBodyFn,
    pub stream_result: StreamResultFn,
}

impl StreamFunction {
    pub fn new<Req, Body, Res>(request: Req, request_body: Body, stream_result: Res) -> Self
    where
        Req: Fn(HttpRequest) -> Result<HttpRequest, ConnectError> + Send + Sync + 'static,
        Body: Fn(Bytes) -> Result<Bytes, ConnectError> + Send + Sync + 'static,
        Res: Fn(StreamResult<Bytes>) -> StreamResult<Bytes> + Send + Sync + 'static,
    {
        Self {
            request: Box::new(request),
            request_body: Box::new(request_body),
            stream_result: Box::new(stream_result),
        }
    }

    pub fn passthrough() -> Self {
        Self::new(Ok, Ok, |result| result)
    }
}

/// Produces per-call rewrite functions.
///
/// Both methods default to passthrough, so an interceptor only overrides the
/// call shapes it cares about.
pub trait Interceptor: Send + Sync {
    fn unary_function(&self) -> UnaryFunction {
        UnaryFunction::passthrough()
    }

    fn stream_function(&self) -> StreamFunction {
        StreamFunction::passthrough()
    }
}

/// An ordered list of interceptors folded into one set of functions per call.
///
/// Requests (and outbound stream messages) pass through the interceptors in
/// list order; responses and stream events pass through in reverse, so the
/// last interceptor is the one closest to the transport.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn unary_function(&self) -> UnaryFunction {
        let (requests, responses): (Vec<_>, Vec<_>) = self
            .interceptors
            .iter()
            .map(|i| {
                let f = i.unary_function();
                (f.request, f.response)
            })
            .unzip();

        UnaryFunction {
            request: fold_requests(requests),
            response: Box::new(move |response: HttpResponse| {
                responses.iter().rev().fold(response, |acc, f| f(acc))
            }),
        }
    }

    pub fn stream_function(&self) -> StreamFunction {
        let mut requests = Vec::with_capacity(self.interceptors.len());
        let mut bodies: Vec<RequestBodyFn> = Vec::with_capacity(self.interceptors.len());
        let mut results: Vec<StreamResultFn> = Vec::with_capacity(self.interceptors.len());
        for interceptor in &self.interceptors {
            let f = interceptor.stream_function();
            requests.push(f.request);
            bodies.push(f.request_body);
            results.push(f.stream_result);
        }

        StreamFunction {
            request: fold_requests(requests),
            request_body: Box::new(move |body: Bytes| bodies.iter().try_fold(body, |acc, f| f(acc))),
            stream_result: Box::new(move |result: StreamResult<Bytes>| {
                results.iter().rev().fold(result, |acc, f| f(acc))
            }),
        }
    }
}

fn fold_requests(requests: Vec<RequestFn>) -> RequestFn {
    Box::new(move |request: HttpRequest| requests.iter().try_fold(request, |acc, f| f(acc)))
}

/// Adds a fixed header to every outgoing request, unary or streaming.
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    pub fn try_new(name: &str, value: &str) -> Result<Self, ConnectError> {
        let name = name
            .parse()
            .map_err(|_| ConnectError::internal(format!("invalid header name: {name}")))?;
        let value = value
            .parse()
            .map_err(|_| ConnectError::internal(format!("invalid header value: {value}")))?;
        Ok(Self { name, value })
    }

    pub fn from_parts(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    fn request_fn(&self) -> impl Fn(HttpRequest) -> Result<HttpRequest, ConnectError> + Send + Sync + 'static {
        let name = self.name.clone();
        let value = self.value.clone();
        move |mut request: HttpRequest| {
            request.headers.insert(name.clone(), value.clone());
            Ok(request)
        }
    }
}

impl Interceptor for HeaderInterceptor {
    fn unary_function(&self) -> UnaryFunction {
        UnaryFunction::new(self.request_fn(), |response| response)
    }

    fn stream_function(&self) -> StreamFunction {
        StreamFunction::new(self.request_fn(), Ok, |result| result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::MethodSpec;
    use connectrpc_client_core::Code;
    use http::{HeaderMap, StatusCode};
    use std::sync::Mutex;

    fn request() -> HttpRequest {
        let method = MethodSpec::<(), ()>::unary("test.Svc/Method");
        HttpRequest::new("http://h/test.Svc/Method", "application/json", method.descriptor().clone())
    }

    /// Records the order in which its functions run into a shared log.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn entry(&self, stage: &str) -> impl Fn() + Send + Sync + 'static {
            let log = self.log.clone();
            let line = format!("{}:{}", self.name, stage);
            move || log.lock().unwrap().push(line.clone())
        }
    }

    impl Interceptor for Recorder {
        fn unary_function(&self) -> UnaryFunction {
            let req = self.entry("request");
            let res = self.entry("response");
            UnaryFunction::new(
                move |r| {
                    req();
                    Ok(r)
                },
                move |r| {
                    res();
                    r
                },
            )
        }

        fn stream_function(&self) -> StreamFunction {
            let req = self.entry("request");
            let body = self.entry("body");
            let res = self.entry("result");
            StreamFunction::new(
                move |r| {
                    req();
                    Ok(r)
                },
                move |b| {
                    body();
                    Ok(b)
                },
                move |r| {
                    res();
                    r
                },
            )
        }
    }

    fn recorders(log: &Arc<Mutex<Vec<String>>>) -> InterceptorChain {
        InterceptorChain::new(vec![
            Arc::new(Recorder {
                name: "a",
                log: log.clone(),
            }),
            Arc::new(Recorder {
                name: "b",
                log: log.clone(),
            }),
        ])
    }

    #[test]
    fn test_unary_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let f = recorders(&log).unary_function();

        (f.request)(request()).unwrap();
        (f.response)(HttpResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::new()));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:request", "b:request", "b:response", "a:response"]
        );
    }

    #[test]
    fn test_stream_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let f = recorders(&log).stream_function();

        (f.request)(request()).unwrap();
        (f.request_body)(Bytes::from_static(b"m")).unwrap();
        (f.stream_result)(StreamResult::Headers(HeaderMap::new()));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:request", "b:request", "a:body", "b:body", "b:result", "a:result"]
        );
    }

    #[test]
    fn test_request_error_short_circuits() {
        struct Reject;
        impl Interceptor for Reject {
            fn unary_function(&self) -> UnaryFunction {
                UnaryFunction::new(
                    |_| Err(ConnectError::new(Code::PermissionDenied, "no")),
                    |r| r,
                )
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = InterceptorChain::new(vec![Arc::new(Reject)]);
        chain.push(Arc::new(Recorder {
            name: "after",
            log: log.clone(),
        }));

        let err = (chain.unary_function().request)(request()).unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_chain_is_passthrough() {
        let chain = InterceptorChain::default();
        assert!(chain.is_empty());
        let f = chain.stream_function();
        let body = (f.request_body)(Bytes::from_static(b"x")).unwrap();
        assert_eq!(body.as_ref(), b"x");
    }

    #[test]
    fn test_header_interceptor() {
        let interceptor = HeaderInterceptor::try_new("x-auth", "bearer-token").unwrap();
        let out = (interceptor.unary_function().request)(request()).unwrap();
        assert_eq!(out.headers.get("x-auth").unwrap(), "bearer-token");

        let out = (interceptor.stream_function().request)(request()).unwrap();
        assert_eq!(out.headers.get("x-auth").unwrap(), "bearer-token");

        assert!(HeaderInterceptor::try_new("bad name", "v").is_err());
    }
}
