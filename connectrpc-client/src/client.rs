//! The protocol client.
//!
//! [`ProtocolClient`] owns a transport and a configuration and runs every
//! call through the interceptor chain: the configured interceptors first,
//! then [`ConnectInterceptor`] closest to the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use connectrpc_client_core::{Code, ConnectError};
use http::HeaderMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::codec::{Codec, Encoding, RpcMessage};
use crate::config::ProtocolClientConfig;
use crate::interceptor::{InterceptorChain, UnaryFunction};
use crate::method::{MethodDescriptor, MethodSpec};
use crate::protocol::ConnectInterceptor;
use crate::request::HttpRequest;
use crate::response::{HttpResponse, ResponseMessage};
use crate::streaming::{self, BidirectionalStream, ClientOnlyStream, ServerOnlyStream};
use crate::transport::{CancelHandle, HttpTransport, lock};

type ResultCallback<Res> = Box<dyn FnOnce(ResponseMessage<Res>) + Send + 'static>;

/// Connect client over a pluggable [`HttpTransport`].
///
/// Cheap to clone; clones share the transport and configuration.
///
/// # Example
///
/// ```ignore
/// let config = ProtocolClientConfig::builder("https://api.example.com")
///     .use_proto()
///     .build()?;
/// let client = ProtocolClient::new(transport, config);
///
/// let method = MethodSpec::<SayRequest, SayResponse>::unary("eliza.v1.ElizaService/Say");
/// let response = client.unary_async(&method, &request, HeaderMap::new()).await;
/// ```
#[derive(Clone)]
pub struct ProtocolClient {
    transport: Arc<dyn HttpTransport>,
    config: Arc<ProtocolClientConfig>,
    chain: InterceptorChain,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("config", &self.config)
            .field("interceptors", &self.chain.len())
            .finish()
    }
}

impl ProtocolClient {
    pub fn new<T: HttpTransport>(transport: T, config: ProtocolClientConfig) -> Self {
        Self::with_transport(Arc::new(transport), config)
    }

    /// Build a client over an already shared transport.
    pub fn with_transport(transport: Arc<dyn HttpTransport>, config: ProtocolClientConfig) -> Self {
        let config = Arc::new(config);
        let mut chain = InterceptorChain::new(config.interceptors().to_vec());
        chain.push(Arc::new(ConnectInterceptor::new(config.clone())));
        Self {
            transport,
            config,
            chain,
        }
    }

    pub fn config(&self) -> &ProtocolClientConfig {
        &self.config
    }

    fn encoding(&self) -> Encoding {
        self.config.encoding()
    }

    /// Serialize a unary request. Deterministic whenever GET may be used, so
    /// equal requests map to equal URLs.
    fn serialize_request<Req: RpcMessage>(&self, request: &Req) -> Result<Bytes, ConnectError> {
        if self.config.get_configuration().is_enabled() {
            self.encoding().deterministic_serialize(request)
        } else {
            self.encoding().serialize(request)
        }
    }

    /// Start a unary call, delivering the outcome to `on_result`.
    ///
    /// `on_result` runs at most once, on whatever thread the transport
    /// reports from. Cancelling the returned handle before then guarantees
    /// it never runs.
    pub fn unary<Req, Res, F>(
        &self,
        method: &MethodSpec<Req, Res>,
        request: &Req,
        headers: HeaderMap,
        on_result: F,
    ) -> CancelHandle
    where
        Req: RpcMessage,
        Res: RpcMessage,
        F: FnOnce(ResponseMessage<Res>) + Send + 'static,
    {
        let body = self.serialize_request(request);
        self.start_unary(method.descriptor().clone(), body, headers, Box::new(on_result))
    }

    fn start_unary<Res: RpcMessage>(
        &self,
        descriptor: MethodDescriptor,
        body: Result<Bytes, ConnectError>,
        headers: HeaderMap,
        on_result: ResultCallback<Res>,
    ) -> CancelHandle {
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                on_result(ResponseMessage::failed(err));
                return CancelHandle::noop();
            }
        };

        debug!(procedure = %descriptor.path, bytes = body.len(), "starting unary call");
        let encoding = self.encoding();
        let request = HttpRequest::new(
            self.config.url_for(&descriptor),
            encoding.unary_content_type(),
            descriptor,
        )
        .with_headers(headers)
        .with_body(body);

        let UnaryFunction {
            request: rewrite_request,
            response: rewrite_response,
        } = self.chain.unary_function();

        let request = match rewrite_request(request) {
            Ok(request) => request,
            Err(err) => {
                debug!(code = %err.code(), "unary request rejected");
                on_result(ResponseMessage::failed(err));
                return CancelHandle::noop();
            }
        };

        let slot = Arc::new(Mutex::new(Some(on_result)));
        let deliver = slot.clone();
        let transport_handle = self.transport.unary(
            request,
            Box::new(move |response: HttpResponse| {
                let Some(on_result) = lock(&deliver).take() else {
                    debug!("dropping unary response for canceled call");
                    return;
                };
                on_result(into_response_message(encoding, rewrite_response(response)));
            }),
        );

        CancelHandle::new(move || {
            lock(&slot).take();
        })
        .chain(transport_handle)
    }

    /// Await a unary call.
    ///
    /// Dropping the future cancels the call. With a configured timeout the
    /// call fails with [`Code::DeadlineExceeded`] once it elapses.
    pub async fn unary_async<Req, Res>(
        &self,
        method: &MethodSpec<Req, Res>,
        request: &Req,
        headers: HeaderMap,
    ) -> ResponseMessage<Res>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        let (tx, rx) = oneshot::channel();
        let handle = self.unary(method, request, headers, move |result| {
            let _ = tx.send(result);
        });
        let guard = CancelOnDrop(Some(handle));

        let received = match self.config.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(procedure = %method.descriptor().path, ?timeout, "unary call timed out");
                    return ResponseMessage::failed(ConnectError::deadline_exceeded(format!(
                        "call exceeded {timeout:?} timeout"
                    )));
                }
            },
            None => rx.await,
        };
        guard.disarm();

        received.unwrap_or_else(|_| {
            ResponseMessage::failed(ConnectError::canceled("call ended without a response"))
        })
    }

    /// Prepare a unary call to run on the current thread.
    ///
    /// The request is serialized now and sent on
    /// [`execute`](UnaryBlockingCall::execute).
    pub fn unary_blocking<Req, Res>(
        &self,
        method: &MethodSpec<Req, Res>,
        request: &Req,
        headers: HeaderMap,
    ) -> UnaryBlockingCall<Res>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        let client = self.clone();
        let descriptor = method.descriptor().clone();
        let body = self.serialize_request(request);
        UnaryBlockingCall::new(Box::new(move |on_result| {
            client.start_unary(descriptor, body, headers, on_result)
        }))
    }

    /// Open a bidirectional stream.
    pub fn stream<Req, Res>(
        &self,
        method: &MethodSpec<Req, Res>,
        headers: HeaderMap,
    ) -> BidirectionalStream<Req, Res>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        let descriptor = method.descriptor().clone();
        let encoding = self.encoding();
        let request = HttpRequest::new(
            self.config.url_for(&descriptor),
            encoding.streaming_content_type(),
            descriptor,
        )
        .with_headers(headers);
        streaming::open(
            self.transport.as_ref(),
            request,
            self.chain.stream_function(),
            encoding,
        )
    }

    /// Send `request` on a new stream, close the send side and return the
    /// response view.
    pub fn server_stream<Req, Res>(
        &self,
        method: &MethodSpec<Req, Res>,
        request: &Req,
        headers: HeaderMap,
    ) -> ServerOnlyStream<Res>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        ServerOnlyStream::start(self.stream(method, headers), request)
    }

    pub fn client_stream<Req, Res>(
        &self,
        method: &MethodSpec<Req, Res>,
        headers: HeaderMap,
    ) -> ClientOnlyStream<Req, Res>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        ClientOnlyStream::new(self.stream(method, headers))
    }
}

fn into_response_message<Res: RpcMessage>(
    encoding: Encoding,
    response: HttpResponse,
) -> ResponseMessage<Res> {
    let HttpResponse {
        headers,
        trailers,
        body,
        cause,
        ..
    } = response;

    if let Some(error) = cause {
        return ResponseMessage::Failure {
            code: error.code(),
            error,
            headers,
            trailers,
        };
    }

    match encoding.deserialize::<Res>(&body) {
        Ok(message) => ResponseMessage::Success {
            message,
            headers,
            trailers,
        },
        Err(err) => ResponseMessage::Failure {
            code: Code::Unknown,
            error: err.with_code(Code::Unknown),
            headers,
            trailers,
        },
    }
}

/// Cancels the call unless disarmed.
struct CancelOnDrop(Option<CancelHandle>);

impl CancelOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.cancel();
        }
    }
}

type Starter<Res> = Box<dyn FnOnce(ResultCallback<Res>) -> CancelHandle + Send + 'static>;

/// A unary call that blocks the calling thread.
///
/// [`execute`](Self::execute) must not run on an async runtime thread the
/// transport depends on. Share the call (e.g. in an `Arc`) to cancel it from
/// another thread.
pub struct UnaryBlockingCall<Res> {
    starter: Mutex<Option<Starter<Res>>>,
    canceled: AtomicBool,
    in_flight: Mutex<Option<CancelHandle>>,
}

impl<Res> std::fmt::Debug for UnaryBlockingCall<Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnaryBlockingCall")
            .field("canceled", &self.canceled.load(Ordering::SeqCst))
            .finish()
    }
}

impl<Res: Send + 'static> UnaryBlockingCall<Res> {
    fn new(starter: Starter<Res>) -> Self {
        Self {
            starter: Mutex::new(Some(starter)),
            canceled: AtomicBool::new(false),
            in_flight: Mutex::new(None),
        }
    }

    /// Send the request and wait for the outcome.
    ///
    /// A call executes once; later calls fail with
    /// [`Code::FailedPrecondition`]. A canceled call yields
    /// [`Code::Canceled`].
    pub fn execute(&self) -> ResponseMessage<Res> {
        let Some(start) = lock(&self.starter).take() else {
            return ResponseMessage::failed(ConnectError::new(
                Code::FailedPrecondition,
                "call already executed",
            ));
        };
        if self.canceled.load(Ordering::SeqCst) {
            return ResponseMessage::failed(ConnectError::canceled("call canceled"));
        }

        // The only sender lives in the result callback; cancelling drops it
        // and unblocks `recv`.
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let handle = start(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        *lock(&self.in_flight) = Some(handle);
        if self.canceled.load(Ordering::SeqCst) {
            self.cancel();
        }

        rx.recv()
            .unwrap_or_else(|_| ResponseMessage::failed(ConnectError::canceled("call canceled")))
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        let handle = lock(&self.in_flight).take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }
}
