//! Streaming sessions.
//!
//! A [`BidirectionalStream`] is the duplex view of one open Connect stream.
//! Outbound messages are serialized, run through the interceptor chain's
//! request-body hooks, then written to the transport in call order. Inbound
//! transport events are rewritten by the chain and fanned out to a channel
//! consumed through [`ResponseStream`].
//!
//! [`ServerOnlyStream`] and [`ClientOnlyStream`] restrict the same session to
//! the operations their call shape allows.
//!
//! # Completion
//!
//! Exactly one completion is observed per stream. Whichever of the end-stream
//! frame, a transport failure, a decode failure or cancellation arrives first
//! wins; every event after that is discarded.
//!
//! # Cancellation
//!
//! Dropping the inbound half stops receiving and tears the transport stream
//! down. Dropping the outbound half closes the send side.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use connectrpc_client_core::{Code, ConnectError};
use futures::Stream;
use http::HeaderMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::codec::{Codec, Encoding, RpcMessage};
use crate::interceptor::{RequestBodyFn, StreamFunction};
use crate::request::HttpRequest;
use crate::response::{ResponseMessage, StreamResult};
use crate::transport::{HttpTransport, StreamCallback, TransportStream, lock};

type Inbound<Res> = Result<Res, ConnectError>;

/// State shared between the transport callback and the inbound half.
struct StreamState<Res> {
    /// Taken on completion; `None` means the stream is complete.
    latch: Mutex<Option<mpsc::UnboundedSender<Inbound<Res>>>>,
    headers: Mutex<Option<HeaderMap>>,
    trailers: Mutex<Option<HeaderMap>>,
}

impl<Res> StreamState<Res> {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound<Res>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            latch: Mutex::new(Some(tx)),
            headers: Mutex::new(None),
            trailers: Mutex::new(None),
        });
        (state, rx)
    }

    fn is_complete(&self) -> bool {
        lock(&self.latch).is_none()
    }

    fn deliver(&self, item: Inbound<Res>) {
        match lock(&self.latch).as_ref() {
            Some(sender) => {
                let _ = sender.send(item);
            }
            None => trace!("discarding message after stream completion"),
        }
    }

    /// Complete the stream, optionally with an error. Returns `false` if it
    /// was already complete.
    fn complete(&self, error: Option<ConnectError>) -> bool {
        let Some(sender) = lock(&self.latch).take() else {
            return false;
        };
        if let Some(error) = error {
            let _ = sender.send(Err(error));
        }
        true
    }
}

/// Open a stream through `transport`, wiring the chain's stream hooks.
pub(crate) fn open<Req, Res>(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    functions: StreamFunction,
    encoding: Encoding,
) -> BidirectionalStream<Req, Res>
where
    Req: RpcMessage,
    Res: RpcMessage,
{
    let StreamFunction {
        request: rewrite_request,
        request_body,
        stream_result,
    } = functions;
    let (state, rx) = StreamState::<Res>::new();
    let procedure = request.descriptor.path.clone();

    let request = match rewrite_request(request) {
        Ok(request) => request,
        Err(err) => {
            debug!(procedure = %procedure, code = %err.code(), "stream request rejected");
            state.complete(Some(err));
            return BidirectionalStream::new(Arc::new(ClosedStream), request_body, encoding, state, rx);
        }
    };

    let opened: Arc<OnceLock<Arc<dyn TransportStream>>> = Arc::new(OnceLock::new());
    let callback_state = state.clone();
    let callback_stream = opened.clone();
    let callback: StreamCallback = Arc::new(move |event: StreamResult<Bytes>| {
        if callback_state.is_complete() {
            trace!("discarding stream event after completion");
            return;
        }
        match stream_result(event) {
            StreamResult::Headers(headers) => {
                *lock(&callback_state.headers) = Some(headers);
            }
            StreamResult::Message(payload) => match encoding.deserialize::<Res>(&payload) {
                Ok(message) => callback_state.deliver(Ok(message)),
                Err(err) => {
                    debug!(error = %err, "failed to decode stream message");
                    if callback_state.complete(Some(err)) {
                        if let Some(stream) = callback_stream.get() {
                            stream.receive_close();
                        }
                    }
                }
            },
            StreamResult::Complete {
                code,
                error,
                trailers,
            } => {
                *lock(&callback_state.trailers) = Some(trailers.clone());
                let error = match (code, error) {
                    (_, Some(error)) => Some(error),
                    (Code::Ok, None) => None,
                    (code, None) => Some(ConnectError::from_code(code).with_metadata(trailers)),
                };
                debug!(code = %code, "stream completed");
                callback_state.complete(error);
            }
        }
    });

    debug!(procedure = %procedure, "opening stream");
    let stream = transport.stream(request, callback);
    let _ = opened.set(stream.clone());
    BidirectionalStream::new(stream, request_body, encoding, state, rx)
}

/// Stands in for a stream that never opened.
struct ClosedStream;

impl TransportStream for ClosedStream {
    fn send(&self, _frame: Bytes) -> Result<(), ConnectError> {
        Err(ConnectError::canceled("stream was never opened"))
    }

    fn send_close(&self) {}

    fn receive_close(&self) {}
}

struct SendHalf {
    transport: Arc<dyn TransportStream>,
    request_body: RequestBodyFn,
    encoding: Encoding,
    /// Also serializes concurrent senders so frames keep call order.
    closed: Mutex<bool>,
}

impl SendHalf {
    fn send(&self, payload: Result<Bytes, ConnectError>) -> Result<(), ConnectError> {
        let closed = lock(&self.closed);
        if *closed {
            return Err(ConnectError::new(
                Code::FailedPrecondition,
                "send side of the stream is closed",
            ));
        }
        let frame = (self.request_body)(payload?)?;
        self.transport.send(frame)
    }

    fn close(&self) {
        let mut closed = lock(&self.closed);
        if !*closed {
            *closed = true;
            self.transport.send_close();
        }
    }
}

/// Outbound half of a stream.
pub struct StreamSender<Req> {
    half: SendHalf,
    _marker: PhantomData<fn(Req)>,
}

impl<Req: RpcMessage> StreamSender<Req> {
    /// Serialize and send one message.
    ///
    /// Fails once the send side is closed.
    pub fn send(&self, message: &Req) -> Result<(), ConnectError> {
        self.half.send(self.half.encoding.serialize(message))
    }
}

impl<Req> StreamSender<Req> {
    /// Half-close the request side. Idempotent.
    pub fn close(&self) {
        self.half.close();
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.half.closed)
    }
}

impl<Req> Drop for StreamSender<Req> {
    fn drop(&mut self) {
        self.half.close();
    }
}

impl<Req> std::fmt::Debug for StreamSender<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound half of a stream.
///
/// Yields each decoded message, then at most one error, then ends.
/// Response headers and trailers become available as they arrive.
pub struct ResponseStream<Res> {
    rx: mpsc::UnboundedReceiver<Inbound<Res>>,
    state: Arc<StreamState<Res>>,
    transport: Arc<dyn TransportStream>,
}

impl<Res> ResponseStream<Res> {
    /// Wait for the next message. `None` once the stream has ended.
    pub async fn receive(&mut self) -> Option<Result<Res, ConnectError>> {
        self.rx.recv().await
    }

    pub fn headers(&self) -> Option<HeaderMap> {
        lock(&self.state.headers).clone()
    }

    /// Trailers, available after the stream completed.
    pub fn trailers(&self) -> Option<HeaderMap> {
        lock(&self.state.trailers).clone()
    }

    /// Whether completion has been observed. Buffered messages may still be
    /// waiting to be received.
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Stop receiving. A pending [`receive`](Self::receive) yields
    /// [`Code::Canceled`].
    pub fn cancel(&self) {
        self.fail(ConnectError::canceled("stream canceled"));
    }

    fn fail(&self, err: ConnectError) {
        if self.state.complete(Some(err)) {
            self.transport.receive_close();
        }
    }
}

impl<Res> Stream for ResponseStream<Res> {
    type Item = Result<Res, ConnectError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<Res> Drop for ResponseStream<Res> {
    fn drop(&mut self) {
        if self.state.complete(None) {
            trace!("response stream dropped before completion");
            self.transport.receive_close();
        }
    }
}

impl<Res> std::fmt::Debug for ResponseStream<Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// A duplex stream session.
///
/// # Example
///
/// ```ignore
/// let mut stream = client.stream(&method, HeaderMap::new());
/// stream.send(&request)?;
/// stream.close_send();
/// while let Some(message) = stream.receive().await {
///     println!("{:?}", message?);
/// }
/// println!("trailers: {:?}", stream.trailers());
/// ```
#[derive(Debug)]
pub struct BidirectionalStream<Req, Res> {
    sender: StreamSender<Req>,
    responses: ResponseStream<Res>,
}

impl<Req, Res> BidirectionalStream<Req, Res> {
    fn new(
        transport: Arc<dyn TransportStream>,
        request_body: RequestBodyFn,
        encoding: Encoding,
        state: Arc<StreamState<Res>>,
        rx: mpsc::UnboundedReceiver<Inbound<Res>>,
    ) -> Self {
        let sender = StreamSender {
            half: SendHalf {
                transport: transport.clone(),
                request_body,
                encoding,
                closed: Mutex::new(false),
            },
            _marker: PhantomData,
        };
        let responses = ResponseStream {
            rx,
            state,
            transport,
        };
        Self { sender, responses }
    }

    pub fn close_send(&self) {
        self.sender.close();
    }

    pub async fn receive(&mut self) -> Option<Result<Res, ConnectError>> {
        self.responses.receive().await
    }

    pub fn headers(&self) -> Option<HeaderMap> {
        self.responses.headers()
    }

    pub fn trailers(&self) -> Option<HeaderMap> {
        self.responses.trailers()
    }

    pub fn is_complete(&self) -> bool {
        self.responses.is_complete()
    }

    /// Close both halves.
    pub fn cancel(&self) {
        self.sender.close();
        self.responses.cancel();
    }

    /// Split into independently owned halves, e.g. to send from one task
    /// while receiving on another.
    pub fn split(self) -> (StreamSender<Req>, ResponseStream<Res>) {
        (self.sender, self.responses)
    }
}

impl<Req: RpcMessage, Res> BidirectionalStream<Req, Res> {
    pub fn send(&self, message: &Req) -> Result<(), ConnectError> {
        self.sender.send(message)
    }
}

impl<Req, Res> Stream for BidirectionalStream<Req, Res> {
    type Item = Result<Res, ConnectError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.responses).poll_next(cx)
    }
}

/// Server-streaming view: the single request is already sent.
#[derive(Debug)]
pub struct ServerOnlyStream<Res> {
    responses: ResponseStream<Res>,
}

impl<Res> ServerOnlyStream<Res> {
    pub(crate) fn start<Req: RpcMessage>(stream: BidirectionalStream<Req, Res>, request: &Req) -> Self {
        let (sender, responses) = stream.split();
        if let Err(err) = sender.send(request) {
            debug!(code = %err.code(), "failed to send server-stream request");
            responses.fail(err);
        }
        sender.close();
        Self { responses }
    }

    pub async fn receive(&mut self) -> Option<Result<Res, ConnectError>> {
        self.responses.receive().await
    }

    pub fn headers(&self) -> Option<HeaderMap> {
        self.responses.headers()
    }

    pub fn trailers(&self) -> Option<HeaderMap> {
        self.responses.trailers()
    }

    pub fn cancel(&self) {
        self.responses.cancel();
    }

    pub fn into_inner(self) -> ResponseStream<Res> {
        self.responses
    }
}

impl<Res> Stream for ServerOnlyStream<Res> {
    type Item = Result<Res, ConnectError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.responses).poll_next(cx)
    }
}

/// Client-streaming view: many requests, exactly one response.
#[derive(Debug)]
pub struct ClientOnlyStream<Req, Res> {
    inner: BidirectionalStream<Req, Res>,
}

impl<Req, Res> ClientOnlyStream<Req, Res> {
    pub(crate) fn new(inner: BidirectionalStream<Req, Res>) -> Self {
        Self { inner }
    }

    pub fn headers(&self) -> Option<HeaderMap> {
        self.inner.headers()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Close the send side and wait for the single response.
    ///
    /// Zero or several response messages fail with [`Code::Unimplemented`].
    pub async fn receive_and_close(self) -> ResponseMessage<Res> {
        let (sender, mut responses) = self.inner.split();
        sender.close();

        let mut message = None;
        while let Some(item) = responses.receive().await {
            match item {
                Ok(received) if message.is_none() => message = Some(received),
                Ok(_) => {
                    let err = ConnectError::unimplemented("unary stream has multiple messages");
                    return failure(&responses, err);
                }
                Err(err) => return failure(&responses, err),
            }
        }

        match message {
            Some(message) => ResponseMessage::Success {
                message,
                headers: responses.headers().unwrap_or_default(),
                trailers: responses.trailers().unwrap_or_default(),
            },
            None => failure(
                &responses,
                ConnectError::unimplemented("unary stream has no messages"),
            ),
        }
    }
}

impl<Req: RpcMessage, Res> ClientOnlyStream<Req, Res> {
    pub fn send(&self, message: &Req) -> Result<(), ConnectError> {
        self.inner.send(message)
    }
}

fn failure<Res>(responses: &ResponseStream<Res>, error: ConnectError) -> ResponseMessage<Res> {
    ResponseMessage::Failure {
        code: error.code(),
        error,
        headers: responses.headers().unwrap_or_default(),
        trailers: responses.trailers().unwrap_or_default(),
    }
}
