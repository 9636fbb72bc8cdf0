//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use connectrpc_client_core::{
    BoxedPool, CompressionPool, CompressionRegistry, ConnectError, EnvelopeError,
};

use crate::config::{ProtocolClientConfig, ProtocolClientConfigBuilder};
use crate::request::HttpRequest;
use crate::response::{HttpResponse, StreamResult};
use crate::transport::{
    CancelHandle, HttpTransport, StreamCallback, TransportStream, UnaryCallback, lock,
};

/// Byte-reversing pool, so compression is visible without any codec feature.
///
/// connectrpc-client-core keeps its own copy in `pool::tests`, which also
/// fails on a leading `0xFF`. Test modules are not visible across crates, so
/// each crate carries one.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReversePool;

impl CompressionPool for ReversePool {
    fn name(&self) -> &'static str {
        "reverse"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        Ok(data.iter().rev().copied().collect::<Vec<u8>>().into())
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        self.compress(data)
    }
}

pub(crate) fn reverse_pool() -> BoxedPool {
    BoxedPool::new(ReversePool)
}

pub(crate) fn reversed(data: &[u8]) -> Vec<u8> {
    data.iter().rev().copied().collect()
}

/// Builder with only [`ReversePool`] registered.
pub(crate) fn builder() -> ProtocolClientConfigBuilder {
    ProtocolClientConfig::builder("http://localhost:8080")
        .compression_registry(CompressionRegistry::new().register(reverse_pool()))
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
pub(crate) struct Ping {
    #[prost(string, tag = "1")]
    pub text: String,
}

pub(crate) fn ping(text: &str) -> Ping {
    Ping {
        text: text.to_string(),
    }
}

/// Transport that records what it is given and lets the test drive replies.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    pub(crate) state: Arc<MockState>,
}

#[derive(Default)]
pub(crate) struct MockState {
    pub(crate) requests: Mutex<Vec<HttpRequest>>,
    unary_callbacks: Mutex<Vec<UnaryCallback>>,
    stream_callback: Mutex<Option<StreamCallback>>,
    pub(crate) sent: Mutex<Vec<Bytes>>,
    pub(crate) send_closed: AtomicBool,
    pub(crate) receive_closes: AtomicUsize,
    pub(crate) cancels: AtomicUsize,
    /// When set, unary calls are answered immediately with a clone.
    pub(crate) reply: Mutex<Option<HttpResponse>>,
}

impl MockTransport {
    pub(crate) fn replying(response: HttpResponse) -> Self {
        let transport = Self::default();
        *lock(&transport.state.reply) = Some(response);
        transport
    }

    pub(crate) fn last_request(&self) -> HttpRequest {
        lock(&self.state.requests)
            .last()
            .cloned()
            .expect("no request recorded")
    }

    /// Deliver `response` to the oldest pending unary call.
    pub(crate) fn respond(&self, response: HttpResponse) {
        let callback = lock(&self.state.unary_callbacks).remove(0);
        callback(response);
    }

    /// Deliver a stream event to the open stream.
    pub(crate) fn emit(&self, event: StreamResult<Bytes>) {
        let callback = lock(&self.state.stream_callback)
            .clone()
            .expect("no stream open");
        callback(event);
    }
}

impl HttpTransport for MockTransport {
    fn unary(&self, request: HttpRequest, on_result: UnaryCallback) -> CancelHandle {
        lock(&self.state.requests).push(request);
        let reply = lock(&self.state.reply).clone();
        match reply {
            Some(response) => on_result(response),
            None => lock(&self.state.unary_callbacks).push(on_result),
        }
        let state = self.state.clone();
        CancelHandle::new(move || {
            state.cancels.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn stream(&self, request: HttpRequest, on_result: StreamCallback) -> Arc<dyn TransportStream> {
        lock(&self.state.requests).push(request);
        *lock(&self.state.stream_callback) = Some(on_result);
        Arc::new(MockStream {
            state: self.state.clone(),
        })
    }
}

struct MockStream {
    state: Arc<MockState>,
}

impl TransportStream for MockStream {
    fn send(&self, frame: Bytes) -> Result<(), ConnectError> {
        lock(&self.state.sent).push(frame);
        Ok(())
    }

    fn send_close(&self) {
        self.state.send_closed.store(true, Ordering::SeqCst);
    }

    fn receive_close(&self) {
        self.state.receive_closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wrap `payload` in an uncompressed envelope.
pub(crate) fn frame(flags: u8, payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.push(flags);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_registers_reverse_pool() {
        let config = builder().build().unwrap();
        let pool = config
            .compression_registry()
            .resolve(Some("reverse"))
            .unwrap()
            .unwrap();
        assert_eq!(pool.name(), ReversePool.name());
        assert_eq!(pool.compress(b"abc").unwrap().as_ref(), b"cba");
        assert_eq!(pool.decompress(b"cba").unwrap().as_ref(), &reversed(b"cba")[..]);
    }
}
