//! HTTP transport contract.
//!
//! The client never performs I/O itself. An [`HttpTransport`] sends the
//! rewritten request and reports back through a callback, from whatever
//! thread or task it runs on. Connection pooling and TLS live behind this
//! seam.
//!
//! For streams, the transport delivers one [`StreamResult::Message`] per
//! complete envelope (header included); `EnvelopeBuffer` in
//! `connectrpc-client-core` does the reassembly. It delivers
//! [`StreamResult::Complete`] only for transport-level termination; the
//! protocol's own end-of-stream frame arrives as a `Message`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use connectrpc_client_core::ConnectError;

use crate::request::HttpRequest;
use crate::response::{HttpResponse, StreamResult};

/// Invoked once with the unary response.
pub type UnaryCallback = Box<dyn FnOnce(HttpResponse) + Send + 'static>;

/// Invoked for every inbound stream event, in transport order.
pub type StreamCallback = Arc<dyn Fn(StreamResult<Bytes>) + Send + Sync + 'static>;

pub trait HttpTransport: Send + Sync + 'static {
    /// Start a unary exchange. `on_result` must be called at most once.
    fn unary(&self, request: HttpRequest, on_result: UnaryCallback) -> CancelHandle;

    /// Open a duplex stream.
    fn stream(&self, request: HttpRequest, on_result: StreamCallback) -> Arc<dyn TransportStream>;
}

/// Outbound half of an open stream plus its close controls.
pub trait TransportStream: Send + Sync {
    /// Write one already-framed envelope.
    fn send(&self, frame: Bytes) -> Result<(), ConnectError>;

    /// Half-close the request side.
    fn send_close(&self);

    /// Stop receiving and tear down the response side.
    fn receive_close(&self);
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type CancelFn = Box<dyn FnOnce() + Send + 'static>;

/// Cancels an in-flight call. Cancelling twice is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Mutex<Option<CancelFn>>>,
}

impl CancelHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(cancel)))),
        }
    }

    /// A handle with nothing to cancel.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cancel(&self) {
        let cancel = lock(&self.inner).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Run `other` too when this handle is cancelled.
    pub(crate) fn chain(self, other: CancelHandle) -> CancelHandle {
        CancelHandle::new(move || {
            self.cancel();
            other.cancel();
        })
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = lock(&self.inner).is_some();
        f.debug_struct("CancelHandle")
            .field("pending", &pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancel_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = CancelHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let clone = handle.clone();
        handle.cancel();
        clone.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_chain_cancels_both() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = count.clone();
        let b = count.clone();
        let handle = CancelHandle::new(move || {
            a.fetch_add(1, Ordering::SeqCst);
        })
        .chain(CancelHandle::new(move || {
            b.fetch_add(10, Ordering::SeqCst);
        }));

        handle.cancel();
        handle.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_noop_handle() {
        let handle = CancelHandle::noop();
        handle.cancel();
        assert_eq!(format!("{handle:?}"), "CancelHandle { pending: false }");
    }
}
