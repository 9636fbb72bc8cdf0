//! Connect protocol client for Rust.
//!
//! This crate implements the client side of the Connect RPC protocol on top
//! of a pluggable [`HttpTransport`]. It builds requests, applies the
//! interceptor chain, frames and compresses messages, and turns responses
//! back into typed results. Sockets, TLS and connection pooling belong to
//! the transport.
//!
//! ## Features
//!
//! - Unary calls with callback, async and blocking entry points
//! - Server, client and bidirectional streaming
//! - JSON and Protobuf encoding
//! - Request compression and response decompression (gzip, deflate,
//!   brotli, zstd)
//! - HTTP GET for side-effect-free unary methods
//! - Caller-supplied interceptors
//!
//! ## Unary Example
//!
//! ```ignore
//! use connectrpc_client::{MethodSpec, ProtocolClient, ProtocolClientConfig, ResponseMessage};
//! use http::HeaderMap;
//!
//! let config = ProtocolClientConfig::builder("http://localhost:3000")
//!     .use_proto()
//!     .build()?;
//! let client = ProtocolClient::new(my_transport, config);
//!
//! let method = MethodSpec::<SayRequest, SayResponse>::unary("eliza.v1.ElizaService/Say");
//! match client.unary_async(&method, &request, HeaderMap::new()).await {
//!     ResponseMessage::Success { message, .. } => println!("{message:?}"),
//!     ResponseMessage::Failure { error, .. } => eprintln!("{error}"),
//! }
//! ```
//!
//! ## Server Streaming Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let method = MethodSpec::<ListRequest, ListItem>::server_stream("items.v1.ItemService/ListItems");
//! let mut stream = client.server_stream(&method, &request, HeaderMap::new());
//!
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(item) => println!("Got item: {item:?}"),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//!
//! // Trailers are available once the stream completed
//! if let Some(trailers) = stream.trailers() {
//!     println!("Trailers: {trailers:?}");
//! }
//! ```
//!
//! ## Cancellation and Timeouts
//!
//! - [`ProtocolClient::unary`] returns a [`CancelHandle`]. Cancelling before
//!   the callback runs guarantees it never runs.
//! - Dropping the future returned by [`ProtocolClient::unary_async`] cancels
//!   the call.
//! - Dropping a stream's inbound half, or calling `cancel`, closes the
//!   transport stream.
//! - [`ProtocolClientConfigBuilder::timeout`] is sent as `connect-timeout-ms`
//!   and bounds `unary_async` on the client with [`Code::DeadlineExceeded`].
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `compression-gzip` | Gzip compression (default) | `flate2` |
//! | `compression-deflate` | Deflate compression | `flate2` |
//! | `compression-br` | Brotli compression | `brotli` |
//! | `compression-zstd` | Zstandard compression | `zstd` |
//! | `compression-full` | All compression algorithms | All of above |

mod client;
mod codec;
mod config;
mod interceptor;
mod method;
mod protocol;
mod request;
mod response;
mod streaming;
mod transport;

#[cfg(test)]
mod test_util;

pub use client::{ProtocolClient, UnaryBlockingCall};
pub use codec::{Codec, Encoding, JsonCodec, ProtoCodec, RpcMessage};
pub use config::{
    ConfigError, DEFAULT_USER_AGENT, GetConfiguration, MAX_TIMEOUT_MS, ProtocolClientConfig,
    ProtocolClientConfigBuilder,
};
pub use interceptor::{
    HeaderInterceptor, Interceptor, InterceptorChain, RequestBodyFn, RequestFn, ResponseFn,
    StreamFunction, StreamResultFn, UnaryFunction,
};
pub use method::{Idempotency, MethodDescriptor, MethodSpec, StreamType};
pub use protocol::{ConnectInterceptor, headers};
pub use request::HttpRequest;
pub use response::{HttpResponse, ResponseMessage, StreamResult, TracingInfo};
pub use streaming::{
    BidirectionalStream, ClientOnlyStream, ResponseStream, ServerOnlyStream, StreamSender,
};
pub use transport::{CancelHandle, HttpTransport, StreamCallback, TransportStream, UnaryCallback};

// Re-export core types
pub use connectrpc_client_core::{
    BoxedPool, Code, CompressionPool, CompressionRegistry, ConnectError, EnvelopeBuffer,
    EnvelopeError, ErrorDetail, IDENTITY, RequestCompression, envelope_flags,
};

#[cfg(feature = "compression-br")]
pub use connectrpc_client_core::BrotliPool;
#[cfg(feature = "compression-deflate")]
pub use connectrpc_client_core::DeflatePool;
#[cfg(feature = "compression-gzip")]
pub use connectrpc_client_core::GzipPool;
#[cfg(feature = "compression-zstd")]
pub use connectrpc_client_core::ZstdPool;

// Re-export http types used in the public API
pub use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
