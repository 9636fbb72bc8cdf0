//! Wire-level building blocks for the Connect protocol client.
//!
//! Nothing here touches a network. The `connectrpc-client` crate composes
//! these pieces into calls.
//!
//! ## Modules
//!
//! - [`error`]: protocol codes, [`ConnectError`] and [`EnvelopeError`]
//! - [`pool`]: the [`CompressionPool`] trait and built-in pools
//! - [`compression`]: pool registry and request compression settings
//! - [`envelope`]: streaming envelope pack/unpack
//! - [`wire`]: JSON error and end-of-stream payloads

pub mod compression;
pub mod envelope;
pub mod error;
pub mod pool;
pub mod wire;

pub use compression::*;
pub use envelope::*;
pub use error::*;
pub use pool::*;
pub use wire::{EndStream, parse_end_stream, parse_unary_error};
