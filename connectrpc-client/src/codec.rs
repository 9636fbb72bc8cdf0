//! Message codecs.
//!
//! A codec turns messages into payload bytes and back. The Connect content
//! type is derived from [`Codec::encoding_name`]: `application/<name>` for
//! unary calls and `application/connect+<name>` for streams.

use bytes::Bytes;
use connectrpc_client_core::ConnectError;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bound satisfied by every message type the client can carry.
///
/// Blanket-implemented for prost messages that also derive serde.
pub trait RpcMessage: Message + Serialize + DeserializeOwned + Default + Send + 'static {}

impl<T> RpcMessage for T where T: Message + Serialize + DeserializeOwned + Default + Send + 'static {}

/// Serialization contract shared by the built-in codecs.
///
/// The client picks its codec through [`Encoding`], which dispatches to
/// [`JsonCodec`] or [`ProtoCodec`]; a custom implementation cannot be
/// installed on [`ProtocolClientConfig`](crate::ProtocolClientConfig). The
/// trait is public so the built-in codecs can be used directly, for example
/// to pre-encode a payload for [`HttpRequest`](crate::HttpRequest) in an
/// interceptor.
pub trait Codec: Send + Sync + 'static {
    /// Name used in content types and the GET `encoding` parameter.
    fn encoding_name(&self) -> &'static str;

    fn serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError>;

    /// Serialize so that equal messages always produce equal bytes.
    ///
    /// Used whenever a request may be sent as a cacheable GET.
    fn deterministic_serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError>;

    fn deserialize<T: RpcMessage>(&self, bytes: &[u8]) -> Result<T, ConnectError>;
}

/// JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encoding_name(&self) -> &'static str {
        "json"
    }

    fn serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| ConnectError::internal(format!("JSON encoding failed: {e}")))
    }

    fn deterministic_serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError> {
        // serde_json::Value keeps object keys sorted.
        serde_json::to_value(message)
            .and_then(|value| serde_json::to_vec(&value))
            .map(Bytes::from)
            .map_err(|e| ConnectError::internal(format!("JSON encoding failed: {e}")))
    }

    fn deserialize<T: RpcMessage>(&self, bytes: &[u8]) -> Result<T, ConnectError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ConnectError::unknown(format!("JSON decoding failed: {e}")))
    }
}

/// Protobuf binary via prost.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoCodec;

impl Codec for ProtoCodec {
    fn encoding_name(&self) -> &'static str {
        "proto"
    }

    fn serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError> {
        Ok(Bytes::from(message.encode_to_vec()))
    }

    // prost writes fields in tag order. Map fields backed by HashMap are the
    // one source of non-determinism; generate them as BTreeMap when GET
    // caching matters.
    fn deterministic_serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError> {
        self.serialize(message)
    }

    fn deserialize<T: RpcMessage>(&self, bytes: &[u8]) -> Result<T, ConnectError> {
        T::decode(bytes).map_err(|e| ConnectError::unknown(format!("protobuf decoding failed: {e}")))
    }
}

/// Wire encoding selected on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    Proto,
}

impl Codec for Encoding {
    fn encoding_name(&self) -> &'static str {
        match self {
            Encoding::Json => JsonCodec.encoding_name(),
            Encoding::Proto => ProtoCodec.encoding_name(),
        }
    }

    fn serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError> {
        match self {
            Encoding::Json => JsonCodec.serialize(message),
            Encoding::Proto => ProtoCodec.serialize(message),
        }
    }

    fn deterministic_serialize<T: RpcMessage>(&self, message: &T) -> Result<Bytes, ConnectError> {
        match self {
            Encoding::Json => JsonCodec.deterministic_serialize(message),
            Encoding::Proto => ProtoCodec.deterministic_serialize(message),
        }
    }

    fn deserialize<T: RpcMessage>(&self, bytes: &[u8]) -> Result<T, ConnectError> {
        match self {
            Encoding::Json => JsonCodec.deserialize(bytes),
            Encoding::Proto => ProtoCodec.deserialize(bytes),
        }
    }
}

impl Encoding {
    /// `application/<name>`, used by unary calls.
    pub fn unary_content_type(&self) -> String {
        format!("application/{}", self.encoding_name())
    }

    /// `application/connect+<name>`, used by streaming calls.
    pub fn streaming_content_type(&self) -> String {
        format!("application/connect+{}", self.encoding_name())
    }
}
