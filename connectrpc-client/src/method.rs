//! Method descriptors.

use std::marker::PhantomData;

/// Call shape of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

impl StreamType {
    pub fn is_streaming(&self) -> bool {
        !matches!(self, StreamType::Unary)
    }
}

/// Side-effect class declared in the service definition.
///
/// Only [`Idempotency::NoSideEffects`] methods may be sent as HTTP GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Idempotency {
    #[default]
    Unknown,
    NoSideEffects,
    Idempotent,
}

/// Untyped method metadata carried on every [`HttpRequest`](crate::HttpRequest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// `package.Service/Method`, without a leading slash.
    pub path: String,
    pub request_type: &'static str,
    pub response_type: &'static str,
    pub stream_type: StreamType,
    pub idempotency: Idempotency,
}

/// Typed method handle tying a procedure to its request and response messages.
///
/// ```
/// use connectrpc_client::{Idempotency, MethodSpec, StreamType};
///
/// let method = MethodSpec::<String, String>::new("greet.v1.GreetService/Greet", StreamType::Unary)
///     .with_idempotency(Idempotency::NoSideEffects);
/// assert_eq!(method.descriptor().path, "greet.v1.GreetService/Greet");
/// ```
pub struct MethodSpec<Req, Res> {
    descriptor: MethodDescriptor,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> MethodSpec<Req, Res> {
    pub fn new(path: impl Into<String>, stream_type: StreamType) -> Self {
        let path = path.into();
        Self {
            descriptor: MethodDescriptor {
                path: path.trim_start_matches('/').to_string(),
                request_type: std::any::type_name::<Req>(),
                response_type: std::any::type_name::<Res>(),
                stream_type,
                idempotency: Idempotency::Unknown,
            },
            _marker: PhantomData,
        }
    }

    pub fn unary(path: impl Into<String>) -> Self {
        Self::new(path, StreamType::Unary)
    }

    pub fn server_stream(path: impl Into<String>) -> Self {
        Self::new(path, StreamType::ServerStream)
    }

    pub fn client_stream(path: impl Into<String>) -> Self {
        Self::new(path, StreamType::ClientStream)
    }

    pub fn bidi_stream(path: impl Into<String>) -> Self {
        Self::new(path, StreamType::BidiStream)
    }

    pub fn with_idempotency(mut self, idempotency: Idempotency) -> Self {
        self.descriptor.idempotency = idempotency;
        self
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }
}

impl<Req, Res> Clone for MethodSpec<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Req, Res> std::fmt::Debug for MethodSpec<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MethodSpec").field(&self.descriptor).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_spec_normalizes_path() {
        let method = MethodSpec::<u32, String>::unary("/pkg.Svc/Call");
        let d = method.descriptor();
        assert_eq!(d.path, "pkg.Svc/Call");
        assert_eq!(d.request_type, "u32");
        assert_eq!(d.response_type, "alloc::string::String");
        assert_eq!(d.stream_type, StreamType::Unary);
        assert_eq!(d.idempotency, Idempotency::Unknown);
    }

    #[test]
    fn test_stream_type_is_streaming() {
        assert!(!StreamType::Unary.is_streaming());
        assert!(StreamType::ServerStream.is_streaming());
        assert!(StreamType::BidiStream.is_streaming());
    }
}
