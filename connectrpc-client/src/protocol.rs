//! Connect protocol transform.
//!
//! [`ConnectInterceptor`] turns the abstract request built by the client into
//! Connect wire form, and normalizes what comes back: trailers, compression,
//! envelopes and error payloads. It always sits last in the chain, closest
//! to the transport.

mod get;

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use connectrpc_client_core::{
    BoxedPool, ConnectError, EnvelopeError, is_compressed, is_end_stream, pack, parse_end_stream,
    parse_unary_error, unpack,
};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::config::ProtocolClientConfig;
use crate::interceptor::{Interceptor, StreamFunction, UnaryFunction};
use crate::method::Idempotency;
use crate::request::HttpRequest;
use crate::response::{HttpResponse, StreamResult};

/// Connect protocol header names.
pub mod headers {
    pub const CONNECT_PROTOCOL_VERSION: &str = "connect-protocol-version";
    pub const CONNECT_TIMEOUT_MS: &str = "connect-timeout-ms";
    pub const CONNECT_CONTENT_ENCODING: &str = "connect-content-encoding";
    pub const CONNECT_ACCEPT_ENCODING: &str = "connect-accept-encoding";
    /// Prefix carrying unary trailers inline with the headers.
    pub const TRAILER_PREFIX: &str = "trailer-";
    pub const PROTOCOL_VERSION: &str = "1";
}

use headers::*;

/// The interceptor implementing the Connect protocol.
#[derive(Clone)]
pub struct ConnectInterceptor {
    config: Arc<ProtocolClientConfig>,
    accept_encoding: Option<HeaderValue>,
}

impl std::fmt::Debug for ConnectInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectInterceptor")
            .field("accept_encoding", &self.accept_encoding)
            .finish()
    }
}

impl ConnectInterceptor {
    pub fn new(config: Arc<ProtocolClientConfig>) -> Self {
        let accept_encoding = config
            .compression_registry()
            .accept_header_value()
            .and_then(|v| HeaderValue::from_str(&v).ok());
        Self {
            config,
            accept_encoding,
        }
    }

    /// Headers common to unary and streaming requests.
    fn base_headers(&self, caller: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(caller.len() + 4);
        headers.insert(
            CONNECT_PROTOCOL_VERSION,
            HeaderValue::from_static(PROTOCOL_VERSION),
        );
        for name in caller.keys() {
            if name == CONNECT_PROTOCOL_VERSION {
                continue;
            }
            for value in caller.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.config.user_agent().clone());
        }
        if let Some(timeout) = self.config.timeout_header() {
            headers.insert(CONNECT_TIMEOUT_MS, timeout);
        }
        headers
    }

    fn unary_request(&self, request: HttpRequest) -> Result<HttpRequest, ConnectError> {
        let mut headers = self.base_headers(&request.headers);
        if let Some(accept) = &self.accept_encoding {
            headers.insert(ACCEPT_ENCODING, accept.clone());
        }

        let mut body = request.body.clone().unwrap_or_default();
        let mut compression = None;
        if let Some(c) = self.config.request_compression() {
            if c.should_compress(body.len()) {
                let compressed = c.pool.compress(&body).map_err(ConnectError::from)?;
                debug!(
                    procedure = %request.descriptor.path,
                    encoding = c.pool.name(),
                    raw = body.len(),
                    compressed = compressed.len(),
                    "compressed unary request"
                );
                body = compressed;
                compression = Some(c.pool.name());
                headers.insert(CONTENT_ENCODING, encoding_header(&c.pool)?);
            }
        }

        let get_eligible = request.descriptor.idempotency == Idempotency::NoSideEffects
            && self.config.get_configuration().allows(body.len());

        let request = HttpRequest {
            headers,
            body: Some(body),
            ..request
        };

        if get_eligible {
            debug!(procedure = %request.descriptor.path, "sending unary request as GET");
            Ok(get::into_get_request(
                request,
                compression,
                self.config.encoding().encoding_name(),
            ))
        } else {
            Ok(request)
        }
    }

    fn unary_response(&self, response: HttpResponse) -> HttpResponse {
        let HttpResponse {
            status,
            headers,
            trailers: transport_trailers,
            body,
            cause,
            tracing_info,
        } = response;

        let (headers, mut trailers) = split_trailers(headers);
        for (name, value) in &transport_trailers {
            trailers.append(name.clone(), value.clone());
        }

        let mut normalized = HttpResponse {
            status,
            headers,
            trailers,
            body: Bytes::new(),
            cause: None,
            tracing_info,
        };

        // A transport failure is already typed; only its metadata is normalized.
        if let Some(cause) = cause {
            normalized.body = body;
            normalized.cause = Some(cause);
            return normalized;
        }

        let decoded = resolve_pool(&self.config, normalized.headers.get(CONTENT_ENCODING))
            .and_then(|pool| match pool {
                Some(pool) => pool
                    .decompress(&body)
                    .map_err(|e| ConnectError::internal(e.to_string())),
                None => Ok(body.clone()),
            });

        if status != StatusCode::OK {
            let err = match &decoded {
                Ok(decoded) => parse_unary_error(decoded, status),
                Err(decode_err) => {
                    debug!(error = %decode_err, "parsing error body without decompression");
                    parse_unary_error(&body, status)
                }
            };
            debug!(http_status = %status, code = %err.code(), "unary call failed");
            return fail(normalized, err);
        }

        match decoded {
            Ok(body) => {
                normalized.body = body;
                normalized
            }
            Err(err) => fail(normalized, err),
        }
    }

    fn stream_request(&self, request: HttpRequest) -> Result<HttpRequest, ConnectError> {
        let mut headers = self.base_headers(&request.headers);
        if let Some(accept) = &self.accept_encoding {
            headers.insert(CONNECT_ACCEPT_ENCODING, accept.clone());
        }
        if let Some(c) = self.config.request_compression() {
            headers.insert(CONNECT_CONTENT_ENCODING, encoding_header(&c.pool)?);
        }
        Ok(HttpRequest { headers, ..request })
    }

    fn stream_request_body(&self, message: Bytes) -> Result<Bytes, ConnectError> {
        pack(message, self.config.request_compression()).map_err(ConnectError::from)
    }

    fn stream_result(
        &self,
        response_pool: &OnceLock<Option<BoxedPool>>,
        result: StreamResult<Bytes>,
    ) -> StreamResult<Bytes> {
        match result {
            StreamResult::Headers(headers) => {
                let (headers, _) = split_trailers(headers);
                match resolve_pool(&self.config, headers.get(CONNECT_CONTENT_ENCODING)) {
                    Ok(pool) => {
                        if response_pool.set(pool).is_err() {
                            warn!("ignoring repeated stream headers for response encoding");
                        }
                        StreamResult::Headers(headers)
                    }
                    Err(err) => StreamResult::failed(err.with_metadata(headers)),
                }
            }
            StreamResult::Message(frame) => {
                let pool = response_pool.get().and_then(Option::as_ref);
                match unpack(frame, pool) {
                    Ok((flags, _)) if is_compressed(flags) && pool.is_none() => StreamResult::failed(
                        ConnectError::internal("received compressed message without a negotiated encoding"),
                    ),
                    Ok((flags, payload)) if is_end_stream(flags) => {
                        let end = parse_end_stream(&payload);
                        debug!(code = %end.code, "stream end received");
                        StreamResult::Complete {
                            code: end.code,
                            error: end.error,
                            trailers: end.trailers,
                        }
                    }
                    Ok((_, payload)) => StreamResult::Message(payload),
                    Err(err @ EnvelopeError::Decompression(_)) => {
                        StreamResult::failed(ConnectError::internal(err.to_string()))
                    }
                    Err(err) => StreamResult::failed(ConnectError::unknown(err.to_string())),
                }
            }
            complete @ StreamResult::Complete { .. } => complete,
        }
    }
}

impl Interceptor for ConnectInterceptor {
    fn unary_function(&self) -> UnaryFunction {
        let request = self.clone();
        let response = self.clone();
        UnaryFunction::new(
            move |r| request.unary_request(r),
            move |r| response.unary_response(r),
        )
    }

    fn stream_function(&self) -> StreamFunction {
        let request = self.clone();
        let body = self.clone();
        let result = self.clone();
        let response_pool = OnceLock::new();
        StreamFunction::new(
            move |r| request.stream_request(r),
            move |m| body.stream_request_body(m),
            move |r| result.stream_result(&response_pool, r),
        )
    }
}

fn fail(mut response: HttpResponse, err: ConnectError) -> HttpResponse {
    let mut metadata = response.headers.clone();
    for (name, value) in &response.trailers {
        metadata.append(name.clone(), value.clone());
    }
    response.cause = Some(err.with_metadata(metadata));
    response
}

fn encoding_header(pool: &BoxedPool) -> Result<HeaderValue, ConnectError> {
    HeaderValue::from_str(pool.name())
        .map_err(|_| ConnectError::internal(format!("invalid encoding name {:?}", pool.name())))
}

fn resolve_pool(
    config: &ProtocolClientConfig,
    encoding: Option<&HeaderValue>,
) -> Result<Option<BoxedPool>, ConnectError> {
    let encoding = match encoding.map(HeaderValue::to_str) {
        None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(_)) => {
            return Err(ConnectError::internal("response encoding is not valid text"));
        }
    };
    config
        .compression_registry()
        .resolve(encoding)
        .map_err(|name| ConnectError::internal(format!("unsupported response encoding {name:?}")))
}

/// Move `trailer-` prefixed headers into a separate map, prefix stripped.
fn split_trailers(headers: HeaderMap) -> (HeaderMap, HeaderMap) {
    let mut visible = HeaderMap::with_capacity(headers.len());
    let mut trailers = HeaderMap::new();
    for (name, value) in &headers {
        match name.as_str().strip_prefix(TRAILER_PREFIX) {
            Some(stripped) => match HeaderName::from_bytes(stripped.as_bytes()) {
                Ok(stripped) => {
                    trailers.append(stripped, value.clone());
                }
                Err(_) => warn!(header = %name, "dropping trailer with empty name"),
            },
            None => {
                visible.append(name.clone(), value.clone());
            }
        }
    }
    (visible, trailers)
}
