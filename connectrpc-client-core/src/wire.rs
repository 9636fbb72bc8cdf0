//! JSON error and end-of-stream payloads.
//!
//! Unary error body (non-200 responses):
//!
//! ```json
//! {"code": "not_found", "message": "no such user", "details": [{"type": "...", "value": "..."}]}
//! ```
//!
//! End-of-stream frame payload:
//!
//! ```json
//! {"error": {"code": "...", "message": "..."}, "metadata": {"key": ["v1", "v2"]}}
//! ```
//!
//! Parsing never fails outward: malformed input becomes a typed
//! [`ConnectError`].

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::error::{Code, ConnectError, ErrorDetail};

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<WireDetail>,
}

#[derive(Debug, Deserialize)]
struct WireDetail {
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEndStream {
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, MetadataValue>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetadataValue {
    One(String),
    Many(Vec<String>),
}

/// Outcome of an end-of-stream frame.
#[derive(Debug, Clone)]
pub struct EndStream {
    pub code: Code,
    pub error: Option<ConnectError>,
    pub trailers: HeaderMap,
}

impl EndStream {
    fn failed(error: ConnectError) -> Self {
        Self {
            code: error.code(),
            error: Some(error),
            trailers: HeaderMap::new(),
        }
    }
}

/// Parse a unary error body.
///
/// The body's `code` wins when present and recognised; otherwise the code is
/// inferred from `status`. An unparsable body keeps the parse failure as the
/// message.
pub fn parse_unary_error(body: &[u8], status: StatusCode) -> ConnectError {
    let fallback = Code::from_http_status(status);
    if body.is_empty() {
        let reason = status.canonical_reason().unwrap_or("unknown error");
        return ConnectError::new(fallback, reason);
    }

    match serde_json::from_slice::<WireError>(body) {
        Ok(wire) => wire_to_error(wire, fallback),
        Err(e) => ConnectError::new(fallback, format!("malformed error body: {e}")),
    }
}

/// Parse the payload of an end-of-stream frame.
///
/// A missing `error` (or one without a `code`) is success. `metadata`
/// entries become trailers under lower-cased keys and are also attached to
/// the error, if any.
pub fn parse_end_stream(payload: &[u8]) -> EndStream {
    let wire: WireEndStream = match serde_json::from_slice(payload) {
        Ok(wire) => wire,
        Err(e) => {
            return EndStream::failed(ConnectError::unknown(format!(
                "malformed end-of-stream payload: {e}"
            )));
        }
    };

    let trailers = wire.metadata.map(metadata_to_headers).unwrap_or_default();

    let error = wire
        .error
        .filter(|e| e.code.is_some())
        .map(|e| wire_to_error(e, Code::Unknown))
        .filter(|e| e.code() != Code::Ok)
        .map(|e| e.with_metadata(trailers.clone()));

    EndStream {
        code: error.as_ref().map_or(Code::Ok, ConnectError::code),
        error,
        trailers,
    }
}

fn wire_to_error(wire: WireError, fallback: Code) -> ConnectError {
    let code = wire
        .code
        .as_deref()
        .map(|c| c.parse().unwrap_or(Code::Unknown))
        .unwrap_or(fallback);

    let mut err = match wire.message {
        Some(message) => ConnectError::new(code, message),
        None => ConnectError::from_code(code),
    };
    for detail in wire.details {
        if let Some(detail) = decode_detail(detail) {
            err = err.add_error_detail(detail);
        }
    }
    err
}

fn decode_detail(detail: WireDetail) -> Option<ErrorDetail> {
    let type_name = detail.type_name?;
    let payload = match detail.value {
        None => Bytes::new(),
        Some(value) => STANDARD_NO_PAD
            .decode(&value)
            .or_else(|_| STANDARD.decode(&value))
            .map(Bytes::from)
            .unwrap_or_else(|_| Bytes::from(value.into_bytes())),
    };
    Some(ErrorDetail::new(type_name, payload))
}

fn metadata_to_headers(metadata: BTreeMap<String, MetadataValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in metadata {
        let name = match HeaderName::from_bytes(key.to_ascii_lowercase().as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                warn!(key = %key, "dropping end-of-stream metadata with invalid key");
                continue;
            }
        };
        let values = match value {
            MetadataValue::One(v) => vec![v],
            MetadataValue::Many(vs) => vs,
        };
        for v in values {
            match HeaderValue::from_str(&v) {
                Ok(v) => {
                    headers.append(name.clone(), v);
                }
                Err(_) => warn!(key = %name, "dropping end-of-stream metadata with invalid value"),
            }
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_error_wire_code_wins() {
        let body = br#"{"code":"not_found","message":"no such user"}"#;
        let err = parse_unary_error(body, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("no such user"));
    }

    #[test]
    fn test_unary_error_falls_back_to_status() {
        let err = parse_unary_error(br#"{"message":"nope"}"#, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), Code::Unauthenticated);
        assert_eq!(err.message(), Some("nope"));

        let err = parse_unary_error(b"", StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.message(), Some("Service Unavailable"));
    }

    #[test]
    fn test_unary_error_malformed_json() {
        let err = parse_unary_error(b"<html>bad gateway</html>", StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), Code::Unknown);
        assert!(err.message().unwrap().starts_with("malformed error body"));
    }

    #[test]
    fn test_unary_error_unknown_code_string() {
        let err = parse_unary_error(br#"{"code":"exploded"}"#, StatusCode::NOT_FOUND);
        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(err.message(), None);
    }

    #[test]
    fn test_details_decoding() {
        let body = br#"{
            "code": "invalid_argument",
            "details": [
                {"type": "a.Unpadded", "value": "AQID"},
                {"type": "a.Padded", "value": "AQIDBA=="},
                {"type": "a.Raw", "value": "not base64!"},
                {"type": "a.Empty"},
                {"value": "AQID"}
            ]
        }"#;
        let err = parse_unary_error(body, StatusCode::BAD_REQUEST);
        let details = err.details();
        assert_eq!(details.len(), 4);
        assert_eq!(details[0].payload().as_ref(), &[1, 2, 3]);
        assert_eq!(details[1].payload().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(details[2].payload().as_ref(), b"not base64!");
        assert_eq!(details[3].type_name(), "a.Empty");
        assert!(details[3].payload().is_empty());
    }

    #[test]
    fn test_end_stream_success_with_metadata() {
        let end = parse_end_stream(br#"{"metadata":{"X-Total":"3","Multi":["a","b"]}}"#);
        assert_eq!(end.code, Code::Ok);
        assert!(end.error.is_none());
        assert_eq!(end.trailers.get("x-total").unwrap(), "3");
        let multi: Vec<_> = end.trailers.get_all("multi").iter().collect();
        assert_eq!(multi, vec!["a", "b"]);
    }

    #[test]
    fn test_end_stream_empty_object_is_success() {
        let end = parse_end_stream(b"{}");
        assert_eq!(end.code, Code::Ok);
        assert!(end.error.is_none());
        assert!(end.trailers.is_empty());
    }

    #[test]
    fn test_end_stream_error_without_code_is_success() {
        let end = parse_end_stream(br#"{"error":{"message":"ignored"}}"#);
        assert_eq!(end.code, Code::Ok);
        assert!(end.error.is_none());
    }

    #[test]
    fn test_end_stream_error_carries_trailers() {
        let end = parse_end_stream(
            br#"{"error":{"code":"resource_exhausted","message":"slow down"},"metadata":{"Retry-After":["5"]}}"#,
        );
        assert_eq!(end.code, Code::ResourceExhausted);
        let err = end.error.unwrap();
        assert_eq!(err.message(), Some("slow down"));
        assert_eq!(err.metadata().get("retry-after").unwrap(), "5");
        assert_eq!(end.trailers.get("retry-after").unwrap(), "5");
    }

    #[test]
    fn test_end_stream_malformed_json() {
        let end = parse_end_stream(b"{not json");
        assert_eq!(end.code, Code::Unknown);
        assert!(
            end.error
                .unwrap()
                .message()
                .unwrap()
                .starts_with("malformed end-of-stream payload")
        );
    }
}
