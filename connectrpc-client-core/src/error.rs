//! Connect protocol error codes and the normalized error model.
//!
//! - [`Code`]: protocol status codes
//! - [`ErrorDetail`]: self-describing error details
//! - [`ConnectError`]: the single error value surfaced to callers
//! - [`EnvelopeError`]: envelope framing and compression failures

use std::str::FromStr;

use bytes::Bytes;
use http::HeaderMap;

/// Connect RPC error codes, matching the codes defined in the Connect protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the wire (snake_case) representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// Infer a code from an HTTP status when the body carries no usable
    /// Connect error.
    ///
    /// Follows the Connect protocol's HTTP-to-code table: anything not listed
    /// maps to [`Code::Unknown`].
    ///
    /// ```
    /// use connectrpc_client_core::Code;
    /// use http::StatusCode;
    ///
    /// assert_eq!(Code::from_http_status(StatusCode::NOT_FOUND), Code::Unimplemented);
    /// assert_eq!(Code::from_http_status(StatusCode::IM_A_TEAPOT), Code::Unknown);
    /// ```
    pub fn from_http_status(status: http::StatusCode) -> Code {
        match status.as_u16() {
            200 => Code::Ok,
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 => Code::Unavailable,
            502..=504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl std::fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown error code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Code::Ok),
            "canceled" | "cancelled" => Ok(Code::Canceled),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

/// One entry of a Connect error's `details` list.
///
/// On the wire this is `{"type": "...", "value": "..."}`; the value is kept
/// as opaque payload bytes and never interpreted here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    type_name: String,
    payload: Bytes,
}

impl ErrorDetail {
    pub fn new<S: Into<String>>(type_name: S, payload: impl Into<Bytes>) -> Self {
        Self {
            type_name: type_name.into(),
            payload: payload.into(),
        }
    }

    /// Fully-qualified message type (e.g. `google.rpc.RetryInfo`).
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Envelope framing and compression errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Fewer than five bytes were available for the header.
    #[error("incomplete envelope header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// The header declares more payload than the frame carries.
    #[error("envelope declares {declared} payload bytes but only {available} are available")]
    LengthMismatch { declared: usize, available: usize },

    /// The payload does not fit the 32-bit length field.
    #[error("payload of {len} bytes exceeds the envelope length limit")]
    PayloadTooLarge { len: usize },

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),
}

// ============================================================================
// ConnectError - the normalized error surfaced to callers
// ============================================================================

/// Normalized Connect error.
///
/// Carries the protocol code, an optional human message, ordered details, and
/// any metadata (headers or trailers) that accompanied the failure. Built at
/// protocol boundaries from wire data; builder methods consume `self`, so a
/// finished value is never mutated in place.
///
/// # Example
///
/// ```
/// use connectrpc_client_core::{Code, ConnectError};
///
/// let err = ConnectError::new(Code::NotFound, "user not found")
///     .add_detail("google.rpc.ErrorInfo", vec![1, 2, 3]);
///
/// assert_eq!(err.code(), Code::NotFound);
/// assert_eq!(err.message(), Some("user not found"));
/// assert_eq!(err.details().len(), 1);
/// assert_eq!(err.to_string(), "not_found: user not found");
/// ```
#[derive(Clone, Debug)]
pub struct ConnectError {
    code: Code,
    message: Option<String>,
    details: Vec<ErrorDetail>,
    metadata: HeaderMap,
}

impl ConnectError {
    /// Create a new error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: Vec::new(),
            metadata: HeaderMap::new(),
        }
    }

    /// Create a new error with just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: Vec::new(),
            metadata: HeaderMap::new(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Headers or trailers that accompanied the error.
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Add an error detail with a type name and opaque payload.
    pub fn add_detail<S: Into<String>>(mut self, type_name: S, payload: impl Into<Bytes>) -> Self {
        self.details.push(ErrorDetail::new(type_name, payload));
        self
    }

    /// Add a pre-constructed [`ErrorDetail`].
    pub fn add_error_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Replace the metadata attached to this error.
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Re-tag the error with a different code, keeping everything else.
    pub fn with_code(mut self, code: Code) -> Self {
        self.code = code;
        self
    }

    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectError {}

impl From<EnvelopeError> for ConnectError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Compression(_) => ConnectError::internal(err.to_string()),
            EnvelopeError::PayloadTooLarge { .. } => {
                ConnectError::new(Code::ResourceExhausted, err.to_string())
            }
            _ => ConnectError::unknown(err.to_string()),
        }
    }
}
