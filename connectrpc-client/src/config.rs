//! Client configuration.
//!
//! [`ProtocolClientConfig`] is immutable once built and shared by every call
//! made through a [`ProtocolClient`](crate::ProtocolClient).

use std::sync::Arc;
use std::time::Duration;

use connectrpc_client_core::{BoxedPool, CompressionRegistry, RequestCompression};
use http::HeaderValue;

use crate::codec::Encoding;
use crate::interceptor::Interceptor;
use crate::method::MethodDescriptor;

/// Default `user-agent` sent when the caller supplies none.
pub const DEFAULT_USER_AGENT: &str = concat!("connectrpc-client-rust/", env!("CARGO_PKG_VERSION"));

/// Largest `connect-timeout-ms` value the protocol allows (10 digits).
pub const MAX_TIMEOUT_MS: u128 = 9_999_999_999;

/// When side-effect-free unary calls are sent as HTTP GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GetConfiguration {
    /// Always POST.
    #[default]
    Disabled,
    /// GET when the encoded message is at most `max_message_bytes` long.
    Enabled { max_message_bytes: usize },
    /// GET regardless of size.
    Always,
}

impl GetConfiguration {
    pub fn allows(&self, message_len: usize) -> bool {
        match self {
            GetConfiguration::Disabled => false,
            GetConfiguration::Enabled { max_message_bytes } => message_len <= *max_message_bytes,
            GetConfiguration::Always => true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, GetConfiguration::Disabled)
    }
}

/// Error returned by [`ProtocolClientConfigBuilder::build`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("base URL must start with http:// or https://, got {0:?}")]
    InvalidBaseUrl(String),
    #[error("invalid user agent: {0:?}")]
    InvalidUserAgent(String),
}

/// Settings shared by every call of one client.
#[derive(Clone)]
pub struct ProtocolClientConfig {
    base_url: String,
    encoding: Encoding,
    get_configuration: GetConfiguration,
    request_compression: Option<RequestCompression>,
    compression_registry: CompressionRegistry,
    timeout: Option<Duration>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    user_agent: HeaderValue,
}

impl std::fmt::Debug for ProtocolClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClientConfig")
            .field("base_url", &self.base_url)
            .field("encoding", &self.encoding)
            .field("get_configuration", &self.get_configuration)
            .field("request_compression", &self.request_compression)
            .field("compression_registry", &self.compression_registry)
            .field("timeout", &self.timeout)
            .field("interceptor_count", &self.interceptors.len())
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ProtocolClientConfig {
    pub fn builder<S: Into<String>>(base_url: S) -> ProtocolClientConfigBuilder {
        ProtocolClientConfigBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn get_configuration(&self) -> GetConfiguration {
        self.get_configuration
    }

    pub fn request_compression(&self) -> Option<&RequestCompression> {
        self.request_compression.as_ref()
    }

    pub fn compression_registry(&self) -> &CompressionRegistry {
        &self.compression_registry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn user_agent(&self) -> &HeaderValue {
        &self.user_agent
    }

    /// Absolute URL of a procedure.
    pub fn url_for(&self, descriptor: &MethodDescriptor) -> String {
        format!("{}/{}", self.base_url, descriptor.path)
    }

    /// `connect-timeout-ms` value for the configured timeout.
    ///
    /// `None` when no timeout is set, or when it is zero or too large to
    /// express.
    pub(crate) fn timeout_header(&self) -> Option<HeaderValue> {
        let millis = self.timeout?.as_millis();
        if millis == 0 || millis > MAX_TIMEOUT_MS {
            return None;
        }
        HeaderValue::from_str(&millis.to_string()).ok()
    }
}

/// Builder for [`ProtocolClientConfig`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use connectrpc_client::{GetConfiguration, ProtocolClientConfig};
///
/// let config = ProtocolClientConfig::builder("https://api.example.com")
///     .use_proto()
///     .get_configuration(GetConfiguration::Enabled { max_message_bytes: 4096 })
///     .timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.base_url(), "https://api.example.com");
/// ```
pub struct ProtocolClientConfigBuilder {
    base_url: String,
    encoding: Encoding,
    get_configuration: GetConfiguration,
    request_compression: Option<RequestCompression>,
    compression_registry: CompressionRegistry,
    timeout: Option<Duration>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    user_agent: Option<String>,
}

impl ProtocolClientConfigBuilder {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            encoding: Encoding::Json,
            get_configuration: GetConfiguration::Disabled,
            request_compression: None,
            compression_registry: CompressionRegistry::with_defaults(),
            timeout: None,
            interceptors: Vec::new(),
            user_agent: None,
        }
    }

    /// JSON payloads (the default).
    pub fn use_json(mut self) -> Self {
        self.encoding = Encoding::Json;
        self
    }

    /// Binary protobuf payloads.
    pub fn use_proto(mut self) -> Self {
        self.encoding = Encoding::Proto;
        self
    }

    pub fn get_configuration(mut self, get_configuration: GetConfiguration) -> Self {
        self.get_configuration = get_configuration;
        self
    }

    /// Compress request payloads of at least `min_bytes` with `pool`.
    ///
    /// The pool is also registered for responses.
    pub fn request_compression(mut self, pool: BoxedPool, min_bytes: usize) -> Self {
        self.compression_registry = self.compression_registry.register(pool.clone());
        self.request_compression = Some(RequestCompression::new(pool, min_bytes));
        self
    }

    /// Accept responses compressed with `pool`.
    pub fn accept_compression(mut self, pool: BoxedPool) -> Self {
        self.compression_registry = self.compression_registry.register(pool);
        self
    }

    /// Replace the set of accepted response encodings.
    ///
    /// Defaults to every pool enabled through `compression-*` features.
    pub fn compression_registry(mut self, registry: CompressionRegistry) -> Self {
        self.compression_registry = registry;
        self
    }

    /// Deadline for each call.
    ///
    /// Sent to the server as `connect-timeout-ms` and enforced on the
    /// client by [`ProtocolClient::unary_async`](crate::ProtocolClient::unary_async).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append an interceptor. Interceptors see requests in the order they
    /// were added and responses in reverse.
    pub fn with_interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<ProtocolClientConfig, ConfigError> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(self.base_url));
        }

        let user_agent = match self.user_agent {
            Some(ua) => HeaderValue::from_str(&ua).map_err(|_| ConfigError::InvalidUserAgent(ua))?,
            None => HeaderValue::from_static(DEFAULT_USER_AGENT),
        };

        Ok(ProtocolClientConfig {
            base_url,
            encoding: self.encoding,
            get_configuration: self.get_configuration,
            request_compression: self.request_compression,
            compression_registry: self.compression_registry,
            timeout: self.timeout,
            interceptors: self.interceptors,
            user_agent,
        })
    }
}
