//! GET encoding for side-effect-free unary calls.
//!
//! The message moves into the query string so the request is cacheable:
//!
//! ```text
//! GET /pkg.Service/Method?base64=1&compression=gzip&connect=v1&encoding=proto&message=<base64url>
//! ```

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::Method;
use http::header::CONTENT_ENCODING;

use crate::request::HttpRequest;

/// Rewrite a POST request carrying `request.body` into its GET form.
///
/// Parameters are sorted by their full `key=value` text so equal requests
/// always produce the same URL.
pub(super) fn into_get_request(
    mut request: HttpRequest,
    compression: Option<&str>,
    encoding: &str,
) -> HttpRequest {
    let body = request.body.take().unwrap_or_default();

    let mut params = vec![
        format!("message={}", URL_SAFE_NO_PAD.encode(&body)),
        "base64=1".to_string(),
        format!("encoding={encoding}"),
        "connect=v1".to_string(),
    ];
    if let Some(compression) = compression {
        params.push(format!("compression={compression}"));
    }
    params.sort();

    request.url = format!("{}?{}", request.url, params.join("&"));
    request.method = Method::GET;
    request.content_type = format!("application/{encoding}");
    request.headers.remove(CONTENT_ENCODING);
    request
}
