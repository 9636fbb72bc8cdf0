//! End-to-end calls against an in-process echo transport.
//!
//! The transport replays request bodies as responses. Streamed frames are
//! written to a byte buffer and read back in small chunks, so the client
//! only ever sees frames reassembled by `EnvelopeBuffer`.

use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use connectrpc_client::{
    BoxedPool, CancelHandle, Code, EnvelopeBuffer, GzipPool, HeaderMap, HeaderValue,
    HttpRequest, HttpResponse, HttpTransport, Idempotency, MethodSpec, ProtocolClient,
    ProtocolClientConfig, ResponseMessage, StatusCode, StreamCallback, StreamResult,
    TransportStream, UnaryCallback,
};
use futures::StreamExt;

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
struct Echo {
    #[prost(string, tag = "1")]
    text: String,
    #[prost(int32, tag = "2")]
    #[serde(default)]
    count: i32,
}

fn echo(text: &str) -> Echo {
    Echo {
        text: text.to_string(),
        count: 0,
    }
}

#[derive(Default)]
struct EchoTransport {
    requests: Mutex<Vec<HttpRequest>>,
}

impl HttpTransport for EchoTransport {
    fn unary(&self, request: HttpRequest, on_result: UnaryCallback) -> CancelHandle {
        let body = match &request.body {
            Some(body) => body.clone(),
            None => query_message(&request.url),
        };
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_str(&request.content_type).unwrap());
        if let Some(encoding) = request.headers.get("content-encoding") {
            headers.insert("content-encoding", encoding.clone());
        }
        headers.insert("trailer-echo-method", HeaderValue::from_str(request.method.as_str()).unwrap());
        self.requests.lock().unwrap().push(request);
        on_result(HttpResponse::new(StatusCode::OK, headers, body));
        CancelHandle::noop()
    }

    fn stream(&self, request: HttpRequest, on_result: StreamCallback) -> Arc<dyn TransportStream> {
        let mut headers = HeaderMap::new();
        if let Some(encoding) = request.headers.get("connect-content-encoding") {
            headers.insert("connect-content-encoding", encoding.clone());
        }
        self.requests.lock().unwrap().push(request);
        on_result(StreamResult::Headers(headers));
        Arc::new(EchoStream {
            on_result,
            wire: Mutex::new(EnvelopeBuffer::new()),
        })
    }
}

fn query_message(url: &str) -> Bytes {
    let (_, query) = url.split_once('?').unwrap();
    let message = query
        .split('&')
        .find_map(|param| param.strip_prefix("message="))
        .unwrap();
    URL_SAFE_NO_PAD.decode(message).unwrap().into()
}

struct EchoStream {
    on_result: StreamCallback,
    wire: Mutex<EnvelopeBuffer>,
}

impl EchoStream {
    /// Feed `bytes` through the buffer three bytes at a time.
    fn replay(&self, bytes: &[u8]) {
        for chunk in bytes.chunks(3) {
            let frames: Vec<Bytes> = {
                let mut wire = self.wire.lock().unwrap();
                wire.push(chunk);
                std::iter::from_fn(|| wire.next_frame()).collect()
            };
            for frame in frames {
                (self.on_result)(StreamResult::Message(frame));
            }
        }
    }
}

impl TransportStream for EchoStream {
    fn send(&self, frame: Bytes) -> Result<(), connectrpc_client::ConnectError> {
        self.replay(&frame);
        Ok(())
    }

    fn send_close(&self) {
        let trailers = br#"{"metadata":{"echo-done":["true"]}}"#;
        let mut frame = vec![0x02];
        frame.extend_from_slice(&(trailers.len() as u32).to_be_bytes());
        frame.extend_from_slice(trailers);
        self.replay(&frame);
    }

    fn receive_close(&self) {}
}

fn client(config: ProtocolClientConfig) -> (Arc<EchoTransport>, ProtocolClient) {
    let transport = Arc::new(EchoTransport::default());
    let client = ProtocolClient::with_transport(transport.clone(), config);
    (transport, client)
}

#[tokio::test]
async fn unary_round_trip_with_gzip() {
    let config = ProtocolClientConfig::builder("http://echo.local/")
        .request_compression(BoxedPool::new(GzipPool::default()), 0)
        .build()
        .unwrap();
    let (transport, client) = client(config);
    let method = MethodSpec::<Echo, Echo>::unary("echo.v1.EchoService/Say");

    let response = client
        .unary_async(&method, &echo("hello"), HeaderMap::new())
        .await;

    match response {
        ResponseMessage::Success {
            message, trailers, ..
        } => {
            assert_eq!(message.text, "hello");
            assert_eq!(trailers.get("echo-method").unwrap(), "POST");
        }
        ResponseMessage::Failure { error, .. } => panic!("call failed: {error}"),
    }

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[0].url, "http://echo.local/echo.v1.EchoService/Say");
    assert_eq!(requests[0].headers.get("content-encoding").unwrap(), "gzip");
    assert_eq!(requests[0].headers.get("connect-protocol-version").unwrap(), "1");
}

#[tokio::test]
async fn unary_round_trip_with_proto() {
    let config = ProtocolClientConfig::builder("http://echo.local")
        .use_proto()
        .build()
        .unwrap();
    let (_, client) = client(config);
    let method = MethodSpec::<Echo, Echo>::unary("echo.v1.EchoService/Say");
    let request = Echo {
        text: "binary".to_string(),
        count: 7,
    };

    let message = client
        .unary_async(&method, &request, HeaderMap::new())
        .await
        .into_result()
        .unwrap();
    assert_eq!(message, request);
}

#[test]
fn get_requests_carry_the_message_in_the_query() {
    let config = ProtocolClientConfig::builder("http://echo.local")
        .get_configuration(connectrpc_client::GetConfiguration::Enabled {
            max_message_bytes: 1024,
        })
        .build()
        .unwrap();
    let (transport, client) = client(config);
    let method = MethodSpec::<Echo, Echo>::unary("echo.v1.EchoService/Lookup")
        .with_idempotency(Idempotency::NoSideEffects);

    let result = client
        .unary_blocking(&method, &echo("cached"), HeaderMap::new())
        .execute();

    assert_eq!(result.into_result().unwrap().text, "cached");
    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[0].method, http::Method::GET);
    assert!(requests[0].body.is_none());
    assert!(requests[0].url.starts_with(
        "http://echo.local/echo.v1.EchoService/Lookup?base64=1&connect=v1&encoding=json&message="
    ));
}

#[tokio::test]
async fn bidi_stream_round_trip_with_gzip() {
    let config = ProtocolClientConfig::builder("http://echo.local")
        .request_compression(BoxedPool::new(GzipPool::default()), 0)
        .build()
        .unwrap();
    let (transport, client) = client(config);
    let method = MethodSpec::<Echo, Echo>::bidi_stream("echo.v1.EchoService/Chat");

    let stream = client.stream(&method, HeaderMap::new());
    let (sender, mut responses) = stream.split();
    for text in ["one", "two", "three"] {
        sender.send(&echo(text)).unwrap();
    }
    sender.close();

    let mut received = Vec::new();
    while let Some(item) = responses.next().await {
        received.push(item.unwrap().text);
    }
    assert_eq!(received, ["one", "two", "three"]);
    assert_eq!(responses.trailers().unwrap().get("echo-done").unwrap(), "true");

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[0].content_type, "application/connect+json");
    assert_eq!(requests[0].headers.get("connect-content-encoding").unwrap(), "gzip");
}

#[tokio::test]
async fn client_stream_requires_a_single_response() {
    let (_, client) = client(ProtocolClientConfig::builder("http://echo.local").build().unwrap());
    let method = MethodSpec::<Echo, Echo>::client_stream("echo.v1.EchoService/Collect");

    let stream = client.client_stream(&method, HeaderMap::new());
    stream.send(&echo("only")).unwrap();
    let single = stream.receive_and_close().await;
    assert_eq!(single.into_result().unwrap().text, "only");

    let stream = client.client_stream(&method, HeaderMap::new());
    stream.send(&echo("a")).unwrap();
    stream.send(&echo("b")).unwrap();
    assert_eq!(stream.receive_and_close().await.code(), Code::Unimplemented);
}

#[tokio::test]
async fn server_stream_yields_the_echoed_request() {
    let (_, client) = client(ProtocolClientConfig::builder("http://echo.local").build().unwrap());
    let method = MethodSpec::<Echo, Echo>::server_stream("echo.v1.EchoService/Repeat");

    let stream = client.server_stream(&method, &echo("ping"), HeaderMap::new());
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap().text, "ping");
}
