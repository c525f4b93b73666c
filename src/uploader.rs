use crate::{
    diagnostics::{Diagnostic, Diagnostics},
    models::Envelope,
    Error,
};
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use http::{HeaderMap, Request, Response, StatusCode, Uri};
use opentelemetry_http::{HttpClient, HttpError};
use serde::Deserialize;
use std::{
    io::Write,
    time::{Duration, SystemTime},
};

const STATUS_OK: u16 = 200;
const STATUS_PARTIAL_CONTENT: u16 = 206;
const STATUS_BAD_REQUEST: u16 = 400;
const STATUS_REQUEST_TIMEOUT: u16 = 408;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const STATUS_APPLICATION_INACTIVE: u16 = 439; // Quota
const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;
const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transmission {
    items_received: usize,
    items_accepted: usize,
    #[serde(default)]
    errors: Vec<TransmissionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransmissionItem {
    index: usize,
    status_code: u16,
    #[serde(default)]
    message: String,
}

/// Result of sending one batch.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Every sent envelope was accepted.
    Success { accepted: usize },
    /// Some envelopes were rejected. `retry` holds indices into the batch of the ones worth
    /// sending again, in batch order.
    PartialSuccess {
        accepted: usize,
        retry: Vec<usize>,
        rejected: usize,
        retry_after: Option<Duration>,
    },
    /// The endpoint asked for a pause. The whole batch is sent again afterwards.
    Throttled { retry_after: Option<Duration> },
    /// Transport failure or server error. The whole batch is sent again after a backoff, or after
    /// `retry_after` when that is longer.
    Retry {
        error: Error,
        retry_after: Option<Duration>,
    },
    /// The batch will never be accepted.
    Permanent { error: Error },
}

/// Newline-delimited JSON of a batch.
#[derive(Debug)]
pub(crate) struct EncodedBatch {
    pub(crate) body: Vec<u8>,
    /// For every line of `body`, the index of its envelope in the batch.
    pub(crate) lines: Vec<usize>,
}

/// Serializes a batch. Envelopes that fail to serialize are skipped and reported.
pub(crate) fn encode(items: &[Envelope], diagnostics: &Diagnostics) -> EncodedBatch {
    let mut body = Vec::new();
    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match serde_json::to_vec(item) {
            Ok(mut line) => {
                if !lines.is_empty() {
                    body.push(b'\n');
                }
                body.append(&mut line);
                lines.push(index);
            }
            Err(err) => diagnostics.emit(Diagnostic::EncodingFailed {
                error: Error::UploadSerializeRequest(err),
            }),
        }
    }
    EncodedBatch { body, lines }
}

fn compress(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut gzip_encoder = GzEncoder::new(Vec::new(), Compression::default());
    gzip_encoder
        .write_all(body)
        .map_err(Error::UploadCompressRequest)?;
    gzip_encoder.finish().map_err(Error::UploadCompressRequest)
}

/// Sends a batch of telemetry items to the server.
pub(crate) async fn send<C: HttpClient + ?Sized>(
    client: &C,
    endpoint: &Uri,
    items: &[Envelope],
    diagnostics: &Diagnostics,
) -> Outcome {
    let encoded = encode(items, diagnostics);
    if encoded.lines.is_empty() {
        return Outcome::Success { accepted: 0 };
    }

    let mut request = Request::post(endpoint)
        .header(http::header::CONTENT_TYPE, "application/x-json-stream");
    let body = match compress(&encoded.body) {
        Ok(compressed) if compressed.len() < encoded.body.len() => {
            request = request.header(http::header::CONTENT_ENCODING, "gzip");
            compressed
        }
        Ok(_) => encoded.body,
        Err(err) => {
            tracing::debug!(error = %err, "sending uncompressed telemetry");
            encoded.body
        }
    };
    let request = match request.body(Bytes::from(body)) {
        Ok(request) => request,
        Err(err) => {
            return Outcome::Permanent {
                error: Error::UploadConnection(err.into()),
            }
        }
    };

    match client.send_bytes(request).await {
        Ok(response) => handle_response(response, &encoded.lines),
        Err(err) => match error_status(&err) {
            Some(status) => {
                tracing::debug!(%status, "recovered response status from client error");
                let mut response = Response::new(Bytes::new());
                *response.status_mut() = status;
                handle_response(response, &encoded.lines)
            }
            None => Outcome::Retry {
                error: Error::UploadConnection(err),
                retry_after: None,
            },
        },
    }
}

/// Status of a response the client reported as an error. The `HttpClient` impl of
/// `reqwest::Client` does this for every 4xx and 5xx response.
#[cfg(any(feature = "reqwest-client", feature = "reqwest-client-rustls"))]
fn error_status(err: &HttpError) -> Option<StatusCode> {
    err.downcast_ref::<reqwest::Error>()?.status()
}

#[cfg(not(any(feature = "reqwest-client", feature = "reqwest-client-rustls")))]
fn error_status(_err: &HttpError) -> Option<StatusCode> {
    None
}

fn handle_response(response: Response<Bytes>, lines: &[usize]) -> Outcome {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers(), SystemTime::now());
    match status {
        STATUS_OK | STATUS_PARTIAL_CONTENT => {
            let content = match serde_json::from_slice::<Transmission>(response.body()) {
                Ok(content) => content,
                // Nothing to look into. Everything was received.
                Err(_) if status == STATUS_OK => {
                    return Outcome::Success {
                        accepted: lines.len(),
                    }
                }
                Err(err) => {
                    return Outcome::Permanent {
                        error: Error::UploadDeserializeResponse(err),
                    }
                }
            };
            if content.errors.is_empty() && content.items_received == content.items_accepted {
                return Outcome::Success {
                    accepted: content.items_accepted,
                };
            }
            let mut retry = Vec::new();
            let mut rejected = 0;
            for item in &content.errors {
                match lines.get(item.index) {
                    Some(index) if can_retry_item(item) => retry.push(*index),
                    _ => {
                        tracing::debug!(
                            index = item.index,
                            status_code = item.status_code,
                            message = %item.message,
                            "telemetry item rejected"
                        );
                        rejected += 1;
                    }
                }
            }
            retry.sort_unstable();
            retry.dedup();
            Outcome::PartialSuccess {
                accepted: content.items_accepted,
                retry,
                rejected,
                retry_after,
            }
        }
        STATUS_TOO_MANY_REQUESTS | STATUS_APPLICATION_INACTIVE => {
            Outcome::Throttled { retry_after }
        }
        STATUS_REQUEST_TIMEOUT => Outcome::Retry {
            error: Error::Upload {
                status_code: status,
                can_retry: true,
            },
            retry_after,
        },
        status if status >= STATUS_INTERNAL_SERVER_ERROR => Outcome::Retry {
            error: Error::Upload {
                status_code: status,
                can_retry: true,
            },
            retry_after,
        },
        status => {
            if status >= STATUS_BAD_REQUEST {
                tracing::debug!(
                    status,
                    body = %String::from_utf8_lossy(response.body()),
                    "telemetry batch rejected"
                );
            }
            Outcome::Permanent {
                error: Error::Upload {
                    status_code: status,
                    can_retry: false,
                },
            }
        }
    }
}

/// Determines that a telemetry item can be re-send corresponding to this submission status
/// descriptor.
fn can_retry_item(item: &TransmissionItem) -> bool {
    item.status_code == STATUS_REQUEST_TIMEOUT
        || item.status_code == STATUS_TOO_MANY_REQUESTS
        || item.status_code == STATUS_INTERNAL_SERVER_ERROR
        || item.status_code == STATUS_SERVICE_UNAVAILABLE
}

/// `Retry-After` as delay seconds or HTTP date, relative to `now`.
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    Some(date.duration_since(now).unwrap_or(Duration::ZERO))
}

pub(crate) fn append_path(uri: impl ToString, path: &str) -> Result<Uri, http::uri::InvalidUri> {
    let mut uri = uri.to_string();
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri.push_str(path);
    uri.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sampling::tests::envelope, tag_keys};
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use std::{io::Read, sync::Mutex};
    use test_case::test_case;

    #[derive(Debug)]
    struct StaticClient {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: &'static str,
        requests: Mutex<Vec<Request<Bytes>>>,
    }

    impl StaticClient {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for StaticClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            self.requests.lock().unwrap().push(request);
            let mut response = Response::builder().status(self.status);
            for (name, value) in &self.headers {
                response = response.header(*name, value.as_str());
            }
            Ok(response.body(Bytes::from_static(self.body.as_bytes()))?)
        }
    }

    #[derive(Debug)]
    struct FailingClient;

    #[async_trait]
    impl HttpClient for FailingClient {
        async fn send_bytes(&self, _: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            Err("connection refused".into())
        }
    }

    fn batch(len: usize) -> Vec<Envelope> {
        (0..len)
            .map(|i| envelope("Event", Some(&format!("op-{}", i))))
            .collect()
    }

    fn endpoint() -> Uri {
        "https://in.example/v2.1/track".parse().unwrap()
    }

    async fn send_to(client: &StaticClient, items: &[Envelope]) -> Outcome {
        send(client, &endpoint(), items, &Diagnostics::default()).await
    }

    #[tokio::test]
    async fn request_format() {
        let client = StaticClient::new(200, "");
        let items = batch(20);
        let outcome = send_to(&client, &items).await;
        assert!(matches!(outcome, Outcome::Success { accepted: 20 }));

        let requests = client.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!("/v2.1/track", request.uri().path());
        assert_eq!("application/x-json-stream", request.headers()["content-type"]);
        assert_eq!("gzip", request.headers()["content-encoding"]);
        let mut body = String::new();
        GzDecoder::new(&request.body()[..])
            .read_to_string(&mut body)
            .unwrap();
        let lines: Vec<&str> = body.split('\n').collect();
        assert_eq!(20, lines.len());
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!("op-0", first["tags"][tag_keys::OPERATION_ID]);
    }

    #[test]
    fn encode_joins_lines() {
        let encoded = encode(&batch(3), &Diagnostics::default());
        assert_eq!(vec![0, 1, 2], encoded.lines);
        let body = String::from_utf8(encoded.body).unwrap();
        assert_eq!(3, body.lines().count());
        assert!(!body.ends_with('\n'));
    }

    #[tokio::test]
    async fn partial_success_retries_only_retriable_items() {
        let client = StaticClient::new(
            206,
            r#"{"itemsReceived":5,"itemsAccepted":3,"errors":[{"index":1,"statusCode":429,"message":"throttle"},{"index":4,"statusCode":400,"message":"invalid"}]}"#,
        );
        match send_to(&client, &batch(5)).await {
            Outcome::PartialSuccess {
                accepted,
                retry,
                rejected,
                ..
            } => {
                assert_eq!(3, accepted);
                assert_eq!(vec![1], retry);
                assert_eq!(1, rejected);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn ok_with_errors_is_partial() {
        let client = StaticClient::new(
            200,
            r#"{"itemsReceived":2,"itemsAccepted":1,"errors":[{"index":0,"statusCode":500}]}"#,
        );
        assert!(matches!(
            send_to(&client, &batch(2)).await,
            Outcome::PartialSuccess { retry, .. } if retry == vec![0]
        ));
    }

    #[tokio::test]
    async fn throttled_with_retry_after() {
        let mut client = StaticClient::new(429, "");
        client.headers.push(("retry-after", "5".into()));
        assert!(matches!(
            send_to(&client, &batch(1)).await,
            Outcome::Throttled { retry_after: Some(d) } if d == Duration::from_secs(5)
        ));
    }

    #[test_case(500, true)]
    #[test_case(502, true)]
    #[test_case(503, true)]
    #[test_case(504, true)]
    #[test_case(408, true)]
    #[test_case(400, false)]
    #[test_case(401, false)]
    #[test_case(403, false)]
    #[test_case(404, false)]
    #[tokio::test]
    async fn status_classification(status: u16, retriable: bool) {
        let client = StaticClient::new(status, "");
        match send_to(&client, &batch(1)).await {
            Outcome::Retry { .. } => assert!(retriable),
            Outcome::Permanent { .. } => assert!(!retriable),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn connection_errors_are_retried() {
        let outcome = send(
            &FailingClient,
            &endpoint(),
            &batch(1),
            &Diagnostics::default(),
        )
        .await;
        assert!(matches!(
            outcome,
            Outcome::Retry {
                error: Error::UploadConnection(_),
                retry_after: None,
            }
        ));
    }

    #[test_case(503 ; "service unavailable")]
    #[test_case(500 ; "internal server error")]
    #[test_case(408 ; "request timeout")]
    #[tokio::test]
    async fn server_errors_carry_retry_after(status: u16) {
        let mut client = StaticClient::new(status, "");
        client.headers.push(("retry-after", "120".into()));
        assert!(matches!(
            send_to(&client, &batch(1)).await,
            Outcome::Retry { retry_after: Some(d), .. } if d == Duration::from_secs(120)
        ));
    }

    #[tokio::test]
    async fn partial_success_carries_retry_after() {
        let mut client = StaticClient::new(
            206,
            r#"{"itemsReceived":2,"itemsAccepted":1,"errors":[{"index":0,"statusCode":503}]}"#,
        );
        client.headers.push(("retry-after", "30".into()));
        assert!(matches!(
            send_to(&client, &batch(2)).await,
            Outcome::PartialSuccess { retry_after: Some(d), .. } if d == Duration::from_secs(30)
        ));
    }

    #[test]
    fn retry_after_formats() {
        let now = httpdate::parse_http_date("Sun, 21 Jun 2020 10:40:00 GMT").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "120".parse().unwrap());
        assert_eq!(
            Some(Duration::from_secs(120)),
            parse_retry_after(&headers, now)
        );
        headers.insert("retry-after", "Sun, 21 Jun 2020 10:40:30 GMT".parse().unwrap());
        assert_eq!(
            Some(Duration::from_secs(30)),
            parse_retry_after(&headers, now)
        );
        headers.insert("retry-after", "Sun, 21 Jun 2020 10:39:00 GMT".parse().unwrap());
        assert_eq!(Some(Duration::ZERO), parse_retry_after(&headers, now));
        headers.insert("retry-after", "soon".parse().unwrap());
        assert_eq!(None, parse_retry_after(&headers, now));
    }

    #[test_case("https://in.example", "https://in.example/v2.1/track" ; "no slash")]
    #[test_case("https://in.example/", "https://in.example/v2.1/track" ; "trailing slash")]
    fn append_track_path(base: &str, expected: &str) {
        assert_eq!(expected, append_path(base, "v2.1/track").unwrap().to_string());
    }

    #[cfg(any(feature = "reqwest-client", feature = "reqwest-client-rustls"))]
    mod reqwest_transport {
        use super::*;
        use crate::ReqwestClient;
        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::TcpListener,
        };

        /// Answers a single request with the raw `response` and returns the endpoint.
        async fn serve_once(response: &'static str) -> Uri {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0; 4096];
                while !request_complete(&request) {
                    let read = stream.read(&mut buf).await.unwrap();
                    if read == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..read]);
                }
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            });
            format!("http://{}/v2.1/track", addr).parse().unwrap()
        }

        fn request_complete(request: &[u8]) -> bool {
            let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                return false;
            };
            let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            request.len() >= end + 4 + length
        }

        async fn send_via<C: HttpClient>(client: &C, response: &'static str) -> Outcome {
            let endpoint = serve_once(response).await;
            send(client, &endpoint, &batch(1), &Diagnostics::default()).await
        }

        #[tokio::test]
        async fn plain_client_bad_request_is_permanent() {
            let outcome = send_via(
                &reqwest::Client::new(),
                "HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            )
            .await;
            assert!(
                matches!(
                    outcome,
                    Outcome::Permanent {
                        error: Error::Upload {
                            status_code: 400,
                            can_retry: false
                        }
                    }
                ),
                "{:?}",
                outcome
            );
        }

        #[tokio::test]
        async fn plain_client_too_many_requests_throttles() {
            let outcome = send_via(
                &reqwest::Client::new(),
                "HTTP/1.1 429 Too Many Requests\r\nretry-after: 60\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            )
            .await;
            assert!(
                matches!(outcome, Outcome::Throttled { .. }),
                "{:?}",
                outcome
            );
        }

        #[tokio::test]
        async fn wrapped_client_keeps_retry_after() {
            let outcome = send_via(
                &ReqwestClient::default(),
                "HTTP/1.1 429 Too Many Requests\r\nretry-after: 60\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            )
            .await;
            assert!(
                matches!(
                    outcome,
                    Outcome::Throttled { retry_after: Some(d) } if d == Duration::from_secs(60)
                ),
                "{:?}",
                outcome
            );
        }

        #[tokio::test]
        async fn wrapped_client_reads_partial_success() {
            let outcome = send_via(
                &ReqwestClient::default(),
                concat!(
                    "HTTP/1.1 206 Partial Content\r\ncontent-type: application/json\r\n",
                    "content-length: 77\r\nconnection: close\r\n\r\n",
                    r#"{"itemsReceived":1,"itemsAccepted":0,"errors":[{"index":0,"statusCode":503}]}"#,
                ),
            )
            .await;
            assert!(
                matches!(
                    &outcome,
                    Outcome::PartialSuccess { retry, .. } if retry == &vec![0]
                ),
                "{:?}",
                outcome
            );
        }
    }
}
