use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use http::{Request, Response};
use opentelemetry_http::{HttpClient, HttpError};
use std::{
    collections::VecDeque,
    io::Read,
    sync::{Arc, Mutex},
};
use tokio::time::Instant;

/// A canned ingestion response.
#[derive(Debug, Clone)]
pub(crate) struct MockResponse {
    pub(crate) status: u16,
    pub(crate) retry_after: Option<String>,
    pub(crate) body: String,
}

impl MockResponse {
    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }

    pub(crate) fn with_retry_after(mut self, retry_after: &str) -> Self {
        self.retry_after = Some(retry_after.into());
        self
    }

    pub(crate) fn with_body(mut self, body: &str) -> Self {
        self.body = body.into();
        self
    }
}

/// A request as the endpoint saw it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) at: Instant,
    pub(crate) uri: String,
    pub(crate) items: Vec<serde_json::Value>,
}

impl RecordedRequest {
    pub(crate) fn operation_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|item| item["tags"]["ai.operation.id"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

/// Answers with scripted responses, then with `fallback`, and records every request.
#[derive(Debug, Clone)]
pub(crate) struct RecordingClient {
    script: Arc<Mutex<VecDeque<MockResponse>>>,
    fallback: MockResponse,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RecordingClient {
    pub(crate) fn new() -> Self {
        Self::with_fallback(MockResponse::status(200))
    }

    pub(crate) fn with_fallback(fallback: MockResponse) -> Self {
        Self {
            script: Arc::default(),
            fallback,
            requests: Arc::default(),
        }
    }

    pub(crate) fn then(self, response: MockResponse) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn item_count(&self) -> usize {
        self.requests().iter().map(|r| r.items.len()).sum()
    }
}

pub(crate) fn decode_body(request: &Request<Bytes>) -> String {
    let gzipped = request
        .headers()
        .get(http::header::CONTENT_ENCODING)
        .map_or(false, |value| value == "gzip");
    if gzipped {
        let mut body = String::new();
        GzDecoder::new(&request.body()[..])
            .read_to_string(&mut body)
            .unwrap();
        body
    } else {
        String::from_utf8(request.body().to_vec()).unwrap()
    }
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let items = decode_body(&request)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        self.requests.lock().unwrap().push(RecordedRequest {
            at: Instant::now(),
            uri: request.uri().to_string(),
            items,
        });
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let mut builder = Response::builder().status(response.status);
        if let Some(retry_after) = &response.retry_after {
            builder = builder.header(http::header::RETRY_AFTER, retry_after.as_str());
        }
        Ok(builder.body(Bytes::from(response.body))?)
    }
}

/// Never answers.
#[derive(Debug, Default)]
pub(crate) struct HangingClient;

#[async_trait]
impl HttpClient for HangingClient {
    async fn send_bytes(&self, _: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        std::future::pending().await
    }
}
