use crate::{
    client::TelemetryClient,
    correlation::{
        propagation::{self, REQUEST_ID_HEADER},
        CorrelationContext,
    },
    telemetry::RequestTelemetry,
};
use http::{header::HOST, HeaderName, HeaderValue, Request, Response};
use opentelemetry_http::HeaderExtractor;
use pin_project_lite::pin_project;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Instant,
};
use tokio::task::futures::TaskLocalFuture;
use tower::{Layer, Service};

/// Tracks every request handled by the wrapped service.
///
/// The caller's `traceparent` (or legacy `Request-Id`) is extracted and the request runs with a
/// child context as the ambient context, so everything tracked while handling it is correlated.
/// When the response is ready a request item is tracked and the `Request-Id` header is set on
/// the response for legacy callers.
///
/// ```no_run
/// # fn run(telemetry: application_insights::TelemetryClient) {
/// use application_insights::RequestTrackingLayer;
/// use tower::Layer;
///
/// # let handler = tower::service_fn(|_: http::Request<()>| async {
/// #     Ok::<_, std::convert::Infallible>(http::Response::new(()))
/// # });
/// let service = RequestTrackingLayer::new(telemetry).layer(handler);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RequestTrackingLayer {
    telemetry: TelemetryClient,
}

impl RequestTrackingLayer {
    /// Create a layer reporting to `telemetry`.
    pub fn new(telemetry: TelemetryClient) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for RequestTrackingLayer {
    type Service = RequestTracking<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTracking {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

/// Service created by [`RequestTrackingLayer`].
#[derive(Debug, Clone)]
pub struct RequestTracking<S> {
    inner: S,
    telemetry: TelemetryClient,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestTracking<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let parent = propagation::extract(&HeaderExtractor(request.headers()));
        let method = request.method().to_string();
        let url = self.telemetry.sanitize_url(&full_url(&request));
        let context = CorrelationContext::new_child(parent.as_ref())
            .with_operation_name(format!("{} {}", method, request.uri().path()));

        let inner = &mut self.inner;
        let future = propagation::sync_scope(context.clone(), || inner.call(request));
        ResponseFuture {
            inner: propagation::scope(context.clone(), future),
            tracking: Some(Tracking {
                telemetry: self.telemetry.clone(),
                context,
                method,
                url,
                started: Instant::now(),
            }),
        }
    }
}

struct Tracking {
    telemetry: TelemetryClient,
    context: CorrelationContext,
    method: String,
    url: String,
    started: Instant,
}

impl Tracking {
    fn finish(self, status: u16) {
        let request = RequestTelemetry::new(self.method, self.url, self.started.elapsed(), status);
        self.telemetry
            .track_with_context(request, Some(&self.context));
    }
}

pin_project! {
    /// Response future of [`RequestTracking`].
    pub struct ResponseFuture<F> {
        #[pin]
        inner: TaskLocalFuture<CorrelationContext, F>,
        tracking: Option<Tracking>,
    }
}

impl<F> fmt::Debug for ResponseFuture<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("context", &self.tracking.as_ref().map(|t| &t.context))
            .finish()
    }
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        let Some(tracking) = this.tracking.take() else {
            return Poll::Ready(result);
        };
        match result {
            Ok(mut response) => {
                if let Ok(request_id) = HeaderValue::from_str(&tracking.context.to_legacy()) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id);
                }
                tracking.finish(response.status().as_u16());
                Poll::Ready(Ok(response))
            }
            Err(err) => {
                tracking.finish(500);
                Poll::Ready(Err(err))
            }
        }
    }
}

fn full_url<B>(request: &Request<B>) -> String {
    let uri = request.uri();
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    let path = uri
        .path_and_query()
        .map_or("/", |path_and_query| path_and_query.as_str());
    match request.headers().get(HOST).and_then(|host| host.to_str().ok()) {
        Some(host) => format!("http://{}{}", host, path),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{new_pipeline_from_connection_string, test_util::RecordingClient};
    use std::{convert::Infallible, time::Duration};
    use tower::{service_fn, ServiceExt};

    fn telemetry(recorder: &RecordingClient) -> TelemetryClient {
        new_pipeline_from_connection_string("InstrumentationKey=ikey")
            .unwrap()
            .with_client(recorder.clone())
            .build()
            .unwrap()
    }

    async fn tracked(telemetry: &TelemetryClient, recorder: &RecordingClient) -> Vec<serde_json::Value> {
        telemetry.flush();
        tokio::time::sleep(Duration::from_millis(10)).await;
        recorder
            .requests()
            .into_iter()
            .flat_map(|request| request.items)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn continues_w3c_operation() {
        let recorder = RecordingClient::new();
        let telemetry = telemetry(&recorder);
        let inner_telemetry = telemetry.clone();
        let service = RequestTrackingLayer::new(telemetry.clone()).layer(service_fn(
            move |_: Request<()>| {
                let telemetry = inner_telemetry.clone();
                async move {
                    let context = propagation::current().unwrap();
                    assert_eq!(
                        "0af7651916cd43dd8448eb211c80319c",
                        context.trace_id().to_string()
                    );
                    assert_eq!(
                        "b7ad6b7169203331",
                        context.parent_span_id().unwrap().to_string()
                    );
                    assert_ne!("b7ad6b7169203331", context.span_id().to_string());
                    telemetry.track_event("handled");
                    Ok::<_, Infallible>(Response::builder().status(201).body(()).unwrap())
                }
            },
        ));

        let request = Request::get("/orders?id=1&password=x")
            .header(HOST, "shop.example")
            .header(
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            )
            .body(())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(201, response.status());
        let request_id = response.headers()["request-id"].to_str().unwrap().to_string();
        assert!(request_id.starts_with("|0af7651916cd43dd8448eb211c80319c."));

        let items = tracked(&telemetry, &recorder).await;
        assert_eq!(2, items.len());
        let (event, request) = (&items[0], &items[1]);
        assert_eq!("EventData", event["data"]["baseType"]);
        assert_eq!("RequestData", request["data"]["baseType"]);

        let data = &request["data"]["baseData"];
        let span_id = data["id"].as_str().unwrap();
        assert_eq!(format!("|0af7651916cd43dd8448eb211c80319c.{}.", span_id), request_id);
        assert_eq!("GET /orders", data["name"]);
        assert_eq!("http://shop.example/orders?id=1&password=REDACTED", data["url"]);
        assert_eq!("201", data["responseCode"]);
        assert_eq!(true, data["success"]);
        assert_eq!(
            "0af7651916cd43dd8448eb211c80319c",
            request["tags"]["ai.operation.id"]
        );
        assert_eq!("b7ad6b7169203331", request["tags"]["ai.operation.parentId"]);
        assert_eq!("GET /orders", request["tags"]["ai.operation.name"]);

        assert_eq!(
            request["tags"]["ai.operation.id"],
            event["tags"]["ai.operation.id"]
        );
        assert_eq!(
            request["tags"]["ai.operation.parentId"],
            event["tags"]["ai.operation.parentId"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn starts_new_operation_without_headers() {
        let recorder = RecordingClient::new();
        let telemetry = telemetry(&recorder);
        let service = RequestTrackingLayer::new(telemetry.clone()).layer(service_fn(
            |_: Request<()>| async {
                let context = propagation::current().unwrap();
                assert_eq!(None, context.parent_span_id());
                Ok::<_, Infallible>(Response::builder().status(404).body(()).unwrap())
            },
        ));
        let request = Request::get("http://shop.example/missing").body(()).unwrap();
        service.oneshot(request).await.unwrap();

        let items = tracked(&telemetry, &recorder).await;
        let data = &items[0]["data"]["baseData"];
        assert_eq!("http://shop.example/missing", data["url"]);
        assert_eq!("404", data["responseCode"]);
        assert_eq!(false, data["success"]);
        assert!(items[0]["tags"].get("ai.operation.parentId").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_traceparent_falls_back_to_request_id() {
        let recorder = RecordingClient::new();
        let telemetry = telemetry(&recorder);
        let service = RequestTrackingLayer::new(telemetry.clone()).layer(service_fn(
            |_: Request<()>| async {
                let context = propagation::current().unwrap();
                assert_eq!(
                    "4bf92f3577b34da6a3ce929d0e0e4736",
                    context.trace_id().to_string()
                );
                Ok::<_, Infallible>(Response::new(()))
            },
        ));
        let request = Request::get("/")
            .header("traceparent", "00-00000000000000000000000000000000-b7ad6b7169203331-01")
            .header("request-id", "|4bf92f3577b34da6a3ce929d0e0e4736.00f067aa0ba902b7.")
            .body(())
            .unwrap();
        service.oneshot(request).await.unwrap();
        assert_eq!(1, tracked(&telemetry, &recorder).await.len());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_service_tracks_server_error() {
        let recorder = RecordingClient::new();
        let telemetry = telemetry(&recorder);
        let service = RequestTrackingLayer::new(telemetry.clone()).layer(service_fn(
            |_: Request<()>| async { Err::<Response<()>, _>("handler failed") },
        ));
        let request = Request::post("/jobs").body(()).unwrap();
        assert!(service.oneshot(request).await.is_err());

        let items = tracked(&telemetry, &recorder).await;
        assert_eq!("500", items[0]["data"]["baseData"]["responseCode"]);
        assert_eq!(false, items[0]["data"]["baseData"]["success"]);
    }
}
