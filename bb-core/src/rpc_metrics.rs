//! # RPC metrics
//!
//! A tower layer recording per-call counts and handling time, usable both
//! around a tonic server and around a client `Channel`. Collector names and
//! labels follow the `grpc_{server,client}_*` convention of the Prometheus
//! gRPC interceptors, so existing dashboards apply unchanged.
//!
//! A call is considered handled once its response body is finished or
//! dropped. The status code comes from the trailers, or from the headers for
//! trailers-only responses.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame, SizeHint};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tonic::Code;
use tower::{Layer, Service};

use crate::errors::{BbError, BbResult, ErrorKind};

/// Collectors for one side (server or client) of the gRPC connections of a process.
pub struct RpcMetrics {
    started_total: IntCounterVec,
    handled_total: IntCounterVec,
    handling_seconds: HistogramVec,
}

impl RpcMetrics {
    /// Collectors for calls served by this process.
    pub fn server(registry: &Registry) -> BbResult<Arc<Self>> {
        Self::register(registry, "server")
    }

    /// Collectors for calls this process makes to other services.
    pub fn client(registry: &Registry) -> BbResult<Arc<Self>> {
        Self::register(registry, "client")
    }

    fn register(registry: &Registry, side: &str) -> BbResult<Arc<Self>> {
        let started_total = IntCounterVec::new(
            Opts::new(
                format!("grpc_{}_started_total", side),
                format!("Total number of RPCs started on the {}.", side),
            ),
            &["grpc_service", "grpc_method"],
        )
        .map_err(registration_error)?;
        let handled_total = IntCounterVec::new(
            Opts::new(
                format!("grpc_{}_handled_total", side),
                format!(
                    "Total number of RPCs completed on the {}, regardless of success or failure.",
                    side
                ),
            ),
            &["grpc_service", "grpc_method", "grpc_code"],
        )
        .map_err(registration_error)?;
        let handling_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("grpc_{}_handling_seconds", side),
                format!(
                    "Histogram of response latency (seconds) of gRPC calls handled on the {}.",
                    side
                ),
            ),
            &["grpc_service", "grpc_method"],
        )
        .map_err(registration_error)?;

        registry
            .register(Box::new(started_total.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(handled_total.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(handling_seconds.clone()))
            .map_err(registration_error)?;

        Ok(Arc::new(Self {
            started_total,
            handled_total,
            handling_seconds,
        }))
    }
}

fn registration_error(err: prometheus::Error) -> BbError {
    BbError::new(ErrorKind::Internal, "Failed to register RPC metrics").with_source(err.into())
}

/// `/package.Service/Method` into its service and method parts.
fn split_path(path: &str) -> (String, String) {
    match path.trim_start_matches('/').split_once('/') {
        Some((service, method)) => (service.to_string(), method.to_string()),
        None => ("unknown".to_string(), path.to_string()),
    }
}

fn grpc_status(headers: &HeaderMap) -> Option<Code> {
    headers
        .get("grpc-status")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i32>().ok())
        .map(Code::from_i32)
}

fn code_label(code: Code) -> String {
    match code {
        Code::Ok => "OK".to_string(),
        code => format!("{:?}", code),
    }
}

/// One call in flight.
struct CallObserver {
    metrics: Arc<RpcMetrics>,
    service: String,
    method: String,
    started: Instant,
    code: Option<Code>,
}

impl CallObserver {
    fn start(metrics: Arc<RpcMetrics>, path: &str) -> Self {
        let (service, method) = split_path(path);
        metrics
            .started_total
            .with_label_values(&[&service, &method])
            .inc();
        Self {
            metrics,
            service,
            method,
            started: Instant::now(),
            code: None,
        }
    }

    fn finish(self, code: Code) {
        self.metrics
            .handled_total
            .with_label_values(&[&self.service, &self.method, &code_label(code)])
            .inc();
        self.metrics
            .handling_seconds
            .with_label_values(&[&self.service, &self.method])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

/// Wraps services with [`RpcMetricsService`].
#[derive(Clone)]
pub struct RpcMetricsLayer {
    metrics: Arc<RpcMetrics>,
}

impl RpcMetricsLayer {
    pub fn new(metrics: Arc<RpcMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for RpcMetricsLayer {
    type Service = RpcMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcMetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RpcMetricsService<S> {
    inner: S,
    metrics: Arc<RpcMetrics>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RpcMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Body + Unpin + Send + 'static,
{
    type Response = Response<RpcMetricsBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let mut call = CallObserver::start(self.metrics.clone(), request.uri().path());
        let response = self.inner.call(request);
        Box::pin(async move {
            match response.await {
                Ok(response) => {
                    call.code = grpc_status(response.headers());
                    Ok(response.map(|inner| RpcMetricsBody {
                        inner,
                        call: Some(call),
                    }))
                }
                Err(err) => {
                    call.finish(Code::Unavailable);
                    Err(err)
                }
            }
        })
    }
}

/// Response body that records the call once it completes.
pub struct RpcMetricsBody<B> {
    inner: B,
    call: Option<CallObserver>,
}

impl<B> RpcMetricsBody<B> {
    fn finish(&mut self, default: Code) {
        if let Some(call) = self.call.take() {
            let code = call.code.unwrap_or(default);
            call.finish(code);
        }
    }
}

impl<B> Body for RpcMetricsBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = futures::ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &frame {
            Some(Ok(frame)) => {
                if let Some(trailers) = frame.trailers_ref() {
                    if let (Some(call), Some(code)) = (this.call.as_mut(), grpc_status(trailers)) {
                        call.code = Some(code);
                    }
                }
            }
            Some(Err(_)) => this.finish(Code::Unknown),
            None => this.finish(Code::Unknown),
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for RpcMetricsBody<B> {
    fn drop(&mut self) {
        // Not read to the end: the peer went away before the call finished.
        self.finish(Code::Cancelled);
    }
}
