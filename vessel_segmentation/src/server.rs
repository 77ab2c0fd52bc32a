use crate::{
    config::ServerConfig, model_service::ModelService, routes::api_routes,
    segmentation::SegmentationService, telemetry::Metrics,
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub segmentation: SegmentationService<M>,
    pub metrics: Arc<Metrics>,
    pub cors_allowed_origins: Arc<Vec<String>>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        segmentation: SegmentationService<M>,
        metrics: Arc<Metrics>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let addr = config.get_address();

        let app_state = SharedState {
            segmentation,
            metrics,
            cors_allowed_origins: Arc::new(config.cors_allowed_origins.clone()),
        };

        let router = Router::new()
            .merge(api_routes::<M>())
            .layer(from_fn_with_state(app_state.clone(), track_requests::<M>))
            .layer(from_fn_with_state(app_state.clone(), cors_middleware::<M>))
            .layer(DefaultBodyLimit::max(config.max_body_bytes))
            .with_state(app_state);

        let listener = TcpListener::bind(&addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                tracing::info!("HTTP server stopped");
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

async fn track_requests<M: ModelService>(
    State(state): State<SharedState<M>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let resp = next.run(req).await;

    state.metrics.record_request(
        &route,
        resp.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    resp
}

async fn cors_middleware<M: ModelService>(
    State(state): State<SharedState<M>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|origin| state.cors_allowed_origins.iter().any(|x| x == origin));

    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        if let Some(origin_value) = origin {
            allow_origin(&mut resp, &origin_value);
            resp.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET,POST,OPTIONS"),
            );
            resp.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("content-type,authorization"),
            );
        }
        return resp;
    }

    let mut resp = next.run(req).await;
    if let Some(origin_value) = origin {
        allow_origin(&mut resp, &origin_value);
    }
    resp
}

fn allow_origin(resp: &mut Response, origin: &str) {
    if let Ok(v) = HeaderValue::from_str(origin) {
        resp.headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, v);
        resp.headers_mut().insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        resp.headers_mut()
            .insert(header::VARY, HeaderValue::from_static("Origin"));
    }
}
