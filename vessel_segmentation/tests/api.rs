use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array4, ArrayD, IxDyn};
use reqwest::{multipart, StatusCode};
use serde_json::Value;
use std::{
    io::Cursor,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, Notify, Semaphore};
use vessel_api::{DataUri, ErrorBody, HealthResponse, ModelInfo, PredictionRequest, PredictionResponse};
use vessel_segmentation::{
    config::{FallbackMode, ModelConfig, ServerConfig, TensorLayout},
    model_service::ModelDescription,
    proxy_service::ProxyModelService,
    telemetry::Metrics,
    HttpServer, ModelError, ModelService, SegmentationService,
};

struct TestApp {
    base_url: String,
    shutdown_tx: broadcast::Sender<()>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn model_config() -> ModelConfig {
    ModelConfig {
        model_dir: PathBuf::from("does-not-exist"),
        onnx_file: "missing.onnx".to_string(),
        num_instances: 1,
        input_width: 64,
        input_height: 64,
        layout: TensorLayout::Nhwc,
        threshold: 0.5,
        fallback: FallbackMode::Proxy,
    }
}

fn server_config(max_body_bytes: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_body_bytes,
        cors_allowed_origins: vec!["http://localhost:3001".to_string()],
        max_concurrent_predictions: 2,
        queue_timeout_ms: 5_000,
    }
}

async fn spawn_app_with_limit(max_body_bytes: usize) -> TestApp {
    let model_config = model_config();
    let segmentation = SegmentationService::new(
        ProxyModelService::new(&model_config),
        model_config.threshold,
        2,
        Duration::from_secs(5),
    );
    spawn_service(segmentation, max_body_bytes).await
}

async fn spawn_service<M: ModelService>(
    segmentation: SegmentationService<M>,
    max_body_bytes: usize,
) -> TestApp {
    let metrics = Arc::new(Metrics::new().unwrap());
    let server = HttpServer::new(segmentation, metrics, &server_config(max_body_bytes))
        .await
        .unwrap();
    let addr: SocketAddr = server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    server.run(shutdown_rx).await.unwrap();

    TestApp {
        base_url: format!("http://{}", addr),
        shutdown_tx,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with_limit(15 * 1024 * 1024).await
}

/// Light background crossed by a dark horizontal band.
fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |_, y| {
        if y >= height / 2 && y < height / 2 + 2 {
            Rgb([40, 20, 40])
        } else {
            Rgb([200, 180, 170])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let app = spawn_app().await;

    let body: Value = reqwest::get(format!("{}/", app.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["message"], "Eye Vessel Segmentation API");
    assert_eq!(body["endpoints"]["predict"], "/predict");
}

#[tokio::test]
async fn test_health_reports_healthy() {
    let app = spawn_app().await;

    let resp = reqwest::get(format!("{}/health", app.base_url)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let health: HealthResponse = resp.json().await.unwrap();
    assert!(health.is_healthy());
    assert!(health.model_loaded);
    assert_eq!(health.backend.as_deref(), Some("proxy"));
    assert_eq!(health.test_prediction.as_deref(), Some("passed"));
}

#[tokio::test]
async fn test_predict_returns_mask_at_original_size() {
    let app = spawn_app().await;
    let image = DataUri::encode("image/png", &sample_png(40, 30));
    let mut request = PredictionRequest::new(image);
    request.include_overlay = true;

    let resp = reqwest::Client::new()
        .post(format!("{}/predict", app.base_url))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let prediction: PredictionResponse = resp.json().await.unwrap();
    assert!(prediction.success);
    assert!(prediction.overlay_image.is_some());

    let mask_uri = DataUri::parse(&prediction.segmentation_mask.unwrap()).unwrap();
    assert_eq!(mask_uri.mime_type, "image/png");
    let mask = image::load_from_memory(&mask_uri.data).unwrap();
    assert_eq!((mask.width(), mask.height()), (40, 30));

    let metrics = prediction.vessel_metrics.unwrap();
    assert_eq!(metrics.total_pixels, 1200);
    assert!(metrics.vessel_ratio >= 0.0 && metrics.vessel_ratio <= 1.0);
}

#[tokio::test]
async fn test_predict_rejects_empty_image() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/predict", app.base_url))
        .json(&PredictionRequest::new(""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.status_code, 400);
    assert_eq!(body.error, "No image provided");
}

#[tokio::test]
async fn test_predict_rejects_undecodable_image() {
    let app = spawn_app().await;
    let image = DataUri::encode("image/png", b"definitely not a png");

    let resp = reqwest::Client::new()
        .post(format!("{}/predict", app.base_url))
        .json(&PredictionRequest::new(image))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_rejects_missing_field() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/predict", app.base_url))
        .json(&serde_json::json!({ "model_name": "unet_eye_segmentation" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.status_code, 422);
}

#[tokio::test]
async fn test_predict_file_accepts_image_upload() {
    let app = spawn_app().await;
    let part = multipart::Part::bytes(sample_png(24, 24))
        .file_name("eye.png")
        .mime_str("image/png")
        .unwrap();
    let form = multipart::Form::new().part("file", part);

    let resp = reqwest::Client::new()
        .post(format!("{}/predict/file", app.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let prediction: PredictionResponse = resp.json().await.unwrap();
    assert!(prediction.success);
    assert!(prediction.overlay_image.is_none());
    assert_eq!(prediction.vessel_metrics.unwrap().total_pixels, 576);
}

#[tokio::test]
async fn test_predict_file_rejects_non_image() {
    let app = spawn_app().await;
    let part = multipart::Part::bytes(b"hello".to_vec())
        .file_name("notes.txt")
        .mime_str("text/plain")
        .unwrap();
    let form = multipart::Form::new().part("file", part);

    let resp = reqwest::Client::new()
        .post(format!("{}/predict/file", app.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "File must be an image");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = spawn_app_with_limit(1024).await;
    let image = DataUri::encode("image/png", &vec![0u8; 4096]);

    let resp = reqwest::Client::new()
        .post(format!("{}/predict", app.base_url))
        .json(&PredictionRequest::new(image))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_model_info_describes_proxy() {
    let app = spawn_app().await;

    let info: ModelInfo = reqwest::get(format!("{}/model/info", app.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(info.model_loaded);
    assert_eq!(info.model_type, "U-Net");
    assert_eq!(info.backend, "proxy");
    assert_eq!(info.input_size, [64, 64]);
    assert_eq!(info.input_layout, "nhwc");
    assert_eq!(info.threshold, 0.5);
}

#[tokio::test]
async fn test_metrics_count_predictions() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let image = DataUri::encode("image/png", &sample_png(16, 16));

    client
        .post(format!("{}/predict", app.base_url))
        .json(&PredictionRequest::new(image))
        .send()
        .await
        .unwrap();

    let text = client
        .get(format!("{}/metrics", app.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(text.contains("vessel_segmentation_predictions_total{outcome=\"success\"} 1"));
    assert!(text.contains("vessel_segmentation_http_requests_total{route=\"/predict\",status=\"200\"} 1"));
}

#[tokio::test]
async fn test_cors_preflight_echoes_allowed_origin() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{}/predict", app.base_url))
        .header("origin", "http://localhost:3001")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "http://localhost:3001"
    );

    let resp = client
        .get(format!("{}/health", app.base_url))
        .header("origin", "http://evil.example")
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}

/// Fails every inference, or parks it until the gate opens.
#[derive(Clone)]
struct ScriptedModelService {
    fail: bool,
    entered: Arc<Notify>,
    gate: Arc<Semaphore>,
}

impl ScriptedModelService {
    fn failing() -> Self {
        Self {
            fail: true,
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
        }
    }

    fn gated() -> Self {
        Self {
            fail: false,
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl ModelService for ScriptedModelService {
    async fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>, ModelError> {
        if self.fail {
            return Err(ModelError::Inference("weights are corrupt".into()));
        }
        self.entered.notify_one();
        let _open = self
            .gate
            .acquire()
            .await
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let (h, w) = (input.shape()[1], input.shape()[2]);
        Ok(ArrayD::from_elem(IxDyn(&[1, h, w, 1]), 0.0))
    }

    fn input_size(&self) -> (u32, u32) {
        (16, 16)
    }

    fn layout(&self) -> TensorLayout {
        TensorLayout::Nhwc
    }

    fn describe(&self) -> ModelDescription {
        ModelDescription {
            backend: "scripted",
            model_path: None,
            num_sessions: 1,
            inputs: vec!["input".into()],
            outputs: vec!["output".into()],
        }
    }
}

#[tokio::test]
async fn test_inference_failure_maps_to_500() {
    let segmentation =
        SegmentationService::new(ScriptedModelService::failing(), 0.5, 1, Duration::from_secs(1));
    let app = spawn_service(segmentation, 1024 * 1024).await;
    let image = DataUri::encode("image/png", &sample_png(8, 8));

    let resp = reqwest::Client::new()
        .post(format!("{}/predict", app.base_url))
        .json(&PredictionRequest::new(image))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.status_code, 500);
    assert!(body.error.starts_with("Prediction failed: "), "{}", body.error);
    assert!(body.error.contains("weights are corrupt"));
}

#[tokio::test]
async fn test_saturated_queue_returns_503_and_health_stays_up() {
    let model = ScriptedModelService::gated();
    let (entered, gate) = (model.entered.clone(), model.gate.clone());
    let segmentation = SegmentationService::new(model, 0.5, 1, Duration::from_millis(100));
    let app = spawn_service(segmentation, 1024 * 1024).await;
    let client = reqwest::Client::new();
    let image = DataUri::encode("image/png", &sample_png(8, 8));

    let first = tokio::spawn({
        let client = client.clone();
        let url = format!("{}/predict", app.base_url);
        let request = PredictionRequest::new(image.clone());
        async move { client.post(url).json(&request).send().await.unwrap().status() }
    });
    entered.notified().await;

    let resp = client
        .post(format!("{}/predict", app.base_url))
        .json(&PredictionRequest::new(image))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.status_code, 503);

    let started = Instant::now();
    let health: HealthResponse = client
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(health.is_healthy());
    assert_eq!(health.test_prediction.as_deref(), Some("skipped"));

    gate.add_permits(Semaphore::MAX_PERMITS);
    assert_eq!(first.await.unwrap(), StatusCode::OK);
}

#[tokio::test]
async fn test_json_syntax_error_is_wrapped() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/predict", app.base_url))
        .header("content-type", "application/json")
        .body("{\"image\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.status_code, 400);
    assert!(!body.error.is_empty());
}

#[tokio::test]
async fn test_predict_file_rejects_non_multipart_body() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/predict/file", app.base_url))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers()["content-type"], "application/json");

    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.status_code, 400);
}

#[tokio::test]
async fn test_predict_file_rejects_bad_query() {
    let app = spawn_app().await;
    let part = multipart::Part::bytes(sample_png(8, 8))
        .file_name("eye.png")
        .mime_str("image/png")
        .unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{}/predict/file?include_overlay=maybe", app.base_url))
        .multipart(multipart::Form::new().part("file", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.status_code, 400);
}

#[tokio::test]
async fn test_cors_response_varies_on_origin() {
    let app = spawn_app().await;

    let resp = reqwest::Client::new()
        .get(format!("{}/model/info", app.base_url))
        .header("origin", "http://localhost:3001")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "http://localhost:3001"
    );
    assert_eq!(resp.headers()["vary"], "Origin");
}
