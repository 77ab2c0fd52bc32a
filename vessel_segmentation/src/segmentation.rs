use crate::{
    imaging::{self, ImageError},
    model_service::{ModelError, ModelService},
    morphology, vessel_metrics,
};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::instrument;
use vessel_api::{
    HealthResponse, ModelInfo, PredictionRequest, PredictionResponse, VesselMetrics, API_VERSION,
};

const OVERLAY_ALPHA: f32 = 0.4;
const HEALTH_PROBE_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Service busy: prediction queue is full")]
    Busy,
    #[error("{0}")]
    Image(#[from] ImageError),
    #[error("{0}")]
    Model(#[from] ModelError),
    #[error("processing task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct Segmentation {
    pub mask: GrayImage,
    pub confidence: f64,
    pub metrics: VesselMetrics,
    pub processing_time: f64,
}

#[derive(Clone)]
pub struct SegmentationService<M: ModelService> {
    model_service: Arc<M>,
    threshold: f32,
    permits: Arc<Semaphore>,
    queue_timeout: Duration,
}

impl<M: ModelService> SegmentationService<M> {
    pub fn new(
        model_service: M,
        threshold: f32,
        max_concurrent_predictions: usize,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            model_service: Arc::new(model_service),
            threshold,
            permits: Arc::new(Semaphore::new(max_concurrent_predictions.max(1))),
            queue_timeout,
        }
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, SegmentationError> {
        tokio::time::timeout(self.queue_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| SegmentationError::Busy)?
            .map_err(|_| SegmentationError::Busy)
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn predict(&self, image: Arc<RgbImage>) -> Result<Segmentation, SegmentationError> {
        let _permit = self.acquire().await?;
        self.segment(image, Instant::now()).await
    }

    /// Runs the pipeline. Callers must hold a permit.
    async fn segment(
        &self,
        image: Arc<RgbImage>,
        started: Instant,
    ) -> Result<Segmentation, SegmentationError> {
        let (input_width, input_height) = self.model_service.input_size();
        let layout = self.model_service.layout();
        let (original_width, original_height) = image.dimensions();
        tracing::info!(
            "Processing image of size: {}x{}",
            original_width,
            original_height
        );

        let input = tokio::task::spawn_blocking(move || {
            imaging::preprocess(&image, input_width, input_height, layout)
        })
        .await?;

        tracing::debug!("Running model inference");
        let output = self.model_service.infer(input).await?;

        let threshold = self.threshold;
        let segmentation = tokio::task::spawn_blocking(move || {
            let confidence = if output.is_empty() {
                0.0
            } else {
                (output.iter().map(|p| *p as f64).sum::<f64>() / output.len() as f64)
                    .clamp(0.0, 1.0)
            };
            let probabilities = imaging::probability_map(output)?;
            let mask =
                imaging::postprocess_mask(&probabilities, original_width, original_height, threshold);
            let mask = morphology::clean_mask(&mask);
            let processing_time = started.elapsed().as_secs_f64();
            let metrics = vessel_metrics::calculate(&mask, processing_time);
            Ok::<_, SegmentationError>(Segmentation {
                mask,
                confidence,
                metrics,
                processing_time,
            })
        })
        .await??;

        tracing::info!(
            "Inference completed in {:.2} seconds",
            segmentation.processing_time
        );
        tracing::info!(
            "Vessel coverage: {:.2}%",
            segmentation.metrics.vessel_percentage
        );

        Ok(segmentation)
    }

    pub async fn predict_request(
        &self,
        request: PredictionRequest,
    ) -> Result<PredictionResponse, SegmentationError> {
        if request.image.trim().is_empty() {
            return Err(SegmentationError::InvalidInput("No image provided".into()));
        }
        let PredictionRequest {
            image,
            include_overlay,
            ..
        } = request;
        self.decode_and_predict(move || imaging::decode_data_uri_image(&image), include_overlay)
            .await
    }

    pub async fn predict_bytes(
        &self,
        bytes: Vec<u8>,
        include_overlay: bool,
    ) -> Result<PredictionResponse, SegmentationError> {
        if bytes.is_empty() {
            return Err(SegmentationError::InvalidInput("No image provided".into()));
        }
        self.decode_and_predict(move || imaging::decode_image(&bytes), include_overlay)
            .await
    }

    /// Decodes under the permit, on the blocking pool.
    async fn decode_and_predict<F>(
        &self,
        decode: F,
        include_overlay: bool,
    ) -> Result<PredictionResponse, SegmentationError>
    where
        F: FnOnce() -> Result<RgbImage, ImageError> + Send + 'static,
    {
        let _permit = self.acquire().await?;
        let started = Instant::now();

        let image = tokio::task::spawn_blocking(decode)
            .await?
            .map_err(|e| SegmentationError::InvalidInput(e.to_string()))?;
        let image = Arc::new(image);
        let segmentation = self.segment(image.clone(), started).await?;

        let response = tokio::task::spawn_blocking(move || {
            let overlay = if include_overlay {
                let blended = imaging::overlay(&image, &segmentation.mask, OVERLAY_ALPHA);
                Some(imaging::encode_png_data_uri(DynamicImage::ImageRgb8(
                    blended,
                ))?)
            } else {
                None
            };
            let mask_uri =
                imaging::encode_png_data_uri(DynamicImage::ImageLuma8(segmentation.mask))?;
            Ok::<_, SegmentationError>(
                PredictionResponse::success(
                    mask_uri,
                    segmentation.confidence,
                    segmentation.processing_time,
                    segmentation.metrics,
                )
                .with_overlay(overlay),
            )
        })
        .await??;

        Ok(response)
    }

    /// Runs a probe prediction on a black square. Skipped without waiting
    /// when every permit is taken.
    pub async fn health_check(&self) -> HealthResponse {
        let description = self.model_service.describe();
        let started = Instant::now();

        let (status, test_prediction, test_error) = match self.permits.clone().try_acquire_owned() {
            Ok(_permit) => {
                let probe = Arc::new(RgbImage::from_pixel(
                    HEALTH_PROBE_SIZE,
                    HEALTH_PROBE_SIZE,
                    Rgb([0, 0, 0]),
                ));
                match self.segment(probe, started).await {
                    Ok(_) => ("healthy", "passed", None),
                    Err(e) => {
                        tracing::warn!("Health probe failed: {}", e);
                        ("unhealthy", "failed", Some(e.to_string()))
                    }
                }
            }
            Err(_) => {
                tracing::debug!("All prediction permits in use, skipping health probe");
                ("healthy", "skipped", None)
            }
        };

        HealthResponse {
            status: status.to_string(),
            model_loaded: true,
            version: API_VERSION.to_string(),
            backend: Some(description.backend.to_string()),
            test_prediction: Some(test_prediction.to_string()),
            test_time: Some(started.elapsed().as_secs_f64()),
            test_error,
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        let description = self.model_service.describe();
        let (width, height) = self.model_service.input_size();
        ModelInfo {
            model_loaded: true,
            model_type: "U-Net".to_string(),
            backend: description.backend.to_string(),
            model_path: description.model_path,
            input_size: [height, width],
            input_layout: self.model_service.layout().as_str().to_string(),
            threshold: self.threshold,
            num_sessions: description.num_sessions,
            inputs: description.inputs,
            outputs: description.outputs,
        }
    }
}
