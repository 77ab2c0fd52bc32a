use super::ApiError;
use crate::{
    model_service::ModelService,
    segmentation::SegmentationError,
    server::SharedState,
    telemetry::Metrics,
};
use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        Multipart, Query, State,
    },
    response::Json,
};
use serde::Deserialize;
use std::time::Instant;
use tracing::instrument;
use vessel_api::{PredictionRequest, PredictionResponse};

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub include_overlay: bool,
}

#[instrument(skip(state, payload))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(request) = payload?;
    tracing::info!("Received prediction request");

    let started = Instant::now();
    let result = state.segmentation.predict_request(request).await;
    record_outcome(&state.metrics, "/predict", started, &result);

    Ok(Json(result?))
}

#[instrument(skip(state, query, multipart))]
pub async fn predict_file<M: ModelService>(
    State(state): State<SharedState<M>>,
    query: Result<Query<FileQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Query(query) = query?;
    let mut multipart = multipart?;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") || field.file_name().is_some() {
            upload = Some(read_image_field(field).await?);
            break;
        }
    }
    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("No image provided".to_string()))?;
    tracing::info!("Received file upload {} ({} bytes)", file_name, bytes.len());

    let started = Instant::now();
    let result = state
        .segmentation
        .predict_bytes(bytes, query.include_overlay)
        .await;
    record_outcome(&state.metrics, "/predict/file", started, &result);

    Ok(Json(result?))
}

async fn read_image_field(field: Field<'_>) -> Result<(String, Vec<u8>), ApiError> {
    let is_image = field
        .content_type()
        .map(|content_type| content_type.starts_with("image/"))
        .unwrap_or(false);
    if !is_image {
        return Err(ApiError::BadRequest("File must be an image".to_string()));
    }

    let file_name = field.file_name().unwrap_or("upload").to_string();
    let bytes = field.bytes().await?;
    Ok((file_name, bytes.to_vec()))
}

fn record_outcome(
    metrics: &Metrics,
    route: &str,
    started: Instant,
    result: &Result<PredictionResponse, SegmentationError>,
) {
    let outcome = match result {
        Ok(response) => {
            metrics.record_prediction_duration(started.elapsed().as_secs_f64() * 1000.0, route);
            if let Some(vessel_metrics) = &response.vessel_metrics {
                metrics.record_vessel_coverage(vessel_metrics.vessel_percentage, route);
            }
            "success"
        }
        Err(SegmentationError::InvalidInput(_)) => "invalid_input",
        Err(SegmentationError::Busy) => "rejected_busy",
        Err(_) => "error",
    };
    metrics.record_prediction(outcome);
}
