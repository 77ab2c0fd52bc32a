use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde_json::{json, Value};
use tracing::instrument;
use vessel_api::{HealthResponse, API_VERSION};

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Eye Vessel Segmentation API",
        "version": API_VERSION,
        "description": "API for segmenting blood vessels in slit-lamp eye images",
        "endpoints": {
            "health": "/health",
            "predict": "/predict",
            "predict_file": "/predict/file",
            "model_info": "/model/info",
            "metrics": "/metrics"
        }
    }))
}

#[instrument(skip(state))]
pub async fn healthcheck<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> Json<HealthResponse> {
    Json(state.segmentation.health_check().await)
}
