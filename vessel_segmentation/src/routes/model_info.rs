use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use vessel_api::ModelInfo;

pub async fn model_info<M: ModelService>(State(state): State<SharedState<M>>) -> Json<ModelInfo> {
    Json(state.segmentation.model_info())
}
