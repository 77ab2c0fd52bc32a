mod health;
mod metrics;
mod model_info;
mod predict;

use crate::{model_service::ModelService, segmentation::SegmentationError, server::SharedState};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use thiserror::Error;
use vessel_api::ErrorBody;

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::healthcheck::<M>))
        .route("/predict", post(predict::predict::<M>))
        .route("/predict/file", post(predict::predict_file::<M>))
        .route("/model/info", get(model_info::model_info::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{1}")]
    Rejected(StatusCode, String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(status, _) => *status,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SegmentationError> for ApiError {
    fn from(err: SegmentationError) -> Self {
        match err {
            SegmentationError::InvalidInput(message) => ApiError::BadRequest(message),
            SegmentationError::Busy => ApiError::ServiceUnavailable(err.to_string()),
            other => ApiError::Internal(format!("Prediction failed: {}", other)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Rejected(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            status_code: status.as_u16(),
            detail: None,
        };
        (status, Json(body)).into_response()
    }
}
