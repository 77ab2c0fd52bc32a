mod data_uri;
mod messages;

pub use data_uri::{DataUri, DataUriError};
pub use messages::{
    ErrorBody, HealthResponse, ModelInfo, PredictionRequest, PredictionResponse, VesselMetrics,
    DEFAULT_MODEL_NAME,
};

pub const API_VERSION: &str = "1.0.0";
