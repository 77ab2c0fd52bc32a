use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL_NAME: &str = "unet_eye_segmentation";

fn default_model_name() -> Option<String> {
    Some(DEFAULT_MODEL_NAME.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionRequest {
    /// Base64 image, with or without a `data:` header.
    pub image: String,
    #[serde(default = "default_model_name")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub include_overlay: bool,
}

impl PredictionRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            model_name: default_model_name(),
            include_overlay: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VesselMetrics {
    pub total_pixels: u64,
    pub vessel_pixels: u64,
    pub vessel_ratio: f64,
    pub vessel_percentage: f64,
    pub num_vessel_regions: u64,
    pub average_region_size: f64,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResponse {
    pub success: bool,
    #[serde(default)]
    pub segmentation_mask: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel_metrics: Option<VesselMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_image: Option<String>,
}

impl PredictionResponse {
    pub fn success(
        segmentation_mask: String,
        confidence_score: f64,
        processing_time: f64,
        vessel_metrics: VesselMetrics,
    ) -> Self {
        Self {
            success: true,
            segmentation_mask: Some(segmentation_mask),
            confidence_score: Some(confidence_score),
            processing_time: Some(processing_time),
            message: Some("Segmentation completed successfully".to_string()),
            vessel_metrics: Some(vessel_metrics),
            overlay_image: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            segmentation_mask: None,
            confidence_score: None,
            processing_time: None,
            message: Some(message.into()),
            vessel_metrics: None,
            overlay_image: None,
        }
    }

    pub fn with_overlay(mut self, overlay_image: Option<String>) -> Self {
        self.overlay_image = overlay_image;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub version: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_error: Option<String>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub model_type: String,
    pub backend: String,
    pub model_path: Option<String>,
    /// `[height, width]`
    pub input_size: [u32; 2],
    pub input_layout: String,
    pub threshold: f32,
    pub num_sessions: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorBody {
    pub fn message(&self) -> &str {
        if self.error.is_empty() {
            self.detail.as_deref().unwrap_or("")
        } else {
            &self.error
        }
    }
}
