use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use vessel_api::{DataUri, DataUriError, PredictionResponse, VesselMetrics};

pub const SUMMARY_FILE: &str = "vessel_analysis_results.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Response does not contain a segmentation mask")]
    MissingMask,
    #[error("Invalid image data in response: {0}")]
    DataUri(#[from] DataUriError),
    #[error("Failed to write results: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize results: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedImages {
    pub mask: PathBuf,
    pub overlay: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSummary {
    /// Unix time in milliseconds.
    pub timestamp: u64,
    pub source: String,
    pub confidence_score: Option<f64>,
    pub processing_time: Option<f64>,
    pub vessel_metrics: Option<VesselMetrics>,
    pub mask_file: Option<String>,
    pub overlay_file: Option<String>,
}

impl AnalysisSummary {
    pub fn new(source: &str, response: &PredictionResponse, saved: Option<&SavedImages>) -> Self {
        let file_name = |path: &Path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        };
        Self {
            timestamp: unix_millis(),
            source: source.to_string(),
            confidence_score: response.confidence_score,
            processing_time: response.processing_time,
            vessel_metrics: response.vessel_metrics.clone(),
            mask_file: saved.and_then(|s| file_name(&s.mask)),
            overlay_file: saved.and_then(|s| s.overlay.as_deref().and_then(file_name)),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Writes `<stem>_mask.png` and, when present, `<stem>_overlay.png` into `dir`.
pub fn save_mask(
    response: &PredictionResponse,
    dir: &Path,
    stem: &str,
) -> Result<SavedImages, ReportError> {
    let mask_uri = response
        .segmentation_mask
        .as_deref()
        .ok_or(ReportError::MissingMask)?;

    std::fs::create_dir_all(dir)?;

    let mask = dir.join(format!("{}_mask.png", stem));
    std::fs::write(&mask, DataUri::parse(mask_uri)?.data)?;

    let overlay = match response.overlay_image.as_deref() {
        Some(overlay_uri) => {
            let path = dir.join(format!("{}_overlay.png", stem));
            std::fs::write(&path, DataUri::parse(overlay_uri)?.data)?;
            Some(path)
        }
        None => None,
    };

    Ok(SavedImages { mask, overlay })
}

pub fn write_summary(summary: &AnalysisSummary, dir: &Path) -> Result<PathBuf, ReportError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(SUMMARY_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(summary)?)?;
    Ok(path)
}
