use crate::upload::ImageUpload;
use rand::Rng;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use vessel_api::{
    ErrorBody, HealthResponse, ModelInfo, PredictionRequest, PredictionResponse,
    DEFAULT_MODEL_NAME,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
const JITTER: f64 = 0.1;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Cannot connect to the segmentation service. Please ensure the backend is running.")]
    Connection(#[source] reqwest::Error),
    #[error("Request to the segmentation service timed out")]
    Timeout(#[source] reqwest::Error),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Analysis(String),
    #[error("Segmentation service is not ready after {0} attempts")]
    NotReady(u32),
    #[error("Unexpected response from the segmentation service: {0}")]
    Http(#[source] reqwest::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            ClientError::Connection(err)
        } else if err.is_timeout() {
            ClientError::Timeout(err)
        } else {
            ClientError::Http(err)
        }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationClient {
    http: Client,
    base_url: String,
}

impl SegmentationClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, upload), fields(file = %upload.file_name))]
    pub async fn predict(
        &self,
        upload: &ImageUpload,
        include_overlay: bool,
    ) -> Result<PredictionResponse, ClientError> {
        let request = PredictionRequest {
            image: upload.to_data_uri(),
            model_name: Some(DEFAULT_MODEL_NAME.to_string()),
            include_overlay,
        };

        let resp = self
            .http
            .post(format!("{}/predict", self.base_url))
            .json(&request)
            .send()
            .await?;
        let prediction: PredictionResponse = parse_response(resp).await?;

        if !prediction.success {
            let message = prediction
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Analysis failed".to_string());
            return Err(ClientError::Analysis(message));
        }
        Ok(prediction)
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        parse_response(resp).await
    }

    pub async fn model_info(&self) -> Result<ModelInfo, ClientError> {
        let resp = self
            .http
            .get(format!("{}/model/info", self.base_url))
            .send()
            .await?;
        parse_response(resp).await
    }

    /// Polls `/health` until the service reports healthy.
    pub async fn wait_until_ready(&self, max_retries: u32) -> Result<HealthResponse, ClientError> {
        for attempt in 0..=max_retries {
            match self.health().await {
                Ok(health) if health.is_healthy() => return Ok(health),
                Ok(health) => tracing::debug!("Service reported {}", health.status),
                Err(e) => tracing::debug!("Health check attempt {} failed: {}", attempt + 1, e),
            }
            if attempt < max_retries {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
        Err(ClientError::NotReady(max_retries + 1))
    }
}

async fn parse_response<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) if !body.message().is_empty() => body.message().to_string(),
        _ if !text.trim().is_empty() => text,
        _ => format!("Request failed with status {}", status),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// 50 ms doubling up to 1 s, with ±10% jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_BACKOFF);
    let factor = rand::rng().random_range(1.0 - JITTER..=1.0 + JITTER);
    base.mul_f64(factor)
}
