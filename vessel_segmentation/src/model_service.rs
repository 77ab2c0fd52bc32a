use crate::config::TensorLayout;
use async_trait::async_trait;
use ndarray::{Array4, ArrayD};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("inference task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescription {
    pub backend: &'static str,
    pub model_path: Option<String>,
    pub num_sessions: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    /// Runs the network on a single preprocessed batch and returns the raw
    /// per-pixel vessel probabilities.
    async fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>, ModelError>;

    /// `(width, height)` expected by the network.
    fn input_size(&self) -> (u32, u32);

    fn layout(&self) -> TensorLayout;

    fn describe(&self) -> ModelDescription;
}
