use crate::{
    config::{ModelConfig, TensorLayout},
    model_service::{ModelDescription, ModelError, ModelService},
};
use async_trait::async_trait;
use ndarray::{Array4, ArrayD};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// ONNX Runtime backed U-Net with a round-robin pool of sessions.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input_names: Arc<Vec<String>>,
    output_names: Arc<Vec<String>>,
    model_path: String,
    input_size: (u32, u32),
    layout: TensorLayout,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let path = model_config.get_path();
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;

        let (input_names, output_names) = {
            let first = sessions[0]
                .lock()
                .map_err(|e| ModelError::Poisoned(e.to_string()))?;
            (
                first.inputs.iter().map(|i| i.name.clone()).collect::<Vec<_>>(),
                first.outputs.iter().map(|o| o.name.clone()).collect::<Vec<_>>(),
            )
        };
        if output_names.is_empty() {
            return Err(ModelError::Load(format!(
                "{} declares no outputs",
                path.display()
            )));
        }

        tracing::info!(
            inputs = ?input_names,
            outputs = ?output_names,
            "Created {} ONNX sessions from {}",
            num_instances,
            path.display()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            input_names: Arc::new(input_names),
            output_names: Arc::new(output_names),
            model_path: path.display().to_string(),
            input_size: (model_config.input_width, model_config.input_height),
            layout: model_config.layout,
        })
    }

    pub fn run_inference(&self, input: &Array4<f32>) -> Result<ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs[self.output_names[0].as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelError::Inference(format!("invalid tensor shape: {}", e)))
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>, ModelError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.run_inference(&input)).await?
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn describe(&self) -> ModelDescription {
        ModelDescription {
            backend: "onnx",
            model_path: Some(self.model_path.clone()),
            num_sessions: self.sessions.len(),
            inputs: self.input_names.as_ref().clone(),
            outputs: self.output_names.as_ref().clone(),
        }
    }
}
