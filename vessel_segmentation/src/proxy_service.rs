use crate::{
    config::{ModelConfig, TensorLayout},
    model_service::{ModelDescription, ModelError, ModelService},
};
use async_trait::async_trait;
use ndarray::{Array2, Array4, ArrayD, Ix4};

const GREEN: usize = 1;
const WINDOW_RADIUS: usize = 3;
const GAIN: f32 = 40.0;
const MARGIN: f32 = 0.02;

/// Stand-in used when no trained weights are deployed.
///
/// Vessels in slit-lamp and fundus images show up as thin structures darker
/// than their surroundings, strongest in the green channel. The likelihood of
/// a pixel is `sigmoid(GAIN * (local_mean - pixel - MARGIN))` where the mean
/// is taken over a 7x7 box.
#[derive(Clone, Debug)]
pub struct ProxyModelService {
    input_size: (u32, u32),
    layout: TensorLayout,
}

impl ProxyModelService {
    pub fn new(model_config: &ModelConfig) -> Self {
        Self {
            input_size: (model_config.input_width, model_config.input_height),
            layout: model_config.layout,
        }
    }

    fn green_channel(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        let shape = input.shape();
        let plane = match self.layout {
            TensorLayout::Nhwc if shape[3] == 3 => input.slice(ndarray::s![0, .., .., GREEN]),
            TensorLayout::Nchw if shape[1] == 3 => input.slice(ndarray::s![0, GREEN, .., ..]),
            _ => {
                return Err(ModelError::Inference(format!(
                    "expected a 3-channel {} tensor, got shape {:?}",
                    self.layout.as_str(),
                    shape
                )))
            }
        };
        Ok(plane.to_owned())
    }

    pub fn run_inference(&self, input: &Array4<f32>) -> Result<ArrayD<f32>, ModelError> {
        let green = self.green_channel(input)?;
        let (h, w) = green.dim();
        let probabilities = Self::likelihood(&green);

        let shape = match self.layout {
            TensorLayout::Nhwc => Ix4(1, h, w, 1),
            TensorLayout::Nchw => Ix4(1, 1, h, w),
        };
        let output = probabilities
            .into_shape_with_order(shape)
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        Ok(output.into_dyn())
    }

    fn likelihood(green: &Array2<f32>) -> Array2<f32> {
        let (h, w) = green.dim();
        // summed-area table with a zero row and column
        let mut integral = Array2::<f64>::zeros((h + 1, w + 1));
        for y in 0..h {
            let mut row_sum = 0.0;
            for x in 0..w {
                row_sum += green[[y, x]] as f64;
                integral[[y + 1, x + 1]] = integral[[y, x + 1]] + row_sum;
            }
        }

        Array2::from_shape_fn((h, w), |(y, x)| {
            let y0 = y.saturating_sub(WINDOW_RADIUS);
            let x0 = x.saturating_sub(WINDOW_RADIUS);
            let y1 = (y + WINDOW_RADIUS + 1).min(h);
            let x1 = (x + WINDOW_RADIUS + 1).min(w);
            let area = ((y1 - y0) * (x1 - x0)) as f64;
            let sum = integral[[y1, x1]] - integral[[y0, x1]] - integral[[y1, x0]]
                + integral[[y0, x0]];
            let mean = (sum / area) as f32;
            let z = GAIN * (mean - green[[y, x]] - MARGIN);
            1.0 / (1.0 + (-z).exp())
        })
    }
}

#[async_trait]
impl ModelService for ProxyModelService {
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
            backend: "proxy",
            model_path: None,
            num_sessions: 0,
            inputs: vec!["image".to_string()],
            outputs: vec!["vessel_probability".to_string()],
        }
    }
}
