//! ONNX sound-event model executed with tract.
//!
//! Expects a YAMNet-style export: input 0 is a mono 16 kHz waveform of
//! fixed length, output 0 is a `[patches, classes]` score tensor.

use std::path::Path;

use tract_onnx::prelude::*;

use crate::error::ClassifierError;

use super::classifier::InferenceModel;

type Plan = TypedRunnableModel<TypedModel>;

pub struct TractModel {
    plan: Plan,
    input_len: usize,
}

impl TractModel {
    /// Load and optimize the model at `path` for a fixed input width.
    pub fn load(path: &Path, input_len: usize) -> Result<Self, ClassifierError> {
        let load_err = |e: TractError| ClassifierError::ModelLoad {
            reason: format!("{}: {:?}", path.display(), e),
        };

        if !path.exists() {
            return Err(ClassifierError::ModelLoad {
                reason: format!("{} not found", path.display()),
            });
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.with_input_fact(0, f32::fact([input_len]).into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(load_err)?;

        tracing::info!("[TractModel] Loaded {}", path.display());
        Ok(Self { plan, input_len })
    }
}

impl InferenceModel for TractModel {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn run(&mut self, input: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        let infer_err = |e: TractError| ClassifierError::Inference {
            reason: format!("{:?}", e),
        };

        let tensor = Tensor::from_shape(&[input.len()], input).map_err(infer_err)?;
        let outputs = self.plan.run(tvec!(tensor.into())).map_err(infer_err)?;
        let scores = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference {
                reason: "model produced no outputs".to_string(),
            })?
            .as_slice::<f32>()
            .map_err(infer_err)?
            .to_vec();
        Ok(scores)
    }
}
