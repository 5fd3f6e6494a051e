//! ONNX inference module
//!
//! Loads an exported scoring network with tract-onnx. The graph takes one
//! user vector of shape `[1, num_movies]` and returns one score per movie.

use std::io::Cursor;
use tract_onnx::prelude::*;

use crate::error::{AppError, AppResult};
use crate::services::embedding::InferenceModule;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct OnnxModule {
    plan: OnnxPlan,
    input_len: usize,
}

impl OnnxModule {
    /// Parses and optimizes the graph with its input pinned to `[1, input_len]`
    pub fn from_bytes(bytes: &[u8], input_len: usize) -> TractResult<Self> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(bytes))?
            .with_input_fact(0, f32::fact([1, input_len]).into())?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self { plan, input_len })
    }
}

impl InferenceModule for OnnxModule {
    fn infer(&self, user_vector: &[f32]) -> AppResult<Vec<f32>> {
        if user_vector.len() != self.input_len {
            return Err(AppError::Inference(format!(
                "Expected a user vector of length {}, got {}",
                self.input_len,
                user_vector.len()
            )));
        }

        let input = tract_ndarray::Array2::from_shape_vec((1, self.input_len), user_vector.to_vec())
            .map_err(|e| AppError::Inference(format!("Invalid input shape: {}", e)))?;

        let outputs = self
            .plan
            .run(tvec!(Tensor::from(input).into_tvalue()))
            .map_err(|e| AppError::Inference(format!("ONNX inference failed: {}", e)))?;

        let scores = outputs
            .first()
            .ok_or_else(|| AppError::Inference("ONNX model produced no output".to_string()))?
            .to_array_view::<f32>()
            .map_err(|e| AppError::Inference(format!("Output extraction failed: {}", e)))?;

        Ok(scores.iter().copied().collect())
    }
}
