pub mod embedding;
pub mod factorization;
pub mod onnx;
pub mod predictor;
pub mod ranking;
pub mod recommendations;

pub use embedding::EmbeddingPredictor;
pub use factorization::FactorizationPredictor;
pub use predictor::{Prediction, Predictor};
pub use ranking::Diversifier;
pub use recommendations::RecommendationEngine;
