pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{ModelConfig, WaterNet};
pub use training::{BurnWaterPredictor, WaterBatch, WaterBatcher, WaterItem};
pub use inference::{load_predictor, predict_probabilities, save_predictor};
