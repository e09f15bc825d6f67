pub mod matrix;
pub mod predictor;
pub mod reassembly;
pub mod metrics;
pub mod training;
pub mod evaluation;

pub use matrix::{get_matrix_form, normalize_input};
pub use predictor::{TrainingRun, WaterPredictor};
pub use reassembly::{companion_path, group_by_source, source_image_name, visualise_predictions, PredictedTile};
pub use metrics::{precision_recall_curve, save_precision_recall, PrecisionRecallCurve};
pub use training::train_model;
pub use evaluation::{evaluate_model, threshold_predictions, EvaluationReport, WATER_THRESHOLD};
