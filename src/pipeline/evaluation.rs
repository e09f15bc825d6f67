//! 学習済みモデルの評価

use anyhow::{Context, Result};
use ndarray::Array2;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::model::config::AppConfig;
use crate::pipeline::matrix::{get_matrix_form, normalize_input};
use crate::pipeline::metrics::{precision_recall_curve, save_precision_recall, PrecisionRecallCurve};
use crate::pipeline::predictor::WaterPredictor;
use crate::pipeline::reassembly::visualise_predictions;
use crate::types::Tile;

/// 水域と判定する確率の閾値
pub const WATER_THRESHOLD: f32 = 0.5;

/// 確率を 0/1 に2値化する（閾値ちょうどは1）
pub fn threshold_predictions(predictions: &Array2<f32>) -> Array2<u8> {
    predictions.mapv(|p| u8::from(p >= WATER_THRESHOLD))
}

/// 評価結果
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    /// 元画像ごとに書き出した予測GeoTIFF
    pub raster_paths: Vec<PathBuf>,
    pub curve: PrecisionRecallCurve,
    pub average_precision: f64,
    pub pickle_path: PathBuf,
    pub plot_path: PathBuf,
    /// 水域と予測した画素数
    pub predicted_water_pixels: usize,
    /// 正解マスク上の水域画素数
    pub labeled_water_pixels: usize,
}

/// モデルを評価し、予測ラスタと適合率-再現率曲線を `out_path` に書き出す
pub fn evaluate_model<P: WaterPredictor>(
    model: &P,
    features: &[Tile],
    labels: &[Tile],
    tile_size: usize,
    out_path: &Path,
    config: &AppConfig,
) -> Result<EvaluationReport> {
    log::info!("Start evaluating model.");
    let (x, y_true) = get_matrix_form(features, labels, tile_size)?;
    let x = normalize_input(&x);

    let y_predicted = model.predict(&x).context("inference failed")?;
    let expected = [labels.len(), tile_size * tile_size];
    if y_predicted.shape() != expected.as_slice() {
        return Err(PipelineError::PredictionShape {
            actual: y_predicted.shape().to_vec(),
            expected: expected.to_vec(),
        }
        .into());
    }

    let predicted_bitmap = threshold_predictions(&y_predicted);
    let raster_paths = visualise_predictions(
        &predicted_bitmap,
        labels,
        tile_size,
        out_path,
        &config.paths.wgs84_dir,
    )?;

    log::info!("Calculate precision recall curve.");
    let y_true_flat: Vec<u8> = y_true.iter().copied().collect();
    let y_predicted_flat: Vec<f32> = y_predicted.iter().copied().collect();
    let curve = precision_recall_curve(&y_true_flat, &y_predicted_flat)?;
    let (pickle_path, plot_path) = save_precision_recall(&curve, out_path)?;

    let average_precision = curve.average_precision();
    let predicted_water_pixels = predicted_bitmap.iter().filter(|v| **v == 1).count();
    let labeled_water_pixels = y_true_flat.iter().filter(|v| **v != 0).count();
    log::info!(
        "評価完了: AP {:.4}, 予測水域 {} 画素 / 正解水域 {} 画素, ラスタ {} 枚",
        average_precision,
        predicted_water_pixels,
        labeled_water_pixels,
        raster_paths.len()
    );

    Ok(EvaluationReport {
        raster_paths,
        curve,
        average_precision,
        pickle_path,
        plot_path,
        predicted_water_pixels,
        labeled_water_pixels,
    })
}
