//! モデル学習

use anyhow::Result;

use crate::model::config::AppConfig;
use crate::pipeline::matrix::{get_matrix_form, normalize_input};
use crate::pipeline::predictor::{TrainingRun, WaterPredictor};
use crate::types::Tile;

/// タイル集合でモデルを学習する
///
/// 行列化・正規化したうえで `WaterPredictor::fit` に委譲する。
/// 検証用の割合は `config.training.validation_ratio`、ログは `<tensorboard_dir>/<model_id>`。
pub fn train_model<P: WaterPredictor>(
    model: P,
    features: &[Tile],
    labels: &[Tile],
    tile_size: usize,
    model_id: &str,
    config: &AppConfig,
) -> Result<P> {
    let (x, y) = get_matrix_form(features, labels, tile_size)?;
    let x = normalize_input(&x);

    let run = TrainingRun {
        run_id: model_id.to_string(),
        validation_ratio: config.training.validation_ratio,
        log_dir: config.run_log_dir(model_id),
    };

    log::info!(
        "Start training. ({} tiles, {}x{}x{}, run {})",
        x.dim().0,
        tile_size,
        tile_size,
        x.dim().3,
        model_id
    );
    model.fit(&x, &y, &run)
}
