//! 衛星画像タイルの水域予測パイプライン
//!
//! タイルを行列化してモデルを学習・評価し、タイルごとの予測を元ラスタの
//! 画素グリッドに戻して GeoTIFF と適合率-再現率曲線を出力します。

pub mod error;
pub mod types;
pub mod raster;
pub mod pipeline;
pub mod model;
#[cfg(feature = "ml")]
pub mod ml;

pub use error::{PipelineError, PipelineResult};
pub use types::{ImagePair, Tile, TilePosition};
pub use pipeline::{evaluate_model, train_model, EvaluationReport, TrainingRun, WaterPredictor};

use anyhow::{Context, Result};

/// 画像とマスクの組を特徴タイル・ラベルタイルに分割する
///
/// ラベルタイルの `source` は画像側のパスに揃える（予測ラスタの出力名になる）。
pub fn load_tile_pairs(pairs: &[ImagePair], tile_size: usize) -> Result<(Vec<Tile>, Vec<Tile>)> {
    let mut features = Vec::new();
    let mut labels = Vec::new();

    for pair in pairs {
        let image = raster::read_geotiff(&pair.image)
            .with_context(|| format!("画像の読み込みに失敗しました: {}", pair.image.display()))?;
        let mask = raster::read_bitmap(&pair.mask)
            .with_context(|| format!("マスクの読み込みに失敗しました: {}", pair.mask.display()))?;

        let (height, width, _) = image.pixels.dim();
        if mask.dim() != (height, width) {
            anyhow::bail!(
                "画像 {} ({}x{}) とマスク {} ({}x{}) のサイズが一致しません",
                pair.image.display(),
                height,
                width,
                pair.mask.display(),
                mask.dim().0,
                mask.dim().1
            );
        }

        let mask = mask.insert_axis(ndarray::Axis(2));
        features.extend(raster::create_tiles(&image.pixels, tile_size, &pair.image));
        labels.extend(raster::create_tiles(&mask, tile_size, &pair.image));
    }

    log::info!("{} 枚の画像から {} タイルを作成しました", pairs.len(), features.len());
    Ok((features, labels))
}
