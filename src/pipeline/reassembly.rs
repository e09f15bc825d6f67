//! タイルごとの予測結果を元ラスタの画素グリッドに戻す

use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};
use crate::raster::{image_from_tiles, overlay_bitmap, read_raster_info};
use crate::types::{Tile, TilePosition};

/// 位置情報付きの予測タイル
#[derive(Debug, Clone, Copy)]
pub struct PredictedTile<'a> {
    pub pixels: ArrayView2<'a, u8>,
    pub position: TilePosition,
}

/// ファイル名から拡張子を除いた画像名
pub fn source_image_name(path: &Path) -> PipelineResult<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::SourceWithoutName(path.to_path_buf()))
}

/// 元画像に対応する WGS84 コンパニオンラスタのパス
pub fn companion_path(wgs84_dir: &Path, source: &Path) -> PipelineResult<PathBuf> {
    Ok(wgs84_dir.join(format!("{}_wgs84.tif", source_image_name(source)?)))
}

/// 予測行列の各行を元画像ごとにまとめる
///
/// `predictions` は (N, tile_size * tile_size)。行 i はラベルタイル i に対応する。
pub fn group_by_source<'a>(
    predictions: &'a Array2<u8>,
    labels: &[Tile],
    tile_size: usize,
) -> PipelineResult<BTreeMap<PathBuf, Vec<PredictedTile<'a>>>> {
    let expected = vec![labels.len(), tile_size * tile_size];
    if predictions.shape() != expected.as_slice() {
        return Err(PipelineError::PredictionShape {
            actual: predictions.shape().to_vec(),
            expected,
        });
    }

    let mut groups: BTreeMap<PathBuf, Vec<PredictedTile<'a>>> = BTreeMap::new();
    for (row, label) in predictions.outer_iter().zip(labels) {
        let pixels = row
            .into_shape_with_order((tile_size, tile_size))
            .map_err(|_| PipelineError::PredictionShape {
                actual: predictions.shape().to_vec(),
                expected: vec![labels.len(), tile_size * tile_size],
            })?;
        groups
            .entry(label.source.clone())
            .or_default()
            .push(PredictedTile {
                pixels,
                position: label.position,
            });
    }

    Ok(groups)
}

/// 予測ビットマップを元画像ごとのGeoTIFFとして書き出す
///
/// 元画像1枚につき `<out_dir>/<画像名>.tif` を1つ作成し、書き出したパスを返す。
pub fn visualise_predictions(
    predictions: &Array2<u8>,
    labels: &[Tile],
    tile_size: usize,
    out_dir: &Path,
    wgs84_dir: &Path,
) -> PipelineResult<Vec<PathBuf>> {
    log::info!("Create .tif result files.");
    let groups = group_by_source(predictions, labels, tile_size)?;

    std::fs::create_dir_all(out_dir)?;
    let mut written = Vec::with_capacity(groups.len());

    for (source, tiles) in groups {
        let name = source_image_name(&source)?;
        let companion = companion_path(wgs84_dir, &source)?;
        let info = read_raster_info(&companion)?;

        let bitmap = image_from_tiles(
            tiles.iter().map(|t| (t.pixels, t.position)),
            tile_size,
            info.shape(),
        )?;

        let out_path = out_dir.join(format!("{}.tif", name));
        overlay_bitmap(&bitmap, &info.georef, &out_path)?;

        log::info!(
            "{} タイルから {}x{} のビットマップを書き出しました: {}",
            tiles.len(),
            info.height,
            info.width,
            out_path.display()
        );
        written.push(out_path);
    }

    Ok(written)
}
