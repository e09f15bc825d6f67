//! タイル列から学習・推論用の行列を組み立てる

use ndarray::{Array, Array2, Array4, Axis, Dimension};

use crate::error::{PipelineError, PipelineResult};
use crate::types::Tile;

/// 画素値 [0, 255] を [0, 1] の f32 に変換する
pub fn normalize_input<D: Dimension>(features: &Array<u8, D>) -> Array<f32, D> {
    features.mapv(|v| f32::from(v) / 255.0)
}

/// 特徴タイルとラベルタイルを行列形式に変換する
///
/// # 戻り値
/// - 特徴行列 (N, tile_size, tile_size, channels)
/// - ラベル行列 (N, tile_size * tile_size)、各マスクを行優先で平坦化したもの
pub fn get_matrix_form(
    features: &[Tile],
    labels: &[Tile],
    tile_size: usize,
) -> PipelineResult<(Array4<u8>, Array2<u8>)> {
    if features.len() != labels.len() {
        return Err(PipelineError::ShapeMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }
    let first = features.first().ok_or(PipelineError::EmptyTileSet)?;
    let channels = first.channels();
    let n = features.len();

    let mut x = Array4::<u8>::zeros((n, tile_size, tile_size, channels));
    for (index, (tile, mut slot)) in features.iter().zip(x.axis_iter_mut(Axis(0))).enumerate() {
        if tile.pixels.dim() != (tile_size, tile_size, channels) {
            return Err(PipelineError::TileShape {
                index,
                actual: tile.pixels.shape().to_vec(),
                expected: vec![tile_size, tile_size, channels],
            });
        }
        slot.assign(&tile.pixels);
    }

    let pixels_per_tile = tile_size * tile_size;
    let mut y = Array2::<u8>::zeros((n, pixels_per_tile));
    for (index, (tile, mut row)) in labels.iter().zip(y.axis_iter_mut(Axis(0))).enumerate() {
        if tile.pixels.len() != pixels_per_tile {
            return Err(PipelineError::TileShape {
                index,
                actual: tile.pixels.shape().to_vec(),
                expected: vec![tile_size, tile_size, 1],
            });
        }
        for (dst, src) in row.iter_mut().zip(tile.pixels.iter()) {
            *dst = *src;
        }
    }

    Ok((x, y))
}
