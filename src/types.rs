use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 元ラスタ内でのタイル左上のピクセル位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePosition {
    pub row: usize,
    pub col: usize,
}

impl TilePosition {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// 衛星画像から切り出した正方形タイル
///
/// `pixels` は (tile_size, tile_size, channels)。ラベルタイルは channels = 1 の水域マスク。
#[derive(Debug, Clone)]
pub struct Tile {
    pub pixels: Array3<u8>,
    pub position: TilePosition,
    pub source: PathBuf,
}

impl Tile {
    pub fn new(pixels: Array3<u8>, position: TilePosition, source: impl Into<PathBuf>) -> Self {
        Self {
            pixels,
            position,
            source: source.into(),
        }
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }
}

/// 学習・評価用の画像とマスクの組
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePair {
    /// 衛星画像 (GeoTIFF)
    pub image: PathBuf,
    /// 水域マスク (単バンド GeoTIFF, 0/1)
    pub mask: PathBuf,
}
