//! パイプライン共通のエラー定義

use std::path::PathBuf;

use thiserror::Error;

/// タイル処理・ラスタ入出力・評価で発生するエラー
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("feature/label count mismatch: {features} feature tiles, {labels} label tiles")]
    ShapeMismatch { features: usize, labels: usize },

    #[error("no tiles given")]
    EmptyTileSet,

    #[error("tile {index} has shape {actual:?}, expected {expected:?}")]
    TileShape {
        index: usize,
        actual: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("prediction matrix has shape {actual:?}, expected {expected:?}")]
    PredictionShape {
        actual: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error(
        "tile at ({row}, {col}) of size {tile_size} does not fit into a {height}x{width} bitmap"
    )]
    TileOutOfBounds {
        row: usize,
        col: usize,
        tile_size: usize,
        height: usize,
        width: usize,
    },

    #[error("companion raster not found: {0}")]
    CompanionNotFound(PathBuf),

    #[error("source image path has no file name: {0}")]
    SourceWithoutName(PathBuf),

    #[error("unsupported raster {path}: {reason}")]
    UnsupportedRaster { path: PathBuf, reason: String },

    #[error("invalid precision-recall input: {0}")]
    InvalidCurveInput(String),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("pickle error: {0}")]
    Pickle(#[from] serde_pickle::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
