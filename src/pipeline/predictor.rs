//! 水域予測モデルの抽象

use anyhow::Result;
use ndarray::{Array2, Array4};
use std::path::PathBuf;

/// 1回の学習実行の条件
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRun {
    /// 実行ID（ログのサブディレクトリ名）
    pub run_id: String,
    /// 検証用に取り分けるサンプルの割合
    pub validation_ratio: f32,
    /// 学習ログの出力先
    pub log_dir: PathBuf,
}

/// 学習可能な水域予測器
///
/// - `features`: 正規化済み (N, tile_size, tile_size, channels)
/// - `labels`: 0/1 の (N, tile_size * tile_size)
/// - `predict` の戻り値: 画素ごとの水域確率 (N, tile_size * tile_size)
pub trait WaterPredictor: Sized {
    fn fit(self, features: &Array4<f32>, labels: &Array2<u8>, run: &TrainingRun) -> Result<Self>;

    fn predict(&self, features: &Array4<f32>) -> Result<Array2<f32>>;
}
