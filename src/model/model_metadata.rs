//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 学習時のタイルサイズ（正方形）
    pub tile_size: usize,

    /// 入力画像のチャネル数
    pub num_channels: usize,

    /// 学習エポック数
    pub num_epochs: u32,

    /// 学習率
    pub learning_rate: f64,

    /// 学習の実行ID
    pub run_id: String,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        tile_size: usize,
        num_channels: usize,
        num_epochs: u32,
        learning_rate: f64,
        run_id: impl Into<String>,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            tile_size,
            num_channels,
            num_epochs,
            learning_rate,
            run_id: run_id.into(),
            trained_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
