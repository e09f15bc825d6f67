//! モデル推論と学習済みモデルの保存・読み込み

use anyhow::Result;
use ndarray::{Array2, Array4};
use std::path::{Path, PathBuf};

use burn::tensor::{backend::{AutodiffBackend, Backend}, Tensor};

use crate::ml::ml_model::{ModelConfig, WaterNet};
use crate::ml::training::BurnWaterPredictor;
use crate::model::config::TrainingSettings;
use crate::model::{load_model_with_metadata, save_model_with_metadata, ModelMetadata};

/// バッチごとに順伝播し、画素ごとの水域確率 (N, size * size) を返す
pub fn predict_probabilities<B: Backend>(
    model: &WaterNet<B>,
    features: &Array4<f32>,
    batch_size: usize,
    device: &B::Device,
) -> Result<Array2<f32>> {
    let (n, height, width, channels) = features.dim();
    let pixels_per_tile = height * width;
    let batch_size = batch_size.max(1);
    let mut probabilities = Vec::with_capacity(n * pixels_per_tile);

    for start in (0..n).step_by(batch_size) {
        let end = (start + batch_size).min(n);
        let batch = features.slice(ndarray::s![start..end, .., .., ..]);

        // (N, H, W, C) -> (N, C, H, W)
        let data: Vec<f32> = batch.permuted_axes([0, 3, 1, 2]).iter().copied().collect();
        let images = Tensor::<B, 1>::from_floats(data.as_slice(), device)
            .reshape([end - start, channels, height, width]);

        let output = model.forward_probabilities(images);
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;
        probabilities.extend(values);
    }

    Array2::from_shape_vec((n, pixels_per_tile), probabilities)
        .map_err(|e| anyhow::anyhow!("推論結果の形状エラー: {}", e))
}

/// 学習済みモデルをメタデータ付きで保存
pub fn save_predictor<B: AutodiffBackend>(
    predictor: &BurnWaterPredictor<B>,
    output_path: &Path,
    run_id: &str,
) -> Result<PathBuf> {
    let config = predictor.model_config();
    let metadata = ModelMetadata::new(
        config.tile_size,
        config.num_channels,
        predictor.training.num_epochs as u32,
        predictor.training.learning_rate,
        run_id,
    );
    let model_binary = predictor.to_bytes()?;
    log::info!(
        "モデルバイナリサイズ: {} バイト ({} パラメータ)",
        model_binary.len(),
        predictor.num_params()
    );
    save_model_with_metadata(output_path, &metadata, &model_binary)
}

/// 保存済みモデルを読み込む
pub fn load_predictor<B: AutodiffBackend>(
    model_path: &Path,
    training: TrainingSettings,
    device: B::Device,
) -> Result<(BurnWaterPredictor<B>, ModelMetadata)> {
    let (metadata, model_binary) = load_model_with_metadata(model_path)?;
    let model_config = ModelConfig::new(metadata.tile_size).with_num_channels(metadata.num_channels);
    let predictor = BurnWaterPredictor::from_bytes(model_config, training, model_binary, device)?;
    Ok((predictor, metadata))
}
