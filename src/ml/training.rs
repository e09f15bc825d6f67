//! burn によるモデル学習

use anyhow::Result;
use ndarray::{Array2, Array4};
use rand::seq::SliceRandom;
use rand::SeedableRng;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::InMemDataset,
    },
    lr_scheduler::exponential::{ExponentialLrScheduler, ExponentialLrSchedulerConfig},
    module::{AutodiffModule, Module},
    optim::{momentum::MomentumConfig, SgdConfig},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::LossMetric, LearnerBuilder, LearningStrategy, RegressionOutput, TrainOutput,
        TrainStep, ValidStep,
    },
};

use crate::ml::ml_model::{ModelConfig, WaterNet};
use crate::model::config::TrainingSettings;
use crate::pipeline::predictor::{TrainingRun, WaterPredictor};

/// 1タイル分の学習データ
#[derive(Clone, Debug)]
pub struct WaterItem {
    /// 正規化済み画素 (C, H, W) の順で平坦化
    pub pixels: Vec<f32>,
    /// 0/1 マスク (H * W)
    pub mask: Vec<i64>,
}

/// 行列形式のデータを (C, H, W) 順のアイテムに変換する
pub fn to_items(features: &Array4<f32>, labels: &Array2<u8>) -> Vec<WaterItem> {
    features
        .outer_iter()
        .zip(labels.outer_iter())
        .map(|(tile, mask)| WaterItem {
            pixels: tile.permuted_axes([2, 0, 1]).iter().copied().collect(),
            mask: mask.iter().map(|v| i64::from(*v)).collect(),
        })
        .collect()
}

/// シード付きシャッフルの後、末尾 `validation_ratio` を検証用に分ける
///
/// サンプルが2つ以上あり割合が正なら、検証用は最低1つ。
pub fn split_items(
    mut items: Vec<WaterItem>,
    validation_ratio: f32,
    seed: u64,
) -> (Vec<WaterItem>, Vec<WaterItem>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let total_len = items.len();
    let mut valid_len = (total_len as f32 * validation_ratio.clamp(0.0, 1.0)).round() as usize;
    if valid_len == 0 && validation_ratio > 0.0 && total_len >= 2 {
        valid_len = 1;
    }
    let valid_len = valid_len.min(total_len.saturating_sub(1));

    let valid = items.split_off(total_len - valid_len);
    (items, valid)
}

/// バッチャー
#[derive(Clone)]
pub struct WaterBatcher<B: Backend> {
    device: B::Device,
    num_channels: usize,
    tile_size: usize,
}

impl<B: Backend> WaterBatcher<B> {
    pub fn new(device: B::Device, num_channels: usize, tile_size: usize) -> Self {
        Self {
            device,
            num_channels,
            tile_size,
        }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct WaterBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 2, Int>,
}

impl<B: Backend> Batcher<B, WaterItem, WaterBatch<B>> for WaterBatcher<B> {
    fn batch(&self, items: Vec<WaterItem>, _device: &B::Device) -> WaterBatch<B> {
        let device = &self.device;
        let batch_size = items.len();
        let tile_size = self.tile_size;
        let pixels_per_tile = tile_size * tile_size;

        let mut all_pixels = Vec::with_capacity(batch_size * self.num_channels * pixels_per_tile);
        let mut all_targets = Vec::with_capacity(batch_size * pixels_per_tile);
        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            all_targets.extend_from_slice(&item.mask);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device).reshape([
            batch_size,
            self.num_channels,
            tile_size,
            tile_size,
        ]);
        let targets = Tensor::<B, 1, Int>::from_ints(all_targets.as_slice(), device)
            .reshape([batch_size, pixels_per_tile]);

        WaterBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<WaterBatch<B>, RegressionOutput<B>> for WaterNet<B> {
    fn step(&self, batch: WaterBatch<B>) -> TrainOutput<RegressionOutput<B>> {
        let item = self.forward_regression(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<WaterBatch<B>, RegressionOutput<B>> for WaterNet<B> {
    fn step(&self, batch: WaterBatch<B>) -> RegressionOutput<B> {
        self.forward_regression(batch.images, batch.targets)
    }
}

/// 設定の減衰率から指数減衰の学習率スケジューラを作る
pub fn lr_scheduler(training: &TrainingSettings) -> Result<ExponentialLrScheduler> {
    ExponentialLrSchedulerConfig::new(training.learning_rate, training.lr_gamma()?)
        .init()
        .map_err(|e| anyhow::anyhow!("学習率スケジューラの初期化エラー: {}", e))
}

/// burn バックエンドの水域予測器
pub struct BurnWaterPredictor<B: AutodiffBackend> {
    pub(crate) model: WaterNet<B>,
    pub(crate) model_config: ModelConfig,
    pub(crate) training: TrainingSettings,
    pub(crate) device: B::Device,
}

impl<B: AutodiffBackend> BurnWaterPredictor<B> {
    /// 未学習のモデルで初期化
    pub fn new(model_config: ModelConfig, training: TrainingSettings, device: B::Device) -> Result<Self> {
        let model = model_config.init::<B>(&device)?;
        Ok(Self {
            model,
            model_config,
            training,
            device,
        })
    }

    /// 保存済みの重みから復元
    pub fn from_bytes(
        model_config: ModelConfig,
        training: TrainingSettings,
        model_binary: Vec<u8>,
        device: B::Device,
    ) -> Result<Self> {
        let model = model_config.init::<B>(&device)?;
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        Ok(Self {
            model: model.load_record(record),
            model_config,
            training,
            device,
        })
    }

    /// 重みをバイナリに変換
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        recorder
            .record(self.model.clone().into_record(), ())
            .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn num_params(&self) -> usize {
        self.model.num_params()
    }
}

impl<B: AutodiffBackend> WaterPredictor for BurnWaterPredictor<B> {
    fn fit(self, features: &Array4<f32>, labels: &Array2<u8>, run: &TrainingRun) -> Result<Self> {
        let (_, height, width, channels) = features.dim();
        if height != self.model_config.tile_size
            || width != self.model_config.tile_size
            || channels != self.model_config.num_channels
        {
            anyhow::bail!(
                "入力形状 {:?} がモデル設定 ({}x{}x{}) と一致しません",
                features.dim(),
                self.model_config.tile_size,
                self.model_config.tile_size,
                self.model_config.num_channels
            );
        }

        let items = to_items(features, labels);
        let (train_items, valid_items) = split_items(items, run.validation_ratio, self.training.seed);
        log::info!(
            "学習データ: {} 枚, 検証データ: {} 枚",
            train_items.len(),
            valid_items.len()
        );

        std::fs::create_dir_all(&run.log_dir)?;
        let artifact_dir = run.log_dir.to_string_lossy().to_string();

        let batcher_train = WaterBatcher::<B>::new(self.device.clone(), channels, height);
        let batcher_valid = WaterBatcher::<B::InnerBackend>::new(self.device.clone(), channels, height);
        let dataloader_train = DataLoaderBuilder::new(batcher_train)
            .batch_size(self.training.batch_size)
            .shuffle(self.training.seed)
            .num_workers(self.training.num_workers)
            .build(InMemDataset::new(train_items));
        let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
            .batch_size(self.training.batch_size)
            .num_workers(self.training.num_workers)
            .build(InMemDataset::new(valid_items));

        let optimizer = SgdConfig::new()
            .with_momentum(Some(MomentumConfig::new().with_momentum(self.training.momentum)))
            .init();

        let scheduler = lr_scheduler(&self.training)?;

        log::info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {} ({} ステップごとに x{}), ログ: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.lr_decay_steps,
            self.training.lr_decay,
            artifact_dir
        );

        let learner = LearnerBuilder::new(&artifact_dir)
            .metric_train_numeric(LossMetric::new())
            .metric_valid_numeric(LossMetric::new())
            .learning_strategy(LearningStrategy::SingleDevice(self.device.clone()))
            .num_epochs(self.training.num_epochs)
            .summary()
            .build(self.model, optimizer, scheduler);

        let model_trained = learner.fit(dataloader_train, dataloader_valid);
        log::info!("学習が完了しました (run {})", run.run_id);

        Ok(Self {
            model: model_trained.model,
            model_config: self.model_config,
            training: self.training,
            device: self.device,
        })
    }

    fn predict(&self, features: &Array4<f32>) -> Result<Array2<f32>> {
        crate::ml::inference::predict_probabilities(
            &self.model.valid(),
            features,
            self.training.batch_size,
            &self.device,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<WaterItem> {
        (0..n)
            .map(|i| WaterItem {
                pixels: vec![i as f32],
                mask: vec![i as i64],
            })
            .collect()
    }

    #[test]
    fn test_to_items_is_channel_first() {
        let features = Array4::from_shape_fn((1, 2, 2, 3), |(_, r, c, ch)| (ch * 100 + r * 10 + c) as f32);
        let labels = Array2::from_shape_vec((1, 4), vec![1u8, 0, 0, 1]).unwrap();

        let items = to_items(&features, &labels);
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].pixels,
            vec![0.0, 1.0, 10.0, 11.0, 100.0, 101.0, 110.0, 111.0, 200.0, 201.0, 210.0, 211.0]
        );
        assert_eq!(items[0].mask, vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_split_holds_out_ten_percent() {
        let (train, valid) = split_items(items(20), 0.1, 42);
        assert_eq!(train.len(), 18);
        assert_eq!(valid.len(), 2);

        let mut seen: Vec<i64> = train.iter().chain(&valid).map(|i| i.mask[0]).collect();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<i64>>());
    }

    #[test]
    fn test_split_is_seeded() {
        let first: Vec<i64> = split_items(items(10), 0.1, 7).1.iter().map(|i| i.mask[0]).collect();
        let second: Vec<i64> = split_items(items(10), 0.1, 7).1.iter().map(|i| i.mask[0]).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_split_small_sets() {
        let (train, valid) = split_items(items(3), 0.1, 1);
        assert_eq!((train.len(), valid.len()), (2, 1));

        let (train, valid) = split_items(items(1), 0.1, 1);
        assert_eq!((train.len(), valid.len()), (1, 0));

        let (train, valid) = split_items(items(5), 0.0, 1);
        assert_eq!((train.len(), valid.len()), (5, 0));
    }

    #[test]
    fn test_lr_scheduler_decays_per_step() {
        use burn::lr_scheduler::LrScheduler;

        let training = TrainingSettings::default();
        let mut scheduler = lr_scheduler(&training).unwrap();
        // step() の戻り値は「その更新で使う学習率」。1回目が初期値
        let rates: Vec<f64> = (0..=100).map(|_| scheduler.step()).collect();

        approx::assert_relative_eq!(rates[0], 0.005, max_relative = 1e-9);
        approx::assert_relative_eq!(rates[100], 0.005 * 0.002, max_relative = 1e-6);
        for (step, rate) in rates.iter().enumerate() {
            approx::assert_relative_eq!(
                *rate,
                training.learning_rate_at(step).unwrap(),
                max_relative = 1e-6
            );
        }
    }

    #[test]
    fn test_lr_scheduler_rejects_invalid_decay() {
        let training = TrainingSettings { lr_decay: 2.0, ..TrainingSettings::default() };
        assert!(lr_scheduler(&training).is_err());
    }

    #[test]
    fn test_batcher_shapes() {
        type B = burn_ndarray::NdArray<f32>;
        let device: <B as burn::tensor::backend::Backend>::Device = Default::default();
        let batcher = WaterBatcher::<B>::new(device.clone(), 1, 2);
        let batch: WaterBatch<B> = batcher.batch(
            vec![
                WaterItem { pixels: vec![0.0; 4], mask: vec![0, 1, 0, 1] },
                WaterItem { pixels: vec![1.0; 4], mask: vec![1, 1, 0, 0] },
            ],
            &device,
        );
        assert_eq!(batch.images.dims(), [2, 1, 2, 2]);
        assert_eq!(batch.targets.dims(), [2, 4]);
    }
}
